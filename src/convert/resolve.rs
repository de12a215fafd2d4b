// src/convert/resolve.rs

use super::iri;
use super::template::TemplateEngine;
use super::transform::TransformRegistry;
use super::Row;
use crate::error::{ColumnError, InvalidIri};
use crate::schema::{CategoricalColumnSpec, Category, ColumnSpec};
use crate::vocab;
use oxrdf::vocab::xsd;
use oxrdf::{Literal, NamedNode, Term};
use std::sync::Arc;

/// The reserved "not available" sentinel, in both accepted spellings.
const NOT_AVAILABLE: [&str; 2] = ["NA", "N/A"];

/// Run-level inputs the resolver needs besides the schema: the resource
/// namespace derived from the configured base IRI, the default
/// "unavailable" reference, and any extra null markers.
#[derive(Debug, Clone)]
pub struct ResolverEnv {
    pub resource_base: String,
    pub unavailable: NamedNode,
    pub null_markers: Vec<String>,
}

impl ResolverEnv {
    pub fn new(base: &str, null_markers: Vec<String>) -> Result<Self, InvalidIri> {
        let mut resource_base = base.to_string();
        if !resource_base.ends_with('/') {
            resource_base.push('/');
        }
        resource_base.push_str("resource/");
        let unavailable = iri::bake(&format!("{resource_base}NA"))?;
        Ok(Self {
            resource_base,
            unavailable,
            null_markers,
        })
    }
}

/// What one column contributes to its row: an optional subject override
/// (virtual columns with their own about-URL) and the predicate/object
/// pairs to emit.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub subject_override: Option<NamedNode>,
    pub outputs: Vec<(NamedNode, Term)>,
}

impl Resolution {
    fn emit(outputs: Vec<(NamedNode, Term)>) -> Option<Self> {
        Some(Self {
            subject_override: None,
            outputs,
        })
    }
}

/// Per-column literal-vs-reference decisions for both schema variants.
/// One resolver lives inside each RowProcessor, so the template cache is
/// worker-local and needs no synchronization.
#[derive(Debug)]
pub struct ValueResolver {
    env: ResolverEnv,
    transforms: Arc<TransformRegistry>,
    templates: TemplateEngine,
}

impl ValueResolver {
    pub fn new(env: ResolverEnv, transforms: Arc<TransformRegistry>) -> Self {
        Self {
            env,
            transforms,
            templates: TemplateEngine::new(),
        }
    }

    /// Render a URL pattern and bake the result. Relative renderings
    /// resolve against the resource base.
    pub fn render_iri(
        &mut self,
        pattern: &str,
        row: &Row,
        row_number: u64,
    ) -> Result<NamedNode, ColumnError> {
        let rendered = self.templates.render(pattern, row, row_number)?;
        Ok(iri::bake_or_resolve(&rendered, &self.env.resource_base)?)
    }

    /// Default predicate for a literal column without a property-URL.
    pub fn default_predicate(&self, column_name: &str) -> Result<NamedNode, ColumnError> {
        Ok(iri::bake(&format!(
            "{}{}",
            self.env.resource_base, column_name
        ))?)
    }

    /// Minted subject for one observation of a categorical dataset.
    pub fn observation_iri(
        &self,
        dataset_name: &str,
        row_number: u64,
    ) -> Result<NamedNode, ColumnError> {
        Ok(iri::bake(&format!(
            "{}observation/{}/{}",
            self.env.resource_base, dataset_name, row_number
        ))?)
    }

    fn is_null(&self, cell: &str, column_null: Option<&str>, schema_null: Option<&str>) -> bool {
        cell.is_empty()
            || column_null == Some(cell)
            || schema_null == Some(cell)
            || self.null_markers_contain(cell)
    }

    fn null_markers_contain(&self, cell: &str) -> bool {
        self.env.null_markers.iter().any(|m| m == cell)
    }

    /// Resolve one template-driven column. `Ok(None)` means the null rule
    /// fired and the column contributes nothing for this row.
    pub fn resolve_templated(
        &mut self,
        column: &ColumnSpec,
        schema_null: Option<&str>,
        row: &Row,
        row_number: u64,
    ) -> Result<Option<Resolution>, ColumnError> {
        // Null checks only apply when the column has a source cell;
        // virtual columns have none.
        let cell = row.get(&column.name).map(str::to_string);
        if let Some(cell) = &cell {
            if self.is_null(cell, column.null.as_deref(), schema_null) {
                return Ok(None);
            }
        }

        let subject_override = match (column.is_virtual, &column.about_url) {
            (true, Some(pattern)) => Some(self.render_iri(pattern, row, row_number)?),
            _ => None,
        };

        let predicate = match &column.property_url {
            Some(pattern) => self.render_iri(pattern, row, row_number)?,
            None => self.default_predicate(&column.name)?,
        };

        if let Some(value_url) = &column.value_url {
            // Object reference: predicate and object both rendered.
            let object = self.render_iri(value_url, row, row_number)?;
            return Ok(Some(Resolution {
                subject_override,
                outputs: vec![(predicate, object.into())],
            }));
        }

        // Literal: explicit value template wins, else the raw cell.
        let value = match (&column.value, cell) {
            (Some(pattern), _) => self.templates.render(pattern, row, row_number)?,
            (None, Some(cell)) => cell,
            (None, None) => return Ok(None),
        };

        let datatype = column
            .datatype
            .as_deref()
            .map(resolve_datatype)
            .transpose()?;
        let literal = match (datatype, &column.lang) {
            (Some(dt), Some(lang_pattern)) if dt.as_str() == xsd::STRING.as_str() => {
                let tag = self
                    .templates
                    .render(lang_pattern, row, row_number)?
                    .to_ascii_lowercase();
                Literal::new_language_tagged_literal(value, tag.clone()).map_err(|e| {
                    ColumnError::LanguageTag {
                        tag,
                        reason: e.to_string(),
                    }
                })?
            }
            (Some(dt), _) => Literal::new_typed_literal(value, dt),
            (None, _) => Literal::new_simple_literal(value),
        };
        Ok(Some(Resolution {
            subject_override,
            outputs: vec![(predicate, literal.into())],
        }))
    }

    /// Resolve one categorical column against its values dictionary.
    pub fn resolve_categorical(
        &mut self,
        column: &CategoricalColumnSpec,
        row: &Row,
        row_number: u64,
    ) -> Result<Option<Resolution>, ColumnError> {
        let Some(cell) = row.get(&column.name).map(str::to_string) else {
            return Ok(None);
        };
        if self.is_null(&cell, None, None) {
            return Ok(None);
        }

        if NOT_AVAILABLE.contains(&cell.as_str()) {
            let mut outputs = vec![(
                column.predicate.clone(),
                self.env.unavailable.clone().into(),
            )];
            if let Some(original) = &column.original_predicate {
                // The original value comes from the source itself; the
                // dictionary rarely carries sentinel entries.
                outputs.push((original.clone(), Literal::new_simple_literal(cell).into()));
            }
            return Ok(Resolution::emit(outputs));
        }

        match column.category {
            Category::Other => {
                let value = match &column.transform {
                    Some(name) => {
                        let transform = self.transforms.get(name).ok_or_else(|| {
                            ColumnError::UnknownTransform { name: name.clone() }
                        })?;
                        transform(&cell)
                    }
                    None => column
                        .values
                        .get(&cell)
                        .and_then(|entry| entry.label.clone())
                        .ok_or_else(|| ColumnError::LookupMiss {
                            column: column.name.clone(),
                            value: cell.clone(),
                        })?,
                };
                let literal = match column.datatype.as_deref() {
                    Some(dt) => Literal::new_typed_literal(value, resolve_datatype(dt)?),
                    None => Literal::new_simple_literal(value),
                };
                let mut outputs = vec![(column.predicate.clone(), literal.into())];
                let original_label = column
                    .values
                    .get(&cell)
                    .and_then(|entry| entry.original.as_ref())
                    .and_then(|original| original.label.clone());
                if let (Some(predicate), Some(label)) =
                    (&column.original_predicate, original_label)
                {
                    outputs.push((predicate.clone(), Literal::new_simple_literal(label).into()));
                }
                Ok(Resolution::emit(outputs))
            }
            Category::Coded | Category::Identifier => {
                let value = match &column.value_url {
                    Some(pattern) => self.render_iri(pattern, row, row_number)?,
                    None => {
                        let uri = column
                            .values
                            .get(&cell)
                            .and_then(|entry| entry.uri.as_deref())
                            .ok_or_else(|| ColumnError::LookupMiss {
                                column: column.name.clone(),
                                value: cell.clone(),
                            })?;
                        iri::bake(uri)?
                    }
                };
                let mut outputs = vec![(column.predicate.clone(), value.into())];
                let original_uri = column
                    .values
                    .get(&cell)
                    .and_then(|entry| entry.original.as_ref())
                    .and_then(|original| original.uri.as_deref());
                if let (Some(predicate), Some(uri)) = (&column.original_predicate, original_uri) {
                    outputs.push((predicate.clone(), iri::bake(uri)?.into()));
                }
                Ok(Resolution::emit(outputs))
            }
        }
    }
}

/// Resolve a datatype spelling: a prefixed name through the prefix table,
/// a full IRI as-is, or a bare XSD name like `string` or `gYear`.
pub fn resolve_datatype(name: &str) -> Result<NamedNode, InvalidIri> {
    if let Some(expanded) = vocab::expand(name) {
        return iri::bake(&expanded);
    }
    if name.contains(':') {
        return iri::bake(name);
    }
    iri::bake(&format!("{}{}", vocab::PREFIXES["xsd"], name))
}
