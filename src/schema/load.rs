// src/schema/load.rs

use super::types::{
    CategoricalColumnSpec, CategoricalMapping, Category, ColumnSpec, Dialect, Mapping,
    OriginalValue, Schema, TemplateMapping, ValueEntry,
};
use crate::convert::iri;
use crate::error::SchemaError;
use oxrdf::NamedNode;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Raw schema document. Both shapes deserialize into this; which sections
/// are present decides the mapping variant.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaDoc {
    #[serde(default)]
    dialect: Dialect,
    #[serde(default)]
    table_schema: Option<TableSchemaDoc>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    variables: Option<BTreeMap<String, VariableDoc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableSchemaDoc {
    #[serde(default)]
    about_url: Option<String>,
    #[serde(default)]
    primary_key: Option<String>,
    #[serde(default)]
    null: Option<String>,
    #[serde(default)]
    columns: Vec<ColumnSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariableDoc {
    category: Category,
    uri: String,
    #[serde(default)]
    original: Option<OriginalValue>,
    #[serde(default)]
    value_url: Option<String>,
    #[serde(default)]
    datatype: Option<String>,
    #[serde(default)]
    transform: Option<String>,
    #[serde(default)]
    values: Vec<ValueEntry>,
}

impl Schema {
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        from_doc(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, SchemaError> {
        from_doc(serde_json::from_reader(reader)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }

    /// Conventional location of the schema document next to a source file:
    /// `<source>-metadata.json`.
    pub fn metadata_path_for(source: &Path) -> PathBuf {
        let mut name = source.as_os_str().to_os_string();
        name.push("-metadata.json");
        PathBuf::from(name)
    }
}

fn from_doc(doc: SchemaDoc) -> Result<Schema, SchemaError> {
    if !doc.dialect.delimiter.is_ascii() {
        return Err(SchemaError::Dialect {
            field: "delimiter",
            value: doc.dialect.delimiter,
        });
    }
    if !doc.dialect.quote_char.is_ascii() {
        return Err(SchemaError::Dialect {
            field: "quoteChar",
            value: doc.dialect.quote_char,
        });
    }

    let mut derived_iris = Vec::new();
    let (mapping, primary_key) = match (doc.table_schema, doc.variables) {
        (Some(_), Some(_)) => return Err(SchemaError::MixedShapes),
        (None, None) => return Err(SchemaError::MissingShape),
        (Some(table), None) => {
            let about_url = table.about_url.ok_or_else(|| {
                SchemaError::Invalid("tableSchema.aboutUrl is required".to_string())
            })?;
            let mapping = Mapping::Templated(TemplateMapping {
                about_url,
                null: table.null,
                columns: table.columns,
            });
            (mapping, table.primary_key)
        }
        (None, Some(variables)) => {
            let dataset_name = doc
                .name
                .ok_or_else(|| SchemaError::Invalid("dataset name is required".to_string()))?;
            let dataset_uri = bake_fixed(
                doc.uri
                    .ok_or_else(|| SchemaError::Invalid("dataset uri is required".to_string()))?,
                &mut derived_iris,
            )?;

            let mut columns = Vec::with_capacity(variables.len());
            for (name, var) in variables {
                let predicate = bake_fixed(var.uri, &mut derived_iris)?;
                let original_predicate = match var.original.and_then(|o| o.uri) {
                    Some(uri) => Some(bake_fixed(uri, &mut derived_iris)?),
                    None => None,
                };
                // Keyed by raw label, the way the original builds its
                // values_dictionary.
                let values: HashMap<String, ValueEntry> = var
                    .values
                    .into_iter()
                    .map(|v| (v.label.clone().unwrap_or_default(), v))
                    .collect();
                columns.push(CategoricalColumnSpec {
                    name,
                    category: var.category,
                    predicate,
                    original_predicate,
                    value_url: var.value_url,
                    datatype: var.datatype,
                    transform: var.transform,
                    values,
                });
            }
            let mapping = Mapping::Categorical(CategoricalMapping {
                dataset_name,
                dataset_uri,
                columns,
            });
            (mapping, None)
        }
    };

    Ok(Schema {
        dialect: doc.dialect,
        mapping,
        primary_key,
        derived_iris,
    })
}

/// Bake a fixed (non-template) schema IRI eagerly. A rewrite is recorded so
/// the provenance assembler can link the baked IRI back to its spelling.
fn bake_fixed(raw: String, derived: &mut Vec<(NamedNode, String)>) -> Result<NamedNode, SchemaError> {
    let node = iri::bake(&raw)?;
    if node.as_str() != raw {
        debug!(original = %raw, baked = %node, "schema IRI rewritten while baking");
        derived.push((node.clone(), raw));
    }
    Ok(node)
}
