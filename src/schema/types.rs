// src/schema/types.rs

use oxrdf::NamedNode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// CSV dialect knobs shared by both schema shapes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Dialect {
    pub delimiter: char,
    pub quote_char: char,
    pub encoding: String,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote_char: '"',
            encoding: "utf-8".to_string(),
        }
    }
}

/// A single column of a template-driven schema, as it appears in the
/// metadata document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "virtual", default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub about_url: Option<String>,
    #[serde(default)]
    pub property_url: Option<String>,
    #[serde(default)]
    pub value_url: Option<String>,
    /// Explicit value template; when absent the raw cell is the literal.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub datatype: Option<String>,
    /// Language template. Only honored when the datatype resolves to
    /// xsd:string.
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub null: Option<String>,
}

/// How a categorical column's cells map to terms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Coded,
    Identifier,
    Other,
}

/// One entry of a categorical column's values list: the canonical
/// label/uri for a raw cell plus the optionally preserved original pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ValueEntry {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub original: Option<OriginalValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OriginalValue {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

/// A categorical column after loading: predicates baked, values list
/// flattened into a dictionary keyed by raw label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoricalColumnSpec {
    pub name: String,
    pub category: Category,
    pub predicate: NamedNode,
    pub original_predicate: Option<NamedNode>,
    pub value_url: Option<String>,
    pub datatype: Option<String>,
    pub transform: Option<String>,
    pub values: HashMap<String, ValueEntry>,
}

/// Template-driven mapping: one rendered subject per row, columns resolved
/// in schema order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateMapping {
    pub about_url: String,
    pub null: Option<String>,
    pub columns: Vec<ColumnSpec>,
}

/// Dictionary-driven mapping: subjects are minted observation IRIs,
/// columns resolved in header order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoricalMapping {
    pub dataset_name: String,
    pub dataset_uri: NamedNode,
    pub columns: Vec<CategoricalColumnSpec>,
}

/// The two schema shapes are mutually exclusive within one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mapping {
    Templated(TemplateMapping),
    Categorical(CategoricalMapping),
}

/// A parsed, validated schema. Cloned by value into every worker; nothing
/// in here is mutated after loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub dialect: Dialect,
    pub mapping: Mapping,
    pub primary_key: Option<String>,
    /// Fixed schema IRIs rewritten by baking, paired with their original
    /// spelling. Handed to the provenance assembler as
    /// `prov:wasDerivedFrom` statements.
    pub derived_iris: Vec<(NamedNode, String)>,
}

impl Schema {
    pub fn column_count(&self) -> usize {
        match &self.mapping {
            Mapping::Templated(m) => m.columns.len(),
            Mapping::Categorical(m) => m.columns.len(),
        }
    }
}
