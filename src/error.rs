// src/error.rs

use thiserror::Error;

/// Failure while rendering a pattern string against a row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("pattern `{pattern}` references `{key}`, which is not a column of this source")]
    MissingKey { pattern: String, key: String },
    #[error("unbalanced braces in pattern `{pattern}`")]
    Unbalanced { pattern: String },
}

/// A string that cannot be turned into a valid absolute IRI, even after
/// percent-encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot convert `{raw}` into a valid absolute IRI: {reason}")]
pub struct InvalidIri {
    pub raw: String,
    pub reason: String,
}

/// Errors scoped to resolving a single column of a single row. These never
/// abort the row: the processor logs them and moves on to the next column.
#[derive(Debug, Error)]
pub enum ColumnError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Iri(#[from] InvalidIri),
    #[error("value `{value}` has no entry in the values dictionary of `{column}`")]
    LookupMiss { column: String, value: String },
    #[error("no transform registered under `{name}`")]
    UnknownTransform { name: String },
    #[error("invalid language tag `{tag}`: {reason}")]
    LanguageTag { tag: String, reason: String },
}

/// Errors raised while loading or validating a schema document.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to parse schema document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("schema document mixes template and categorical shapes")]
    MixedShapes,
    #[error("schema document has neither a tableSchema nor a variables section")]
    MissingShape,
    #[error("dialect {field} must be a single ASCII character, got `{value}`")]
    Dialect { field: &'static str, value: char },
    #[error("invalid schema document: {0}")]
    Invalid(String),
    #[error(transparent)]
    InvalidIri(#[from] InvalidIri),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors that end the conversion of one source.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("source header does not cover schema columns: {missing:?}")]
    SchemaMismatch { missing: Vec<String> },
    #[error("worker failed while processing chunk {chunk_index}: {message}")]
    WorkerFailure { chunk_index: usize, message: String },
    #[error("unknown encoding label `{0}`")]
    UnknownEncoding(String),
    #[error("failed to build the worker pool: {0}")]
    Pool(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
