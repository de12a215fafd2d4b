// src/schema/mod.rs

pub mod load;
pub mod types;

pub use types::{
    CategoricalColumnSpec, CategoricalMapping, Category, ColumnSpec, Dialect, Mapping,
    OriginalValue, Schema, TemplateMapping, ValueEntry,
};
