// src/lib.rs
//! Schema-driven conversion of delimited tabular data into RDF quads.
//!
//! A schema document describes, per column, how to derive a subject IRI, a
//! predicate, and either an object reference or a typed/language-tagged
//! literal. The row stream is read incrementally, split into fixed-size
//! batches, converted across a worker pool, and written out as N-Quads
//! fragments in input order.

pub mod convert;
pub mod error;
pub mod provenance;
pub mod schema;
pub mod vocab;

pub use convert::schedule::{ChunkScheduler, ChunkStats, FailurePolicy};
pub use convert::transform::TransformRegistry;
pub use convert::{convert_file, convert_files, ConvertOptions, Converter, Header, Row, SourceReport};
pub use error::{ColumnError, ConvertError, InvalidIri, SchemaError, TemplateError};
pub use provenance::{BasicAssembler, ProvenanceAssembler};
pub use schema::Schema;
