// src/convert/row.rs

use super::resolve::{ResolverEnv, ValueResolver};
use super::transform::TransformRegistry;
use super::Row;
use crate::schema::{CategoricalMapping, Mapping, Schema, TemplateMapping};
use crate::vocab;
use oxrdf::{GraphName, NamedNode, Quad, Term};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// A graph-named collection of statements. Duplicates are permitted and
/// insertion order carries no meaning.
#[derive(Debug, Clone)]
pub struct QuadSet {
    graph: GraphName,
    quads: Vec<Quad>,
}

impl QuadSet {
    pub fn new(graph: GraphName) -> Self {
        Self {
            graph,
            quads: Vec::new(),
        }
    }

    pub fn insert(&mut self, subject: NamedNode, predicate: NamedNode, object: Term) {
        self.quads
            .push(Quad::new(subject, predicate, object, self.graph.clone()));
    }

    pub fn len(&self) -> usize {
        self.quads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    pub fn quads(&self) -> &[Quad] {
        &self.quads
    }

    pub fn into_quads(self) -> Vec<Quad> {
        self.quads
    }

    /// Serialize to an N-Quads fragment, one statement per line.
    pub fn to_nquads(&self) -> String {
        let mut out = String::new();
        for quad in &self.quads {
            let _ = writeln!(out, "{quad} .");
        }
        out
    }
}

/// Converts one batch of rows into a QuadSet. Each worker constructs its
/// own processor over an owned Schema copy, so processing mutates nothing
/// shared.
#[derive(Debug)]
pub struct RowProcessor {
    mapping: Mapping,
    graph: GraphName,
    resolver: ValueResolver,
}

impl RowProcessor {
    pub fn new(
        schema: Schema,
        graph: GraphName,
        env: ResolverEnv,
        transforms: Arc<TransformRegistry>,
    ) -> Self {
        Self {
            mapping: schema.mapping,
            graph,
            resolver: ValueResolver::new(env, transforms),
        }
    }

    /// Convert `rows` (one chunk). Observation numbers are seeded at
    /// `chunk_index * chunk_size` and advance once per row, so numbers
    /// assigned across workers never collide.
    pub fn process(&mut self, chunk_index: usize, rows: &[Row], chunk_size: usize) -> QuadSet {
        let mut quads = QuadSet::new(self.graph.clone());
        let mut number = (chunk_index * chunk_size) as u64;
        let mapping = &self.mapping;
        let resolver = &mut self.resolver;
        for row in rows {
            match mapping {
                Mapping::Templated(m) => templated_row(m, resolver, row, number, &mut quads),
                Mapping::Categorical(m) => categorical_row(m, resolver, row, number, &mut quads),
            }
            number += 1;
        }
        quads
    }
}

fn templated_row(
    mapping: &TemplateMapping,
    resolver: &mut ValueResolver,
    row: &Row,
    number: u64,
    quads: &mut QuadSet,
) {
    // Default subject for every column of this row; virtual columns may
    // override it for their own statement.
    let subject = match resolver.render_iri(&mapping.about_url, row, number) {
        Ok(subject) => subject,
        Err(e) => {
            warn!(row = number, error = %e, "cannot build the row subject; skipping row");
            return;
        }
    };

    for column in &mapping.columns {
        match resolver.resolve_templated(column, mapping.null.as_deref(), row, number) {
            Ok(Some(resolution)) => {
                let subject = resolution.subject_override.unwrap_or_else(|| subject.clone());
                for (predicate, object) in resolution.outputs {
                    quads.insert(subject.clone(), predicate, object);
                }
            }
            Ok(None) => {}
            Err(e) => {
                debug!(column = %column.name, row = number, error = %e, "column skipped");
            }
        }
    }
}

fn categorical_row(
    mapping: &CategoricalMapping,
    resolver: &mut ValueResolver,
    row: &Row,
    number: u64,
    quads: &mut QuadSet,
) {
    let subject = match resolver.observation_iri(&mapping.dataset_name, number) {
        Ok(subject) => subject,
        Err(e) => {
            warn!(row = number, error = %e, "cannot mint the observation subject; skipping row");
            return;
        }
    };
    quads.insert(
        subject.clone(),
        vocab::QB_DATA_SET.into_owned(),
        Term::from(mapping.dataset_uri.clone()),
    );

    for column in &mapping.columns {
        match resolver.resolve_categorical(column, row, number) {
            Ok(Some(resolution)) => {
                for (predicate, object) in resolution.outputs {
                    quads.insert(subject.clone(), predicate, object);
                }
            }
            Ok(None) => {}
            Err(e) => {
                debug!(column = %column.name, row = number, error = %e, "column skipped");
            }
        }
    }
}
