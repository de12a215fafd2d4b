// src/provenance.rs
//! Ingestion contract of the publication wrapper that surrounds a
//! conversion's output. The converter treats the assembler purely as a
//! graph-identifier source and a quad sink; preamble/postamble writing
//! belongs to the assembler's own serialization.

use oxrdf::{NamedNode, Quad};

pub trait ProvenanceAssembler {
    /// Identifier the conversion uses to name every statement's graph.
    fn assertion_graph(&self) -> NamedNode;

    /// Accept quads the conversion wants wrapped into the assembler's own
    /// output, e.g. `prov:wasDerivedFrom` pairs for schema IRIs rewritten
    /// during baking.
    fn ingest(&mut self, quads: Vec<Quad>);
}

/// Minimal assembler: a fixed graph identifier and a growing quad buffer.
#[derive(Debug, Clone)]
pub struct BasicAssembler {
    graph: NamedNode,
    ingested: Vec<Quad>,
}

impl BasicAssembler {
    pub fn new(graph: NamedNode) -> Self {
        Self {
            graph,
            ingested: Vec::new(),
        }
    }

    pub fn ingested(&self) -> &[Quad] {
        &self.ingested
    }
}

impl ProvenanceAssembler for BasicAssembler {
    fn assertion_graph(&self) -> NamedNode {
        self.graph.clone()
    }

    fn ingest(&mut self, quads: Vec<Quad>) {
        self.ingested.extend(quads);
    }
}
