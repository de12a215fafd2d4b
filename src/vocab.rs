// src/vocab.rs
//! Namespace prefix table and the handful of well-known terms the
//! conversion emits directly.

use once_cell::sync::Lazy;
use oxrdf::NamedNodeRef;
use std::collections::HashMap;

/// Prefixes understood in prefixed names (e.g. `skos:prefLabel`,
/// `xsd:gYear`) inside schema documents.
pub static PREFIXES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("bibo", "http://purl.org/ontology/bibo/"),
        ("bio", "http://purl.org/vocab/bio/0.1/"),
        ("csvw", "http://www.w3.org/ns/csvw#"),
        ("dct", "http://purl.org/dc/terms/"),
        ("foaf", "http://xmlns.com/foaf/0.1/"),
        ("ldp", "http://www.w3.org/ns/ldp#"),
        ("np", "http://www.nanopub.org/nschema#"),
        ("owl", "http://www.w3.org/2002/07/owl#"),
        ("prov", "http://www.w3.org/ns/prov#"),
        ("qb", "http://purl.org/linked-data/cube#"),
        ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
        ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
        ("schema", "http://schema.org/"),
        ("sdmx-code", "http://purl.org/linked-data/sdmx/2009/code#"),
        ("sdmx-concept", "http://purl.org/linked-data/sdmx/2009/concept#"),
        ("sdmx-dimension", "http://purl.org/linked-data/sdmx/2009/dimension#"),
        ("sdmx-measure", "http://purl.org/linked-data/sdmx/2009/measure#"),
        ("skos", "http://www.w3.org/2004/02/skos/core#"),
        ("time", "http://www.w3.org/2006/time#"),
        ("xml", "http://www.w3.org/XML/1998/namespace/"),
        ("xsd", "http://www.w3.org/2001/XMLSchema#"),
    ])
});

pub const PROV_WAS_DERIVED_FROM: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("http://www.w3.org/ns/prov#wasDerivedFrom");

pub const QB_DATA_SET: NamedNodeRef<'static> =
    NamedNodeRef::new_unchecked("http://purl.org/linked-data/cube#dataSet");

/// Expand `prefix:local` through the prefix table. Returns `None` when the
/// prefix is unknown or the input carries no colon.
pub fn expand(name: &str) -> Option<String> {
    let (prefix, local) = name.split_once(':')?;
    PREFIXES.get(prefix).map(|ns| format!("{ns}{local}"))
}
