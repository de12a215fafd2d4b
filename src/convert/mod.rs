// src/convert/mod.rs

pub mod iri;
pub mod resolve;
pub mod row;
pub mod schedule;
pub mod template;
pub mod transform;

use crate::error::{ConvertError, SchemaError};
use crate::provenance::{BasicAssembler, ProvenanceAssembler};
use crate::schema::{Mapping, Schema};
use crate::vocab;
use anyhow::Context as _;
use csv::ReaderBuilder;
use encoding_rs::{Encoding, UTF_8};
use oxrdf::vocab::xsd;
use oxrdf::{GraphName, Literal, NamedNode, Quad};
use resolve::ResolverEnv;
use schedule::{ChunkScheduler, ChunkStats, FailurePolicy};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use transform::TransformRegistry;

/// Column names of one source, shared by every row of that source.
#[derive(Debug)]
pub struct Header {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Header {
    pub fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, index }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// One source row: decoded cells addressed by column name through the
/// shared header. Cells are padded to the header width at construction.
#[derive(Debug, Clone)]
pub struct Row {
    header: Arc<Header>,
    cells: Vec<String>,
}

impl Row {
    pub fn new(header: Arc<Header>, mut cells: Vec<String>) -> Self {
        cells.resize(header.len(), String::new());
        Self { header, cells }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.header
            .index_of(name)
            .map(|i| self.cells[i].as_str())
    }

    pub fn cells(&self) -> &[String] {
        &self.cells
    }
}

/// Run configuration. Dialect knobs live on the schema; everything here is
/// per invocation.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Worker count; 1 or less processes batches in place.
    pub processes: usize,
    /// Rows per batch.
    pub chunk_size: usize,
    /// Base IRI: the resource namespace, default predicates and minted
    /// observation subjects all hang off it.
    pub base: String,
    /// Extra null markers on top of whatever the schema declares.
    pub null_markers: Vec<String>,
    /// Trim cell whitespace before any other rule looks at the value.
    pub strip_whitespace: bool,
    pub failure_policy: FailurePolicy,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            processes: num_cpus::get(),
            chunk_size: 1000,
            base: "https://iisg.amsterdam/".to_string(),
            null_markers: Vec::new(),
            strip_whitespace: false,
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Converts one delimited source into an N-Quads stream under one schema.
#[derive(Debug)]
pub struct Converter {
    schema: Schema,
    options: ConvertOptions,
    transforms: Arc<TransformRegistry>,
}

impl Converter {
    pub fn new(schema: Schema, options: ConvertOptions) -> Self {
        Self {
            schema,
            options,
            transforms: Arc::new(TransformRegistry::new()),
        }
    }

    pub fn with_transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = Arc::new(transforms);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Read `source` row by row, write ordered N-Quads fragments to
    /// `target` as they become available, and hand schema-level provenance
    /// to the assembler. The graph naming every statement comes from the
    /// assembler.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn convert<R, W>(
        &self,
        source: R,
        target: &mut W,
        assembler: &mut dyn ProvenanceAssembler,
    ) -> Result<ChunkStats, ConvertError>
    where
        R: Read,
        W: Write,
    {
        let graph = GraphName::from(assembler.assertion_graph());
        let dialect = &self.schema.dialect;
        let encoding = Encoding::for_label(dialect.encoding.as_bytes())
            .ok_or_else(|| ConvertError::UnknownEncoding(dialect.encoding.clone()))?;
        let env = ResolverEnv::new(&self.options.base, self.options.null_markers.clone())
            .map_err(|e| ConvertError::Schema(SchemaError::InvalidIri(e)))?;

        let mut reader = ReaderBuilder::new()
            .delimiter(dialect.delimiter as u8)
            .quote(dialect.quote_char as u8)
            .has_headers(false)
            .flexible(true)
            .from_reader(source);
        let mut records = reader.byte_records();

        let Some(first) = records.next() else {
            warn!("source is empty; nothing to convert");
            return Ok(ChunkStats::default());
        };
        let first = first?;
        let mut names: Vec<String> = first.iter().map(|cell| decode_cell(encoding, cell)).collect();
        if let Some(name) = names.first_mut() {
            if let Some(stripped) = name.strip_prefix('\u{feff}') {
                *name = stripped.to_string();
            }
        }
        check_header(&self.schema, &names)?;
        let header = Arc::new(Header::new(names));
        info!(columns = header.len(), "header read");

        let strip = self.options.strip_whitespace;
        let rows = records.filter_map(|record| match record {
            Ok(record) => {
                let cells = record
                    .iter()
                    .map(|cell| {
                        let cell = decode_cell(encoding, cell);
                        if strip {
                            cell.trim().to_string()
                        } else {
                            cell
                        }
                    })
                    .collect();
                Some(Row::new(Arc::clone(&header), cells))
            }
            Err(e) => {
                warn!(error = %e, "skipping malformed record");
                None
            }
        });

        let scheduler = ChunkScheduler::new(
            self.options.chunk_size,
            self.options.processes,
            self.options.failure_policy,
        );
        let stats = scheduler.run(&self.schema, &graph, &env, &self.transforms, rows, |fragment| {
            target.write_all(fragment.as_bytes())
        })?;

        if !self.schema.derived_iris.is_empty() {
            let quads = self
                .schema
                .derived_iris
                .iter()
                .map(|(baked, original)| {
                    Quad::new(
                        baked.clone(),
                        vocab::PROV_WAS_DERIVED_FROM.into_owned(),
                        Literal::new_typed_literal(original.clone(), xsd::STRING),
                        graph.clone(),
                    )
                })
                .collect();
            assembler.ingest(quads);
        }
        Ok(stats)
    }
}

fn decode_cell(encoding: &'static Encoding, cell: &[u8]) -> String {
    if encoding == UTF_8 {
        String::from_utf8_lossy(cell).into_owned()
    } else {
        let (decoded, _) = encoding.decode_without_bom_handling(cell);
        decoded.into_owned()
    }
}

/// Every column the schema reads from the source must exist in the header.
/// Virtual columns have no source cell and are exempt.
fn check_header(schema: &Schema, names: &[String]) -> Result<(), ConvertError> {
    let required: Vec<&String> = match &schema.mapping {
        Mapping::Templated(m) => m
            .columns
            .iter()
            .filter(|c| !c.is_virtual)
            .map(|c| &c.name)
            .collect(),
        Mapping::Categorical(m) => m.columns.iter().map(|c| &c.name).collect(),
    };
    let missing: Vec<String> = required
        .into_iter()
        .filter(|name| !names.contains(*name))
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConvertError::SchemaMismatch { missing })
    }
}

/// Outcome of one source in a multi-source run.
#[derive(Debug)]
pub struct SourceReport {
    pub source: PathBuf,
    pub result: anyhow::Result<ChunkStats>,
}

/// Convert several sources in turn, writing `<source>.nq` next to each.
/// A failing source is logged and the run continues with the next one.
pub fn convert_files(sources: &[PathBuf], options: &ConvertOptions) -> Vec<SourceReport> {
    sources
        .iter()
        .map(|source| {
            let result = convert_file(source, options);
            if let Err(e) = &result {
                error!(source = %source.display(), error = %e,
                    "conversion failed; continuing with next source");
            }
            SourceReport {
                source: source.clone(),
                result,
            }
        })
        .collect()
}

/// Convert one file using the schema at `<source>-metadata.json`.
pub fn convert_file(source: &Path, options: &ConvertOptions) -> anyhow::Result<ChunkStats> {
    let schema_path = Schema::metadata_path_for(source);
    let schema = Schema::from_file(&schema_path)
        .with_context(|| format!("loading schema {}", schema_path.display()))?;
    let converter = Converter::new(schema, options.clone());

    let mut assembler = BasicAssembler::new(assertion_graph_for(source, &options.base)?);
    let input = File::open(source).with_context(|| format!("opening {}", source.display()))?;

    let mut target_path = source.as_os_str().to_os_string();
    target_path.push(".nq");
    let target_path = PathBuf::from(target_path);
    let mut target = BufWriter::new(
        File::create(&target_path)
            .with_context(|| format!("creating {}", target_path.display()))?,
    );

    let stats = converter.convert(BufReader::new(input), &mut target, &mut assembler)?;
    target.flush()?;
    info!(
        source = %source.display(),
        target = %target_path.display(),
        rows = stats.rows,
        quads = stats.quads,
        "source converted"
    );
    Ok(stats)
}

fn assertion_graph_for(source: &Path, base: &str) -> anyhow::Result<NamedNode> {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string());
    let mut base = base.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(iri::bake(&format!("{base}assertion/{name}"))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    fn init_test_logging() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("info,tabquad=debug")),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    const GRAPH: &str = "https://example.org/graph/run";

    fn assembler() -> BasicAssembler {
        BasicAssembler::new(NamedNode::new_unchecked(GRAPH))
    }

    fn options() -> ConvertOptions {
        ConvertOptions {
            processes: 1,
            chunk_size: 2,
            base: "https://example.org/".to_string(),
            ..Default::default()
        }
    }

    const TEMPLATE_DOC: &str = r#"{
        "tableSchema": {
            "aboutUrl": "https://example.org/person/{id}",
            "columns": [
                {"name": "id", "propertyUrl": "https://example.org/def/id"},
                {"name": "name", "datatype": "string", "lang": "nl"}
            ]
        }
    }"#;

    #[test]
    fn converts_a_template_source_end_to_end() -> Result<()> {
        init_test_logging();
        let schema = Schema::from_json_str(TEMPLATE_DOC)?;
        let converter = Converter::new(schema, options());
        let csv = "id,name\n1,Jan\n2,Piet\n3,\n";
        let mut out = Vec::new();
        let mut assembler = assembler();
        let stats = converter.convert(csv.as_bytes(), &mut out, &mut assembler)?;
        assert_eq!(stats.rows, 3);
        // Row 3 has an empty name, so only its id statement remains.
        assert_eq!(stats.quads, 5);
        let text = String::from_utf8(out)?;
        assert!(text
            .contains("<https://example.org/person/1> <https://example.org/def/id> \"1\""));
        assert!(text.contains("\"Jan\"@nl"));
        assert!(text.lines().all(|line| line.ends_with(&format!("<{GRAPH}> ."))));
        assert!(assembler.ingested().is_empty());
        Ok(())
    }

    #[test]
    fn header_mismatch_is_a_typed_error() -> Result<()> {
        let schema = Schema::from_json_str(TEMPLATE_DOC)?;
        let converter = Converter::new(schema, options());
        let mut out = Vec::new();
        let err = converter
            .convert("id,label\n1,x\n".as_bytes(), &mut out, &mut assembler())
            .unwrap_err();
        match err {
            ConvertError::SchemaMismatch { missing } => {
                assert_eq!(missing, vec!["name".to_string()])
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
        assert!(out.is_empty());
        Ok(())
    }

    #[test]
    fn cells_decode_through_the_declared_encoding() -> Result<()> {
        let doc = r#"{
            "dialect": {"delimiter": ";", "encoding": "latin1"},
            "tableSchema": {
                "aboutUrl": "https://example.org/obs/{_row}",
                "columns": [{"name": "place"}]
            }
        }"#;
        let schema = Schema::from_json_str(doc)?;
        let converter = Converter::new(schema, options());
        let mut source: Vec<u8> = b"place\nLi\xE8ge\n".to_vec();
        source.extend_from_slice(b"Gen\xE8ve\n");
        let mut out = Vec::new();
        let stats = converter.convert(source.as_slice(), &mut out, &mut assembler())?;
        assert_eq!(stats.rows, 2);
        let text = String::from_utf8(out)?;
        assert!(text.contains("\"Li\u{e8}ge\""));
        assert!(text.contains("\"Gen\u{e8}ve\""));
        Ok(())
    }

    #[test]
    fn run_level_null_markers_apply() -> Result<()> {
        let schema = Schema::from_json_str(TEMPLATE_DOC)?;
        let mut options = options();
        options.null_markers = vec!["onbekend".to_string()];
        let converter = Converter::new(schema, options);
        let mut out = Vec::new();
        let stats =
            converter.convert("id,name\n1,onbekend\n".as_bytes(), &mut out, &mut assembler())?;
        assert_eq!(stats.quads, 1);
        Ok(())
    }

    #[test]
    fn rewritten_schema_iris_reach_the_assembler() -> Result<()> {
        let doc = r#"{
            "name": "census",
            "uri": "https://example.org/dataset/census 1899",
            "variables": {
                "sex": {
                    "category": "other",
                    "uri": "https://example.org/vocab/sex",
                    "values": [{"label": "m", "uri": "https://example.org/code/male"}]
                }
            }
        }"#;
        let schema = Schema::from_json_str(doc)?;
        let converter = Converter::new(schema, options());
        let mut out = Vec::new();
        let mut assembler = assembler();
        converter.convert("sex\nm\n".as_bytes(), &mut out, &mut assembler)?;
        let ingested = assembler.ingested();
        assert_eq!(ingested.len(), 1);
        assert_eq!(
            ingested[0].predicate.as_str(),
            "http://www.w3.org/ns/prov#wasDerivedFrom"
        );
        assert_eq!(
            ingested[0].subject.to_string(),
            "<https://example.org/dataset/census%201899>"
        );
        Ok(())
    }

    #[test]
    fn empty_source_yields_empty_stats() -> Result<()> {
        let schema = Schema::from_json_str(TEMPLATE_DOC)?;
        let converter = Converter::new(schema, options());
        let mut out = Vec::new();
        let stats = converter.convert("".as_bytes(), &mut out, &mut assembler())?;
        assert_eq!(stats, ChunkStats::default());
        assert!(out.is_empty());
        Ok(())
    }

    #[test]
    fn multi_source_runs_continue_past_a_failing_source() -> Result<()> {
        init_test_logging();
        let dir = tempfile::tempdir()?;
        let good = dir.path().join("good.csv");
        fs::write(&good, "id,name\n1,Jan\n")?;
        fs::write(Schema::metadata_path_for(&good), TEMPLATE_DOC)?;
        let orphan = dir.path().join("orphan.csv");
        fs::write(&orphan, "id,name\n2,Piet\n")?;
        // No metadata document next to `orphan.csv`.

        let reports = convert_files(&[orphan.clone(), good.clone()], &options());
        assert_eq!(reports.len(), 2);
        assert!(reports[0].result.is_err());
        let stats = reports[1].result.as_ref().expect("second source converts");
        assert_eq!(stats.rows, 1);
        let output = fs::read_to_string(dir.path().join("good.csv.nq"))?;
        assert!(output.contains("<https://example.org/person/1>"));
        assert!(output.contains("<https://example.org/assertion/good.csv>"));
        Ok(())
    }
}
