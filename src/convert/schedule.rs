// src/convert/schedule.rs

use super::resolve::ResolverEnv;
use super::row::RowProcessor;
use super::transform::TransformRegistry;
use super::Row;
use crate::error::ConvertError;
use crate::schema::Schema;
use oxrdf::GraphName;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use tracing::{debug, error, info};

/// What to do when a worker fails while processing one batch. The policy
/// is explicit: a failed batch never leaks partial text into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop the run and surface the failure to the caller.
    #[default]
    Abort,
    /// Log the failure, drop the batch's fragment, count it, continue.
    Drop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkStats {
    pub chunks: usize,
    pub rows: u64,
    pub quads: u64,
    pub dropped_chunks: usize,
    pub dropped_rows: u64,
}

struct ChunkOutcome {
    fragment: String,
    rows: usize,
    quads: usize,
}

struct ChunkFailure {
    message: String,
    rows: usize,
}

type ChunkResult = Result<ChunkOutcome, ChunkFailure>;

/// Splits the row stream into fixed-size, order-preserving batches and
/// runs them across a worker pool scoped to one `run` call. Fragments are
/// handed to `emit` strictly in submission order, as soon as every earlier
/// batch has been emitted, regardless of completion order.
#[derive(Debug, Clone)]
pub struct ChunkScheduler {
    pub chunk_size: usize,
    pub parallelism: usize,
    pub failure_policy: FailurePolicy,
}

impl ChunkScheduler {
    pub fn new(chunk_size: usize, parallelism: usize, failure_policy: FailurePolicy) -> Self {
        Self {
            chunk_size,
            parallelism,
            failure_policy,
        }
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(chunk_size = self.chunk_size, parallelism = self.parallelism)
    )]
    pub fn run<I, F>(
        &self,
        schema: &Schema,
        graph: &GraphName,
        env: &ResolverEnv,
        transforms: &Arc<TransformRegistry>,
        rows: I,
        emit: F,
    ) -> Result<ChunkStats, ConvertError>
    where
        I: Iterator<Item = Row>,
        F: FnMut(&str) -> std::io::Result<()>,
    {
        let chunk_size = self.chunk_size.max(1);
        let stats = if self.parallelism > 1 {
            self.run_parallel(chunk_size, schema, graph, env, transforms, rows, emit)?
        } else {
            self.run_sequential(chunk_size, schema, graph, env, transforms, rows, emit)?
        };
        info!(
            chunks = stats.chunks,
            rows = stats.rows,
            quads = stats.quads,
            dropped_chunks = stats.dropped_chunks,
            "conversion finished"
        );
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_sequential<I, F>(
        &self,
        chunk_size: usize,
        schema: &Schema,
        graph: &GraphName,
        env: &ResolverEnv,
        transforms: &Arc<TransformRegistry>,
        mut rows: I,
        mut emit: F,
    ) -> Result<ChunkStats, ConvertError>
    where
        I: Iterator<Item = Row>,
        F: FnMut(&str) -> std::io::Result<()>,
    {
        let mut stats = ChunkStats::default();
        let mut index = 0usize;
        while let Some(batch) = next_batch(&mut rows, chunk_size) {
            let outcome = process_chunk(
                index,
                chunk_size,
                schema.clone(),
                graph.clone(),
                env.clone(),
                Arc::clone(transforms),
                batch,
            );
            apply(&mut stats, index, outcome, self.failure_policy, &mut emit)?;
            index += 1;
        }
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_parallel<I, F>(
        &self,
        chunk_size: usize,
        schema: &Schema,
        graph: &GraphName,
        env: &ResolverEnv,
        transforms: &Arc<TransformRegistry>,
        mut rows: I,
        mut emit: F,
    ) -> Result<ChunkStats, ConvertError>
    where
        I: Iterator<Item = Row>,
        F: FnMut(&str) -> std::io::Result<()>,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallelism)
            .build()
            .map_err(|e| ConvertError::Pool(e.to_string()))?;

        let (tx, rx) = mpsc::channel::<(usize, ChunkResult)>();
        // Bound undrained work so the source stream is read incrementally
        // rather than materialized ahead of the workers.
        let max_in_flight = self.parallelism * 2;

        let mut stats = ChunkStats::default();
        let mut pending: BTreeMap<usize, ChunkResult> = BTreeMap::new();
        let mut next_emit = 0usize;
        let mut failure: Option<ConvertError> = None;

        pool.in_place_scope(|scope| {
            let mut submitted = 0usize;
            let mut in_flight = 0usize;

            'submit: while failure.is_none() {
                let Some(batch) = next_batch(&mut rows, chunk_size) else {
                    break;
                };
                while in_flight >= max_in_flight {
                    let (index, outcome) = rx.recv().expect("worker result channel closed");
                    in_flight -= 1;
                    pending.insert(index, outcome);
                    if let Err(e) = flush_ready(
                        &mut pending,
                        &mut next_emit,
                        &mut stats,
                        self.failure_policy,
                        &mut emit,
                    ) {
                        failure = Some(e);
                        continue 'submit;
                    }
                }

                let tx = tx.clone();
                let schema = schema.clone();
                let graph = graph.clone();
                let env = env.clone();
                let transforms = Arc::clone(transforms);
                let index = submitted;
                scope.spawn(move |_| {
                    let outcome =
                        process_chunk(index, chunk_size, schema, graph, env, transforms, batch);
                    let _ = tx.send((index, outcome));
                });
                submitted += 1;
                in_flight += 1;
            }

            // Join every dispatched batch before returning; after a
            // failure the stragglers are still awaited, just not emitted.
            while in_flight > 0 {
                let (index, outcome) = rx.recv().expect("worker result channel closed");
                in_flight -= 1;
                pending.insert(index, outcome);
                if failure.is_none() {
                    if let Err(e) = flush_ready(
                        &mut pending,
                        &mut next_emit,
                        &mut stats,
                        self.failure_policy,
                        &mut emit,
                    ) {
                        failure = Some(e);
                    }
                }
            }
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}

/// Pull up to `chunk_size` rows off the stream. The final batch may be
/// short; there is no padding.
fn next_batch<I: Iterator<Item = Row>>(rows: &mut I, chunk_size: usize) -> Option<Vec<Row>> {
    let batch: Vec<Row> = rows.by_ref().take(chunk_size).collect();
    if batch.is_empty() {
        None
    } else {
        Some(batch)
    }
}

fn process_chunk(
    index: usize,
    chunk_size: usize,
    schema: Schema,
    graph: GraphName,
    env: ResolverEnv,
    transforms: Arc<TransformRegistry>,
    batch: Vec<Row>,
) -> ChunkResult {
    let rows = batch.len();
    debug!(chunk = index, rows, "processing chunk");
    catch_unwind(AssertUnwindSafe(move || {
        let mut processor = RowProcessor::new(schema, graph, env, transforms);
        let quads = processor.process(index, &batch, chunk_size);
        ChunkOutcome {
            rows,
            quads: quads.len(),
            fragment: quads.to_nquads(),
        }
    }))
    .map_err(|payload| ChunkFailure {
        message: panic_message(payload),
        rows,
    })
}

/// Emit every pending fragment whose predecessors have all been emitted.
fn flush_ready<F>(
    pending: &mut BTreeMap<usize, ChunkResult>,
    next_emit: &mut usize,
    stats: &mut ChunkStats,
    policy: FailurePolicy,
    emit: &mut F,
) -> Result<(), ConvertError>
where
    F: FnMut(&str) -> std::io::Result<()>,
{
    while let Some(outcome) = pending.remove(next_emit) {
        apply(stats, *next_emit, outcome, policy, emit)?;
        *next_emit += 1;
    }
    Ok(())
}

fn apply<F>(
    stats: &mut ChunkStats,
    index: usize,
    outcome: ChunkResult,
    policy: FailurePolicy,
    emit: &mut F,
) -> Result<(), ConvertError>
where
    F: FnMut(&str) -> std::io::Result<()>,
{
    match outcome {
        Ok(outcome) => {
            emit(&outcome.fragment)?;
            stats.chunks += 1;
            stats.rows += outcome.rows as u64;
            stats.quads += outcome.quads as u64;
            Ok(())
        }
        Err(failed) => match policy {
            FailurePolicy::Abort => Err(ConvertError::WorkerFailure {
                chunk_index: index,
                message: failed.message,
            }),
            FailurePolicy::Drop => {
                error!(chunk = index, rows = failed.rows, error = %failed.message, "dropping failed chunk");
                stats.dropped_chunks += 1;
                stats.dropped_rows += failed.rows as u64;
                Ok(())
            }
        },
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::Header;
    use crate::schema::{
        CategoricalColumnSpec, CategoricalMapping, Category, ColumnSpec, Dialect, Mapping,
        TemplateMapping,
    };
    use oxrdf::NamedNode;
    use std::collections::HashMap;
    use std::time::Duration;
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

    fn template_mapping() -> Mapping {
        Mapping::Templated(TemplateMapping {
            about_url: "https://example.org/obs/{_row}".to_string(),
            null: None,
            columns: vec![ColumnSpec {
                name: "value".to_string(),
                property_url: Some("https://example.org/def/value".to_string()),
                ..Default::default()
            }],
        })
    }

    fn stall_mapping(transform: &str) -> Mapping {
        Mapping::Categorical(CategoricalMapping {
            dataset_name: "t".to_string(),
            dataset_uri: NamedNode::new_unchecked("https://example.org/dataset/t"),
            columns: vec![CategoricalColumnSpec {
                name: "value".to_string(),
                category: Category::Other,
                predicate: NamedNode::new_unchecked("https://example.org/vocab/value"),
                original_predicate: None,
                value_url: None,
                datatype: None,
                transform: Some(transform.to_string()),
                values: HashMap::new(),
            }],
        })
    }

    fn value_rows(values: &[&str]) -> Vec<Row> {
        let header = Arc::new(Header::new(vec!["value".to_string()]));
        values
            .iter()
            .map(|v| Row::new(Arc::clone(&header), vec![v.to_string()]))
            .collect()
    }

    fn run_collect(
        mapping: Mapping,
        registry: TransformRegistry,
        rows: Vec<Row>,
        chunk_size: usize,
        parallelism: usize,
        policy: FailurePolicy,
    ) -> (Result<ChunkStats, ConvertError>, Vec<String>) {
        let schema = Schema {
            dialect: Dialect::default(),
            mapping,
            primary_key: None,
            derived_iris: Vec::new(),
        };
        let scheduler = ChunkScheduler::new(chunk_size, parallelism, policy);
        let graph = GraphName::from(NamedNode::new_unchecked("https://example.org/g"));
        let env = ResolverEnv::new("https://example.org/", Vec::new()).unwrap();
        let transforms = Arc::new(registry);
        let mut fragments = Vec::new();
        let result = scheduler.run(&schema, &graph, &env, &transforms, rows.into_iter(), |f| {
            fragments.push(f.to_string());
            Ok(())
        });
        (result, fragments)
    }

    fn observation_numbers(fragments: &[String]) -> Vec<u64> {
        let mut numbers: Vec<u64> = fragments
            .iter()
            .flat_map(|f| f.lines())
            .map(|line| {
                let subject = line.split_whitespace().next().unwrap();
                subject
                    .rsplit('/')
                    .next()
                    .unwrap()
                    .trim_end_matches('>')
                    .parse()
                    .unwrap()
            })
            .collect();
        numbers.sort_unstable();
        numbers
    }

    #[test]
    fn counters_are_exact_when_chunk_size_divides_row_count() {
        let values: Vec<String> = (0..8).map(|i| format!("v{i}")).collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        for parallelism in [1, 3] {
            let (result, fragments) = run_collect(
                template_mapping(),
                TransformRegistry::new(),
                value_rows(&refs),
                4,
                parallelism,
                FailurePolicy::Abort,
            );
            let stats = result.unwrap();
            assert_eq!(stats.chunks, 2);
            assert_eq!(stats.rows, 8);
            assert_eq!(observation_numbers(&fragments), (0..8).collect::<Vec<u64>>());
        }
    }

    #[test]
    fn counters_are_exact_for_a_short_final_chunk() {
        init_test_logging();
        // 10 rows over chunks of 4 across 3 workers: three fragments, the
        // last covering exactly rows 8 and 9, with no padding artifacts.
        let values: Vec<String> = (0..10).map(|i| format!("v{i}")).collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let (result, fragments) = run_collect(
            template_mapping(),
            TransformRegistry::new(),
            value_rows(&refs),
            4,
            3,
            FailurePolicy::Abort,
        );
        let stats = result.unwrap();
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.rows, 10);
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[2].lines().count(), 2);
        assert!(fragments[2].contains("/obs/8>"));
        assert!(fragments[2].contains("/obs/9>"));
        assert_eq!(
            observation_numbers(&fragments),
            (0..10).collect::<Vec<u64>>()
        );
    }

    #[test]
    fn fragments_come_out_in_submission_order_despite_completion_order() {
        // The first batch sleeps well past the others, so it completes
        // last; its fragment must still come out first.
        let mut registry = TransformRegistry::new();
        registry.register("stall", |v| {
            std::thread::sleep(Duration::from_millis(v.parse().unwrap_or(0)));
            v.to_string()
        });
        let rows = value_rows(&["120", "120", "0", "0", "0", "0"]);
        let (result, fragments) = run_collect(
            stall_mapping("stall"),
            registry,
            rows,
            2,
            3,
            FailurePolicy::Abort,
        );
        result.unwrap();
        assert_eq!(fragments.len(), 3);
        assert!(fragments[0].contains("/observation/t/0>"));
        assert!(fragments[1].contains("/observation/t/2>"));
        assert!(fragments[2].contains("/observation/t/4>"));
    }

    #[test]
    fn abort_policy_surfaces_a_typed_worker_failure() {
        let mut registry = TransformRegistry::new();
        registry.register("boom", |v| {
            if v == "X" {
                panic!("bad cell");
            }
            v.to_string()
        });
        let rows = value_rows(&["0", "0", "X", "0", "0", "0"]);
        let (result, _) = run_collect(
            stall_mapping("boom"),
            registry,
            rows,
            2,
            3,
            FailurePolicy::Abort,
        );
        match result {
            Err(ConvertError::WorkerFailure {
                chunk_index,
                message,
            }) => {
                assert_eq!(chunk_index, 1);
                assert_eq!(message, "bad cell");
            }
            other => panic!("expected WorkerFailure, got {other:?}"),
        }
    }

    #[test]
    fn drop_policy_counts_the_lost_batch_and_keeps_going() {
        let rows = value_rows(&["0", "0", "X", "0", "0", "0"]);
        for parallelism in [1, 3] {
            let mut registry = TransformRegistry::new();
            registry.register("boom", |v| {
                if v == "X" {
                    panic!("bad cell");
                }
                v.to_string()
            });
            let (result, fragments) = run_collect(
                stall_mapping("boom"),
                registry,
                rows.clone(),
                2,
                parallelism,
                FailurePolicy::Drop,
            );
            let stats = result.unwrap();
            assert_eq!(stats.chunks, 2);
            assert_eq!(stats.dropped_chunks, 1);
            assert_eq!(stats.dropped_rows, 2);
            assert_eq!(fragments.len(), 2);
            // The failed batch (rows 2 and 3) left nothing behind.
            assert!(fragments.iter().all(|f| !f.contains("/observation/t/2>")));
            assert!(fragments[0].contains("/observation/t/0>"));
            assert!(fragments[1].contains("/observation/t/4>"));
        }
    }
}
