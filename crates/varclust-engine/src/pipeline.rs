//! Chunked clustering job over a store directory.
//!
//! A reader thread parses JSONL input into fixed-size chunks and hands them
//! over a bounded channel; the job thread clusters and commits one chunk at
//! a time. A chunk commit is one lock-scoped store mutation, followed by
//! settling the accession blocks it drew from.

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use varclust_store::{
    AccessionAllocator, AccessionCategory, AtomicStoreMutationError, JsonlBlockAllocator,
    RecoveryAgent, RecoveryError, RecoveryReport, SubmittedVariantInput, VariantStoreDir,
    mutate_store_dir,
};

use crate::clustering::{ChunkOutcome, ClusteringEngine};
use crate::config::JobConfig;
use crate::cursor::ChunkCursors;
use crate::error::{EngineError, JobError};
use crate::metrics::{
    CLUSTERED_VARIANTS_CREATED, CLUSTERED_VARIANTS_MERGED, CLUSTERED_VARIANTS_RS_SPLIT,
    CounterMetrics, MetricsSink, SUBMITTED_VARIANTS_INVALID, SUBMITTED_VARIANTS_KEPT_UNCLUSTERED,
    SUBMITTED_VARIANTS_UPDATED_RS,
};

/// Contiguous slice of the input.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub first_line: usize,
    pub records: Vec<SubmittedVariantInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub instance_id: String,
    pub chunks: usize,
    pub records: usize,
    pub operations_appended: usize,
    pub stopped: bool,
    pub recovery: Vec<RecoveryReport>,
    pub counts: BTreeMap<String, u64>,
}

impl JobReport {
    fn count(&self, name: &str) -> u64 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    pub fn created(&self) -> u64 {
        self.count(CLUSTERED_VARIANTS_CREATED)
    }

    pub fn updated(&self) -> u64 {
        self.count(SUBMITTED_VARIANTS_UPDATED_RS)
    }

    pub fn merged(&self) -> u64 {
        self.count(CLUSTERED_VARIANTS_MERGED)
    }

    pub fn split(&self) -> u64 {
        self.count(CLUSTERED_VARIANTS_RS_SPLIT)
    }

    pub fn kept_unclustered(&self) -> u64 {
        self.count(SUBMITTED_VARIANTS_KEPT_UNCLUSTERED)
    }

    pub fn invalid(&self) -> u64 {
        self.count(SUBMITTED_VARIANTS_INVALID)
    }
}

/// Reads JSONL input and sends chunks until input ends or the receiver
/// goes away.
pub fn read_chunks(
    reader: impl BufRead,
    chunk_size: usize,
    sender: &Sender<Result<Chunk, JobError>>,
    metrics: &dyn MetricsSink,
) {
    let chunk_size = chunk_size.max(1);
    let mut records = Vec::with_capacity(chunk_size);
    let mut index = 0;
    let mut first_line = 1;

    for (line_no, line) in reader.lines().enumerate() {
        let line_no = line_no + 1;
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let _ = sender.send(Err(JobError::Input {
                    line: line_no,
                    message: err.to_string(),
                }));
                return;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<SubmittedVariantInput>(trimmed) {
            Ok(record) => {
                if records.is_empty() {
                    first_line = line_no;
                }
                records.push(record);
            }
            Err(err) => {
                tracing::warn!(line = line_no, error = %err, "skipping unparseable input line");
                metrics.increment(SUBMITTED_VARIANTS_INVALID, 1);
                continue;
            }
        }
        if records.len() == chunk_size {
            let chunk = Chunk {
                index,
                first_line,
                records: std::mem::replace(&mut records, Vec::with_capacity(chunk_size)),
            };
            if sender.send(Ok(chunk)).is_err() {
                return;
            }
            index += 1;
        }
    }
    if !records.is_empty() {
        let _ = sender.send(Ok(Chunk {
            index,
            first_line,
            records,
        }));
    }
}

pub struct JobRunner {
    config: JobConfig,
    store_dir: PathBuf,
    instance_id: String,
    allocator: Arc<dyn AccessionAllocator>,
    engine: ClusteringEngine,
    metrics: Arc<CounterMetrics>,
    force_recovery: bool,
    stop: Arc<AtomicBool>,
}

impl JobRunner {
    /// Runner over `store_dir` with the file-backed allocator in the same
    /// directory.
    pub fn open(config: JobConfig, store_dir: impl Into<PathBuf>) -> Result<Self, JobError> {
        let store_dir = store_dir.into();
        let instance_id = config.instance_id();
        let allocator = Self::file_allocator(&config, &store_dir, &instance_id);
        Self::with_allocator(config, store_dir, Arc::new(allocator))
    }

    pub fn with_allocator(
        config: JobConfig,
        store_dir: impl Into<PathBuf>,
        allocator: Arc<dyn AccessionAllocator>,
    ) -> Result<Self, JobError> {
        config.validate()?;
        let engine = ClusteringEngine::from_config(&config)?;
        Ok(Self {
            instance_id: allocator.instance_id().to_string(),
            store_dir: store_dir.into(),
            config,
            allocator,
            engine,
            metrics: Arc::new(CounterMetrics::new()),
            force_recovery: false,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The allocator `open` uses, exposed for tools inspecting the ledger.
    pub fn file_allocator(
        config: &JobConfig,
        store_dir: &Path,
        instance_id: &str,
    ) -> JsonlBlockAllocator {
        AccessionCategory::ALL.iter().fold(
            JsonlBlockAllocator::new(store_dir, instance_id)
                .with_retry(config.retry_policy())
                .with_closed_history(config.closed_block_history),
            |allocator, category| {
                allocator.with_initial(*category, config.initial_accession(*category))
            },
        )
    }

    /// Recover every open block regardless of age.
    pub fn with_force_recovery(mut self, force: bool) -> Self {
        self.force_recovery = force;
        self
    }

    /// Setting the flag stops the job before its next chunk.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn allocator(&self) -> &Arc<dyn AccessionAllocator> {
        &self.allocator
    }

    pub fn metrics(&self) -> &CounterMetrics {
        &self.metrics
    }

    pub fn engine(&self) -> &ClusteringEngine {
        &self.engine
    }

    pub fn recover(&self) -> Result<Vec<RecoveryReport>, RecoveryError> {
        let cutoff = if self.force_recovery {
            chrono::Duration::zero()
        } else {
            self.config.recovery_cutoff()
        };
        RecoveryAgent::new(
            Arc::clone(&self.allocator),
            Arc::new(VariantStoreDir(self.store_dir.clone())),
        )
        .with_cutoff(cutoff)
        .with_lock_dir(&self.store_dir, self.config.retry_policy())
        .run_all()
    }

    /// Recover, then cluster every chunk of `reader`.
    pub fn run(&self, reader: impl BufRead + Send) -> Result<JobReport, JobError> {
        let recovery = self.recover()?;
        let mut report = JobReport {
            instance_id: self.instance_id.clone(),
            chunks: 0,
            records: 0,
            operations_appended: 0,
            stopped: false,
            recovery,
            counts: BTreeMap::new(),
        };
        tracing::info!(
            instance = %self.instance_id,
            store = %self.store_dir.display(),
            chunk_size = self.config.chunk_size,
            "starting clustering job"
        );

        let (sender, receiver) = bounded(1);
        let chunk_size = self.config.chunk_size;
        let metrics: &CounterMetrics = &self.metrics;
        let result = std::thread::scope(|scope| {
            scope.spawn(move || read_chunks(reader, chunk_size, &sender, metrics));
            self.consume(receiver, &mut report)
        });

        report.counts = self.metrics.snapshot();
        result?;
        tracing::info!(
            chunks = report.chunks,
            records = report.records,
            created = report.created(),
            merged = report.merged(),
            split = report.split(),
            "clustering job finished"
        );
        Ok(report)
    }

    fn consume(
        &self,
        receiver: Receiver<Result<Chunk, JobError>>,
        report: &mut JobReport,
    ) -> Result<(), JobError> {
        for message in receiver {
            let chunk = message?;
            if self.stop.load(Ordering::SeqCst) {
                tracing::info!(chunk = chunk.index, "stop requested; leaving remaining input");
                report.stopped = true;
                return Ok(());
            }
            let outcome = self.commit_chunk(&chunk)?;
            report.chunks += 1;
            report.records += outcome.records;
            report.operations_appended += outcome.operations_appended;
            tracing::info!(
                chunk = chunk.index,
                first_line = chunk.first_line,
                records = outcome.records,
                operations = outcome.operations_appended,
                "committed chunk"
            );
        }
        Ok(())
    }

    /// Cluster and persist one chunk, retrying while the store is unavailable.
    pub fn commit_chunk(&self, chunk: &Chunk) -> Result<ChunkOutcome, JobError> {
        let budget = self.config.store_retry_budget.max(1);
        let retry = self.config.retry_policy();
        let mut last_error = String::new();

        for attempt in 1..=budget {
            let stats = CounterMetrics::new();
            let mut cursors = ChunkCursors::new(
                Arc::clone(&self.allocator),
                self.config.rs_block_size,
                self.config.ss_block_size,
            );
            let now = Utc::now();
            let result = mutate_store_dir(&self.store_dir, &retry, |store| {
                let outcome =
                    self.engine
                        .process_chunk(store, &chunk.records, &mut cursors, &stats, now)?;
                let changed = outcome.changed;
                Ok::<_, EngineError>((outcome, changed))
            });

            match result {
                Ok(outcome) => {
                    cursors.finish()?;
                    stats.drain_into(self.metrics.as_ref());
                    return Ok(outcome);
                }
                Err(AtomicStoreMutationError::Mutation(err)) if err.is_retryable() => {
                    // The counter lock may still be held; whatever cannot be
                    // released now stays open for recovery.
                    if let Err(release) = cursors.abandon() {
                        tracing::warn!(
                            chunk = chunk.index,
                            error = %release,
                            "could not release accession blocks; leaving them to recovery"
                        );
                    }
                    last_error = err.to_string();
                }
                Err(AtomicStoreMutationError::Mutation(err)) => {
                    cursors.abandon()?;
                    return Err(err.into());
                }
                Err(err @ AtomicStoreMutationError::Store(_)) => {
                    // Some of the chunk may be on disk; recovery decides.
                    cursors.leave_open();
                    last_error = err.to_string();
                }
                Err(err) => {
                    cursors.abandon()?;
                    last_error = err.to_string();
                }
            }
            tracing::warn!(
                chunk = chunk.index,
                attempt,
                budget,
                error = %last_error,
                "store unavailable; retrying chunk"
            );
        }

        Err(JobError::StoreUnavailable {
            chunk: chunk.index,
            attempts: budget,
            message: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use std::time::{SystemTime, UNIX_EPOCH};
    use varclust_store::{BLOCKS_LOCK_FILE, EventType, VariantStore, store_lock_path};

    fn temp_store_dir(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "varclust-job-{prefix}-{}-{unique}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).expect("temp dir should be created");
        dir
    }

    fn line(project: &str, contig: &str, start: u64, r: &str, a: &str) -> String {
        format!(
            r#"{{"assemblyAccession":"GCA1","projectAccession":"{project}","contig":"{contig}","start":{start},"referenceAllele":"{r}","alternateAllele":"{a}"}}"#
        )
    }

    fn config() -> JobConfig {
        JobConfig {
            chunk_size: 2,
            rs_block_size: 5,
            ss_block_size: 5,
            instance_id: Some("test-instance".into()),
            lock_attempts: 3,
            lock_backoff_ms: 1,
            lock_max_backoff_ms: 2,
            stale_lock_secs: None,
            ..JobConfig::default()
        }
    }

    #[test]
    fn end_to_end_single_variant() {
        let dir = temp_store_dir("single");
        let runner = JobRunner::open(config(), &dir).expect("runner");
        let input = line("PRJ1", "chr1", 100, "C", "T");
        let report = runner.run(Cursor::new(input)).expect("job");

        assert_eq!(report.created(), 1);
        assert_eq!(report.chunks, 1);
        let store = VariantStore::load_dir(&dir).expect("store");
        let ss = store.submitted_variants().next().expect("stored SS");
        let rs = ss.clustered_variant_accession.expect("clustered");
        assert!(store.clustered_in_assembly("GCA1", rs).is_some());
        assert!(!store_lock_path(&dir).exists());

        let blocks = runner
            .allocator()
            .blocks(AccessionCategory::Clustered)
            .expect("blocks");
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].committed);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn second_run_over_same_input_is_idempotent() {
        let dir = temp_store_dir("idempotent");
        let input = [
            line("PRJ1", "chr1", 100, "C", "T"),
            line("PRJ2", "1", 100, "c", "a"),
            "not json".to_string(),
            line("PRJ1", "chr2", 7, "G", "GA"),
        ]
        .join("\n");

        let first = JobRunner::open(config(), &dir)
            .expect("runner")
            .run(Cursor::new(input.clone()))
            .expect("first job");
        assert_eq!(first.chunks, 2);
        assert_eq!(first.invalid(), 1);
        let before = VariantStore::load_dir(&dir).expect("store");

        let second = JobRunner::open(config(), &dir)
            .expect("runner")
            .run(Cursor::new(input))
            .expect("second job");
        assert_eq!(second.created(), 0);
        assert_eq!(second.operations_appended, 0);
        let after = VariantStore::load_dir(&dir).expect("store");
        let assignments = |store: &VariantStore| {
            store
                .submitted_variants()
                .map(|ss| (ss.accession, ss.clustered_variant_accession))
                .collect::<Vec<_>>()
        };
        assert_eq!(assignments(&before), assignments(&after));
        assert_eq!(after.operations().len(), before.operations().len());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn busy_store_exhausts_budget() {
        let dir = temp_store_dir("busy");
        fs::write(store_lock_path(&dir), "pid=0\n").expect("fixture lock");
        let runner = JobRunner::open(
            JobConfig {
                store_retry_budget: 2,
                lock_attempts: 1,
                ..config()
            },
            &dir,
        )
        .expect("runner");
        let result = runner.run(Cursor::new(line("PRJ1", "chr1", 100, "C", "T")));
        match result {
            Err(JobError::StoreUnavailable { chunk, attempts, .. }) => {
                assert_eq!(chunk, 0);
                assert_eq!(attempts, 2);
            }
            other => panic!("expected store unavailable, got {other:?}"),
        }
        let blocks = runner
            .allocator()
            .blocks(AccessionCategory::Submitted)
            .expect("blocks");
        assert!(blocks.is_empty(), "nothing is reserved while the store lock is held");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn contended_accession_counter_is_retried_then_reported_unavailable() {
        let dir = temp_store_dir("contended");
        fs::write(dir.join(BLOCKS_LOCK_FILE), "pid=0\n").expect("fixture lock");
        let runner = JobRunner::open(
            JobConfig {
                store_retry_budget: 3,
                lock_attempts: 1,
                ..config()
            },
            &dir,
        )
        .expect("runner");
        let input = [
            line("PRJ1", "chr1", 100, "C", "T"),
            line("PRJ2", "chr1", 200, "G", "A"),
        ]
        .join("\n");
        match runner.run(Cursor::new(input.clone())) {
            Err(JobError::StoreUnavailable {
                chunk,
                attempts,
                message,
            }) => {
                assert_eq!(chunk, 0);
                assert_eq!(attempts, 3);
                assert!(message.contains(BLOCKS_LOCK_FILE), "{message}");
            }
            other => panic!("expected store unavailable, got {other:?}"),
        }
        let store = VariantStore::load_dir(&dir).expect("store");
        assert_eq!(store.submitted_len(), 0, "contended chunk persists nothing");

        fs::remove_file(dir.join(BLOCKS_LOCK_FILE)).expect("release fixture lock");
        let report = runner.run(Cursor::new(input)).expect("job after lock release");
        assert_eq!(report.created(), 2);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn recovery_runs_before_the_job() {
        let dir = temp_store_dir("recovery");
        let crashed = JobRunner::file_allocator(&config(), &dir, "crashed");
        let abandoned = crashed
            .reserve(AccessionCategory::Clustered, 5)
            .expect("reserve");

        let runner = JobRunner::open(config(), &dir)
            .expect("runner")
            .with_force_recovery(true);
        let report = runner
            .run(Cursor::new(line("PRJ1", "chr1", 100, "C", "T")))
            .expect("job");
        let rs_recovery = report
            .recovery
            .iter()
            .find(|r| r.category == AccessionCategory::Clustered)
            .expect("RS recovery report");
        assert_eq!(rs_recovery.released, 1);

        let store = VariantStore::load_dir(&dir).expect("store");
        let rs = store
            .submitted_variants()
            .next()
            .and_then(|ss| ss.clustered_variant_accession)
            .expect("clustered");
        assert!(rs >= abandoned.end);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn stop_flag_skips_remaining_chunks() {
        let dir = temp_store_dir("stop");
        let runner = JobRunner::open(config(), &dir).expect("runner");
        runner.stop_handle().store(true, Ordering::SeqCst);
        let report = runner
            .run(Cursor::new(line("PRJ1", "chr1", 100, "C", "T")))
            .expect("job");
        assert!(report.stopped);
        assert_eq!(report.chunks, 0);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn merge_across_runs_is_recorded() {
        let dir = temp_store_dir("merge");
        let mut imported = serde_json::from_str::<SubmittedVariantInput>(&line(
            "PRJ1", "chr1", 100, "C", "T",
        ))
        .expect("fixture");
        imported.clustered_variant_accession = Some(40);
        let mut other = imported.clone();
        other.project_accession = "PRJ2".into();
        other.clustered_variant_accession = Some(30);
        let input = [imported, other]
            .iter()
            .map(|record| serde_json::to_string(record).expect("fixture serializes"))
            .collect::<Vec<_>>()
            .join("\n");

        let report = JobRunner::open(config(), &dir)
            .expect("runner")
            .run(Cursor::new(input))
            .expect("job");
        assert_eq!(report.merged(), 1);
        let store = VariantStore::load_dir(&dir).expect("store");
        assert!(
            store
                .operations()
                .iter()
                .any(|op| op.event_type == EventType::Merged && op.merged_into == Some(30))
        );
        let _ = fs::remove_dir_all(dir);
    }
}
