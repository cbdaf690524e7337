//! # varclust-engine
//!
//! Clusters submitted variants (SS) into clustered variants (RS).
//!
//! ```text
//! JSONL input ──reader thread──▶ bounded channel ──▶ JobRunner
//!                                                      │ RecoveryAgent (RS, SS)
//!                                                      │ per chunk, under the store lock:
//!                                                      │   ClusteringEngine::process_chunk
//!                                                      │ then commit/release accession blocks
//!                                                      ▼
//!                                                   JobReport
//! ```

pub mod clustering;
pub mod config;
pub mod cursor;
pub mod error;
pub mod metrics;
pub mod pipeline;
mod split;

pub use clustering::{ChunkOutcome, ClusteringEngine, deprecate};
pub use config::{ClusteringPolicy, ConfigError, DEFAULT_CONFIG_FILE, JobConfig};
pub use cursor::{AccessionCursor, ChunkCursors};
pub use error::{EngineError, JobError};
pub use metrics::{CounterMetrics, MetricsSink};
pub use pipeline::{Chunk, JobReport, JobRunner, read_chunks};
