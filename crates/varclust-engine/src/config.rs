//! Job configuration, read from an optional `varclust.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use varclust_kernel::{ContigAliasTable, ContigResolver, IdentityHasher, PassthroughResolver};
use varclust_store::{
    AccessionCategory, DEFAULT_CLOSED_BLOCK_HISTORY, DEFAULT_RECOVERY_CUTOFF_DAYS,
    MAX_RECOVERY_CUTOFF_DAYS, RetryPolicy, SubmittedFlags,
};

pub const DEFAULT_CONFIG_FILE: &str = "varclust.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid toml at {path}: {source}")]
    ParseToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to load contig table {path}: {message}")]
    ContigTable { path: String, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which submitted variants may join a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusteringPolicy {
    pub require_evidence: bool,
    pub require_assembly_match: bool,
    pub require_alleles_match: bool,
}

impl Default for ClusteringPolicy {
    fn default() -> Self {
        Self {
            require_evidence: true,
            require_assembly_match: true,
            require_alleles_match: true,
        }
    }
}

impl ClusteringPolicy {
    /// Whether a submitted variant with these flags may be clustered.
    pub fn admits(&self, flags: &SubmittedFlags) -> bool {
        (!self.require_evidence || flags.supported_by_evidence)
            && (!self.require_assembly_match || flags.assembly_match)
            && (!self.require_alleles_match || flags.alleles_match)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    pub chunk_size: usize,
    pub rs_block_size: u64,
    pub ss_block_size: u64,
    pub initial_rs_accession: u64,
    pub initial_ss_accession: u64,
    pub recovery_cutoff_days: i64,
    /// Closed blocks per category kept listed in the block ledger.
    pub closed_block_history: usize,
    /// Generated per process when unset.
    pub instance_id: Option<String>,
    /// Attempts per chunk before the job gives up with `StoreUnavailable`.
    pub store_retry_budget: u32,
    pub lock_attempts: u32,
    pub lock_backoff_ms: u64,
    pub lock_max_backoff_ms: u64,
    pub stale_lock_secs: Option<u64>,
    pub full_split_scan: bool,
    pub contig_table: Option<PathBuf>,
    pub strict_contigs: bool,
    pub require_insdc_contigs: bool,
    pub policy: ClusteringPolicy,
}

impl Default for JobConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            chunk_size: 1000,
            rs_block_size: 1000,
            ss_block_size: 1000,
            initial_rs_accession: 1,
            initial_ss_accession: 1,
            recovery_cutoff_days: DEFAULT_RECOVERY_CUTOFF_DAYS,
            closed_block_history: DEFAULT_CLOSED_BLOCK_HISTORY,
            instance_id: None,
            store_retry_budget: 3,
            lock_attempts: retry.max_attempts,
            lock_backoff_ms: retry.initial_backoff.as_millis() as u64,
            lock_max_backoff_ms: retry.max_backoff.as_millis() as u64,
            stale_lock_secs: retry.stale_lock_after.map(|d| d.as_secs()),
            full_split_scan: false,
            contig_table: None,
            strict_contigs: false,
            require_insdc_contigs: false,
            policy: ClusteringPolicy::default(),
        }
    }
}

impl JobConfig {
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::ParseToml {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text, &path.display().to_string())?;
        // Relative contig table paths are relative to the config file.
        if let Some(table) = config.contig_table.take() {
            let resolved = match path.parent() {
                Some(parent) if table.is_relative() => parent.join(table),
                _ => table,
            };
            config.contig_table = Some(resolved);
        }
        Ok(config)
    }

    /// `path` when given, else `varclust.toml` in `dir` if present, else defaults.
    pub fn load_or_default(path: Option<&Path>, dir: &Path) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let candidate = dir.join(DEFAULT_CONFIG_FILE);
                if candidate.is_file() {
                    Self::load(candidate)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be at least 1".into()));
        }
        if self.rs_block_size == 0 || self.ss_block_size == 0 {
            return Err(ConfigError::Invalid("block sizes must be at least 1".into()));
        }
        if self.initial_rs_accession == 0 || self.initial_ss_accession == 0 {
            return Err(ConfigError::Invalid("accessions start at 1".into()));
        }
        if !(0..=MAX_RECOVERY_CUTOFF_DAYS).contains(&self.recovery_cutoff_days) {
            return Err(ConfigError::Invalid(format!(
                "recovery_cutoff_days must be between 0 and {MAX_RECOVERY_CUTOFF_DAYS}"
            )));
        }
        if self.store_retry_budget == 0 {
            return Err(ConfigError::Invalid(
                "store_retry_budget must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn block_size(&self, category: AccessionCategory) -> u64 {
        match category {
            AccessionCategory::Clustered => self.rs_block_size,
            AccessionCategory::Submitted => self.ss_block_size,
        }
    }

    pub fn initial_accession(&self, category: AccessionCategory) -> u64 {
        match category {
            AccessionCategory::Clustered => self.initial_rs_accession,
            AccessionCategory::Submitted => self.initial_ss_accession,
        }
    }

    pub fn instance_id(&self) -> String {
        self.instance_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// Clamped to the range `validate` accepts.
    pub fn recovery_cutoff(&self) -> chrono::Duration {
        chrono::Duration::days(self.recovery_cutoff_days.clamp(0, MAX_RECOVERY_CUTOFF_DAYS))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.lock_attempts.max(1),
            initial_backoff: Duration::from_millis(self.lock_backoff_ms),
            max_backoff: Duration::from_millis(self.lock_max_backoff_ms),
            stale_lock_after: self.stale_lock_secs.map(Duration::from_secs),
        }
    }

    pub fn contig_resolver(&self) -> Result<Arc<dyn ContigResolver>, ConfigError> {
        match &self.contig_table {
            Some(path) => {
                let table = ContigAliasTable::from_tsv_path(path)
                    .map_err(|e| ConfigError::ContigTable {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    })?
                    .strict(self.strict_contigs)
                    .require_insdc(self.require_insdc_contigs);
                Ok(Arc::new(table))
            }
            None if self.strict_contigs => Err(ConfigError::Invalid(
                "strict_contigs requires contig_table".into(),
            )),
            None => Ok(Arc::new(PassthroughResolver)),
        }
    }

    pub fn hasher(&self) -> Result<IdentityHasher, ConfigError> {
        Ok(IdentityHasher::new(self.contig_resolver()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_defaults() {
        let config = JobConfig::from_toml_str("", "inline").expect("empty config parses");
        assert_eq!(config, JobConfig::default());
        assert_eq!(config.recovery_cutoff(), chrono::Duration::days(7));
        assert!(config.policy.require_evidence);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = JobConfig::from_toml_str(
            r#"
chunk_size = 2
initial_rs_accession = 100
full_split_scan = true

[policy]
require_evidence = false
"#,
            "inline",
        )
        .expect("config parses");
        assert_eq!(config.chunk_size, 2);
        assert_eq!(config.initial_accession(AccessionCategory::Clustered), 100);
        assert_eq!(config.initial_accession(AccessionCategory::Submitted), 1);
        assert!(config.full_split_scan);
        assert!(!config.policy.require_evidence);
        assert!(config.policy.require_alleles_match);
    }

    #[test]
    fn unknown_keys_and_bad_values_are_rejected() {
        assert!(matches!(
            JobConfig::from_toml_str("chunk_sise = 3", "inline"),
            Err(ConfigError::ParseToml { .. })
        ));
        assert!(matches!(
            JobConfig::from_toml_str("rs_block_size = 0", "inline"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn recovery_cutoff_is_bounded() {
        for days in [-1, MAX_RECOVERY_CUTOFF_DAYS + 1, i64::MAX] {
            let config = JobConfig {
                recovery_cutoff_days: days,
                ..JobConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "{days} days should be rejected"
            );
            let longest = chrono::Duration::days(MAX_RECOVERY_CUTOFF_DAYS);
            assert!(config.recovery_cutoff() <= longest);
        }
        assert!(matches!(
            JobConfig::from_toml_str("recovery_cutoff_days = 9223372036854775807", "inline"),
            Err(ConfigError::Invalid(_))
        ));
        let century = JobConfig {
            recovery_cutoff_days: MAX_RECOVERY_CUTOFF_DAYS,
            ..JobConfig::default()
        };
        assert!(century.validate().is_ok());
    }

    #[test]
    fn policy_checks_only_required_flags() {
        let flags = SubmittedFlags {
            supported_by_evidence: false,
            ..SubmittedFlags::default()
        };
        assert!(!ClusteringPolicy::default().admits(&flags));
        let lenient = ClusteringPolicy {
            require_evidence: false,
            ..ClusteringPolicy::default()
        };
        assert!(lenient.admits(&flags));
    }

    #[test]
    fn strict_contigs_need_a_table() {
        let config = JobConfig {
            strict_contigs: true,
            ..JobConfig::default()
        };
        assert!(matches!(
            config.contig_resolver(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn retry_policy_follows_lock_settings() {
        let config = JobConfig {
            lock_attempts: 0,
            lock_backoff_ms: 2,
            lock_max_backoff_ms: 8,
            stale_lock_secs: None,
            ..JobConfig::default()
        };
        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 1);
        assert_eq!(retry.initial_backoff, Duration::from_millis(2));
        assert_eq!(retry.stale_lock_after, None);
    }
}
