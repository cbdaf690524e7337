//! Lock-scoped atomic mutation helpers for the JSONL variant store.

use crate::lock::{FileLockGuard, LockError, RetryPolicy};
use crate::{VariantStore, VariantStoreError};
use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const STORE_LOCK_FILE: &str = "variant_store.lock";

pub fn store_lock_path(store_dir: &Path) -> PathBuf {
    store_dir.join(STORE_LOCK_FILE)
}

#[derive(Debug)]
pub enum AtomicStoreMutationError<E> {
    LockBusy { lock_path: String },
    LockIo { lock_path: String, message: String },
    Store(VariantStoreError),
    Mutation(E),
}

impl<E> AtomicStoreMutationError<E> {
    /// Lock contention or store I/O; the mutation itself did not fail.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, Self::Mutation(_))
    }
}

impl<E> From<LockError> for AtomicStoreMutationError<E> {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Busy { lock_path } => Self::LockBusy { lock_path },
            LockError::Io { lock_path, message } => Self::LockIo { lock_path, message },
        }
    }
}

impl<E: Display> Display for AtomicStoreMutationError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LockBusy { lock_path } => write!(f, "variant-store lock busy: {lock_path}"),
            Self::LockIo { lock_path, message } => {
                write!(
                    f,
                    "failed to acquire variant-store lock {lock_path}: {message}"
                )
            }
            Self::Store(err) => write!(f, "{err}"),
            Self::Mutation(err) => write!(f, "{err}"),
        }
    }
}

impl<E> StdError for AtomicStoreMutationError<E> where
    E: Display + std::fmt::Debug + StdError + 'static
{
}

/// Execute one lock-scoped store mutation against a store directory.
///
/// The mutator returns `(value, changed)` where:
/// - `value` is returned to the caller
/// - `changed=true` persists the store before lock release.
///
/// A mutator error leaves the on-disk store untouched.
pub fn mutate_store_dir<T, E, F>(
    store_dir: impl AsRef<Path>,
    retry: &RetryPolicy,
    mutator: F,
) -> Result<T, AtomicStoreMutationError<E>>
where
    F: FnOnce(&mut VariantStore) -> Result<(T, bool), E>,
{
    let store_dir = store_dir.as_ref();
    let _guard = FileLockGuard::acquire_with_retry(&store_lock_path(store_dir), retry)?;

    let mut store = VariantStore::load_dir(store_dir).map_err(AtomicStoreMutationError::Store)?;
    let (value, changed) = mutator(&mut store).map_err(AtomicStoreMutationError::Mutation)?;
    if changed {
        store
            .save_dir(store_dir)
            .map_err(AtomicStoreMutationError::Store)?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::{SubmittedFlags, SubmittedVariant};
    use chrono::Utc;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};
    use varclust_kernel::ContentHash;

    fn temp_store_dir(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("varclust-atomic-{prefix}-{unique}"));
        fs::create_dir_all(&dir).expect("temp dir should be created");
        dir
    }

    fn ss(hash: &str) -> SubmittedVariant {
        SubmittedVariant {
            accession: 1,
            hash: ContentHash(hash.to_string()),
            assembly_accession: "GCA1".to_string(),
            taxonomy_accession: 0,
            project_accession: "PRJ1".to_string(),
            contig: "chr1".to_string(),
            start: 1,
            reference_allele: "A".to_string(),
            alternate_allele: "G".to_string(),
            clustered_variant_accession: None,
            flags: SubmittedFlags::default(),
            created_date: Utc::now(),
        }
    }

    #[test]
    fn changed_mutation_is_persisted() {
        let dir = temp_store_dir("persist");
        mutate_store_dir(&dir, &RetryPolicy::no_retry(), |store| {
            store.insert_submitted(ss("a"))?;
            Ok::<_, VariantStoreError>(((), true))
        })
        .expect("mutation should succeed");

        let store = VariantStore::load_dir(&dir).expect("store reloads");
        assert_eq!(store.submitted_len(), 1);
        assert!(!store_lock_path(&dir).exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn failed_mutation_leaves_store_untouched() {
        let dir = temp_store_dir("rollback");
        let result = mutate_store_dir(&dir, &RetryPolicy::no_retry(), |store| {
            store.insert_submitted(ss("a"))?;
            store.insert_submitted(ss("a"))?;
            Ok::<_, VariantStoreError>(((), true))
        });
        assert!(matches!(result, Err(AtomicStoreMutationError::Mutation(_))));

        let store = VariantStore::load_dir(&dir).expect("store reloads");
        assert_eq!(store.submitted_len(), 0);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn held_lock_reports_busy() {
        let dir = temp_store_dir("busy");
        let lock_path = store_lock_path(&dir);
        fs::write(&lock_path, "busy\n").expect("lock should be created");

        let result = mutate_store_dir(&dir, &RetryPolicy::no_retry(), |_store| {
            Ok::<_, VariantStoreError>(((), false))
        });
        match result {
            Err(err @ AtomicStoreMutationError::LockBusy { .. }) => {
                assert!(err.is_unavailable());
                assert!(err.to_string().contains("variant_store.lock"));
            }
            other => panic!("expected lock busy error, got {other:?}"),
        }
        let _ = fs::remove_dir_all(dir);
    }
}
