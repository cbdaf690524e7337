//! Exclusive create-new lock files, shared by every process touching a store.

use chrono::Utc;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// `<path>.lock`
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock: OsString = path.as_os_str().to_os_string();
    lock.push(".lock");
    PathBuf::from(lock)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("lock busy: {lock_path}")]
    Busy { lock_path: String },

    #[error("failed to acquire lock {lock_path}: {message}")]
    Io { lock_path: String, message: String },
}

impl LockError {
    fn io(lock_path: &Path, message: impl Into<String>) -> Self {
        Self::Io {
            lock_path: lock_path.display().to_string(),
            message: message.into(),
        }
    }
}

/// Retry schedule for contended locks: exponential backoff, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// A lock file older than this was left by a dead process and is reclaimed.
    pub stale_lock_after: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(500),
            stale_lock_after: Some(Duration::from_secs(600)),
        }
    }
}

impl RetryPolicy {
    /// One attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            stale_lock_after: None,
        }
    }

    /// Delay before attempt `attempt` (1-based; attempt 1 has no delay).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let shift = (attempt - 2).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// Holds a lock file for its lifetime; removes it on drop.
#[derive(Debug)]
pub struct FileLockGuard {
    lock_path: PathBuf,
    _file: File,
}

impl FileLockGuard {
    /// Try once to take `lock_path`.
    pub fn acquire(lock_path: &Path, stale_after: Option<Duration>) -> Result<Self, LockError> {
        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| LockError::io(lock_path, e.to_string()))?;
        }

        match Self::create(lock_path) {
            Err(LockError::Busy { .. }) if is_stale(lock_path, stale_after) => {
                tracing::warn!(lock = %lock_path.display(), "reclaiming stale lock file");
                let _ = fs::remove_file(lock_path);
                Self::create(lock_path)
            }
            other => other,
        }
    }

    /// Take `lock_path`, waiting per `policy` while it is busy.
    pub fn acquire_with_retry(lock_path: &Path, policy: &RetryPolicy) -> Result<Self, LockError> {
        let attempts = policy.max_attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            let delay = policy.backoff(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            match Self::acquire(lock_path, policy.stale_lock_after) {
                Ok(guard) => return Ok(guard),
                Err(err @ LockError::Busy { .. }) => last = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last.unwrap_or_else(|| LockError::Busy {
            lock_path: lock_path.display().to_string(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    fn create(lock_path: &Path) -> Result<Self, LockError> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(mut file) => {
                let _ = writeln!(
                    file,
                    "pid={}\nutc={}",
                    std::process::id(),
                    Utc::now().to_rfc3339()
                );
                Ok(Self {
                    lock_path: lock_path.to_path_buf(),
                    _file: file,
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Err(LockError::Busy {
                lock_path: lock_path.display().to_string(),
            }),
            Err(err) => Err(LockError::io(lock_path, err.to_string())),
        }
    }
}

fn is_stale(lock_path: &Path, stale_after: Option<Duration>) -> bool {
    let Some(stale_after) = stale_after else {
        return false;
    };
    fs::metadata(lock_path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > stale_after)
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}
