//! JSONL storage: one record per line.
//!
//! Snapshot files are replaced atomically (temp file, fsync, rename, fsync
//! of the directory). The operation log is appended to instead, and a torn
//! final line left by a crash mid-append is dropped on read.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum JsonlError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{path}:{line}: invalid record: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{path}: corrupt file: {reason}")]
    Corrupt { path: String, reason: &'static str },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> JsonlError + '_ {
    move |source| JsonlError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Parse every non-blank, non-comment line of `reader`. `origin` names the
/// source in errors.
pub fn read_records<T: DeserializeOwned>(
    reader: impl BufRead,
    origin: &Path,
) -> Result<Vec<T>, JsonlError> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(io_error(origin))?;
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let record = serde_json::from_str(text).map_err(|e| JsonlError::Parse {
            path: origin.display().to_string(),
            line: index + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

fn encode_lines<T: Serialize>(records: &[T]) -> Result<Vec<u8>, JsonlError> {
    let mut buffer = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buffer, record)?;
        buffer.push(b'\n');
    }
    Ok(buffer)
}

/// Read a JSONL file. A missing file reads as empty.
pub fn read_records_from_path<T: DeserializeOwned>(
    path: impl AsRef<Path>,
) -> Result<Vec<T>, JsonlError> {
    let path = path.as_ref();
    let Some(mut bytes) = read_text_file(path)? else {
        return Ok(Vec::new());
    };

    // A final line without its newline is an interrupted append.
    if !bytes.is_empty() && !bytes.ends_with(b"\n") {
        let cut = bytes
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |pos| pos + 1);
        if serde_json::from_slice::<serde_json::Value>(&bytes[cut..]).is_err() {
            tracing::warn!(
                path = %path.display(),
                bytes = bytes.len() - cut,
                "dropping torn trailing JSONL line"
            );
            bytes.truncate(cut);
        }
    }

    read_records(bytes.as_slice(), path)
}

/// Read one JSON document; a missing file reads as `None`.
pub fn read_json_from_path<T: DeserializeOwned>(
    path: impl AsRef<Path>,
) -> Result<Option<T>, JsonlError> {
    let path = path.as_ref();
    let Some(bytes) = read_text_file(path)? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| JsonlError::Parse {
            path: path.display().to_string(),
            line: e.line(),
            message: e.to_string(),
        })
}

/// Replace a JSONL file with `records`.
pub fn write_records_to_path<T: Serialize>(
    path: impl AsRef<Path>,
    records: &[T],
) -> Result<(), JsonlError> {
    replace_file(path.as_ref(), &encode_lines(records)?)
}

/// Replace a file with one pretty-printed JSON document.
pub fn write_json_to_path<T: Serialize>(
    path: impl AsRef<Path>,
    value: &T,
) -> Result<(), JsonlError> {
    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');
    replace_file(path.as_ref(), &body)
}

/// Append records to a JSONL file, creating it if needed, and fsync.
pub fn append_records_to_path<T: Serialize>(
    path: impl AsRef<Path>,
    records: &[T],
) -> Result<(), JsonlError> {
    let path = path.as_ref();
    if records.is_empty() {
        return Ok(());
    }
    let body = encode_lines(records)?;
    create_parent(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_error(path))?;
    file.write_all(&body).map_err(io_error(path))?;
    file.sync_all().map_err(io_error(path))
}

/// File contents, checked to be NUL-free UTF-8; `None` if absent.
fn read_text_file(path: &Path) -> Result<Option<Vec<u8>>, JsonlError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path)(e)),
    };
    let reason = if bytes.contains(&0) {
        Some("NUL byte in file")
    } else if std::str::from_utf8(&bytes).is_err() {
        Some("invalid UTF-8")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(JsonlError::Corrupt {
            path: path.display().to_string(),
            reason,
        }),
        None => Ok(Some(bytes)),
    }
}

fn create_parent(path: &Path) -> Result<(), JsonlError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(io_error(parent))
        }
        _ => Ok(()),
    }
}

/// Write `body` beside `path`, then rename over it. Readers see either the
/// old file or the new one.
fn replace_file(path: &Path, body: &[u8]) -> Result<(), JsonlError> {
    create_parent(path)?;
    let staging = staging_path(path);

    let staged = File::create(&staging).and_then(|file| {
        let mut writer = BufWriter::new(file);
        writer.write_all(body)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&staging, path)
    });
    if let Err(e) = staged {
        let _ = fs::remove_file(&staging);
        return Err(io_error(&staging)(e));
    }

    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)
            .and_then(|dir| dir.sync_all())
            .map_err(io_error(parent)),
        _ => Ok(()),
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".staging-{}-{nanos}", std::process::id()));
    PathBuf::from(name)
}
