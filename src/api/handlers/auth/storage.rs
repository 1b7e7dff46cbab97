//! File-backed persistence for credentials, devices, and session records.
//!
//! One JSON document per record, one scalar file per credential. Writes go
//! through a temp file followed by a rename so a crash mid-write never leaves
//! a torn record. Callers hold their component mutex across read-modify-write
//! sequences; these helpers do not lock.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

/// Read a scalar secret file. Returns `None` when absent.
pub(super) async fn read_scalar(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read scalar file: {}", path.display()))
        }
    }
}

/// Persist a scalar secret file atomically.
pub(super) async fn write_scalar(path: &Path, value: &str) -> Result<()> {
    write_atomic(path, value.as_bytes()).await
}

/// Read one JSON record. Returns `None` when absent.
pub(super) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => {
            let record = serde_json::from_slice(&bytes)
                .with_context(|| format!("malformed record: {}", path.display()))?;
            Ok(Some(record))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read record: {}", path.display())),
    }
}

/// Persist one JSON record atomically.
pub(super) async fn write_json<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(record).context("failed to serialize record")?;
    write_atomic(path, &bytes).await
}

/// Delete a record. Returns whether a file was actually removed.
pub(super) async fn remove(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => {
            Err(err).with_context(|| format!("failed to remove record: {}", path.display()))
        }
    }
}

/// Load every parseable record in a directory.
///
/// Malformed files are logged and skipped; a bad record must not take the
/// whole component down at startup.
pub(super) async fn load_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create record directory: {}", dir.display()))?;

    let mut records = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to list record directory: {}", dir.display()))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .context("failed to iterate record directory")?
    {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        match read_json(&path).await {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(err) => warn!("Skipping unreadable record {}: {err:#}", path.display()),
        }
    }

    Ok(records)
}

/// Path for a keyed record inside a component directory.
pub(super) fn record_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("failed to write temp file: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to persist record: {}", path.display()))?;
    Ok(())
}
