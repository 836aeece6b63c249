//! Crash-atomic file replacement.
//!
//! Content goes to a temp file in the destination directory, is synced, then
//! renamed over the target. A reader sees the old bytes or the new bytes.
use crate::error::{IoContext, JsonContext, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).io_context(|| format!("create {}", parent.display()))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".designrun-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .io_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(bytes)
        .io_context(|| format!("write temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .io_context(|| format!("sync temp file for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .io_context(|| format!("publish {}", path.display()))?;
    Ok(())
}

pub fn write_text_atomic(path: &Path, text: &str) -> Result<()> {
    write_atomic(path, text.as_bytes())
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .json_context(|| format!("serialize {}", path.display()))?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}
