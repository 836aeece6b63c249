//! Append-only event log (`events.ndjson`).
use super::types::Event;
use crate::error::{DesignError, IoContext, JsonContext, Result};
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Append one event as a single JSONL write.
///
/// A torn final line left by a crash is cut back to the last complete record
/// first, so later appends never bury it mid-file.
pub fn append_event(path: &Path, event: &Event) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).io_context(|| format!("create {}", parent.display()))?;
    }
    let mut line = serde_json::to_vec(event).json_context(|| "serialize event")?;
    line.push(b'\n');
    let mut file = fs::OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .io_context(|| format!("open {}", path.display()))?;
    drop_torn_tail(&mut file, path)?;
    file.write_all(&line)
        .io_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn drop_torn_tail(file: &mut fs::File, path: &Path) -> Result<()> {
    let len = file
        .metadata()
        .io_context(|| format!("stat {}", path.display()))?
        .len();
    let complete = complete_len(file, len).io_context(|| format!("read {}", path.display()))?;
    if complete < len {
        tracing::warn!(
            path = %path.display(),
            dropped_bytes = len - complete,
            "dropping torn event line"
        );
        file.set_len(complete)
            .io_context(|| format!("truncate {}", path.display()))?;
    }
    Ok(())
}

/// Length of the prefix that ends with the last newline.
fn complete_len(file: &mut fs::File, len: u64) -> std::io::Result<u64> {
    let mut end = len;
    let mut chunk = [0u8; 4096];
    while end > 0 {
        let start = end.saturating_sub(chunk.len() as u64);
        let buf = &mut chunk[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(buf)?;
        if let Some(pos) = buf.iter().rposition(|byte| *byte == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

/// Read all events in append order.
///
/// A torn final line (crash mid-append) is skipped; a malformed line anywhere
/// else is an error.
pub fn read_events(path: &Path) -> Result<Vec<Event>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path).io_context(|| format!("read {}", path.display()))?;
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let mut events = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        match serde_json::from_str::<Event>(line) {
            Ok(event) => events.push(event),
            Err(err) if idx + 1 == lines.len() && !text.ends_with('\n') => {
                tracing::warn!(path = %path.display(), error = %err, "skipping torn event line");
            }
            Err(err) => {
                return Err(DesignError::Json {
                    context: format!("parse event line {} of {}", idx + 1, path.display()),
                    source: err,
                });
            }
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::EventStatus;
    use chrono::Utc;
    use serde_json::json;

    fn event(action: &str) -> Event {
        Event {
            timestamp: Utc::now(),
            run_id: "r1".into(),
            step_id: None,
            action: action.into(),
            status: EventStatus::Ok,
            detail: json!({}),
        }
    }

    #[test]
    fn events_read_back_in_append_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.ndjson");
        append_event(&path, &event("init")).expect("append init");
        append_event(&path, &event("add_step")).expect("append add_step");
        let actions: Vec<String> = read_events(&path)
            .expect("read")
            .into_iter()
            .map(|event| event.action)
            .collect();
        assert_eq!(actions, vec!["init", "add_step"]);
    }

    #[test]
    fn torn_trailing_line_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.ndjson");
        append_event(&path, &event("init")).expect("append");
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open");
        file.write_all(b"{\"timestamp\":\"2026-").expect("write torn line");
        let events = read_events(&path).expect("read");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn append_after_a_torn_line_keeps_the_log_readable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.ndjson");
        append_event(&path, &event("init")).expect("append init");
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open");
        file.write_all(b"{\"timestamp\":\"2026-").expect("write torn line");
        drop(file);

        append_event(&path, &event("add_step")).expect("append after crash");
        append_event(&path, &event("set_input")).expect("append again");
        let actions: Vec<String> = read_events(&path)
            .expect("read")
            .into_iter()
            .map(|event| event.action)
            .collect();
        assert_eq!(actions, vec!["init", "add_step", "set_input"]);
    }

    #[test]
    fn torn_first_line_is_dropped_on_append() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.ndjson");
        fs::write(&path, "{\"timestamp\"").expect("write torn line");
        append_event(&path, &event("init")).expect("append");
        let events = read_events(&path).expect("read");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "init");
    }

    #[test]
    fn malformed_middle_line_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.ndjson");
        fs::write(&path, "garbage\n").expect("write");
        append_event(&path, &event("init")).expect("append");
        assert!(read_events(&path).is_err());
    }
}
