//! File-backed run/step store.
//!
//! A run is a directory under the runs root holding `designrun.json`, an
//! append-only `events.ndjson`, and one directory per step. Every call reads
//! state fresh from disk; nothing is cached between invocations.
mod atomic;
mod events;
mod paths;
mod types;

pub use atomic::{write_json_atomic, write_text_atomic};
pub use paths::{RunPaths, StepPaths};
pub use types::{
    Continuations, ErrorRecord, Event, EventStatus, ExportedItem, Mode, OperatorResult,
    ResultMeta, ResultStatus, RunRecord, StepInput, StepSummary, System, SystemSummary,
    RESULT_SCHEMA_VERSION, RUN_SCHEMA_VERSION,
};

use crate::error::{DesignError, IoContext, JsonContext, Result};
use chrono::Utc;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Maximum reference images stored per step.
pub const MAX_REFERENCE_IMAGES: usize = 2;
/// Reference images must be strictly smaller than this.
pub const MAX_REFERENCE_BYTES: u64 = 5 * 1024 * 1024;

/// Handle on a runs root directory.
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_paths(&self, run_id: &str) -> Result<RunPaths> {
        validate_component("run id", run_id)?;
        Ok(RunPaths::new(self.root.join(run_id)))
    }

    /// Create a new run. Fails with `AlreadyExists` if the run already holds state.
    pub fn create_run(&self, run_id: &str) -> Result<RunRecord> {
        let paths = self.run_paths(run_id)?;
        if paths.run_file().exists() {
            return Err(DesignError::AlreadyExists(format!("run {run_id}")));
        }
        fs::create_dir_all(paths.root())
            .io_context(|| format!("create {}", paths.root().display()))?;
        let record = RunRecord {
            schema_version: RUN_SCHEMA_VERSION,
            run_id: run_id.to_string(),
            created_at: Utc::now(),
            last_ordinal: 0,
            steps: Vec::new(),
            continuations: Continuations::default(),
        };
        write_json_atomic(&paths.run_file(), &record)?;
        self.append_event(run_id, None, "init", EventStatus::Ok, json!({}))?;
        tracing::info!(run_id, root = %paths.root().display(), "run created");
        Ok(record)
    }

    pub fn load_run(&self, run_id: &str) -> Result<RunRecord> {
        let paths = self.run_paths(run_id)?;
        let path = paths.run_file();
        if !path.exists() {
            return Err(DesignError::NotFound(format!("run {run_id}")));
        }
        let bytes = fs::read(&path).io_context(|| format!("read {}", path.display()))?;
        serde_json::from_slice(&bytes).json_context(|| format!("parse {}", path.display()))
    }

    fn save_run(&self, record: &RunRecord) -> Result<()> {
        let paths = self.run_paths(&record.run_id)?;
        write_json_atomic(&paths.run_file(), record)
    }

    /// Allocate the next step ordinal and create the step directory.
    pub fn add_step(&self, run_id: &str, name: &str) -> Result<String> {
        validate_component("step name", name)?;
        let mut record = self.load_run(run_id)?;
        let paths = self.run_paths(run_id)?;
        let ordinal = record.last_ordinal.max(highest_ordinal_on_disk(paths.root())?) + 1;
        let step_id = paths::step_dir_name(ordinal, name);
        let step = paths.step(&step_id);
        fs::create_dir_all(step.input_dir())
            .io_context(|| format!("create {}", step.input_dir().display()))?;
        record.last_ordinal = ordinal;
        record.steps.push(step_id.clone());
        self.save_run(&record)?;
        self.append_event(
            run_id,
            Some(&step_id),
            "add_step",
            EventStatus::Ok,
            json!({ "ordinal": ordinal, "name": name }),
        )?;
        tracing::info!(run_id, step_id = %step_id, "step added");
        Ok(step_id)
    }

    /// Resolve an existing step's paths.
    pub fn step_paths(&self, run_id: &str, step_id: &str) -> Result<StepPaths> {
        validate_component("step id", step_id)?;
        let paths = self.run_paths(run_id)?;
        if !paths.run_file().exists() {
            return Err(DesignError::NotFound(format!("run {run_id}")));
        }
        let step = paths.step(step_id);
        if !step.root().is_dir() {
            return Err(DesignError::NotFound(format!("step {step_id} in run {run_id}")));
        }
        Ok(step)
    }

    /// Read the step's prompt text and mode, if input has been set.
    pub fn read_input(&self, run_id: &str, step_id: &str) -> Result<Option<StepInput>> {
        let step = self.step_paths(run_id, step_id)?;
        let Some(mode) = read_mode(&step)? else {
            return Ok(None);
        };
        let text_path = step.user_text();
        let text = fs::read_to_string(&text_path)
            .io_context(|| format!("read {}", text_path.display()))?;
        Ok(Some(StepInput { text, mode }))
    }

    /// Set the step's prompt text and mode.
    ///
    /// The mode cannot change once set, and input is frozen once any system
    /// has committed a success or partial result for the step.
    pub fn set_input(&self, run_id: &str, step_id: &str, text: &str, mode: &str) -> Result<()> {
        let mode: Mode = mode.parse()?;
        let step = self.step_paths(run_id, step_id)?;
        if let Some(existing) = read_mode(&step)? {
            if existing != mode {
                return Err(DesignError::precondition(format!(
                    "step {step_id} mode is {existing}; it cannot change to {mode}"
                )));
            }
        }
        for system in System::ALL {
            if let Some(result) = read_result_file(&step, system)? {
                if result.status != ResultStatus::Failure {
                    return Err(DesignError::precondition(format!(
                        "step {step_id} already has a {system} result; add a new step to change its input"
                    )));
                }
            }
        }
        write_text_atomic(&step.user_text(), text)?;
        write_text_atomic(&step.mode(), mode.as_str())?;
        self.append_event(
            run_id,
            Some(step_id),
            "set_input",
            EventStatus::Ok,
            json!({ "mode": mode, "input_sha256": input_digest(text) }),
        )?;
        tracing::info!(run_id, step_id, mode = %mode, "step input set");
        Ok(())
    }

    /// Copy reference images into the step and merge their labels into `map.json`.
    ///
    /// `labels` is keyed by the source path as given or by its file name.
    pub fn add_references(
        &self,
        run_id: &str,
        step_id: &str,
        images: &[PathBuf],
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<String>> {
        let step = self.step_paths(run_id, step_id)?;
        let refs_dir = step.references_dir();
        let existing = reference_files(&refs_dir)?;
        if existing.len() + images.len() > MAX_REFERENCE_IMAGES {
            return Err(DesignError::InvalidInput(format!(
                "step {step_id} would hold {} reference images; the limit is {MAX_REFERENCE_IMAGES}",
                existing.len() + images.len()
            )));
        }
        for image in images {
            let meta = fs::metadata(image).map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => {
                    DesignError::NotFound(format!("reference image {}", image.display()))
                }
                _ => DesignError::Io {
                    context: format!("stat {}", image.display()),
                    source: err,
                },
            })?;
            if !meta.is_file() {
                return Err(DesignError::InvalidInput(format!(
                    "reference image {} is not a file",
                    image.display()
                )));
            }
            if meta.len() >= MAX_REFERENCE_BYTES {
                return Err(DesignError::InvalidInput(format!(
                    "reference image {} is {} bytes; it must be under {MAX_REFERENCE_BYTES}",
                    image.display(),
                    meta.len()
                )));
            }
        }

        fs::create_dir_all(&refs_dir).io_context(|| format!("create {}", refs_dir.display()))?;
        let mut map = read_reference_map(&step.reference_map())?;
        let mut added = Vec::with_capacity(images.len());
        for (offset, image) in images.iter().enumerate() {
            let index = existing.len() + offset + 1;
            let ext = image
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.to_ascii_lowercase())
                .unwrap_or_else(|| "png".to_string());
            let file_name = format!("ref_{index:03}.{ext}");
            let dest = refs_dir.join(&file_name);
            fs::copy(image, &dest)
                .io_context(|| format!("copy {} to {}", image.display(), dest.display()))?;
            let source_name = image
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let label = labels
                .get(&image.display().to_string())
                .or_else(|| labels.get(&source_name))
                .cloned()
                .unwrap_or_else(|| format!("Reference {index}"));
            map.insert(file_name.clone(), label);
            added.push(file_name);
        }
        write_json_atomic(&step.reference_map(), &map)?;
        self.append_event(
            run_id,
            Some(step_id),
            "add_references",
            EventStatus::Ok,
            json!({ "files": added }),
        )?;
        Ok(added)
    }

    /// Reference images to hand to an operator: sorted, size-limited, at most two.
    pub fn reference_images(&self, run_id: &str, step_id: &str) -> Result<Vec<PathBuf>> {
        let step = self.step_paths(run_id, step_id)?;
        let mut picked = Vec::new();
        for path in reference_files(&step.references_dir())? {
            let size = fs::metadata(&path)
                .io_context(|| format!("stat {}", path.display()))?
                .len();
            if size >= MAX_REFERENCE_BYTES {
                tracing::warn!(path = %path.display(), size, "skipping oversized reference");
                continue;
            }
            picked.push(path);
            if picked.len() >= MAX_REFERENCE_IMAGES {
                break;
            }
        }
        Ok(picked)
    }

    pub fn get_continuation(&self, run_id: &str, system: System) -> Result<Option<String>> {
        let record = self.load_run(run_id)?;
        Ok(record.continuations.get(system).map(str::to_string))
    }

    /// Replace one continuation identifier. The only write path for continuations.
    pub fn set_continuation(&self, run_id: &str, system: System, value: &str) -> Result<()> {
        let mut record = self.load_run(run_id)?;
        if record.continuations.get(system) == Some(value) {
            return Ok(());
        }
        record.continuations.set(system, value.to_string());
        self.save_run(&record)?;
        self.append_event(
            run_id,
            None,
            "set_continuation",
            EventStatus::Ok,
            json!({ "system": system, "value": value }),
        )?;
        tracing::info!(run_id, system = %system, value, "continuation updated");
        Ok(())
    }

    pub fn read_result(
        &self,
        run_id: &str,
        step_id: &str,
        system: System,
    ) -> Result<Option<ResultMeta>> {
        let step = self.step_paths(run_id, step_id)?;
        read_result_file(&step, system)
    }

    /// Write `result.json` for a committed operator result and log it.
    pub fn record_result(
        &self,
        run_id: &str,
        step_id: &str,
        system: System,
        action: &str,
        result: &OperatorResult,
        input_sha256: Option<String>,
    ) -> Result<ResultMeta> {
        let step = self.step_paths(run_id, step_id)?;
        let failed_items = result.failed_items();
        let meta = ResultMeta {
            schema_version: RESULT_SCHEMA_VERSION,
            system,
            action: action.to_string(),
            status: result.status,
            recorded_at: Utc::now(),
            continuation_id: result.continuation_id.clone(),
            input_sha256,
            extracted: result.extracted.clone(),
            item_ids: result.item_ids.clone(),
            exported: result.exported.clone(),
            failed_items: failed_items.clone(),
            error: result.error.clone(),
            last_failure: None,
            telemetry: result.telemetry.clone(),
        };
        write_json_atomic(&step.result_file(system), &meta)?;
        let item_errors: BTreeMap<&str, &str> = meta
            .exported
            .iter()
            .filter_map(|item| Some((item.item_id.as_str(), item.error.as_deref()?)))
            .collect();
        let mut detail = json!({
            "system": system,
            "item_ids": meta.item_ids,
            "failed_items": failed_items,
            "item_errors": item_errors,
            "continuation_id": meta.continuation_id,
        });
        if let Some(error) = &meta.error {
            detail["error_kind"] = json!(error.kind);
            detail["error"] = json!(error.message);
        }
        self.append_event(run_id, Some(step_id), action, result.status.into(), detail)?;
        Ok(meta)
    }

    /// Record a failed operation. Continuations are left as they were.
    ///
    /// A committed success or partial result stays in `result.json` with the
    /// error noted under `last_failure`; its exports remain the step's record
    /// and its input stays frozen. Otherwise the failure replaces the result,
    /// keeping the previous `item_ids` available for replay.
    pub fn record_failure(
        &self,
        run_id: &str,
        step_id: &str,
        system: System,
        action: &str,
        err: &DesignError,
    ) -> Result<ResultMeta> {
        let step = self.step_paths(run_id, step_id)?;
        let previous = read_result_file(&step, system)?;
        let error = ErrorRecord::from(err);
        let meta = match previous {
            Some(mut kept) if kept.status != ResultStatus::Failure => {
                tracing::info!(
                    run_id,
                    step_id,
                    system = %system,
                    kept = ?kept.status,
                    "failure leaves the committed result in place"
                );
                kept.last_failure = Some(error.clone());
                kept
            }
            previous => ResultMeta {
                schema_version: RESULT_SCHEMA_VERSION,
                system,
                action: action.to_string(),
                status: ResultStatus::Failure,
                recorded_at: Utc::now(),
                continuation_id: previous.as_ref().and_then(|prev| prev.continuation_id.clone()),
                input_sha256: previous.as_ref().and_then(|prev| prev.input_sha256.clone()),
                extracted: Vec::new(),
                item_ids: previous.map(|prev| prev.item_ids).unwrap_or_default(),
                exported: Vec::new(),
                failed_items: Vec::new(),
                error: Some(error.clone()),
                last_failure: None,
                telemetry: Value::Null,
            },
        };
        write_json_atomic(&step.result_file(system), &meta)?;
        self.append_event(
            run_id,
            Some(step_id),
            action,
            EventStatus::Failure,
            json!({
                "system": system,
                "error_kind": error.kind,
                "error": error.message,
                "kept_result": meta.status != ResultStatus::Failure,
            }),
        )?;
        Ok(meta)
    }

    pub fn append_event(
        &self,
        run_id: &str,
        step_id: Option<&str>,
        action: &str,
        status: EventStatus,
        detail: Value,
    ) -> Result<()> {
        let paths = self.run_paths(run_id)?;
        let event = Event {
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            step_id: step_id.map(str::to_string),
            action: action.to_string(),
            status,
            detail,
        };
        events::append_event(&paths.events_file(), &event)
    }

    pub fn read_events(&self, run_id: &str) -> Result<Vec<Event>> {
        self.load_run(run_id)?;
        let paths = self.run_paths(run_id)?;
        events::read_events(&paths.events_file())
    }

    /// Summarize every step directory of the run in ordinal order.
    pub fn list_steps(&self, run_id: &str) -> Result<Vec<StepSummary>> {
        self.load_run(run_id)?;
        let paths = self.run_paths(run_id)?;
        let mut step_ids: Vec<(u32, String)> = Vec::new();
        for entry in fs::read_dir(paths.root())
            .io_context(|| format!("read {}", paths.root().display()))?
        {
            let entry = entry.io_context(|| format!("read {}", paths.root().display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(ordinal) = paths::step_ordinal(&name) {
                if entry.path().is_dir() {
                    step_ids.push((ordinal, name));
                }
            }
        }
        step_ids.sort();
        let mut summaries = Vec::with_capacity(step_ids.len());
        for (_, step_id) in step_ids {
            let step = paths.step(&step_id);
            let mut results = Vec::new();
            for system in System::ALL {
                if let Some(meta) = read_result_file(&step, system)? {
                    results.push(SystemSummary {
                        system,
                        action: meta.action,
                        status: meta.status,
                        item_count: meta.item_ids.len(),
                        failed_items: meta.failed_items,
                    });
                }
            }
            summaries.push(StepSummary {
                step_id,
                mode: read_mode(&step)?,
                results,
            });
        }
        Ok(summaries)
    }
}

/// Hex SHA-256 of prompt text; recorded with results to tie them to their input.
pub fn input_digest(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{digest:x}")
}

fn validate_component(kind: &str, value: &str) -> Result<()> {
    let valid = !value.trim().is_empty()
        && value != "."
        && value != ".."
        && !value.contains(&['/', '\\'][..])
        && !value.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(DesignError::InvalidInput(format!("{kind} {value:?} is not a valid name")))
    }
}

fn highest_ordinal_on_disk(run_dir: &Path) -> Result<u32> {
    let mut highest = 0;
    for entry in fs::read_dir(run_dir).io_context(|| format!("read {}", run_dir.display()))? {
        let entry = entry.io_context(|| format!("read {}", run_dir.display()))?;
        if let Some(ordinal) = paths::step_ordinal(&entry.file_name().to_string_lossy()) {
            highest = highest.max(ordinal);
        }
    }
    Ok(highest)
}

fn read_mode(step: &StepPaths) -> Result<Option<Mode>> {
    let path = step.mode();
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).io_context(|| format!("read {}", path.display()))?;
    raw.parse::<Mode>().map(Some)
}

fn read_result_file(step: &StepPaths, system: System) -> Result<Option<ResultMeta>> {
    let path = step.result_file(system);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path).io_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .map(Some)
        .json_context(|| format!("parse {}", path.display()))
}

fn reference_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).io_context(|| format!("read {}", dir.display()))? {
        let entry = entry.io_context(|| format!("read {}", dir.display()))?;
        let path = entry.path();
        let is_map =
            path.file_name().and_then(|name| name.to_str()) == Some(paths::REFERENCE_MAP_FILE);
        if path.is_file() && !is_map {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_reference_map(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let bytes = fs::read(path).io_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&bytes).json_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
