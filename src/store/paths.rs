//! Typed paths into a run directory.
//!
//! Every file the store, engine, and operators touch is named here so the
//! on-disk layout has a single definition.
use super::types::System;
use std::path::{Path, PathBuf};

pub const RUN_FILE: &str = "designrun.json";
pub const EVENTS_FILE: &str = "events.ndjson";
pub const REFERENCE_MAP_FILE: &str = "map.json";

/// Paths rooted at `<runs_dir>/<run_id>`.
#[derive(Debug, Clone)]
pub struct RunPaths {
    root: PathBuf,
}

impl RunPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the `designrun.json` path.
    pub fn run_file(&self) -> PathBuf {
        self.root.join(RUN_FILE)
    }

    /// Return the `events.ndjson` path.
    pub fn events_file(&self) -> PathBuf {
        self.root.join(EVENTS_FILE)
    }

    pub fn step(&self, step_id: &str) -> StepPaths {
        StepPaths::new(self.root.join(step_id))
    }
}

/// Paths rooted at a single step directory.
#[derive(Debug, Clone)]
pub struct StepPaths {
    root: PathBuf,
}

impl StepPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn user_text(&self) -> PathBuf {
        self.input_dir().join("user_text.txt")
    }

    pub fn mode(&self) -> PathBuf {
        self.input_dir().join("mode.txt")
    }

    pub fn references_dir(&self) -> PathBuf {
        self.input_dir().join("references")
    }

    pub fn reference_map(&self) -> PathBuf {
        self.references_dir().join(REFERENCE_MAP_FILE)
    }

    /// Return the `gpt/` or `generators/<system>/` directory.
    pub fn system_dir(&self, system: System) -> PathBuf {
        match system {
            System::Chat => self.root.join("gpt"),
            System::Aura | System::Variant => {
                self.root.join("generators").join(system.as_str())
            }
        }
    }

    pub fn result_file(&self, system: System) -> PathBuf {
        self.system_dir(system).join("result.json")
    }

    pub fn prompt_used(&self, system: System) -> PathBuf {
        self.system_dir(system).join("prompt_used.txt")
    }

    pub fn url_file(&self, system: System) -> PathBuf {
        self.system_dir(system).join("url.txt")
    }

    /// Return the `gpt/outputs/` directory holding normalized prompt files.
    pub fn gpt_outputs_dir(&self) -> PathBuf {
        self.system_dir(System::Chat).join("outputs")
    }

    pub fn gpt_output(&self, file_name: &str) -> PathBuf {
        self.gpt_outputs_dir().join(file_name)
    }

    pub fn gpt_raw(&self) -> PathBuf {
        self.system_dir(System::Chat).join("raw.txt")
    }

    pub fn gpt_blocks(&self) -> PathBuf {
        self.system_dir(System::Chat).join("blocks.json")
    }

    pub fn gpt_extracted(&self) -> PathBuf {
        self.system_dir(System::Chat).join("extracted.json")
    }

    pub fn gpt_response(&self) -> PathBuf {
        self.system_dir(System::Chat).join("response.json")
    }

    pub fn urls_file(&self, system: System) -> PathBuf {
        self.system_dir(system).join("urls.json")
    }

    /// Relative path of an item's exported document, keyed only by item id.
    pub fn export_rel(item_id: &str) -> String {
        format!("exports/{}.html", artifact_stem(item_id))
    }

    /// Relative path of an item's capture, keyed only by item id.
    pub fn capture_rel(item_id: &str) -> String {
        format!("captures/{}.png", artifact_stem(item_id))
    }
}

/// File-name-safe form of an external item identifier.
pub fn artifact_stem(item_id: &str) -> String {
    let stem: String = item_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "item".to_string()
    } else {
        stem
    }
}

/// Compose the directory name of a step: `S01_dna_01`.
pub fn step_dir_name(ordinal: u32, name: &str) -> String {
    format!("S{ordinal:02}_{name}")
}

/// Ordinal of a step directory name, if it has one.
pub fn step_ordinal(dir_name: &str) -> Option<u32> {
    let rest = dir_name.strip_prefix('S')?;
    let (digits, name) = rest.split_once('_')?;
    if digits.is_empty() || name.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
