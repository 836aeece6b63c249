//! Per-system target resolution.
//!
//! Each (system, mode) pair names the prompt file it consumes and where its
//! target URL may come from. Precedence is always explicit, then persisted,
//! then configured default, with some sources disabled per mode.
use crate::config::{ProjectConfig, DEFAULT_AURA_START_URL, DEFAULT_VARIANT_START_URL};
use crate::error::{DesignError, Result};
use crate::store::{Mode, StepPaths, System};
use std::path::PathBuf;

/// Where a system's prompt text comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSource {
    /// The step's own `input/user_text.txt`.
    UserText,
    /// A normalized file under `gpt/outputs/`.
    GptOutput(&'static str),
}

impl PromptSource {
    pub fn path(self, step: &StepPaths) -> PathBuf {
        match self {
            PromptSource::UserText => step.user_text(),
            PromptSource::GptOutput(file_name) => step.gpt_output(file_name),
        }
    }
}

/// Prompt source for a system in a mode; rejects illegal pairs.
pub fn prompt_source(system: System, mode: Mode) -> Result<PromptSource> {
    match (system, mode) {
        (System::Chat, _) => Ok(PromptSource::UserText),
        (System::Aura, Mode::Dna) => Ok(PromptSource::GptOutput("aura_dna.txt")),
        (System::Aura, Mode::Feedback) => Ok(PromptSource::GptOutput("aura_edit.txt")),
        (System::Variant, Mode::Variations | Mode::Feedback) => {
            Ok(PromptSource::GptOutput("variant_prompt.txt"))
        }
        (System::Aura, Mode::Variations) | (System::Variant, Mode::Dna) => {
            Err(DesignError::precondition(format!(
                "{system} cannot run a {mode} step"
            )))
        }
    }
}

/// URL to open for a generation.
pub fn target_url(
    system: System,
    mode: Mode,
    explicit: Option<&str>,
    persisted: Option<&str>,
    config: &ProjectConfig,
) -> Result<String> {
    let resolved = match (system, mode) {
        (System::Chat, _) => first_of([explicit, persisted, config.chat_url.as_deref()]),
        // A new project never reuses the previous one.
        (System::Aura, Mode::Dna) => first_of([
            explicit,
            config.aura_start_url.as_deref(),
            Some(DEFAULT_AURA_START_URL),
        ]),
        (System::Variant, Mode::Variations) => first_of([
            explicit,
            persisted,
            config.variant_start_url.as_deref(),
            Some(DEFAULT_VARIANT_START_URL),
        ]),
        (System::Aura | System::Variant, Mode::Feedback) => first_of([explicit, persisted]),
        (System::Aura, Mode::Variations) | (System::Variant, Mode::Dna) => None,
    };
    resolved.ok_or_else(|| match (system, mode) {
        (System::Chat, _) => DesignError::precondition(
            "no chat URL; pass --url, set chatgpt_url in config.json, or run once with --url",
        ),
        (_, Mode::Feedback) => DesignError::precondition(format!(
            "{system} FEEDBACK needs an existing project; run a {system} generation first or pass --url"
        )),
        _ => DesignError::precondition(format!("{system} cannot run a {mode} step")),
    })
}

/// URL for a re-export: explicit, then what the step recorded, then the run's.
pub fn reexport_url(
    system: System,
    explicit: Option<&str>,
    step_recorded: Option<&str>,
    persisted: Option<&str>,
) -> Result<String> {
    first_of([explicit, step_recorded, persisted]).ok_or_else(|| {
        DesignError::precondition(format!(
            "no {system} URL to re-export from; run the step first or pass --url"
        ))
    })
}

fn first_of<const N: usize>(candidates: [Option<&str>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}
