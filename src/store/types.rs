//! Persisted records: run state, step input, per-system results, and events.
use crate::error::{DesignError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const RUN_SCHEMA_VERSION: u32 = 1;
pub const RESULT_SCHEMA_VERSION: u32 = 1;

/// External systems a step can be dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum System {
    Chat,
    Aura,
    Variant,
}

impl System {
    pub const ALL: [System; 3] = [System::Chat, System::Aura, System::Variant];

    pub fn as_str(self) -> &'static str {
        match self {
            System::Chat => "chat",
            System::Aura => "aura",
            System::Variant => "variant",
        }
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step mode. Fixed once set; decides which systems may run against the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Dna,
    Variations,
    Feedback,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Dna => "DNA",
            Mode::Variations => "VARIATIONS",
            Mode::Feedback => "FEEDBACK",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = DesignError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DNA" => Ok(Mode::Dna),
            "VARIATIONS" => Ok(Mode::Variations),
            "FEEDBACK" => Ok(Mode::Feedback),
            _ => Err(DesignError::InvalidMode(raw.trim().to_string())),
        }
    }
}

/// Most recent known continuation identifier per system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuations {
    #[serde(default)]
    pub chat: Option<String>,
    #[serde(default)]
    pub aura: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
}

impl Continuations {
    pub fn get(&self, system: System) -> Option<&str> {
        match system {
            System::Chat => self.chat.as_deref(),
            System::Aura => self.aura.as_deref(),
            System::Variant => self.variant.as_deref(),
        }
    }

    pub fn set(&mut self, system: System, value: String) {
        let slot = match system {
            System::Chat => &mut self.chat,
            System::Aura => &mut self.aura,
            System::Variant => &mut self.variant,
        };
        *slot = Some(value);
    }
}

/// `designrun.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub schema_version: u32,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    /// Highest ordinal ever handed out; ordinals are never reused.
    pub last_ordinal: u32,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub continuations: Continuations,
}

/// Prompt text and mode read back from a step's `input/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInput {
    pub text: String,
    pub mode: Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Partial,
    Failure,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Partial => "partial",
            ResultStatus::Failure => "failure",
        }
    }
}

/// One output item's export outcome. Paths are relative to the system directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedItem {
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExportedItem {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&DesignError> for ErrorRecord {
    fn from(err: &DesignError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// What an operator hands back to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorResult {
    pub status: ResultStatus,
    pub continuation_id: Option<String>,
    /// Normalized files written under the system directory.
    pub extracted: Vec<String>,
    /// Items produced by generation (or replayed).
    pub item_ids: Vec<String>,
    pub exported: Vec<ExportedItem>,
    pub error: Option<ErrorRecord>,
    pub telemetry: Value,
}

impl OperatorResult {
    /// Build a result from per-item outcomes; any failed item makes it partial.
    pub fn from_items(
        continuation_id: Option<String>,
        item_ids: Vec<String>,
        exported: Vec<ExportedItem>,
    ) -> Self {
        let status = if exported.iter().any(ExportedItem::failed) {
            ResultStatus::Partial
        } else {
            ResultStatus::Success
        };
        Self {
            status,
            continuation_id,
            extracted: Vec::new(),
            item_ids,
            exported,
            error: None,
            telemetry: Value::Null,
        }
    }

    pub fn failed_items(&self) -> Vec<String> {
        self.exported
            .iter()
            .filter(|item| item.failed())
            .map(|item| item.item_id.clone())
            .collect()
    }
}

/// Per-system `result.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMeta {
    pub schema_version: u32,
    pub system: System,
    pub action: String,
    pub status: ResultStatus,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub continuation_id: Option<String>,
    #[serde(default)]
    pub input_sha256: Option<String>,
    #[serde(default)]
    pub extracted: Vec<String>,
    #[serde(default)]
    pub item_ids: Vec<String>,
    #[serde(default)]
    pub exported: Vec<ExportedItem>,
    #[serde(default)]
    pub failed_items: Vec<String>,
    #[serde(default)]
    pub error: Option<ErrorRecord>,
    /// Latest failed attempt that left this committed result in place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<ErrorRecord>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub telemetry: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Ok,
    Started,
    Success,
    Partial,
    Failure,
}

impl From<ResultStatus> for EventStatus {
    fn from(status: ResultStatus) -> Self {
        match status {
            ResultStatus::Success => EventStatus::Success,
            ResultStatus::Partial => EventStatus::Partial,
            ResultStatus::Failure => EventStatus::Failure,
        }
    }
}

/// One line of `events.ndjson`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    #[serde(default)]
    pub step_id: Option<String>,
    pub action: String,
    pub status: EventStatus,
    #[serde(default)]
    pub detail: Value,
}

/// Row of `show-run` output.
#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
    pub step_id: String,
    pub mode: Option<Mode>,
    pub results: Vec<SystemSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemSummary {
    pub system: System,
    pub action: String,
    pub status: ResultStatus,
    pub item_count: usize,
    pub failed_items: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively_and_rejects_unknown() {
        assert_eq!(" dna ".parse::<Mode>().expect("dna"), Mode::Dna);
        assert_eq!("Variations".parse::<Mode>().expect("variations"), Mode::Variations);
        let err = "REMIX".parse::<Mode>().expect_err("unknown mode");
        assert_eq!(err.kind(), ErrorKind::InvalidMode);
    }

    #[test]
    fn mode_serializes_uppercase() {
        let text = serde_json::to_string(&Mode::Feedback).expect("serialize");
        assert_eq!(text, "\"FEEDBACK\"");
    }

    #[test]
    fn any_failed_item_makes_result_partial() {
        let items = vec![
            ExportedItem {
                item_id: "a".into(),
                ..ExportedItem::default()
            },
            ExportedItem {
                item_id: "b".into(),
                error: Some("capture failed".into()),
                ..ExportedItem::default()
            },
        ];
        let result = OperatorResult::from_items(None, vec!["a".into(), "b".into()], items);
        assert_eq!(result.status, ResultStatus::Partial);
        assert_eq!(result.failed_items(), vec!["b".to_string()]);
    }
}
