//! Normalization of assistant responses into prompt files.
//!
//! The assistant answers with prose, fenced code blocks, and usually a JSON
//! object. Known keys are pulled from the JSON (`outputs.<key>` or `<key>`),
//! then overridden by code blocks whose language tag is the key itself.
use crate::error::{DesignError, Result};
use crate::store::{write_json_atomic, write_text_atomic, StepPaths};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Extracted key and the prompt file it is written to under `gpt/outputs/`.
pub const OUTPUT_FILES: [(&str, &str); 3] = [
    ("design_dna_for_aura", "aura_dna.txt"),
    ("variant_prompt", "variant_prompt.txt"),
    ("aura_edit_instructions", "aura_edit.txt"),
];

const CODE_FENCE: &str = r"(?s)```([A-Za-z0-9_+\-]*)\n(.*?)\n```";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub lang: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ResponseSummary<'a> {
    raw: &'a str,
    blocks_count: usize,
    extracted_keys: Vec<&'a str>,
}

pub fn code_blocks(raw: &str) -> Result<Vec<CodeBlock>> {
    let fence = Regex::new(CODE_FENCE)
        .map_err(|err| DesignError::external(format!("code fence pattern: {err}")))?;
    Ok(fence
        .captures_iter(raw)
        .map(|caps| CodeBlock {
            lang: caps.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
            content: caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
        })
        .collect())
}

/// The response as a JSON object: the whole text, else the first parseable
/// `json` code block.
fn json_payload(raw: &str, blocks: &[CodeBlock]) -> Option<Map<String, Value>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return Some(map);
    }
    blocks
        .iter()
        .filter(|block| block.lang.eq_ignore_ascii_case("json"))
        .find_map(|block| match serde_json::from_str::<Value>(&block.content) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

/// Known keys found in the response, code blocks taking precedence.
pub fn extract_values(raw: &str, blocks: &[CodeBlock]) -> BTreeMap<String, Value> {
    let mut values = BTreeMap::new();
    if let Some(data) = json_payload(raw, blocks) {
        let outputs = data.get("outputs").and_then(Value::as_object);
        for (key, _) in OUTPUT_FILES {
            let value = outputs
                .and_then(|outputs| outputs.get(key))
                .or_else(|| data.get(key))
                .filter(|value| !value.is_null());
            if let Some(value) = value {
                values.insert(key.to_string(), value.clone());
            }
        }
    }
    for block in blocks {
        if OUTPUT_FILES.iter().any(|(key, _)| *key == block.lang) {
            values.insert(block.lang.clone(), Value::String(block.content.clone()));
        }
    }
    values
}

fn value_text(value: &Value) -> Result<String> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Object(_) | Value::Array(_) => serde_json::to_string_pretty(value).map_err(|err| {
            DesignError::external(format!("render extracted value: {err}"))
        }),
        other => Ok(other.to_string()),
    }
}

/// Write `raw.txt`, `blocks.json`, `extracted.json`, `response.json`, and the
/// prompt files. Returns the prompt files written, relative to `gpt/`.
pub fn normalize_response(step: &StepPaths, raw: &str) -> Result<Vec<String>> {
    let blocks = code_blocks(raw)?;
    let values = extract_values(raw, &blocks);
    write_text_atomic(&step.gpt_raw(), raw)?;
    write_json_atomic(&step.gpt_blocks(), &blocks)?;
    write_json_atomic(&step.gpt_extracted(), &values)?;
    write_json_atomic(
        &step.gpt_response(),
        &ResponseSummary {
            raw,
            blocks_count: blocks.len(),
            extracted_keys: values.keys().map(String::as_str).collect(),
        },
    )?;

    let mut written = Vec::new();
    for (key, file_name) in OUTPUT_FILES {
        if let Some(value) = values.get(key) {
            write_text_atomic(&step.gpt_output(file_name), &value_text(value)?)?;
            written.push(format!("outputs/{file_name}"));
        }
    }
    if written.is_empty() {
        tracing::warn!(blocks = blocks.len(), "response carried no prompt outputs");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn fenced_blocks_are_split_by_language() {
        let raw = "intro\n```json\n{\"a\": 1}\n```\nmore\n```\nplain\n```";
        let blocks = code_blocks(raw).expect("blocks");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].lang, "json");
        assert_eq!(blocks[0].content, "{\"a\": 1}");
        assert_eq!(blocks[1].lang, "");
    }

    #[test]
    fn keys_come_from_outputs_object_or_top_level() {
        let raw = r#"{"outputs": {"design_dna_for_aura": "calm"}, "variant_prompt": "four takes"}"#;
        let values = extract_values(raw, &[]);
        assert_eq!(values["design_dna_for_aura"], "calm");
        assert_eq!(values["variant_prompt"], "four takes");
        assert!(!values.contains_key("aura_edit_instructions"));
    }

    #[test]
    fn json_block_is_used_when_text_is_prose_and_named_blocks_win() {
        let raw = "Here you go:\n```json\n{\"variant_prompt\": \"from json\", \"aura_edit_instructions\": {\"hero\": \"bigger\"}}\n```\n```variant_prompt\nfrom block\n```";
        let blocks = code_blocks(raw).expect("blocks");
        let values = extract_values(raw, &blocks);
        assert_eq!(values["variant_prompt"], "from block");
        assert!(values["aura_edit_instructions"].is_object());
    }

    #[test]
    fn normalize_writes_prompt_files_and_summary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let step = StepPaths::new(dir.path().join("S01_dna"));
        let raw = "```design_dna_for_aura\nwarm palette\n```\n```aura_edit_instructions\nshrink hero\n```";
        let written = normalize_response(&step, raw).expect("normalize");
        assert_eq!(written, vec!["outputs/aura_dna.txt", "outputs/aura_edit.txt"]);
        assert_eq!(
            fs::read_to_string(step.gpt_output("aura_dna.txt")).expect("read"),
            "warm palette"
        );
        let summary: Value =
            serde_json::from_slice(&fs::read(step.gpt_response()).expect("read")).expect("parse");
        assert_eq!(summary["blocks_count"], 2);
        assert_eq!(summary["extracted_keys"][0], "aura_edit_instructions");
    }
}
