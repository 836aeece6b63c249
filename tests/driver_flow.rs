//! Operator commands against a scripted driver process.
//!
//! The driver is a POSIX shell loop answering one JSON line per request, so
//! these tests exercise the real process protocol without a browser.

mod common;

use common::{stdout, Workspace};
use serde_json::Value;
use std::fs;

const AUTH_OPEN: &str = r#"    *'"op":"auth_gate"'*) printf '%s\n' '{"ok": true, "value": false}' ;;"#;

fn step_with_input(ws: &Workspace, name: &str, mode: &str) -> String {
    ws.ok(&["init-run", "--run", "brand"]);
    let step = ws.ok(&["add-step", "--run", "brand", "--name", name]);
    ws.ok(&[
        "set-input", "--run", "brand", "--step", &step, "--mode", mode, "--user-text",
        "a calm fintech landing page",
    ]);
    step
}

fn write_variant_prompt(ws: &Workspace, step: &str) {
    let outputs = ws.runs_dir().join("brand").join(step).join("gpt/outputs");
    fs::create_dir_all(&outputs).expect("outputs dir");
    fs::write(outputs.join("variant_prompt.txt"), "four directions").expect("prompt");
}

#[test]
fn run_gpt_extracts_prompt_files_and_persists_the_conversation() {
    let ws = Workspace::new();
    let body = [
        AUTH_OPEN,
        r#"    *'"op":"busy"'*) n=$((n+1)); if [ "$n" -eq 1 ]; then printf '%s\n' '{"ok": true, "value": true}'; else printf '%s\n' '{"ok": true, "value": false}'; fi ;;"#,
        r#"    *'"op":"current_url"'*) printf '%s\n' '{"ok": true, "value": "https://chat.example/c/42"}' ;;"#,
        r##"    *'"op":"read_response"'*) printf '%s\n' '{"ok": true, "value": "Here you go.\n```design_dna_for_aura\nwarm editorial\n```\n```variant_prompt\nfour directions\n```"}' ;;"##,
    ]
    .join("\n");
    let Some(driver) = ws.driver(&body) else {
        return;
    };
    let step = step_with_input(&ws, "dna", "DNA");

    let printed = ws.ok(&[
        "run-gpt",
        "--run",
        "brand",
        "--step",
        &step,
        "--url",
        "https://chat.example/",
        "--driver",
        &driver,
    ]);
    let meta: Value = serde_json::from_str(&printed).expect("result JSON");
    assert_eq!(meta["status"], "success");
    assert_eq!(meta["continuation_id"], "https://chat.example/c/42");

    let outputs = ws.runs_dir().join("brand").join(&step).join("gpt/outputs");
    assert_eq!(
        fs::read_to_string(outputs.join("aura_dna.txt")).expect("aura dna"),
        "warm editorial"
    );
    assert_eq!(
        fs::read_to_string(outputs.join("variant_prompt.txt")).expect("variant prompt"),
        "four directions"
    );
    let record = ws.read_json("brand/designrun.json");
    assert_eq!(record["continuations"]["chat"], "https://chat.example/c/42");
}

#[test]
fn run_variant_commits_partial_results_and_replays_exact_items() {
    let ws = Workspace::new();
    let body = [
        AUTH_OPEN,
        r#"    *'"op":"list_items"'*) n=$((n+1)); if [ "$n" -eq 1 ]; then printf '%s\n' '{"ok": true, "value": ["old"]}'; else printf '%s\n' '{"ok": true, "value": ["old", "v1", "v2", "v3", "v4"]}'; fi ;;"#,
        r#"    *'"op":"current_url"'*) printf '%s\n' '{"ok": true, "value": "https://variant.com/chat/p1"}' ;;"#,
        r#"    *'"op":"export_item"'*) printf '%s\n' '{"ok": true, "value": {"url": "https://variant.com/share/x"}}' ;;"#,
        r#"    *'"item_id":"v2"'*) printf '%s\n' '{"ok": false, "kind": "external", "message": "screenshot failed"}' ;;"#,
    ]
    .join("\n");
    let Some(driver) = ws.driver(&body) else {
        return;
    };
    let step = step_with_input(&ws, "var", "VARIATIONS");
    write_variant_prompt(&ws, &step);

    let output = ws.designrun(&[
        "run-variant", "--run", "brand", "--step", &step, "--driver", &driver,
    ]);
    assert_eq!(output.status.code(), Some(3), "partial exit code");
    let meta: Value = serde_json::from_str(&stdout(&output)).expect("result JSON");
    assert_eq!(meta["status"], "partial");
    assert_eq!(meta["item_ids"], serde_json::json!(["v1", "v2", "v3", "v4"]));
    assert_eq!(meta["failed_items"], serde_json::json!(["v2"]));

    let urls = ws.read_json(&format!("brand/{step}/generators/variant/urls.json"));
    assert_eq!(urls.as_array().map(Vec::len), Some(4));
    let record = ws.read_json("brand/designrun.json");
    assert_eq!(record["continuations"]["variant"], "https://variant.com/chat/p1");
    let events = ws.events("brand");
    let result = events
        .iter()
        .rev()
        .find(|event| event["action"] == "run_variant" && event["status"] != "started")
        .expect("run_variant result event");
    assert_eq!(result["status"], "partial");
    assert_eq!(result["detail"]["failed_items"], serde_json::json!(["v2"]));
    let item_error = result["detail"]["item_errors"]["v2"].as_str().expect("v2 error");
    assert!(item_error.contains("screenshot failed"), "{item_error}");

    // Everything succeeds now; replay must cover exactly the recorded items.
    let Some(healthy) = ws.driver(AUTH_OPEN) else {
        return;
    };
    let printed = ws.ok(&[
        "re-export-variant", "--run", "brand", "--step", &step, "--driver", &healthy,
    ]);
    let replay: Value = serde_json::from_str(&printed).expect("replay JSON");
    assert_eq!(replay["status"], "success");
    assert_eq!(replay["action"], "re_export_variant");
    assert_eq!(replay["item_ids"], serde_json::json!(["v1", "v2", "v3", "v4"]));
}

#[test]
fn login_wall_without_interactive_browser_exits_auth_required() {
    let ws = Workspace::new();
    let body = r#"    *'"op":"auth_gate"'*) printf '%s\n' '{"ok": true, "value": true}' ;;"#;
    let Some(driver) = ws.driver(body) else {
        return;
    };
    let step = step_with_input(&ws, "dna", "DNA");

    let output = ws.designrun(&[
        "run-gpt",
        "--run",
        "brand",
        "--step",
        &step,
        "--url",
        "https://chat.example/",
        "--driver",
        &driver,
    ]);
    assert_eq!(output.status.code(), Some(4));
    let events = ws.events("brand");
    let last = events.last().expect("failure event");
    assert_eq!(last["status"], "failure");
    assert_eq!(last["detail"]["error_kind"], "auth_required");
    let record = ws.read_json("brand/designrun.json");
    assert!(record["continuations"]["chat"].is_null());
}
