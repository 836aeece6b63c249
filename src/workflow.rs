//! Command handlers behind the CLI.
//!
//! Each handler resolves settings, opens the run store, does one thing, and
//! prints its result to stdout: a bare id for the bookkeeping commands, JSON
//! for everything else.
use crate::cli::{
    AddReferencesArgs, AddStepArgs, BrowserArgs, OperatorArgs, RunArgs, SetInputArgs,
};
use crate::config::Settings;
use crate::driver::{ConnectOptions, ProcessDriver};
use crate::engine::{BrowserOptions, Engine, Reexport};
use crate::error::DesignError;
use crate::operator::SystemClock;
use crate::store::{Event, ResultStatus, RunRecord, RunStore, StepSummary, System};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Events listed by `show-run`, newest last.
const RECENT_EVENTS: usize = 10;

/// How a successful command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Complete,
    /// Some items failed; the rest were committed.
    Partial,
}

/// What an operator command asks the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorAction {
    Generate(System),
    Reexport(System, Reexport),
}

pub fn run_init(settings: &Settings, args: RunArgs) -> Result<Outcome> {
    let store = RunStore::new(settings.runs_dir.clone());
    let record = store.create_run(&args.run)?;
    println!("{}", record.run_id);
    Ok(Outcome::Complete)
}

pub fn run_add_step(settings: &Settings, args: AddStepArgs) -> Result<Outcome> {
    let store = RunStore::new(settings.runs_dir.clone());
    let step_id = store.add_step(&args.run, &args.name)?;
    println!("{step_id}");
    Ok(Outcome::Complete)
}

pub fn run_set_input(settings: &Settings, args: SetInputArgs) -> Result<Outcome> {
    let text = match (args.user_text, args.user_text_file) {
        (Some(text), _) => text,
        (None, Some(path)) => fs::read_to_string(&path)
            .with_context(|| format!("read user text {}", path.display()))?,
        (None, None) => {
            return Err(DesignError::InvalidInput(
                "pass --user-text or --user-text-file".into(),
            )
            .into())
        }
    };
    let store = RunStore::new(settings.runs_dir.clone());
    store.set_input(&args.target.run, &args.target.step, &text, &args.mode)?;
    println!("{}", args.target.step);
    Ok(Outcome::Complete)
}

pub fn run_add_references(settings: &Settings, args: AddReferencesArgs) -> Result<Outcome> {
    let labels = match args.map.as_deref() {
        Some(raw) => parse_label_map(raw)?,
        None => BTreeMap::new(),
    };
    let store = RunStore::new(settings.runs_dir.clone());
    let added =
        store.add_references(&args.target.run, &args.target.step, &args.images, &labels)?;
    print_json(&added)?;
    Ok(Outcome::Complete)
}

pub fn run_show(settings: &Settings, args: RunArgs) -> Result<Outcome> {
    #[derive(Serialize)]
    struct RunView<'a> {
        runs_dir: &'a Path,
        run: &'a RunRecord,
        steps: Vec<StepSummary>,
        event_count: usize,
        recent_events: &'a [Event],
    }

    let store = RunStore::new(settings.runs_dir.clone());
    let record = store.load_run(&args.run)?;
    let steps = store.list_steps(&args.run)?;
    let events = store.read_events(&args.run)?;
    let recent = events.len().saturating_sub(RECENT_EVENTS);
    print_json(&RunView {
        runs_dir: store.root(),
        run: &record,
        steps,
        event_count: events.len(),
        recent_events: &events[recent..],
    })?;
    Ok(Outcome::Complete)
}

/// Drive one external system for a step and print the committed result.
pub fn run_operator(
    settings: &Settings,
    action: OperatorAction,
    args: OperatorArgs,
) -> Result<Outcome> {
    let store = RunStore::new(settings.runs_dir.clone());
    let driver = ProcessDriver::new(settings.driver_command.clone());
    let clock = SystemClock;
    let engine = Engine::new(&store, &driver, &clock, &settings.project);
    let options = browser_options(&args.browser);
    let (run_id, step_id) = (&args.target.run, &args.target.step);
    let meta = match action {
        OperatorAction::Generate(system) => engine.run(system, run_id, step_id, &options)?,
        OperatorAction::Reexport(system, kind) => {
            engine.reexport(system, run_id, step_id, kind, &options)?
        }
    };
    print_json(&meta)?;
    Ok(match meta.status {
        ResultStatus::Partial => Outcome::Partial,
        _ => Outcome::Complete,
    })
}

fn browser_options(args: &BrowserArgs) -> BrowserOptions {
    BrowserOptions {
        url: args.url.clone(),
        connect: ConnectOptions::from_flags(
            args.connect.as_deref(),
            args.profile_dir.as_deref(),
            args.headed,
        ),
        timeout: args.timeout_s.map(Duration::from_secs),
        login_wait: args.login_wait_s.map(Duration::from_secs),
    }
}

/// Labels given inline as a JSON object, or as the path of a JSON file.
fn parse_label_map(raw: &str) -> Result<BTreeMap<String, String>> {
    let text = if raw.trim_start().starts_with('{') {
        raw.to_string()
    } else {
        fs::read_to_string(raw).with_context(|| format!("read reference map {raw}"))?
    };
    serde_json::from_str(&text).map_err(|err| {
        DesignError::InvalidInput(format!(
            "reference map must be a JSON object of strings: {err}"
        ))
        .into()
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize command output")?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn inline_label_maps_parse() {
        let labels = parse_label_map(r#"{"hero.png": "hero shot"}"#).expect("labels");
        assert_eq!(labels.get("hero.png").map(String::as_str), Some("hero shot"));
    }

    #[test]
    fn label_map_files_parse() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("map.json");
        fs::write(&path, r#"{"a.png": "palette"}"#).expect("write map");
        let labels = parse_label_map(&path.display().to_string()).expect("labels");
        assert_eq!(labels.len(), 1);
    }

    #[test]
    fn malformed_label_maps_are_invalid_input() {
        let err = parse_label_map(r#"{"a.png": 3}"#).expect_err("not strings");
        let kind = err.downcast_ref::<DesignError>().map(DesignError::kind);
        assert_eq!(kind, Some(ErrorKind::InvalidInput));
    }

    #[test]
    fn browser_flags_map_to_connect_options() {
        let options = browser_options(&BrowserArgs {
            connect: Some("localhost:9222".into()),
            timeout_s: Some(30),
            ..BrowserArgs::default()
        });
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
        assert!(!options.connect.interactive());
    }
}
