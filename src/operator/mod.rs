//! Operators drive one external system through a connected [`Session`].
//!
//! All three share the same lifecycle: connect, authenticate, submit, await
//! completion, extract, export, and hand back a continuation identifier.
//! Re-export enters the same lifecycle after authentication and skips the
//! submit and await phases.
mod aura;
mod chat;
pub mod detect;
mod extract;
mod variant;

pub use aura::AuraOperator;
pub use chat::ChatOperator;
pub use detect::{Clock, SystemClock};
pub use variant::VariantOperator;

use crate::driver::Session;
use crate::error::{DesignError, Result};
use crate::store::{write_text_atomic, ExportedItem, Mode, OperatorResult, StepPaths, System};
use detect::Poll;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Authenticating,
    Submitting,
    AwaitingCompletion,
    Extracting,
    Exporting,
    Done,
    Failed,
}

impl Phase {
    fn terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }

    fn allows(self, next: Phase) -> bool {
        use Phase::*;
        if next == Failed {
            return !self.terminal();
        }
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Authenticating, Submitting)
                | (Authenticating, Extracting)
                | (Submitting, AwaitingCompletion)
                | (AwaitingCompletion, AwaitingCompletion)
                | (AwaitingCompletion, Extracting)
                | (Extracting, Exporting)
                | (Exporting, Done)
        )
    }
}

/// Tracks an operator invocation's phase and rejects out-of-order moves.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    system: System,
    phase: Phase,
    history: Vec<Phase>,
}

impl Lifecycle {
    pub fn new(system: System) -> Self {
        Self {
            system,
            phase: Phase::Connecting,
            history: vec![Phase::Connecting],
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.phase.allows(next) {
            return Err(DesignError::external(format!(
                "{} operator cannot move from {:?} to {:?}",
                self.system, self.phase, next
            )));
        }
        if self.phase != next {
            tracing::debug!(system = %self.system, from = ?self.phase, to = ?next, "phase");
            self.history.push(next);
        }
        self.phase = next;
        Ok(())
    }

    /// Move to `Failed` unless already terminal.
    pub fn fail(&mut self, err: &DesignError) {
        if self.phase.terminal() {
            return;
        }
        tracing::warn!(system = %self.system, phase = ?self.phase, error = %err, "operator failed");
        self.phase = Phase::Failed;
        self.history.push(Phase::Failed);
    }

    fn telemetry(&self) -> serde_json::Value {
        let phases: Vec<String> = self.history.iter().map(|phase| format!("{phase:?}")).collect();
        serde_json::json!({ "phases": phases })
    }
}

/// Poll intervals and deadlines for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Deadline for the product to finish generating.
    pub completion: Duration,
    pub login_wait: Duration,
    pub busy_interval: Duration,
    pub grace: Duration,
    pub item_interval: Duration,
    pub url_interval: Duration,
    pub url_wait: Duration,
    pub login_interval: Duration,
    /// Pause before reading content that renders after the indicator clears.
    pub settle: Duration,
}

impl Timing {
    pub fn new(completion: Duration, login_wait: Duration) -> Self {
        Self {
            completion,
            login_wait,
            busy_interval: Duration::from_millis(750),
            grace: Duration::from_secs(15),
            item_interval: Duration::from_secs(1),
            url_interval: Duration::from_secs(1),
            url_wait: Duration::from_secs(60),
            login_interval: Duration::from_secs(2),
            settle: Duration::from_secs(3),
        }
    }

    fn busy_poll(&self) -> Poll {
        Poll::new(self.busy_interval, self.completion)
    }

    fn item_poll(&self) -> Poll {
        Poll::new(self.item_interval, self.completion)
    }

    fn url_poll(&self) -> Poll {
        Poll::new(self.url_interval, self.url_wait)
    }
}

/// Per-invocation environment shared by all operators.
pub struct OperatorEnv<'a> {
    pub step: &'a StepPaths,
    pub clock: &'a dyn Clock,
    pub timing: Timing,
    /// A person can complete a login in the connected browser.
    pub interactive: bool,
}

/// What to submit to the external system.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub mode: Mode,
    pub url: &'a str,
    pub prompt: &'a str,
    pub images: &'a [PathBuf],
}

/// Which items a re-export covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportScope {
    /// Everything the page lists right now.
    Current,
    /// Exactly these previously recorded items.
    Replay(Vec<String>),
}

pub trait Operator {
    fn system(&self) -> System;

    /// Full lifecycle: submit, await, extract, export.
    fn run(
        &self,
        session: &mut dyn Session,
        env: &OperatorEnv<'_>,
        lifecycle: &mut Lifecycle,
        submission: &Submission<'_>,
    ) -> Result<OperatorResult>;

    /// Extract and export again at a known identifier without generating.
    fn reexport(
        &self,
        session: &mut dyn Session,
        env: &OperatorEnv<'_>,
        lifecycle: &mut Lifecycle,
        url: &str,
        scope: &ExportScope,
    ) -> Result<OperatorResult>;
}

/// Operator for a system.
pub fn operator_for(system: System) -> Box<dyn Operator> {
    match system {
        System::Chat => Box::new(ChatOperator),
        System::Aura => Box::new(AuraOperator),
        System::Variant => Box::new(VariantOperator),
    }
}

/// Open `url` and make sure the page is past any login gate.
///
/// Without an interactive browser a gate fails immediately; otherwise the
/// person at the browser gets `login_wait` to finish logging in.
fn open_authenticated(
    session: &mut dyn Session,
    env: &OperatorEnv<'_>,
    lifecycle: &mut Lifecycle,
    url: &str,
) -> Result<()> {
    session.goto(url)?;
    lifecycle.advance(Phase::Authenticating)?;
    if !session.auth_gate()? {
        return Ok(());
    }
    if !env.interactive {
        return Err(DesignError::AuthRequired(format!(
            "{url} shows a login page; attach to a logged-in browser with --connect or log in with --headed --profile-dir"
        )));
    }
    tracing::warn!(
        url,
        wait_s = env.timing.login_wait.as_secs(),
        "login required; complete it in the browser window"
    );
    let poll = Poll::new(env.timing.login_interval, env.timing.login_wait);
    let start = env.clock.now();
    loop {
        env.clock.sleep(poll.interval);
        if !session.auth_gate()? {
            tracing::info!("login detected");
            return Ok(());
        }
        if env.clock.now().saturating_duration_since(start) >= poll.timeout {
            return Err(DesignError::AuthRequired(format!(
                "still on the login page after {}s",
                poll.timeout.as_secs()
            )));
        }
    }
}

/// Export and capture each item on its own; one failure never stops the rest.
fn export_items(
    session: &mut dyn Session,
    env: &OperatorEnv<'_>,
    system: System,
    item_ids: &[String],
    keep_html: bool,
) -> Vec<ExportedItem> {
    let dir = env.step.system_dir(system);
    let mut exported = Vec::with_capacity(item_ids.len());
    for item_id in item_ids {
        let mut item = ExportedItem {
            item_id: item_id.clone(),
            ..ExportedItem::default()
        };
        let mut errors = Vec::new();
        match session.export_item(item_id) {
            Ok(export) => {
                item.url = export.url;
                if let (true, Some(html)) = (keep_html, export.html) {
                    let rel = StepPaths::export_rel(item_id);
                    match write_text_atomic(&dir.join(&rel), &html) {
                        Ok(()) => item.export = Some(rel),
                        Err(err) => errors.push(format!("export: {err}")),
                    }
                }
            }
            Err(err) => errors.push(format!("export: {err}")),
        }
        let rel = StepPaths::capture_rel(item_id);
        match session.capture(item_id, &dir.join(&rel)) {
            Ok(()) => item.capture = Some(rel),
            Err(err) => errors.push(format!("capture: {err}")),
        }
        if errors.is_empty() {
            tracing::info!(system = %system, item = %item_id, "item exported");
        } else {
            let message = errors.join("; ");
            tracing::warn!(
                system = %system,
                item = %item_id,
                error = %message,
                "item export failed"
            );
            item.error = Some(message);
        }
        exported.push(item);
    }
    exported
}

/// First capture group of `pattern` in `url`.
fn capture_id(pattern: &Regex, url: &str) -> Option<String> {
    pattern
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|err| DesignError::external(format!("bad pattern {pattern}: {err}")))
}

fn finish(lifecycle: &mut Lifecycle, mut result: OperatorResult) -> Result<OperatorResult> {
    lifecycle.advance(Phase::Done)?;
    result.telemetry = lifecycle.telemetry();
    Ok(result)
}

fn write_prompt_used(env: &OperatorEnv<'_>, system: System, prompt: &str) -> Result<()> {
    write_text_atomic(&env.step.prompt_used(system), prompt)
}
