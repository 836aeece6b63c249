//! Orchestration engine.
//!
//! Turns a command into a validated step, a resolved target URL, an operator
//! invocation, and a committed result. Run state is read fresh on every
//! invocation; a failed invocation never touches the continuation map.
pub mod resolve;

use crate::config::ProjectConfig;
use crate::driver::{ConnectOptions, Driver, Session};
use crate::error::{DesignError, IoContext, Result};
use crate::operator::{
    operator_for, Clock, ExportScope, Lifecycle, Operator, OperatorEnv, Submission, Timing,
};
use crate::store::{
    input_digest, EventStatus, OperatorResult, ResultMeta, ResultStatus, RunStore, System,
};
use resolve::{prompt_source, reexport_url, target_url};
use serde_json::json;
use std::fs;
use std::time::Duration;

/// Browser flags shared by every operator command.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub url: Option<String>,
    pub connect: ConnectOptions,
    pub timeout: Option<Duration>,
    pub login_wait: Option<Duration>,
}

/// Which items a re-export covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reexport {
    /// Reload the project and export what it lists now.
    Current,
    /// Export exactly the items recorded by the last generation.
    Replay,
}

pub struct Engine<'a> {
    store: &'a RunStore,
    driver: &'a dyn Driver,
    clock: &'a dyn Clock,
    config: &'a ProjectConfig,
}

impl<'a> Engine<'a> {
    pub fn new(
        store: &'a RunStore,
        driver: &'a dyn Driver,
        clock: &'a dyn Clock,
        config: &'a ProjectConfig,
    ) -> Self {
        Self {
            store,
            driver,
            clock,
            config,
        }
    }

    /// Generate with `system` for a step and commit the result.
    pub fn run(
        &self,
        system: System,
        run_id: &str,
        step_id: &str,
        options: &BrowserOptions,
    ) -> Result<ResultMeta> {
        let persisted = self.store.get_continuation(run_id, system)?;
        let step = self.store.step_paths(run_id, step_id)?;
        let input = self.store.read_input(run_id, step_id)?.ok_or_else(|| {
            DesignError::precondition(format!(
                "step {step_id} has no input; run set-input first"
            ))
        })?;
        let source = prompt_source(system, input.mode)?;
        let prompt_path = source.path(&step);
        if !prompt_path.exists() {
            return Err(DesignError::precondition(format!(
                "{} is missing; run run-gpt for step {step_id} first",
                prompt_path.display()
            )));
        }
        let prompt = fs::read_to_string(&prompt_path)
            .io_context(|| format!("read {}", prompt_path.display()))?;
        if prompt.trim().is_empty() {
            return Err(DesignError::precondition(format!(
                "{} is empty",
                prompt_path.display()
            )));
        }
        let url = target_url(
            system,
            input.mode,
            options.url.as_deref(),
            persisted.as_deref(),
            self.config,
        )?;
        let images = self.store.reference_images(run_id, step_id)?;

        let action = run_action(system);
        let env = OperatorEnv {
            step: &step,
            clock: self.clock,
            timing: self.timing(system, options, false),
            interactive: options.connect.interactive(),
        };
        let submission = Submission {
            mode: input.mode,
            url: &url,
            prompt: &prompt,
            images: &images,
        };
        self.store.append_event(
            run_id,
            Some(step_id),
            action,
            EventStatus::Started,
            json!({ "system": system, "mode": input.mode, "url": url, "images": images.len() }),
        )?;
        tracing::info!(
            run_id,
            step_id,
            system = %system,
            mode = %input.mode,
            url = %url,
            "operator starting"
        );

        let operator = operator_for(system);
        let outcome = self.invoke(operator.as_ref(), options, |session, lifecycle| {
            operator.run(session, &env, lifecycle, &submission)
        });
        self.commit(run_id, step_id, system, action, outcome, Some(input_digest(&prompt)))
    }

    /// Export again without generating and commit the result.
    pub fn reexport(
        &self,
        system: System,
        run_id: &str,
        step_id: &str,
        kind: Reexport,
        options: &BrowserOptions,
    ) -> Result<ResultMeta> {
        let persisted = self.store.get_continuation(run_id, system)?;
        let step = self.store.step_paths(run_id, step_id)?;
        let previous = self.store.read_result(run_id, step_id, system)?;
        let scope = match kind {
            Reexport::Current => ExportScope::Current,
            Reexport::Replay => {
                let ids = previous
                    .as_ref()
                    .map(|prev| prev.item_ids.clone())
                    .unwrap_or_default();
                if ids.is_empty() {
                    return Err(DesignError::precondition(format!(
                        "step {step_id} has no recorded {system} items to replay"
                    )));
                }
                ExportScope::Replay(ids)
            }
        };
        let step_url = previous
            .as_ref()
            .and_then(|prev| prev.continuation_id.clone())
            .or_else(|| read_url_file(&step.url_file(system)));
        let url = reexport_url(
            system,
            options.url.as_deref(),
            step_url.as_deref(),
            persisted.as_deref(),
        )?;

        let action = reexport_action(system, kind);
        let env = OperatorEnv {
            step: &step,
            clock: self.clock,
            timing: self.timing(system, options, true),
            interactive: options.connect.interactive(),
        };
        self.store.append_event(
            run_id,
            Some(step_id),
            action,
            EventStatus::Started,
            json!({ "system": system, "url": url }),
        )?;
        tracing::info!(run_id, step_id, system = %system, url = %url, ?kind, "re-export starting");

        let operator = operator_for(system);
        let outcome = self
            .invoke(operator.as_ref(), options, |session, lifecycle| {
                operator.reexport(session, &env, lifecycle, &url, &scope)
            })
            .map(|mut result| {
                if let Some(prev) = previous.as_ref().filter(|prev| !prev.item_ids.is_empty()) {
                    result.item_ids = prev.item_ids.clone();
                }
                result
            });
        let digest = previous.and_then(|prev| prev.input_sha256);
        self.commit(run_id, step_id, system, action, outcome, digest)
    }

    fn timing(&self, system: System, options: &BrowserOptions, reexport: bool) -> Timing {
        let timeouts = &self.config.timeouts;
        let default_s = match (reexport, system) {
            (true, _) => timeouts.reexport_s,
            (false, System::Chat) => timeouts.chat_s,
            (false, System::Aura) => timeouts.aura_s,
            (false, System::Variant) => timeouts.variant_s,
        };
        Timing::new(
            options.timeout.unwrap_or(Duration::from_secs(default_s)),
            options.login_wait.unwrap_or(timeouts.login_wait()),
        )
    }

    /// Connect, drive the operator, and always close the session.
    fn invoke<F>(
        &self,
        operator: &dyn Operator,
        options: &BrowserOptions,
        drive: F,
    ) -> Result<OperatorResult>
    where
        F: FnOnce(&mut dyn Session, &mut Lifecycle) -> Result<OperatorResult>,
    {
        let system = operator.system();
        let mut lifecycle = Lifecycle::new(system);
        let mut session = match self.driver.connect(system, &options.connect) {
            Ok(session) => session,
            Err(err) => {
                lifecycle.fail(&err);
                return Err(err);
            }
        };
        let outcome = drive(session.as_mut(), &mut lifecycle);
        if let Err(err) = &outcome {
            lifecycle.fail(err);
        }
        tracing::debug!(
            system = %system,
            phase = ?lifecycle.phase(),
            phases = ?lifecycle.history(),
            "operator stopped"
        );
        if let Err(err) = session.close() {
            tracing::warn!(system = %system, error = %err, "closing browser session failed");
        }
        outcome
    }

    /// Record the outcome; continuations move only on success or partial.
    fn commit(
        &self,
        run_id: &str,
        step_id: &str,
        system: System,
        action: &str,
        outcome: Result<OperatorResult>,
        input_sha256: Option<String>,
    ) -> Result<ResultMeta> {
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(
                    run_id,
                    step_id,
                    system = %system,
                    error_kind = err.kind().as_str(),
                    "recording failed result"
                );
                self.store
                    .record_failure(run_id, step_id, system, action, &err)?;
                return Err(err);
            }
        };
        let meta = self
            .store
            .record_result(run_id, step_id, system, action, &result, input_sha256)?;
        if meta.status != ResultStatus::Failure {
            if let Some(continuation) = meta.continuation_id.as_deref() {
                self.store.set_continuation(run_id, system, continuation)?;
            }
        }
        tracing::info!(
            run_id,
            step_id,
            system = %system,
            status = meta.status.as_str(),
            failed = meta.failed_items.len(),
            "operator finished"
        );
        Ok(meta)
    }
}

fn run_action(system: System) -> &'static str {
    match system {
        System::Chat => "run_gpt",
        System::Aura => "run_aura",
        System::Variant => "run_variant",
    }
}

fn reexport_action(system: System, kind: Reexport) -> &'static str {
    match (system, kind) {
        (System::Chat, _) => "re_export_gpt",
        (System::Aura, _) => "export_aura",
        (System::Variant, Reexport::Current) => "export_variant",
        (System::Variant, Reexport::Replay) => "re_export_variant",
    }
}

fn read_url_file(path: &std::path::Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
