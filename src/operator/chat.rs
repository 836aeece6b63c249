//! Conversational assistant operator.
//!
//! The conversation URL is the continuation. Completion is the "stop
//! generating" control disappearing; the response is normalized into the
//! prompt files the generators consume.
use super::detect::{wait_until_idle, Completion};
use super::extract::normalize_response;
use super::{
    finish, open_authenticated, write_prompt_used, ExportScope, Lifecycle, Operator, OperatorEnv,
    Phase, Submission,
};
use crate::driver::Session;
use crate::error::{DesignError, Result};
use crate::store::{OperatorResult, ResultStatus, System};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct ChatOperator;

impl ChatOperator {
    fn extract(
        &self,
        session: &mut dyn Session,
        env: &OperatorEnv<'_>,
        lifecycle: &mut Lifecycle,
    ) -> Result<OperatorResult> {
        lifecycle.advance(Phase::Extracting)?;
        let raw = session.read_response()?;
        if raw.trim().is_empty() {
            return Err(DesignError::external("no assistant response on the page"));
        }
        let extracted = normalize_response(env.step, &raw)?;
        let continuation = session.current_url()?;
        lifecycle.advance(Phase::Exporting)?;
        finish(
            lifecycle,
            OperatorResult {
                status: ResultStatus::Success,
                continuation_id: Some(continuation),
                extracted,
                item_ids: Vec::new(),
                exported: Vec::new(),
                error: None,
                telemetry: Value::Null,
            },
        )
    }
}

impl Operator for ChatOperator {
    fn system(&self) -> System {
        System::Chat
    }

    fn run(
        &self,
        session: &mut dyn Session,
        env: &OperatorEnv<'_>,
        lifecycle: &mut Lifecycle,
        submission: &Submission<'_>,
    ) -> Result<OperatorResult> {
        open_authenticated(session, env, lifecycle, submission.url)?;
        lifecycle.advance(Phase::Submitting)?;
        write_prompt_used(env, System::Chat, submission.prompt)?;
        session.submit(submission.prompt, submission.images)?;

        lifecycle.advance(Phase::AwaitingCompletion)?;
        let completion = wait_until_idle(
            env.clock,
            env.timing.busy_poll(),
            env.timing.grace,
            "assistant response",
            || session.busy(),
        )?;
        match completion {
            Completion::Finished { waited } => {
                tracing::info!(waited_ms = waited.as_millis(), "assistant response complete")
            }
            Completion::NeverStarted => {
                tracing::info!("stop control never appeared; reading response as is")
            }
        }
        self.extract(session, env, lifecycle)
    }

    fn reexport(
        &self,
        session: &mut dyn Session,
        env: &OperatorEnv<'_>,
        lifecycle: &mut Lifecycle,
        url: &str,
        _scope: &ExportScope,
    ) -> Result<OperatorResult> {
        open_authenticated(session, env, lifecycle, url)?;
        env.clock.sleep(env.timing.settle);
        self.extract(session, env, lifecycle)
    }
}
