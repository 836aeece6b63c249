//! Single-page generator operator.
//!
//! DNA starts a new project from the start page and learns the project URL
//! from the editor redirect. FEEDBACK edits an existing project in place.
//! Either way the project itself is the one exported item.
use super::detect::{wait_for_url, wait_until_idle};
use super::{
    capture_id, compile, export_items, finish, open_authenticated, write_prompt_used,
    ExportScope, Lifecycle, Operator, OperatorEnv, Phase, Submission,
};
use crate::driver::Session;
use crate::error::{DesignError, Result};
use crate::store::{write_text_atomic, Mode, OperatorResult, System};

const EDITOR_URL: &str = r"(?i)aura\.build/editor/([A-Za-z0-9_-]+)";

#[derive(Debug, Clone, Copy, Default)]
pub struct AuraOperator;

impl AuraOperator {
    fn export_project(
        &self,
        session: &mut dyn Session,
        env: &OperatorEnv<'_>,
        lifecycle: &mut Lifecycle,
        project_url: String,
        item_ids: Vec<String>,
    ) -> Result<OperatorResult> {
        lifecycle.advance(Phase::Exporting)?;
        let exported = export_items(session, env, System::Aura, &item_ids, true);
        write_text_atomic(&env.step.url_file(System::Aura), &project_url)?;
        finish(
            lifecycle,
            OperatorResult::from_items(Some(project_url), item_ids, exported),
        )
    }
}

/// Item id of a project URL; the path tail when it is not an editor URL.
fn project_item_id(url: &str) -> Result<String> {
    let pattern = compile(EDITOR_URL)?;
    if let Some(id) = capture_id(&pattern, url) {
        return Ok(id);
    }
    let tail = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|tail| !tail.is_empty() && !tail.contains(':'))
        .unwrap_or("project");
    Ok(tail.to_string())
}

impl Operator for AuraOperator {
    fn system(&self) -> System {
        System::Aura
    }

    fn run(
        &self,
        session: &mut dyn Session,
        env: &OperatorEnv<'_>,
        lifecycle: &mut Lifecycle,
        submission: &Submission<'_>,
    ) -> Result<OperatorResult> {
        if submission.mode == Mode::Variations {
            return Err(DesignError::precondition(
                "aura runs only DNA or FEEDBACK steps",
            ));
        }
        open_authenticated(session, env, lifecycle, submission.url)?;
        lifecycle.advance(Phase::Submitting)?;
        write_prompt_used(env, System::Aura, submission.prompt)?;
        session.submit(submission.prompt, submission.images)?;

        lifecycle.advance(Phase::AwaitingCompletion)?;
        let project_url = if submission.mode == Mode::Dna {
            let pattern = compile(EDITOR_URL)?;
            wait_for_url(env.clock, env.timing.url_poll(), &pattern, || {
                session.current_url()
            })?
        } else {
            submission.url.to_string()
        };
        tracing::info!(project_url = %project_url, mode = %submission.mode, "aura project");

        lifecycle.advance(Phase::AwaitingCompletion)?;
        wait_until_idle(
            env.clock,
            env.timing.busy_poll(),
            env.timing.grace,
            "aura generation",
            || session.busy(),
        )?;

        lifecycle.advance(Phase::Extracting)?;
        env.clock.sleep(env.timing.settle);
        let item_id = project_item_id(&project_url)?;
        self.export_project(session, env, lifecycle, project_url, vec![item_id])
    }

    fn reexport(
        &self,
        session: &mut dyn Session,
        env: &OperatorEnv<'_>,
        lifecycle: &mut Lifecycle,
        url: &str,
        scope: &ExportScope,
    ) -> Result<OperatorResult> {
        open_authenticated(session, env, lifecycle, url)?;
        lifecycle.advance(Phase::Extracting)?;
        env.clock.sleep(env.timing.settle);
        let item_ids = match scope {
            ExportScope::Current => vec![project_item_id(url)?],
            ExportScope::Replay(ids) => ids.clone(),
        };
        self.export_project(session, env, lifecycle, url.to_string(), item_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_ids_come_from_editor_urls() {
        assert_eq!(
            project_item_id("https://www.aura.build/editor/Ab3_x?tab=code").expect("id"),
            "Ab3_x"
        );
        assert_eq!(project_item_id("https://www.aura.build/p/xyz/").expect("id"), "xyz");
        assert_eq!(project_item_id("https://").expect("id"), "project");
    }
}
