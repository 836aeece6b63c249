//! Multi-output generator operator.
//!
//! A generation produces [`EXPECTED_OUTPUTS`] sibling outputs, each with a
//! stable version id. New outputs are found by diffing the page's version ids
//! against a snapshot taken before submitting. Each output is exported as a
//! share URL plus a capture.
use super::detect::{new_items, wait_for_new_items, wait_for_url};
use super::{
    compile, export_items, finish, open_authenticated, write_prompt_used, ExportScope, Lifecycle,
    Operator, OperatorEnv, Phase, Submission,
};
use crate::driver::Session;
use crate::error::{DesignError, Result};
use crate::store::{
    write_json_atomic, write_text_atomic, ExportedItem, Mode, OperatorResult, System,
};
use serde::Serialize;
use std::collections::HashSet;

pub const EXPECTED_OUTPUTS: usize = 4;

const PROJECT_URL: &str = r"(?i)variant\.com/(?:chat|projects)/([A-Za-z0-9_-]+)";

#[derive(Debug, Serialize)]
struct UrlEntry<'a> {
    item_id: &'a str,
    url: Option<&'a str>,
    capture: Option<&'a str>,
    error: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VariantOperator;

impl VariantOperator {
    fn export(
        &self,
        session: &mut dyn Session,
        env: &OperatorEnv<'_>,
        lifecycle: &mut Lifecycle,
        project_url: String,
        item_ids: Vec<String>,
    ) -> Result<OperatorResult> {
        lifecycle.advance(Phase::Exporting)?;
        let exported = export_items(session, env, System::Variant, &item_ids, false);
        write_urls(env, &exported)?;
        write_text_atomic(&env.step.url_file(System::Variant), &project_url)?;
        finish(
            lifecycle,
            OperatorResult::from_items(Some(project_url), item_ids, exported),
        )
    }
}

fn write_urls(env: &OperatorEnv<'_>, exported: &[ExportedItem]) -> Result<()> {
    let entries: Vec<UrlEntry<'_>> = exported
        .iter()
        .map(|item| UrlEntry {
            item_id: &item.item_id,
            url: item.url.as_deref(),
            capture: item.capture.as_deref(),
            error: item.error.as_deref(),
        })
        .collect();
    write_json_atomic(&env.step.urls_file(System::Variant), &entries)
}

impl Operator for VariantOperator {
    fn system(&self) -> System {
        System::Variant
    }

    fn run(
        &self,
        session: &mut dyn Session,
        env: &OperatorEnv<'_>,
        lifecycle: &mut Lifecycle,
        submission: &Submission<'_>,
    ) -> Result<OperatorResult> {
        if submission.mode == Mode::Dna {
            return Err(DesignError::precondition(
                "variant runs only VARIATIONS or FEEDBACK steps",
            ));
        }
        open_authenticated(session, env, lifecycle, submission.url)?;
        lifecycle.advance(Phase::Submitting)?;
        let before: HashSet<String> = session.list_items()?.into_iter().collect();
        tracing::info!(existing = before.len(), "variant outputs before submit");
        write_prompt_used(env, System::Variant, submission.prompt)?;
        session.submit(submission.prompt, submission.images)?;

        lifecycle.advance(Phase::AwaitingCompletion)?;
        let pattern = compile(PROJECT_URL)?;
        let project_url = wait_for_url(env.clock, env.timing.url_poll(), &pattern, || {
            session.current_url()
        })?;

        lifecycle.advance(Phase::AwaitingCompletion)?;
        let fresh = wait_for_new_items(
            env.clock,
            env.timing.item_poll(),
            &before,
            EXPECTED_OUTPUTS,
            || session.list_items(),
        )?;

        lifecycle.advance(Phase::Extracting)?;
        self.export(session, env, lifecycle, project_url, fresh)
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
        let item_ids = match scope {
            ExportScope::Current => new_items(&HashSet::new(), session.list_items()?),
            ExportScope::Replay(ids) => ids.clone(),
        };
        if item_ids.is_empty() {
            return Err(DesignError::external(format!("no variant outputs listed at {url}")));
        }
        self.export(session, env, lifecycle, url.to_string(), item_ids)
    }
}
