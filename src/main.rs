use anyhow::Result;
use clap::Parser;
use std::process;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod driver;
mod engine;
mod error;
mod operator;
mod store;
mod workflow;

use cli::{Command, RootArgs};
use config::{Overrides, Settings, LOG_ENV};
use engine::Reexport;
use error::{DesignError, EXIT_PARTIAL};
use store::System;
use workflow::{OperatorAction, Outcome};

fn main() {
    let args = RootArgs::parse();
    init_tracing(args.global.verbose);
    let code = match dispatch(args) {
        Ok(Outcome::Complete) => 0,
        Ok(Outcome::Partial) => EXIT_PARTIAL,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code(&err)
        }
    };
    process::exit(code);
}

fn dispatch(args: RootArgs) -> Result<Outcome> {
    let settings = Settings::load(&Overrides {
        config: args.global.config.clone(),
        runs_dir: args.global.runs_dir.clone(),
        driver: args.global.driver.clone(),
    })?;
    tracing::debug!(runs_dir = %settings.runs_dir.display(), "settings loaded");

    match args.command {
        Command::InitRun(args) => workflow::run_init(&settings, args),
        Command::AddStep(args) => workflow::run_add_step(&settings, args),
        Command::SetInput(args) => workflow::run_set_input(&settings, args),
        Command::AddReferences(args) => workflow::run_add_references(&settings, args),
        Command::ShowRun(args) => workflow::run_show(&settings, args),
        Command::RunGpt(args) => {
            workflow::run_operator(&settings, OperatorAction::Generate(System::Chat), args)
        }
        Command::RunAura(args) => {
            workflow::run_operator(&settings, OperatorAction::Generate(System::Aura), args)
        }
        Command::RunVariant(args) => {
            workflow::run_operator(&settings, OperatorAction::Generate(System::Variant), args)
        }
        Command::ReExportGpt(args) => workflow::run_operator(
            &settings,
            OperatorAction::Reexport(System::Chat, Reexport::Current),
            args,
        ),
        Command::ExportAura(args) => workflow::run_operator(
            &settings,
            OperatorAction::Reexport(System::Aura, Reexport::Current),
            args,
        ),
        Command::ExportVariant(args) => workflow::run_operator(
            &settings,
            OperatorAction::Reexport(System::Variant, Reexport::Current),
            args,
        ),
        Command::ReExportVariant(args) => workflow::run_operator(
            &settings,
            OperatorAction::Reexport(System::Variant, Reexport::Replay),
            args,
        ),
    }
}

/// Log to stderr; `DESIGNRUN_LOG` wins over the `--verbose` default.
fn init_tracing(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<DesignError>()
        .map(|err| err.kind().exit_code())
        .unwrap_or(1)
}
