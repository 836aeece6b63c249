//! CLI argument parsing for run/step orchestration.
//!
//! Every command names its run (and step) explicitly; there is no ambient
//! "current run". Browser flags are shared by all operator commands.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "designrun",
    version,
    about = "Resumable run/step orchestration for UI-only design tools",
    after_help = "Examples:\n  designrun init-run --run brand\n  designrun add-step --run brand --name dna_01\n  designrun set-input --run brand --step S01_dna_01 --mode DNA --user-text-file brief.txt\n  designrun run-gpt --run brand --step S01_dna_01 --connect 9222\n  designrun run-aura --run brand --step S01_dna_01 --connect 9222\n  designrun show-run --run brand",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags accepted before or after any subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Directory holding all runs (overrides DESIGN_RUNS_DIR and config)
    #[arg(long, value_name = "DIR", global = true)]
    pub runs_dir: Option<PathBuf>,

    /// Project config file (overrides DESIGNRUN_CONFIG and ./config.json)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Browser driver command line (overrides DESIGNRUN_DRIVER and config)
    #[arg(long, value_name = "CMD", global = true)]
    pub driver: Option<String>,

    /// Log progress to stderr
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new run
    InitRun(RunArgs),
    /// Append a step to a run and print its id
    AddStep(AddStepArgs),
    /// Set a step's prompt text and mode
    SetInput(SetInputArgs),
    /// Copy reference images into a step
    AddReferences(AddReferencesArgs),
    /// Send the step's prompt to the chat assistant and extract prompt files
    RunGpt(OperatorArgs),
    /// Generate or edit an aura project from the step's prompt file
    RunAura(OperatorArgs),
    /// Generate variant outputs from the step's prompt file
    RunVariant(OperatorArgs),
    /// Re-extract the chat response without sending anything
    ReExportGpt(OperatorArgs),
    /// Export the aura project again without generating
    ExportAura(OperatorArgs),
    /// Export every output the variant project lists now
    ExportVariant(OperatorArgs),
    /// Export exactly the variant outputs recorded for the step
    ReExportVariant(OperatorArgs),
    /// Print a run's steps, results and continuations as JSON
    ShowRun(RunArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run id
    #[arg(long, value_name = "ID")]
    pub run: String,
}

#[derive(Args, Debug)]
pub struct AddStepArgs {
    /// Run id
    #[arg(long, value_name = "ID")]
    pub run: String,

    /// Step name; the id is the name prefixed with the next ordinal
    #[arg(long, value_name = "NAME")]
    pub name: String,
}

#[derive(Args, Debug)]
pub struct StepArgs {
    /// Run id
    #[arg(long, value_name = "ID")]
    pub run: String,

    /// Step id as printed by add-step
    #[arg(long, value_name = "ID")]
    pub step: String,
}

#[derive(Args, Debug)]
pub struct SetInputArgs {
    #[command(flatten)]
    pub target: StepArgs,

    /// DNA, VARIATIONS or FEEDBACK
    #[arg(long, value_name = "MODE")]
    pub mode: String,

    /// Prompt text
    #[arg(
        long,
        value_name = "TEXT",
        conflicts_with = "user_text_file",
        required_unless_present = "user_text_file"
    )]
    pub user_text: Option<String>,

    /// File holding the prompt text
    #[arg(long, value_name = "PATH")]
    pub user_text_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct AddReferencesArgs {
    #[command(flatten)]
    pub target: StepArgs,

    /// Image files to attach (at most two per step)
    #[arg(value_name = "IMAGE", required = true)]
    pub images: Vec<PathBuf>,

    /// Labels as a JSON object keyed by image path or file name, inline or a file path
    #[arg(long, value_name = "JSON|PATH")]
    pub map: Option<String>,
}

/// Browser flags shared by every operator command.
#[derive(Args, Debug, Clone, Default)]
pub struct BrowserArgs {
    /// Target URL; wins over the persisted and configured ones
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Attach to a running browser (port, host:port or URL)
    #[arg(long, value_name = "ENDPOINT", conflicts_with = "profile_dir")]
    pub connect: Option<String>,

    /// Launch with a persistent browser profile
    #[arg(long, value_name = "DIR")]
    pub profile_dir: Option<PathBuf>,

    /// Completion deadline in seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout_s: Option<u64>,

    /// Time allowed to finish a login in a headed profile browser
    #[arg(long, value_name = "SECONDS")]
    pub login_wait_s: Option<u64>,
}

#[derive(Args, Debug)]
pub struct OperatorArgs {
    #[command(flatten)]
    pub target: StepArgs,

    #[command(flatten)]
    pub browser: BrowserArgs,
}
