use std::path::PathBuf;
use clap::{Args, Parser, Subcommand};
use crate::config::resolved::{RunOverrides, DEFAULT_OUTPUT_DIR};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("WAYPOINT_GIT_HASH"),
    ", built ",
    env!("WAYPOINT_BUILD_TIMESTAMP"),
    ")"
);

#[derive(Parser)]
#[command(
    name = "waypoint",
    version,
    long_version = LONG_VERSION,
    about = "Checkpointed orchestration engine for AI-assisted penetration tests"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run (or resume) the full pipeline against a target
    Run(RunArgs),
    /// Show per-agent progress of a session
    Status(SessionArgs),
    /// Run a single agent whose prerequisites have completed
    RunAgent(RunAgentArgs),
    /// Restore the tree to before an agent ran and revert it and its dependents
    RollbackTo(RollbackArgs),
    /// Restore the tree to right after an agent ran and revert its dependents
    RollbackAfter(RollbackArgs),
    /// Print the agent graph
    ListAgents,
    /// List stored sessions with their progress
    Sessions(OutputArgs),
    /// Delete a stored session
    Discard(DiscardArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Target web application URL
    #[arg(short, long)]
    pub target: String,

    /// Path to the target's source repository
    #[arg(short, long)]
    pub repo: PathBuf,

    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output directory for sessions, audit logs and reports
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Resume this session id instead of the one derived from the target
    #[arg(long)]
    pub session: Option<String>,

    /// Minimal prompts and millisecond retry delays
    #[arg(long)]
    pub pipeline_testing: bool,

    /// Hide the progress display
    #[arg(long)]
    pub disable_loader: bool,

    /// Leave failed agents failed on resume instead of retrying them
    #[arg(long)]
    pub no_retry_failed: bool,

    /// Skip the reachability check of the target
    #[arg(long)]
    pub skip_preflight: bool,

    /// LLM provider: anthropic, openai, gemini, local
    #[arg(long)]
    pub provider: Option<String>,

    /// LLM model identifier
    #[arg(long)]
    pub model: Option<String>,

    /// LLM API key (or use env vars)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Endpoint for OpenAI-compatible or local providers
    #[arg(long)]
    pub base_url: Option<String>,
}

impl RunArgs {
    pub fn overrides(&self) -> RunOverrides {
        RunOverrides {
            web_url: self.target.clone(),
            repo_path: self.repo.clone(),
            config_path: self.config.clone(),
            output_dir: self.output.clone(),
            session_id: self.session.clone(),
            pipeline_testing: self.pipeline_testing,
            disable_loader: self.disable_loader,
            retry_failed: self.no_retry_failed.then_some(false),
            skip_preflight: self.skip_preflight,
            provider: self.provider.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct RunAgentArgs {
    /// Agent name, see `list-agents`
    pub agent: String,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Identifies a stored session, either by id or by the target it was created for.
#[derive(Args, Clone, Debug)]
pub struct SessionArgs {
    /// Session id
    #[arg(long, conflicts_with_all = ["target", "repo"])]
    pub session: Option<String>,

    /// Target web application URL
    #[arg(short, long, requires = "repo")]
    pub target: Option<String>,

    /// Path to the target's source repository
    #[arg(short, long, requires = "target")]
    pub repo: Option<PathBuf>,

    /// Configuration file the session was created with
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Clone, Debug)]
pub struct RollbackArgs {
    /// Agent name, see `list-agents`
    pub agent: String,

    #[command(flatten)]
    pub session: SessionArgs,
}

#[derive(Args, Clone, Debug)]
pub struct OutputArgs {
    /// Output directory holding the sessions
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,
}

#[derive(Args, Clone, Debug)]
pub struct DiscardArgs {
    /// Session id to delete
    pub session_id: String,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Path to the YAML configuration file
    pub config: PathBuf,
}
