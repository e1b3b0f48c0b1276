use std::path::PathBuf;

use clap::{Parser, Subcommand};

const CLI_EXAMPLES: &str = "Examples:\n\
  goalflow validate\n\
  goalflow handlers\n\
  goalflow --script demos/script.json run \"When is next friday?\"\n\
  goalflow --config demos/pipeline.toml --script demos/script.json run \"Plan the release\"\n\
  goalflow --verbose --stop-if-goal-not-satisfied true run \"Plan the release\"\n\
\n\
Pipeline file:\n\
  - [pipe] lists steps as agent-name groups; a group with several names runs in parallel.\n\
  - [agents.<name>] sets goal, role and engine steps naming a built-in handler.\n\
  - Replay scripts hold `tool_completions` and `judgements` consumed in order.\n";

#[derive(Debug, Parser)]
#[command(name = "goalflow")]
#[command(about = "Goal-directed multi-agent pipelines with model-judged retries")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "GOALFLOW_CONFIG", default_value = ".goalflow/pipeline.toml")]
    pub config: PathBuf,

    /// Replay script answering model requests.
    #[arg(long, env = "GOALFLOW_SCRIPT")]
    pub script: Option<PathBuf>,

    /// Override the pipe's stop policy from the pipeline file.
    #[arg(long, env = "GOALFLOW_STOP_IF_GOAL_NOT_SATISFIED", action = clap::ArgAction::Set)]
    pub stop_if_goal_not_satisfied: Option<bool>,

    #[arg(long, env = "GOALFLOW_VERBOSE", default_value_t = false)]
    pub verbose: bool,

    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// `--verbose` wins over any filter.
    pub fn effective_log_filter(&self) -> &str {
        if self.verbose { "debug" } else { &self.log_filter }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Run the configured pipe for a query and print every step outcome as JSON")]
    Run {
        #[arg(required = true)]
        query: Vec<String>,
    },
    #[command(about = "Validate the pipeline file against the built-in handlers")]
    Validate,
    #[command(about = "List built-in handlers and their operations")]
    Handlers,
}

pub fn command_label(command: &Commands) -> &'static str {
    match command {
        Commands::Run { .. } => "run",
        Commands::Validate => "validate",
        Commands::Handlers => "handlers",
    }
}
