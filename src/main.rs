use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use goalflow::cli::{Cli, Commands, command_label};
use goalflow::config::{build_pipe, load_pipeline, validate_pipeline};
use goalflow::error::{categorize_error, format_cli_error};
use goalflow::replay::ReplayModel;
use goalflow::result::StepOutcome;
use goalflow::tools::build_builtin_handlers;
use tracing::level_filters::LevelFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err));
        tracing::error!(category = %categorize_error(&err).code(), error = %err, "command failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(cli.effective_log_filter())?;
    tracing::debug!(command = command_label(&cli.command), config = %cli.config.display(), "starting");

    match &cli.command {
        Commands::Run { query } => {
            let outcomes = run_pipeline(&cli, &query.join(" ")).await?;
            let rendered =
                serde_json::to_string_pretty(&outcomes).context("failed to render step outcomes")?;
            println!("{rendered}");
        }
        Commands::Validate => {
            println!("{}", validate_report(&cli.config)?);
        }
        Commands::Handlers => {
            print!("{}", handlers_report());
        }
    }
    Ok(())
}

fn init_tracing(log_filter: &str) -> Result<()> {
    let level = log_filter
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::WARN);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(log_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

async fn run_pipeline(cli: &Cli, query: &str) -> Result<Vec<StepOutcome>> {
    let query = query.trim();
    if query.is_empty() {
        anyhow::bail!("query cannot be empty");
    }

    let mut file = load_pipeline(&cli.config)?;
    if let Some(stop) = cli.stop_if_goal_not_satisfied {
        file.pipe.stop_if_goal_not_satisfied = stop;
    }

    let model = Arc::new(load_model(cli.script.as_deref())?);
    let pipe = build_pipe(&file, &build_builtin_handlers(), model.clone())?;
    tracing::info!(pipe = pipe.name(), query, "running pipeline");

    let outcomes = pipe.flow(query).await?;

    let (tools_left, judgements_left) = model.pending();
    if tools_left + judgements_left > 0 {
        tracing::warn!(
            tools_left,
            judgements_left,
            "replay script has unused entries"
        );
    }
    Ok(outcomes)
}

fn load_model(script: Option<&Path>) -> Result<ReplayModel> {
    let path = script.context("no replay script given; pass --script or set GOALFLOW_SCRIPT")?;
    ReplayModel::load(path)
}

fn validate_report(config: &Path) -> Result<String> {
    let file = load_pipeline(config)?;
    validate_pipeline(&file, &build_builtin_handlers())?;
    Ok(format!(
        "Pipeline '{}' is valid: {} step(s), {} agent(s).",
        file.pipe.name.as_deref().unwrap_or("unnamed"),
        file.pipe.steps.len(),
        file.agents.len()
    ))
}

fn handlers_report() -> String {
    let mut out = String::new();
    for (name, handler) in build_builtin_handlers() {
        out.push_str(&format!("{name}\n"));
        for operation in handler.operations().iter() {
            out.push_str(&format!("  {}: {}\n", operation.name(), operation.description()));
        }
    }
    out
}
