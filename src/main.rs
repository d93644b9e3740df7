mod cli;

use anyhow::{anyhow, Result};
use clap::Parser;
use cli::{Cli, Command, ConfigAction};
use colored::Colorize;
use std::io::IsTerminal;
use std::sync::Arc;
use tmux_mngr::config::{Config, Settings};
use tmux_mngr::debug_log::DebugLog;
use tmux_mngr::orchestrator::{Orchestrator, RunOutcome};
use tmux_mngr::project::{list_projects, PromptSelector};
use tmux_mngr::scenario::MuxEnv;
use tmux_mngr::tmux::Tmux;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        // Exit without dropping the runtime: an interrupted prompt may still
        // be blocked reading stdin.
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("MNGR_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    if std::env::var("NO_COLOR").is_ok() || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    if cli.config_info {
        println!("{}", Config::info());
        return Ok(());
    }

    if let Some(Command::Config(args)) = &cli.command {
        return run_config(&args.action);
    }

    let config = Config::load()?;
    if cli.list {
        println!("{}", list_projects(&config.projects));
        return Ok(());
    }

    let log = Arc::new(open_debug_log(&cli, &config.settings));
    let tmux = Tmux::system(log.clone());

    let result = tokio::select! {
        result = dispatch(&cli, config, tmux) => result,
        _ = tokio::signal::ctrl_c() => {
            log.log("INTERRUPT", "Interrupted by user");
            Err(anyhow!("interrupted"))
        }
    };

    if let Err(err) = &result {
        log.error(err, "run");
    }
    log.finalize();
    if let Some(path) = log.path() {
        tracing::info!(path = %path.display(), "debug log written");
    }
    result
}

async fn dispatch(cli: &Cli, config: Config, tmux: Tmux) -> Result<()> {
    if cli.needs_tmux() {
        tmux.check_version().await?;
    }

    if config.projects.is_empty() && cli.command.is_none() {
        return Err(anyhow!(
            "no projects configured in {}\nRun 'mngr config init' to create an example file.",
            Config::path().display()
        ));
    }

    let orchestrator = Orchestrator::new(tmux, config, MuxEnv::from_env());

    match &cli.command {
        Some(Command::Status) => {
            let info = orchestrator.scenario_info().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Some(Command::Config(_)) => {}
        None => {
            match orchestrator.run(cli.project.as_deref(), PromptSelector::stdio()).await? {
                RunOutcome::Cancelled => println!("\nExiting."),
                RunOutcome::Completed { scenario, project, window } => {
                    tracing::info!(%scenario, %window, "workspace ready");
                    println!("{} {} ({})", "✓".green(), project, window.name);
                }
            }
        }
    }
    Ok(())
}

fn run_config(action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", Config::load()?.display());
        }
        ConfigAction::Set { key, value } => match Config::set_value(key, value)? {
            Some(old) => println!("Updated '{}': '{}' -> '{}'", key, old, value),
            None => println!("Set '{}': '{}'", key, value),
        },
        ConfigAction::Init => {
            let status = Config::ensure_exists()?;
            let path = Config::path();
            if status.created {
                println!("Created example configuration at {}", path.display());
            } else {
                println!("Configuration already exists at {}", path.display());
            }
            if !status.has_projects {
                println!("Add a [projects.<key>] table to get started.");
            }
        }
    }
    Ok(())
}

/// The run's debug log, or a disabled one when turned off or unwritable.
fn open_debug_log(cli: &Cli, settings: &Settings) -> DebugLog {
    if cli.no_debug || !settings.debug_log_enabled() {
        return DebugLog::disabled();
    }
    match DebugLog::create(&settings.base_path()) {
        Ok(log) => log,
        Err(err) => {
            tracing::warn!("debug log disabled: {err:#}");
            DebugLog::disabled()
        }
    }
}
