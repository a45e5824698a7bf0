// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! CCTM main entry point - CLI and commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;

use cctm::config::{self, CliOptions, ResolvedConfig};
use cctm::session::SessionEvent;
use cctm::telemetry::{init_telemetry, TelemetryConfig, GLOBAL_METRICS};
use cctm::{DispatchRequest, Dispatcher, Harness, Orchestrator, SessionStatus};

/// CCTM version string.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CCTM - run many terminal sessions and notice when they need you.
#[derive(Parser)]
#[command(name = "cctm")]
#[command(author, version, about = "Concurrent terminal session orchestrator", long_about = None)]
struct Cli {
    /// Program each session runs
    #[arg(short, long, env = "CCTM_COMMAND", global = true)]
    command: Option<String>,

    /// Argument passed to the session program (repeatable)
    #[arg(long = "arg", global = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Grid columns
    #[arg(long, global = true)]
    columns: Option<u16>,

    /// Grid rows
    #[arg(long, global = true)]
    rows: Option<u16>,

    /// Working directory for dispatch and harness sessions
    #[arg(short = 'C', long, global = true)]
    dir: Option<PathBuf>,

    /// Output format for reports
    #[arg(short = 'f', long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Show info-level logs
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Show debug logs with span events
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    action: Commands,
}

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Subcommands for cctm.
#[derive(Subcommand)]
enum Commands {
    /// Spawn sessions and stream their events
    Sessions {
        /// Working directories, one session each (defaults to the current directory)
        dirs: Vec<PathBuf>,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Send one command to a fresh session and wait for the outcome
    Dispatch {
        /// Command text written to the session
        text: String,

        /// Timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Spawn a few sessions and check they come up healthy (exit code 0/1)
    QuickCheck,

    /// Run the full stress test
    Stress {
        /// Number of concurrent sessions
        #[arg(short = 'n', long)]
        sessions: Option<usize>,

        /// Observation window in milliseconds
        #[arg(short, long)]
        window_ms: Option<u64>,
    },

    /// Show or create configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Show version information
    Version,
}

/// Config subcommand actions.
#[derive(Subcommand)]
enum ConfigAction {
    /// Show the merged configuration
    Show,
    /// Write an example workspace configuration file
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _telemetry = init_telemetry(&TelemetryConfig::from_verbosity(cli.verbose, cli.debug))?;

    let cli_options = CliOptions {
        command: cli.command.clone(),
        args: (!cli.args.is_empty()).then(|| cli.args.clone()),
        columns: cli.columns,
        rows: cli.rows,
        dispatch_timeout_ms: None,
        working_dir: cli.dir.clone(),
    };
    let workspace_root = std::env::current_dir()?;

    match cli.action {
        Commands::Version => {
            println!("cctm {}", VERSION);
            Ok(())
        }
        Commands::Config { action } => handle_config(action, &workspace_root, cli_options, cli.format),
        Commands::Sessions { dirs, duration } => {
            let config = config::load_config(&workspace_root, cli_options)?;
            run_sessions(config, dirs, duration, cli.format).await
        }
        Commands::Dispatch { text, timeout_ms } => {
            let config = config::load_config(&workspace_root, cli_options)?;
            run_dispatch(config, text, timeout_ms, cli.format).await
        }
        Commands::QuickCheck => {
            let config = config::load_config(&workspace_root, cli_options)?;
            let passed = run_quick_check(config, cli.format).await?;
            std::process::exit(if passed { 0 } else { 1 });
        }
        Commands::Stress { sessions, window_ms } => {
            let mut config = config::load_config(&workspace_root, cli_options)?;
            if let Some(ms) = window_ms {
                config.harness.observation_window_ms = ms;
            }
            run_stress(config, sessions, cli.format).await
        }
    }
}

fn handle_config(
    action: Option<ConfigAction>,
    workspace_root: &std::path::Path,
    cli_options: CliOptions,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let config = config::load_config(workspace_root, cli_options)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                OutputFormat::Text => print!("{}", serde_yaml::to_string(&config)?),
            }
        }
        Some(ConfigAction::Init) => {
            let path = config::init_config(workspace_root, None)?;
            println!("Created config file: {}", path.display());
        }
    }
    Ok(())
}

async fn start(config: &ResolvedConfig) -> anyhow::Result<Arc<Orchestrator>> {
    let orchestrator = Orchestrator::with_process_host(config.clone())
        .await
        .with_context(|| format!("cannot start sessions with `{}`", config.host.command))?;
    Ok(Arc::new(orchestrator))
}

async fn run_sessions(
    config: ResolvedConfig,
    dirs: Vec<PathBuf>,
    duration: Option<u64>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let orchestrator = start(&config).await?;
    let mut events = orchestrator.subscribe();

    let dirs = if dirs.is_empty() {
        vec![std::env::current_dir()?]
    } else {
        dirs
    };
    for dir in &dirs {
        match orchestrator.create_session(dir, None).await {
            Ok(id) => {
                if format == OutputFormat::Text {
                    println!("{} {} {}", "+".green(), id.short(), dir.display());
                }
            }
            Err(e) => eprintln!("{} {}: {}", "✗".red(), dir.display(), e),
        }
    }

    let stop = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    };
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event, format)?,
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("{}", format!("... {skipped} events skipped").dimmed());
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let sessions = orchestrator.list_sessions().await;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&sessions)?),
        OutputFormat::Text => {
            println!("\n{}", orchestrator.render_grid().await);
            for s in &sessions {
                let status = colorize_status(s.status);
                let flag = if s.needs_attention { " !".yellow().bold().to_string() } else { String::new() };
                println!("{:<10} {:<18} {}{}", s.id.short(), status, s.title, flag);
            }
        }
    }
    orchestrator.shutdown().await;
    Ok(())
}

fn print_event(event: &SessionEvent, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
        OutputFormat::Text => match event {
            SessionEvent::StatusChanged { id, from, to } => {
                println!("{} {} -> {}", id.short(), from, colorize_status(*to));
            }
            SessionEvent::AttentionRequired { id, reason } => {
                println!("{} {} {}", id.short(), "needs attention:".yellow().bold(), reason);
            }
            SessionEvent::Closed { id } => println!("{} {}", id.short(), "closed".dimmed()),
            other => println!("{}", format!("{other:?}").dimmed()),
        },
    }
    Ok(())
}

fn colorize_status(status: SessionStatus) -> String {
    let label = status.as_str();
    match status {
        SessionStatus::Idle => label.dimmed().to_string(),
        SessionStatus::Running => label.green().to_string(),
        SessionStatus::WaitingForInput => label.yellow().bold().to_string(),
        SessionStatus::Errored => label.red().to_string(),
        SessionStatus::Completed => label.blue().to_string(),
    }
}

async fn run_dispatch(
    config: ResolvedConfig,
    text: String,
    timeout_ms: Option<u64>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let orchestrator = start(&config).await?;
    let dispatcher = Dispatcher::new(Arc::clone(&orchestrator), config.dispatch.clone())?;

    let mut request = DispatchRequest::new(text);
    request.timeout_ms = timeout_ms;
    let result = dispatcher.dispatch(request).await;
    orchestrator.shutdown().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            let outcome = match result.error_classification {
                None => "success".green().bold().to_string(),
                Some(kind) => kind.to_string().red().bold().to_string(),
            };
            println!("{} in {} ms", outcome, result.execution_time_ms);
            if let Some(preview) = &result.response_preview {
                println!("{}", preview.dimmed());
            }
        }
    }
    Ok(())
}

async fn run_quick_check(config: ResolvedConfig, format: OutputFormat) -> anyhow::Result<bool> {
    let orchestrator = start(&config).await?;
    let harness = Harness::new(Arc::clone(&orchestrator), config.harness.clone());
    let report = harness.quick_validation().await;
    orchestrator.shutdown().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            let verdict = if report.passed { "PASS".green().bold() } else { "FAIL".red().bold() };
            println!(
                "{} {}/{} sessions ready, {:.1} MB (ceiling {:.1} MB), {} ms",
                verdict,
                report.sessions_ready,
                report.sessions_requested,
                report.memory_mb,
                report.memory_ceiling_mb,
                report.elapsed_ms
            );
            for problem in &report.problems {
                println!("  {} {}", "-".red(), problem);
            }
        }
    }
    Ok(report.passed)
}

async fn run_stress(
    config: ResolvedConfig,
    sessions: Option<usize>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let orchestrator = start(&config).await?;
    let harness = Harness::new(Arc::clone(&orchestrator), config.harness.clone());
    let result = harness.run_stress(sessions).await;
    orchestrator.shutdown().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            print!("{}", result.format_report());
            if tracing::enabled!(tracing::Level::INFO) {
                print!("\n{}", GLOBAL_METRICS.snapshot().format_report());
            }
        }
    }
    Ok(())
}
