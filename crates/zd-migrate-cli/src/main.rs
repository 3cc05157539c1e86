//! zd-migrate CLI - zero-downtime schema migrations for PostgreSQL.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use zd_migrate::plan::Statement;
use zd_migrate::{Config, MigrationMode, Orchestrator, ZdError};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit code when a signal interrupted the run.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "zd-migrate")]
#[command(about = "Zero-downtime expand/contract schema migrations for PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the zd-mode parameter for every change set
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Off,
    Expand,
    Contract,
}

impl From<ModeArg> for MigrationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Off => MigrationMode::Off,
            ModeArg::Expand => MigrationMode::Expand,
            ModeArg::Contract => MigrationMode::Contract,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the statements each change set would run, without running them
    Plan,

    /// Apply every change set in order
    Run,

    /// Undo every change set, last one first
    Rollback,

    /// Test the database connection
    HealthCheck,
}

enum Outcome {
    Done,
    Interrupted,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(Outcome::Done) => ExitCode::SUCCESS,
        Ok(Outcome::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<Outcome, ZdError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(ZdError::Config)?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    // Dropping the command future closes the session; the server rolls back
    // the open backfill chunk and a re-run resumes from there.
    tokio::select! {
        result = execute(cli, config) => result.map(|()| Outcome::Done),
        () = shutdown_signal() => {
            warn!("Interrupted; the current chunk is rolled back, re-run to resume");
            Ok(Outcome::Interrupted)
        }
    }
}

async fn execute(cli: Cli, config: Config) -> Result<(), ZdError> {
    let mut orchestrator = Orchestrator::new(config).await?;
    if let Some(mode) = cli.mode {
        orchestrator = orchestrator.with_mode(mode.into());
    }

    match cli.command {
        Commands::Plan => {
            let report = orchestrator.plan().await?;
            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("Plan for {} ({} change sets)", report.database, report.change_sets.len());
                for change_set in &report.change_sets {
                    println!(
                        "\n-- {} [{}, {} mode] checksum {}",
                        change_set.id, change_set.kind, change_set.mode, change_set.checksum
                    );
                    for statement in &change_set.statements {
                        match statement {
                            Statement::Sql(sql) => println!("{};", sql),
                            Statement::Backfill(job) => println!(
                                "-- backfill {} in chunks of {} (pause {}ms)",
                                job.describe(),
                                job.chunk_size,
                                job.throttle_ms
                            ),
                            Statement::Load { sql, file } => println!("{}; -- streams {}", sql, file),
                        }
                    }
                }
            }
        }

        Commands::Run | Commands::Rollback => {
            let rollback = matches!(cli.command, Commands::Rollback);
            let result = if rollback {
                orchestrator.rollback().await?
            } else {
                orchestrator.run().await?
            };

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!(
                    "\n{}",
                    if rollback { "Rollback completed!" } else { "Migration completed!" }
                );
                println!("  Duration: {:.2}s", result.duration_seconds);
                for change_set in &result.change_sets {
                    println!(
                        "  {} [{}, {} mode]: {} statements, {} rows backfilled, {} rows loaded",
                        change_set.id,
                        change_set.kind,
                        change_set.mode,
                        change_set.statements_executed,
                        change_set.rows_backfilled,
                        change_set.rows_loaded
                    );
                }
            }
        }

        Commands::HealthCheck => {
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Database ({}): {} ({}ms)",
                    result.database,
                    if result.healthy { "OK" } else { "FAILED" },
                    result.latency_ms
                );
                if let Some(ref version) = result.server_version {
                    println!("    Version: {}", version);
                }
                if let Some(ref err) = result.error {
                    println!("    Error: {}", err);
                }
            }

            if !result.healthy {
                return Err(ZdError::NotConnected);
            }
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Resolves on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to set up SIGTERM handler: {}", e);
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nReceived SIGINT. Shutting down...");
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => eprintln!("\nReceived SIGINT. Shutting down..."),
        _ = sigterm.recv() => eprintln!("\nReceived SIGTERM. Shutting down..."),
    }
}

/// Resolves on Ctrl-C.
#[cfg(not(unix))]
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("\nReceived Ctrl-C. Shutting down...");
    }
}
