//! dbrts CLI - same-engine schema and data transfer.

use clap::{Parser, Subcommand};
use dbrts::{
    health_check, Config, LogProgress, Pagination, ProgressCounter, TransferError,
    TransferOptions, TransferService, TransferSummary,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "dbrts")]
#[command(about = "Same-engine schema and data transfer for PostgreSQL and MongoDB")]
#[command(version)]
struct Cli {
    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info", global = true)]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy schema and/or data from a source database to a target database
    Transfer {
        /// Source endpoint YAML file
        #[arg(short, long)]
        source: PathBuf,

        /// Target endpoint YAML file
        #[arg(short, long)]
        target: PathBuf,

        /// Only recreate structure (tables, indexes, constraints)
        #[arg(long)]
        schema_only: bool,

        /// Only copy rows or documents
        #[arg(long)]
        data_only: bool,

        /// Number of parallel table copies (default: tuned to CPU cores)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Rows or documents per batch
        #[arg(short, long, default_value_t = dbrts::config::DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Page strategy for tables: offset or keyset
        #[arg(long, default_value = "offset")]
        pagination: Pagination,

        /// Print progress updates as JSON lines to stderr
        #[arg(long)]
        progress: bool,

        /// Print the transfer summary as JSON to stdout
        #[arg(long)]
        output_json: bool,
    },

    /// Test connectivity to one or more endpoints
    HealthCheck {
        /// Endpoint YAML files
        #[arg(required = true)]
        configs: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, TransferError> {
    let cli = Cli::parse();
    setup_logging(&cli.verbosity, &cli.log_format);

    match cli.command {
        Commands::Transfer {
            source,
            target,
            schema_only,
            data_only,
            workers,
            batch_size,
            pagination,
            progress,
            output_json,
        } => {
            let source_config = Config::load(&source)?;
            let target_config = Config::load(&target)?;
            info!("Loaded endpoints from {:?} and {:?}", source, target);

            let mut options = TransferOptions::default()
                .with_schema_only(schema_only)
                .with_data_only(data_only)
                .with_batch_size(batch_size)
                .with_pagination(pagination);
            options = match workers {
                Some(w) => options.with_workers(w),
                None => options.with_auto_tuning(),
            };

            let counter = Arc::new(ProgressCounter::new());
            options = if progress {
                options.with_progress(counter.clone())
            } else {
                options.with_progress(Arc::new(LogProgress::new()))
            };

            // Refuses mismatched engines before anything connects.
            let service =
                TransferService::new(source_config.database, target_config.database, options)?;

            let cancel = setup_signal_handler();
            let reporter_stop = CancellationToken::new();
            let reporter = progress.then(|| {
                tokio::spawn(report_progress(counter.clone(), reporter_stop.clone()))
            });

            let result = service.execute(&cancel).await;

            reporter_stop.cancel();
            if let Some(handle) = reporter {
                let _ = handle.await;
            }

            let summary = result?;
            print_summary(&summary, output_json)?;

            if summary.is_success() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(1))
            }
        }

        Commands::HealthCheck { configs } => {
            let mut healthy = true;
            for path in &configs {
                let config = Config::load(path)?;
                let label = path.display().to_string();
                match health_check(&config.database, &label).await {
                    Ok(()) => println!("  {} ({}): OK", label, config.database.describe()),
                    Err(e) => {
                        healthy = false;
                        println!("  {} ({}): FAILED", label, config.database.describe());
                        println!("    Error: {}", e);
                    }
                }
            }

            println!(
                "\n  Overall: {}",
                if healthy { "HEALTHY" } else { "UNHEALTHY" }
            );
            if healthy {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(3))
            }
        }
    }
}

fn print_summary(summary: &TransferSummary, json: bool) -> Result<(), TransferError> {
    if json {
        println!("{}", summary.to_json()?);
        return Ok(());
    }

    println!("\nTransfer completed!");
    println!("  Run ID: {}", summary.run_id);
    println!("  Engine: {}", summary.engine);
    println!("  Duration: {:.2}s", summary.duration_seconds);
    println!(
        "  Tables: {}/{}",
        summary.tables_succeeded, summary.tables_total
    );
    println!("  Rows: {}", summary.rows_transferred);
    if summary.indexes_skipped > 0 {
        println!("  Indexes skipped: {}", summary.indexes_skipped);
    }
    for failure in &summary.failed_tables {
        println!(
            "  Failed: {} after {} rows: {}",
            failure.table, failure.rows_copied, failure.error
        );
    }
    Ok(())
}

/// Emit a JSON progress line to stderr every second until stopped.
async fn report_progress(counter: Arc<ProgressCounter>, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if let Ok(line) = serde_json::to_string(&counter.snapshot()) {
                    eprintln!("{}", line);
                }
            }
        }
    }
    if let Ok(line) = serde_json::to_string(&counter.snapshot()) {
        eprintln!("{}", line);
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT or SIGTERM.
///
/// In-flight table copies finish their current job; nothing new is started.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    eprintln!("Failed to install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Stopping after in-flight work...", name);
            token.cancel();
        });
    }

    cancel
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after in-flight work...");
            token.cancel();
        }
    });

    cancel
}
