use analytics::Summary;
use anyhow::{Context, bail};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Color, Table, presets::UTF8_FULL};
use configuration::{Config, ConfigArgs, init_logging, load_config};
use core_types::{ContractTestResult, TestStatus};
use engine::{RunOptions, Supervisor};
use events::ProbeMessage;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use web_server::AppState;

/// The main entry point for the Sentinel contract-test runner.
#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Credentials and the Telegram token may live in a .env file.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = load_config(&cli.config.config)
        .with_context(|| format!("failed to load {}", cli.config.config.display()))?;
    if let Some(level) = &cli.config.log_level {
        config.logging.level = level.clone();
    }
    let _guard = init_logging(&config.logging)?;

    match cli.command {
        Commands::Run(args) => handle_run(args, &config).await,
        Commands::Watch(args) => handle_watch(args, &config).await.map(|_| ExitCode::SUCCESS),
        Commands::Serve(args) => handle_serve(args, &config).await.map(|_| ExitCode::SUCCESS),
        Commands::Diagnose(args) => handle_diagnose(args, &config).await.map(|_| ExitCode::SUCCESS),
        Commands::Services => {
            print_services(&config);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Summary(args) => handle_summary(args, &config).await.map(|_| ExitCode::SUCCESS),
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Contract tests and health diagnostics for HTTP services.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every contract test once and print the results.
    Run(RunArgs),
    /// Poll all services until Ctrl-C, printing each batch.
    Watch(WatchArgs),
    /// Serve the HTTP API and poll in the background.
    Serve(ServeArgs),
    /// Sample a diagnostics endpoint and report latency and trend.
    Diagnose(DiagnoseArgs),
    /// List the configured services and their specs.
    Services,
    /// Print the persisted summary of each service without probing.
    Summary(SummaryArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Only run this service.
    #[arg(long)]
    service: Option<String>,

    /// Probe a service's specs concurrently.
    #[arg(long)]
    parallel: bool,

    /// Print results as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct WatchArgs {
    /// Poll interval in milliseconds; defaults to `engine.poll_interval_ms`.
    #[arg(long)]
    interval_ms: Option<u64>,
}

#[derive(Parser)]
struct ServeArgs {
    /// Listen address; defaults to `server.addr`.
    #[arg(long)]
    addr: Option<SocketAddr>,
}

#[derive(Parser)]
struct DiagnoseArgs {
    /// The diagnostics endpoint name from `[diagnostics.endpoints]`.
    name: String,

    /// How many samples to take.
    #[arg(long, default_value_t = 10)]
    samples: usize,

    /// Pause between samples in milliseconds.
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,
}

#[derive(Parser)]
struct SummaryArgs {
    /// Only summarize this service.
    #[arg(long)]
    service: Option<String>,
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn handle_run(args: RunArgs, config: &Config) -> anyhow::Result<ExitCode> {
    let supervisor = Supervisor::from_config(config, None).await?;
    let options = RunOptions {
        parallel: args.parallel || config.engine.parallel,
    };

    if let Some(id) = &args.service {
        if supervisor.engine(id).is_none() {
            bail!("unknown service '{}'", id);
        }
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Probing services...");

    let batches = match &args.service {
        Some(id) => BTreeMap::from([(id.clone(), supervisor.run_service(id, options).await?)]),
        None => supervisor.run_all_services(options).await,
    };
    spinner.finish_and_clear();

    let mut failed = false;
    for (service_id, batch) in batches {
        let results = batch.unwrap_or_default();
        failed |= results.iter().any(|r| r.status.is_failure());
        if args.json {
            println!("{}", serde_json::to_string_pretty(&results)?);
        } else {
            println!("{}", service_id);
            println!("{}", results_table(&results));
        }
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn handle_watch(args: WatchArgs, config: &Config) -> anyhow::Result<()> {
    let mut config = config.clone();
    if let Some(interval_ms) = args.interval_ms {
        config.engine.poll_interval_ms = interval_ms;
    }

    let (events, mut rx) = broadcast::channel(256);
    let supervisor = Arc::new(Supervisor::from_config(&config, Some(events)).await?);
    let shutdown = shutdown_on_ctrl_c();
    let poller = tokio::spawn(supervisor.start(shutdown.clone()));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            message = rx.recv() => match message {
                Ok(ProbeMessage::BatchCompleted(batch)) => {
                    let stamp = batch.finished_at.with_timezone(&Local).format("%H:%M:%S");
                    println!("[{}] {}", stamp, batch.service_id);
                    println!("{}", results_table(&batch.results));
                }
                Ok(ProbeMessage::Alert(alert)) => println!("ALERT {}", alert.summary_line()),
                Ok(ProbeMessage::Log(_)) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Output fell behind; batches dropped.");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    poller.await?;
    Ok(())
}

async fn handle_serve(args: ServeArgs, config: &Config) -> anyhow::Result<()> {
    let (events, _) = broadcast::channel(256);
    let supervisor = Arc::new(Supervisor::from_config(config, Some(events.clone())).await?);
    let shutdown = shutdown_on_ctrl_c();

    let poller = tokio::spawn(supervisor.clone().start(shutdown.clone()));
    let state = Arc::new(AppState { supervisor, events });
    web_server::run_server(args.addr.unwrap_or(config.server.addr), state, shutdown).await?;
    poller.await?;
    Ok(())
}

async fn handle_diagnose(args: DiagnoseArgs, config: &Config) -> anyhow::Result<()> {
    let supervisor = Supervisor::from_config(config, None).await?;
    let diagnostics = supervisor.diagnostics();

    let progress = ProgressBar::new(args.samples as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    for i in 0..args.samples {
        let sample = diagnostics.sample(&args.name).await?;
        progress.set_message(format!("{}ms", sample.duration_ms));
        progress.inc(1);
        if i + 1 < args.samples {
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }
    }
    progress.finish_and_clear();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Time", "OK", "HTTP", "Bytes", "Duration", "Error"]);
    for sample in diagnostics.samples(&args.name).await? {
        table.add_row(vec![
            Cell::new(format_timestamp(sample.timestamp)),
            Cell::new(if sample.ok { "yes" } else { "no" })
                .fg(if sample.ok { Color::Green } else { Color::Red }),
            Cell::new(optional(sample.status_code)),
            Cell::new(optional(sample.size)),
            Cell::new(format!("{}ms", sample.duration_ms)),
            Cell::new(sample.error.unwrap_or_default()),
        ]);
    }
    println!("{}", table);

    match diagnostics.trend(&args.name).await? {
        Some(delta) => println!("Trend (last 5 vs previous 5): {:+.1}ms", delta),
        None => println!("Trend: not enough samples (need 10)"),
    }
    Ok(())
}

async fn handle_summary(args: SummaryArgs, config: &Config) -> anyhow::Result<()> {
    let supervisor = Supervisor::from_config(config, None).await?;
    let summaries = join_all(
        supervisor
            .engines()
            .filter(|engine| args.service.as_deref().is_none_or(|id| id == engine.service_id()))
            .map(|engine| engine.summary()),
    )
    .await;
    for summary in &summaries {
        print_summary(summary);
    }
    Ok(())
}

fn print_services(config: &Config) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Service", "Base URL", "Spec", "Endpoint", "SLA", "Breaker"]);
    for service in &config.services {
        for spec in &service.specs {
            table.add_row(vec![
                Cell::new(service.display_name()),
                Cell::new(&service.base_url),
                Cell::new(&spec.id),
                Cell::new(format!("{} {}", spec.method.as_str(), spec.endpoint)),
                Cell::new(spec.sla_ms.map(|ms| format!("{}ms", ms)).unwrap_or_default()),
                Cell::new(
                    spec.circuit_breaker
                        .map(|cb| format!("{} / {}ms", cb.failure_threshold, cb.cooldown_ms))
                        .unwrap_or_default(),
                ),
            ]);
        }
    }
    println!("{}", table);
}

fn print_summary(summary: &Summary) {
    println!("{} ({:?})", summary.service_id, summary.health);
    println!(
        "  p50 {}  p95 {}  p99 {}  over {} samples",
        optional_ms(summary.percentiles.p50),
        optional_ms(summary.percentiles.p95),
        optional_ms(summary.percentiles.p99),
        summary.percentiles.samples
    );
    if let Some(rate) = summary.sla.rate {
        println!(
            "  SLA breaches {}/{} ({:.1}%)",
            summary.sla.breaches,
            summary.sla.samples,
            rate * 100.0
        );
    }
    println!(
        "  open circuits {}  max failure streak {}",
        summary.open_circuits, summary.max_failure_streak
    );
    println!("{}", results_table(&summary.latest));
}

fn results_table(results: &[ContractTestResult]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Spec", "Status", "HTTP", "Latency", "Message"]);
    for result in results {
        let color = match result.status {
            TestStatus::Pass => Color::Green,
            TestStatus::Fail => Color::Red,
            TestStatus::Error => Color::Magenta,
            TestStatus::Skip => Color::DarkGrey,
        };
        table.add_row(vec![
            Cell::new(&result.label),
            Cell::new(result.status).fg(color),
            Cell::new(optional(result.http_status)),
            Cell::new(optional_ms(result.latency_ms)),
            Cell::new(result.message.as_deref().unwrap_or("")),
        ]);
    }
    table
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received; shutting down.");
            token.cancel();
        }
    });
    shutdown
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn optional_ms(value: Option<u64>) -> String {
    value.map(|ms| format!("{}ms", ms)).unwrap_or_else(|| "-".to_string())
}

fn format_timestamp(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S%.3f").to_string())
        .unwrap_or_default()
}
