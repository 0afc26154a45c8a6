//! biocrawl CLI: worker process and operator commands.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use biocrawl::config::{Config, SweepPolicy};
use biocrawl::db::Db;
use biocrawl::engine::{EXIT_FATAL, RunOutcome, Worker, WorkerConfig};
use biocrawl::fetch::{FetchAdapter, InstagramSource, RateLimitRules};
use biocrawl::ingest::HttpIngestor;
use biocrawl::lease::LeaseStore;
use biocrawl::model::{Owner, Status};
use biocrawl::rotation::{CommandRotator, IdentityRotator, ProcessRestart, egress_ip};
use biocrawl::seed::read_usernames;
use biocrawl::telemetry::{TelemetryConfig, init_telemetry};
use chrono::Utc;
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "biocrawl", about = "Distributed profile bio crawler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a worker until the work list is drained or a restart is due
    Run,
    /// Add usernames from a file (one per line) to the work list
    Seed {
        /// Path to the username file
        file: PathBuf,
    },
    /// Show progress by status, recent throughput and per-instance totals
    Status {
        /// Refresh every N seconds until interrupted
        #[arg(long)]
        watch: Option<u64>,
    },
    /// Release claims stuck in processing
    Reset {
        /// Only claims older than this many minutes
        #[arg(long, default_value_t = 30)]
        older_than: u64,
        /// Release every claim regardless of age
        #[arg(long)]
        all: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Apply database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run => {
            let code = cmd_run().await;
            std::process::exit(code);
        }
        Command::Seed { file } => cmd_seed(file).await,
        Command::Status { watch } => cmd_status(watch).await,
        Command::Reset {
            older_than,
            all,
            yes,
        } => cmd_reset(older_than, all, yes).await,
        Command::Migrate => {
            let db = connect().await?;
            db.migrate().await?;
            db.close().await;
            println!("Migrations applied.");
            Ok(())
        }
    }
}

async fn connect() -> anyhow::Result<Db> {
    let url = Config::database_url_from_env()?;
    let db = Db::connect(url.expose_secret()).await?;
    Ok(db)
}

/// Runs the worker and returns the process exit code.
async fn cmd_run() -> i32 {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return EXIT_FATAL;
        }
    };

    let guard = match init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "biocrawl".to_string(),
        log_level: config.log_level.clone(),
        log_dir: config.log_dir.clone(),
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("telemetry setup failed: {e}");
            return EXIT_FATAL;
        }
    };

    let code = match run_worker(config).await {
        Ok(outcome) => {
            info!(?outcome, code = outcome.exit_code(), "exiting");
            outcome.exit_code()
        }
        Err(e) => {
            error!(error = %e, "worker failed");
            EXIT_FATAL
        }
    };

    // Flush OTel pipelines before process::exit skips destructors.
    drop(guard);
    code
}

async fn run_worker(config: Config) -> anyhow::Result<RunOutcome> {
    let owner = Owner::from_env();
    info!(owner = %owner, instance_id = %owner.instance_id, "starting worker");

    if let Some(ref url) = config.egress_ip_url {
        if let Some(ip) = egress_ip(url, Duration::from_secs(5)).await {
            info!(ip = %ip, "egress address");
        }
    }

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.health_check().await?;
    db.migrate().await?;

    let rules = match config.rate_limit_rules {
        Some(ref path) => RateLimitRules::load(path)?,
        None => RateLimitRules::default(),
    };
    info!(indicators = rules.indicators().len(), "rate-limit rules loaded");
    let source = Arc::new(InstagramSource::new(config.http_timeout)?);
    let adapter = FetchAdapter::new(source, rules);

    let ingestor = Arc::new(HttpIngestor::new(
        config.ingest_url.clone(),
        config.ingest_token.clone(),
        config.http_timeout,
    )?);

    let rotator: Arc<dyn IdentityRotator> = match config.rotate_command {
        Some(ref command) => Arc::new(CommandRotator::new(command, owner.clone())),
        None => Arc::new(ProcessRestart),
    };

    let store: Arc<dyn LeaseStore> = db.clone();
    let mut worker = Worker::new(
        store,
        adapter,
        ingestor,
        rotator,
        owner,
        WorkerConfig::from(&config),
    );

    let token = worker.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested, finishing the current profile");
        token.cancel();
    });

    let outcome = worker.run().await;
    db.close().await;
    Ok(outcome?)
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.ok();
}

async fn cmd_seed(file: PathBuf) -> anyhow::Result<()> {
    let usernames = read_usernames(&file).await?;
    if usernames.is_empty() {
        println!("No usernames found in {}.", file.display());
        return Ok(());
    }

    let db = connect().await?;
    db.migrate().await?;
    let added = db.seed(&usernames).await?;
    db.close().await;

    println!(
        "Seeded {added} new profile(s); {} already tracked.",
        usernames.len() as u64 - added
    );
    Ok(())
}

async fn cmd_status(watch: Option<u64>) -> anyhow::Result<()> {
    let db = connect().await?;

    match watch {
        None => print_status(&db).await?,
        Some(secs) => {
            let shutdown = CancellationToken::new();
            let token = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                token.cancel();
            });

            loop {
                print!("\x1B[2J\x1B[H");
                print_status(&db).await?;
                println!("\nRefreshing every {secs}s, Ctrl-C to stop.");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(secs.max(1))) => {}
                }
            }
        }
    }

    db.close().await;
    Ok(())
}

async fn print_status(db: &Db) -> anyhow::Result<()> {
    let counts = db.count_by_status().await?;
    let total: u64 = counts.values().sum();

    println!("Profiles at {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
    println!("{:<20}  {:>10}  {:>7}", "STATUS", "COUNT", "SHARE");
    println!("{}", "-".repeat(41));
    for status in Status::ALL {
        let count = counts.get(&status).copied().unwrap_or(0);
        println!(
            "{:<20}  {:>10}  {:>6.1}%",
            status.as_str(),
            count,
            percent(count, total)
        );
    }
    println!("{:<20}  {:>10}", "total", total);

    let since = Utc::now() - chrono::Duration::hours(1);
    let recent = db.recent_activity(since).await?;
    let remaining = counts.get(&Status::NotCollected).copied().unwrap_or(0)
        + counts.get(&Status::Processing).copied().unwrap_or(0);
    println!("\nResolved in the last hour: {recent} ({recent}/h)");
    if recent > 0 {
        let hours = remaining as f64 / recent as f64;
        println!("Remaining: {remaining}, ETA {hours:.1}h at this rate");
    } else {
        println!("Remaining: {remaining}, no recent activity");
    }

    let holders = db.processing_stats().await?;
    if !holders.is_empty() {
        println!("\n{:<24}  {:<8}  {:>7}  OLDEST CLAIM", "OWNER", "INSTANCE", "CLAIMS");
        for holder in &holders {
            println!(
                "{:<24}  {:<8}  {:>7}  {}",
                holder.owner.as_deref().unwrap_or("-"),
                short_instance(holder.instance_id),
                holder.count,
                holder
                    .oldest
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
    }

    let tallies = db.instance_stats().await?;
    if !tallies.is_empty() {
        let mut per_host: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
        for tally in &tallies {
            let entry = per_host.entry(tally.processed_by.as_str()).or_default();
            entry.0 += tally.count;
            if tally.status == Status::Collected {
                entry.1 += tally.count;
            }
        }

        println!("\n{:<24}  {:>10}  {:>10}  {:>7}", "HOST", "PROCESSED", "COLLECTED", "SUCCESS");
        for (host, (processed, collected)) in per_host {
            println!(
                "{:<24}  {:>10}  {:>10}  {:>6.1}%",
                host,
                processed,
                collected,
                percent(collected, processed)
            );
        }
    }

    Ok(())
}

async fn cmd_reset(older_than: u64, all: bool, yes: bool) -> anyhow::Result<()> {
    let db = connect().await?;

    let holders = db.processing_stats().await?;
    if holders.is_empty() {
        println!("No profiles in processing.");
        db.close().await;
        return Ok(());
    }

    let now = Utc::now();
    println!("{:<24}  {:<8}  {:>7}  {:>12}", "OWNER", "INSTANCE", "CLAIMS", "OLDEST (MIN)");
    for holder in &holders {
        let age = holder
            .oldest
            .map(|t| (now - t).num_minutes().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24}  {:<8}  {:>7}  {:>12}",
            holder.owner.as_deref().unwrap_or("-"),
            short_instance(holder.instance_id),
            holder.count,
            age
        );
    }

    let policy = if all {
        SweepPolicy::All
    } else {
        SweepPolicy::from_minutes(older_than)?
    };
    let scope = match policy {
        SweepPolicy::All => "all claims".to_string(),
        SweepPolicy::OlderThan(_) => format!("claims older than {older_than} minutes"),
    };

    if !yes && !confirm(&format!("Release {scope} back to not_collected? [y/N] "))? {
        println!("Aborted.");
        db.close().await;
        return Ok(());
    }

    let released = db.reset_stale_claims(policy).await?;
    db.close().await;
    println!("Released {released} claim(s).");
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

fn short_instance(id: Option<uuid::Uuid>) -> String {
    id.map(|id| id.to_string()[..8].to_string())
        .unwrap_or_else(|| "-".to_string())
}
