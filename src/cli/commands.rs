//! CLI commands implementation.

use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use console::style;

use crate::app::{App, StatusReport};
use crate::config::load_settings;
use crate::models::{EntityKind, EntityRef};
use crate::registry::Heartbeat;
use crate::scheduler::{CronRunner, RefreshRequest, Scheduler};

#[derive(Parser)]
#[command(name = "rosterwatch")]
#[command(about = "Rate-limited esports player, team and tournament collector")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to ./rosterwatch.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Register this instance and run the cron schedule until ctrl-c
    Run {
        /// Queue a full refresh immediately instead of waiting for cron
        #[arg(long)]
        refresh_now: bool,
    },

    /// Run a full list refresh in this process and exit when drained
    Refresh {
        /// Player pages to fetch (default from config)
        #[arg(short, long)]
        pages: Option<u32>,
        /// Also fetch every listed player's profile
        #[arg(short, long)]
        detailed: bool,
    },

    /// Refresh a single entity at maximum priority
    Update {
        /// Entity kind: player, team or tournament
        kind: String,
        /// Entity id
        id: String,
        /// Entity page URL
        url: String,
    },

    /// Show registry, cache and rate limit state
    ///
    /// Runs in its own process, so the scheduler section covers only this
    /// invocation and not a running `rosterwatch run`.
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the schedule table and upcoming runs
    Schedules {
        /// Upcoming runs to show per entry
        #[arg(short = 'n', long, default_value = "3")]
        upcoming: usize,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())
        .await
        .context("Failed to load settings")?;

    match cli.command {
        Commands::Run { refresh_now } => cmd_run(App::build(settings).await?, refresh_now).await,
        Commands::Refresh { pages, detailed } => {
            cmd_refresh(App::build(settings).await?, pages, detailed).await
        }
        Commands::Update { kind, id, url } => {
            cmd_update(App::build(settings).await?, &kind, id, url).await
        }
        Commands::Status { json } => cmd_status(App::build(settings).await?, json).await,
        Commands::Schedules { upcoming } => cmd_schedules(App::build(settings).await?, upcoming),
    }
}

async fn cmd_run(app: App, refresh_now: bool) -> anyhow::Result<()> {
    app.registry
        .register(&app.instance_id)
        .await
        .context("Failed to register instance")?;
    let heartbeat = Heartbeat::new(
        app.registry.clone(),
        app.instance_id.clone(),
        app.settings.registry.interval(),
    );
    let beat = heartbeat.start();

    let cron = CronRunner::new(app.scheduler.clone(), app.schedule_table()?);
    let timers = cron.start();

    println!(
        "{} Collector {} running ({} schedules, cache: {}, registry: {})",
        style("→").cyan(),
        style(&app.instance_id).bold(),
        cron.entries().len(),
        app.cache.backend_name(),
        app.registry.backend_name()
    );

    if refresh_now {
        let response = app.scheduler.trigger_refresh(RefreshRequest::default());
        print_outcome(response.success, &response.message);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    println!("\n{} Shutting down", style("!").yellow());

    cron.shutdown();
    heartbeat.shutdown();
    let _ = beat.await;
    futures::future::join_all(timers).await;

    let pending = app.scheduler.status().queue_length;
    if pending > 0 {
        println!("  {} queued tasks discarded", style(pending).yellow());
    }
    print_stats(&app.scheduler);
    Ok(())
}

async fn cmd_refresh(app: App, pages: Option<u32>, detailed: bool) -> anyhow::Result<()> {
    let response = app.scheduler.trigger_refresh(RefreshRequest {
        pages,
        detailed: Some(detailed),
    });
    print_outcome(response.success, &response.message);
    if !response.success {
        bail!(response.message);
    }

    app.scheduler.wait_idle().await;
    print_stats(&app.scheduler);
    Ok(())
}

async fn cmd_update(app: App, kind: &str, id: String, url: String) -> anyhow::Result<()> {
    let Some(kind) = EntityKind::from_str(kind) else {
        bail!("Unknown entity kind '{}' (expected player, team or tournament)", kind);
    };

    let response = app
        .scheduler
        .trigger_entity_update(EntityRef::new(kind, id, url));
    print_outcome(response.success, &response.message);
    if !response.success {
        bail!(response.message);
    }

    app.scheduler.wait_idle().await;
    print_stats(&app.scheduler);
    Ok(())
}

async fn cmd_status(app: App, json: bool) -> anyhow::Result<()> {
    let report = app.status_report().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &StatusReport) {
    println!("\n{}", style(format!("Collector {}", report.instance_id)).bold());
    println!("{}", "-".repeat(40));

    let cache = if report.cache_degraded {
        style(format!("{} (degraded)", report.cache_backend))
            .yellow()
            .to_string()
    } else {
        report.cache_backend.to_string()
    };
    println!("{:<18} {}", "Cache:", cache);
    println!("{:<18} {}", "Registry:", report.registry_backend);

    let pages = match report.own_pages {
        Some(range) => format!("{} of {}", range, report.total_pages),
        None => style("not registered").dim().to_string(),
    };
    println!("{:<18} {}", "Own pages:", pages);

    let state = if report.local_scheduler.is_running {
        style("Draining").green().to_string()
    } else {
        style("Idle").dim().to_string()
    };
    println!(
        "\n{} {}",
        style("Local scheduler").bold(),
        style("(this process only)").dim()
    );
    println!("  {:<16} {}", "State:", state);
    println!("  {:<16} {}", "Queue length:", report.local_scheduler.queue_length);
    println!(
        "  {:<16} {}",
        "Active requests:", report.local_scheduler.active_requests
    );

    println!("\n{}", style("Active instances").bold());
    if report.active_instances.is_empty() {
        println!("  {}", style("none").dim());
    }
    for instance in &report.active_instances {
        let age = (Utc::now() - instance.last_heartbeat).num_seconds();
        println!(
            "  {} {} on {} (heartbeat {}s ago)",
            style("•").cyan(),
            instance.id,
            instance.host.as_deref().unwrap_or("unknown host"),
            age
        );
    }

    for instance in &report.stale_instances {
        println!(
            "  {} {} {}",
            style("•").dim(),
            style(&instance.id).dim(),
            style(instance.status.as_str()).yellow()
        );
    }

    let mut limits: Vec<_> = report.rate_limits.iter().collect();
    limits.sort_by_key(|(source, _)| **source);
    println!("\n{}", style("Rate limits").bold());
    for (source, stats) in limits {
        println!(
            "  {:<8} {} requests, {} throttled",
            source.as_str(),
            stats.total_requests,
            stats.throttled
        );
    }
}

fn cmd_schedules(app: App, upcoming: usize) -> anyhow::Result<()> {
    let now = Utc::now();
    println!("\n{}", style("Schedules").bold());
    println!("{}", "-".repeat(40));
    for entry in app.schedule_table()? {
        println!(
            "{} {} {}",
            style(&entry.name).cyan().bold(),
            style(entry.cron.expr()).dim(),
            if entry.guard != entry.name {
                format!("(guard: {})", entry.guard)
            } else {
                String::new()
            }
        );
        for at in entry.cron.upcoming(now, upcoming) {
            println!("    {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    }
    Ok(())
}

fn print_outcome(success: bool, message: &str) {
    if success {
        println!("{} {}", style("✓").green(), message);
    } else {
        println!("{} {}", style("✗").red(), message);
    }
}

fn print_stats(scheduler: &Scheduler) {
    let stats = scheduler.stats();
    println!(
        "  {} completed, {} failed attempts, {} dropped",
        style(stats.completed).green(),
        stats.failed_attempts,
        if stats.dropped > 0 {
            style(stats.dropped).red().to_string()
        } else {
            stats.dropped.to_string()
        }
    );
    for failure in &stats.recent_failures {
        println!(
            "    {} {} after {} attempts: {}",
            style("✗").red(),
            failure.task,
            failure.attempts,
            failure.error
        );
    }
}
