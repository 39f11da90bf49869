//! Tally CLI - drive simulated workers and watch the aggregate.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tally_core::TrackerConfig;
use tally_progress::{Container, ContainerSnapshot, LeafTracker};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Concurrent progress tracking demo", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run workers under one container and poll its snapshot
    Run {
        #[command(flatten)]
        workload: Workload,
        /// Poll interval in milliseconds
        #[arg(long, default_value = "100")]
        poll_ms: u64,
        /// Fail the first worker halfway through
        #[arg(long)]
        fail_one: bool,
        /// Print the final snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run sequential stages, each mirrored into an overall container
    Stages {
        /// Number of stages
        #[arg(long, default_value = "3")]
        stages: usize,
        #[command(flatten)]
        workload: Workload,
    },
}

#[derive(clap::Args, Clone, Copy)]
struct Workload {
    /// Number of concurrent workers
    #[arg(long, default_value = "4")]
    workers: usize,
    /// Units of work per worker
    #[arg(long, default_value = "50")]
    units: u64,
    /// Delay between units in milliseconds
    #[arg(long, default_value = "20")]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workload,
            poll_ms,
            fail_one,
            json,
        } => {
            anyhow::ensure!(workload.workers > 0, "at least one worker is required");
            let container = Container::new("run");
            let workers = spawn_workers(&container, workload, fail_one);

            let last = poll_until_finished(&container, Duration::from_millis(poll_ms)).await;
            for worker in workers {
                worker.await.context("worker task panicked")?;
            }

            for (key, child) in container.children() {
                info!("{}: {}", key, child);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&last)?);
            }
        }
        Commands::Stages { stages, workload } => {
            anyhow::ensure!(workload.workers > 0, "at least one worker is required");
            let overall = Container::new("pipeline");
            let mirrors: Vec<LeafTracker> = (0..stages)
                .map(|i| {
                    overall.create_child(
                        format!("stage-{i}"),
                        TrackerConfig::new(format!("Stage {i}")),
                    )
                })
                .collect();

            for (i, mirror) in mirrors.iter().enumerate() {
                let stage = Container::new(format!("stage-{i}"));
                let follower = tokio::spawn(mirror_into(stage.clone(), mirror.clone()));

                let workers = spawn_workers(&stage, workload, false);
                for worker in workers {
                    worker.await.context("worker task panicked")?;
                }
                follower.await.context("mirror task panicked")?;
                info!("{}", overall.snapshot());
            }
        }
    }

    Ok(())
}

/// One tokio task per worker, each owning a child tracker.
///
/// Every child is registered before any worker starts, so the container
/// cannot report finished while workers are still being added.
fn spawn_workers(
    container: &Container,
    workload: Workload,
    fail_one: bool,
) -> Vec<tokio::task::JoinHandle<()>> {
    let trackers: Vec<LeafTracker> = (0..workload.workers)
        .map(|i| {
            container.create_child(
                format!("worker-{i}"),
                TrackerConfig::new(format!("Worker {i}"))
                    .with_total(workload.units as f64)
                    .with_unit("items"),
            )
        })
        .collect();

    trackers
        .into_iter()
        .enumerate()
        .map(|(i, tracker)| {
            let fail_at = (fail_one && i == 0).then_some(workload.units / 2);
            tokio::spawn(run_worker(tracker, workload, fail_at))
        })
        .collect()
}

async fn run_worker(tracker: LeafTracker, workload: Workload, fail_at: Option<u64>) {
    let tick = Duration::from_millis(workload.tick_ms);
    let outcome = tracker
        .scope_async(|t| async move {
            for step in 0..workload.units {
                if Some(step) == fail_at {
                    return Err(format!("simulated failure at item {step}"));
                }
                tokio::time::sleep(tick).await;
                t.advance(1.0).map_err(|e| e.to_string())?;
            }
            Ok(())
        })
        .await;

    if let Err(reason) = outcome {
        warn!("{} stopped: {}", tracker.title(), reason);
    }
}

/// Poll `container` until every child is finished, logging each snapshot.
async fn poll_until_finished(container: &Container, every: Duration) -> ContainerSnapshot {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let snapshot = container.recompute();
        info!("{}", snapshot);
        if snapshot.finished {
            return snapshot;
        }
    }
}

/// Feed a stage container's aggregate into a single tracker of a higher level.
async fn mirror_into(stage: Container, mirror: LeafTracker) {
    let mut updates = stage.subscribe();
    mirror.start();
    loop {
        let snapshot = updates.borrow_and_update().clone();
        if let Err(err) = mirror.set_progress(snapshot.completed, snapshot.total) {
            warn!("Cannot mirror '{}': {}", stage.title(), err);
        }
        if snapshot.finished {
            mirror.complete();
            return;
        }
        if updates.changed().await.is_err() {
            mirror.fail("stage dropped");
            return;
        }
    }
}
