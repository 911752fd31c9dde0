//! Binary to run the consumer-group runtime and reclaimer locally against
//! in-memory collaborators.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod demo;
mod error;

use demo::{Billing, publish_orders};
use error::Result;

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reclaim_consumer::{
    GroupRegistry, ListenerExt, ListenerRuntime, ListenerRuntimeOptions, PendingReclaimer,
    PendingReclaimerOptions, ReclaimScheduler, Settings, TrimHook, consumer_name,
};
use reclaim_locks_memory::MemoryLockManager;
use reclaim_log_memory::{MemoryStreamLog, MemoryStreamLogOptions};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON settings file; defaults apply to anything missing
    #[arg(long, env = "RECLAIM_SETTINGS_FILE")]
    settings_file: Option<PathBuf>,

    /// Host address used in the consumer name instead of the detected one
    #[arg(long, env = "RECLAIM_HOST_IP")]
    host_ip: Option<IpAddr>,

    #[arg(long, default_value = "orders")]
    stream: String,

    #[arg(long, default_value = "billing")]
    group: String,

    /// Milliseconds between published orders
    #[arg(long, default_value_t = 500)]
    publish_interval_ms: u64,

    /// Share of records the demo listener fails
    #[arg(long, default_value_t = 0.2)]
    failure_rate: f64,

    /// Idle timeout of the simulated log connection, in seconds
    #[arg(long, default_value_t = 10)]
    connection_idle_timeout_secs: u64,

    /// Periodically trim the stream to the group's pending backlog
    #[arg(long, env = "RECLAIM_TRIM")]
    trim: bool,
}

#[tokio::main(worker_threads = 4)]
async fn main() -> Result<()> {
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .finish(),
    )?;

    let args = Args::parse();

    let mut settings = match &args.settings_file {
        Some(path) => {
            info!("loading settings from: {:?}", path);
            serde_json::from_slice::<Settings>(&tokio::fs::read(path).await?)?
        }
        None => Settings::default(),
    };

    if args.host_ip.is_some() {
        settings.identity.host_ip = args.host_ip;
    }

    let consumer = consumer_name(&settings.identity)?;
    info!("running as consumer {}", consumer);

    let log = MemoryStreamLog::new(MemoryStreamLogOptions {
        connection_idle_timeout: Some(Duration::from_secs(args.connection_idle_timeout_secs)),
    });
    let locks = MemoryLockManager::new();
    let registry = GroupRegistry::new();

    // A second runtime stands in for another process of the fleet so stuck
    // records have somewhere to be claimed to.
    let mut runtimes = Vec::new();
    for name in [consumer.to_string(), format!("{consumer}-peer")] {
        let runtime = ListenerRuntime::new(ListenerRuntimeOptions {
            log: log.clone(),
            consumer: name,
            config: settings.listener.clone(),
            registry: registry.clone(),
        })?;

        runtime
            .register(
                Billing {
                    stream: args.stream.clone(),
                    group: args.group.clone(),
                    failure_rate: args.failure_rate,
                }
                .with_timeout(Duration::from_secs(5))
                .traced(),
            )
            .await?;

        runtimes.push(runtime);
    }

    let reclaimer = PendingReclaimer::new(PendingReclaimerOptions {
        log: log.clone(),
        locks: locks.clone(),
        registry: registry.clone(),
        config: settings.reclaimer.clone(),
    })?;
    let scheduler = ReclaimScheduler::new(reclaimer);
    scheduler.start()?;

    let shutdown_token = CancellationToken::new();
    let task_tracker = TaskTracker::new();

    task_tracker.spawn(publish_orders(
        log.clone(),
        args.stream.clone(),
        Duration::from_millis(args.publish_interval_ms),
        shutdown_token.clone(),
    ));

    if args.trim {
        let trim_hook = TrimHook::new(log.clone(), settings.trim.clone());
        let trim_period = settings.reclaimer.interval;
        let trim_token = shutdown_token.clone();
        let (stream, group) = (args.stream.clone(), args.group.clone());
        task_tracker.spawn(async move {
            let mut ticker = tokio::time::interval(trim_period);
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = trim_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = trim_hook.trim_group(&stream, &group).await {
                            warn!(error = %e, "trim failed");
                        }
                    }
                }
            }
        });
    }

    task_tracker.close();

    info!("running, press ctrl-c to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {:?}", e);
    }

    info!("shutting down...");

    shutdown_token.cancel();
    task_tracker.wait().await;
    scheduler.shutdown().await;

    for runtime in &runtimes {
        if let Err(e) = runtime.shutdown().await {
            error!("listener runtime did not stop cleanly: {}", e);
        }
    }

    info!("shutdown cleanly. goodbye.");

    Ok(())
}
