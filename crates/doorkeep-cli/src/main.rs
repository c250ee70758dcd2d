//! doorkeepd - door access daemon.
//!
//! Wires the two lock controllers, the status board, the roster poller and
//! the presence tracker together, then runs until SIGINT, SIGTERM or
//! SIGQUIT.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use doorkeep_access::{
    AccessPolicy, JsonFileRoster, LogNotifier, MemoryOtpStore, MemoryPresence, Notifier,
    RosterSync,
};
use doorkeep_controller::{LockContext, LockController, SerialOpener, StatusController};
use doorkeep_core::{Door, FacilityState};
use doorkeep_runtime::{Cancelled, Dispatcher, Supervisor, wait_for_shutdown_signal};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

#[derive(Parser, Debug)]
#[command(name = "doorkeepd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of RUST_LOG
    #[arg(short, long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);
    let config = DaemonConfig::load(args.config.as_deref())?;
    info!(version = doorkeep_core::VERSION, "Starting doorkeepd");

    let facility = Arc::new(FacilityState::new());
    let dispatcher = Dispatcher::new();
    let dispatcher_task = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.run().await })
    };

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let otp = Arc::new(MemoryOtpStore::new());
    let now = Utc::now();
    for seed in config.otp.iter().filter(|seed| now <= seed.expires_at) {
        otp.insert(seed.secret.clone(), seed.expires_at);
    }
    let presence = MemoryPresence::new(
        config.presence,
        Arc::clone(&facility),
        Arc::clone(&notifier),
        dispatcher.clone(),
    );
    presence.start_sweep();
    let policy = Arc::new(AccessPolicy::new(config.policy.clone(), otp));

    let mut supervisor = Supervisor::new(Duration::from_secs(config.shutdown_grace_secs));

    let bell = match &config.status_port {
        Some(port) => {
            let worker = supervisor.worker("status");
            let controller = StatusController::new(
                SerialOpener::new(config.port_path(port)),
                config.status.clone(),
                facility.subscribe(),
                worker.clone(),
            );
            let handle = controller.handle();
            supervisor.spawn(worker, controller.run());
            Some(handle)
        }
        None => {
            info!("No status board configured");
            None
        }
    };

    let ctx = LockContext {
        facility: Arc::clone(&facility),
        policy,
        presence,
        notifier,
        bell,
    };
    let mut roster = RosterSync::new(
        JsonFileRoster::new(&config.roster_path),
        Arc::clone(&facility),
        dispatcher.clone(),
    );
    for door in Door::ALL {
        let worker = supervisor.worker(door.port_name());
        let controller = LockController::new(
            door,
            SerialOpener::new(config.port_path(door.port_name())),
            config.lock.clone(),
            ctx.clone(),
            worker.clone(),
        );
        roster.add_sink(door, Arc::new(controller.handle()));
        supervisor.spawn(worker, controller.run());
    }

    let worker = supervisor.worker("roster");
    let period = config.roster_poll_secs;
    supervisor.spawn(worker.clone(), async move {
        if roster.run(worker, period).await.is_err() {
            debug!("Roster poller cancelled");
        }
        Ok::<(), Cancelled>(())
    });

    if let Err(e) = wait_for_shutdown_signal().await {
        warn!(error = %e, "Signal handling failed, shutting down");
    }

    dispatcher.shutdown();
    let stuck = supervisor.shutdown().await;
    if !stuck.is_empty() {
        warn!(?stuck, "Abandoned workers");
    }
    let grace = Duration::from_secs(config.shutdown_grace_secs);
    if tokio::time::timeout(grace, dispatcher_task).await.is_err() {
        warn!("Dispatcher did not drain in time");
    }
    info!("doorkeepd stopped");
    Ok(())
}
