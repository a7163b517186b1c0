//! Machine interface runtime entry point.
//!
//! Reads the `[[machines]]` list, opens one hub connection per machine and
//! publishes each machine's telemetry until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()
//!  └─ for each [[machines]] entry
//!       ├─ HubConnection::start()          (reconnect loop, event channel)
//!       ├─ log_events()                    (drains the event channel)
//!       └─ PublishTelemetryUseCase::run()  (poll → publish every interval)
//! ```
//!
//! # Usage
//!
//! ```text
//! lf-machine [OPTIONS]
//!
//! Options:
//!   --config <PATH>   Config file [env: LF_MACHINE_CONFIG] [default: lf-machine.toml]
//!   --hub <ADDR>      Override hub.address [env: LF_HUB]
//! ```

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lf_machine::application::publish_telemetry::{PublishTelemetryUseCase, TelemetryPublisher};
use lf_machine::infrastructure::machines::SimulatedMachine;
use lf_machine::infrastructure::network::{HubConnection, HubEvent};
use lf_machine::infrastructure::storage::config::{load_config, MachineRuntimeConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "lf-machine", about = "Learning Factory machine interface runtime", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "LF_MACHINE_CONFIG", default_value = "lf-machine.toml")]
    config: PathBuf,

    /// Hub address as `host:port` (overrides `hub.address`).
    #[arg(long, env = "LF_HUB")]
    hub: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut MachineRuntimeConfig) {
        if let Some(hub) = &self.hub {
            config.hub.address = hub.clone();
        }
    }
}

async fn log_events(identity: String, mut events: mpsc::Receiver<HubEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            HubEvent::Admitted { connection_id } => info!(%identity, %connection_id, "admitted by hub"),
            HubEvent::Rejected { reason } => warn!(%identity, "hub rejected the machine: {reason}"),
            HubEvent::Acked { .. } => {}
            HubEvent::Error(e) => warn!(%identity, code = ?e.code, "hub error: {}", e.description),
            HubEvent::Disconnected { reason } => info!(%identity, ?reason, "hub session ended"),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    cli.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.runtime.log_level)),
        )
        .init();

    if config.machines.is_empty() {
        anyhow::bail!("no machines configured in {}", cli.config.display());
    }
    info!(hub = %config.hub.address, machines = config.machines.len(), "machine runtime starting");

    let running = Arc::new(AtomicBool::new(true));
    let mut connections = Vec::new();
    let mut loops = Vec::new();

    for entry in &config.machines {
        let connection = Arc::new(HubConnection::new(config.connection_for(entry)));
        let events = Arc::clone(&connection).start(Arc::clone(&running));
        tokio::spawn(log_events(entry.name.clone(), events));

        let machine = Arc::new(SimulatedMachine::new(entry.name.clone(), entry.kind));
        let publisher: Arc<dyn TelemetryPublisher> = Arc::clone(&connection) as Arc<dyn TelemetryPublisher>;
        let use_case = PublishTelemetryUseCase::new(machine, publisher, &entry.topic)
            .with_context(|| format!("machine '{}' has no valid telemetry topic", entry.name))?;
        loops.push(tokio::spawn(use_case.run(entry.poll_interval(), Arc::clone(&running))));
        connections.push(connection);
    }

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl-C signal: {e}"),
        }
    });

    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    for connection in &connections {
        connection.disconnect().await;
    }
    for handle in loops {
        if let Err(e) = handle.await {
            error!("machine loop panicked: {e}");
        }
    }

    info!("machine runtime stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
