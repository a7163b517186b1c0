//! Learning Factory hub entry point.
//!
//! Loads the configuration, builds one [`Hub`], and runs the TCP listener and
//! every configured egress link until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()            -- TOML file or defaults
//!  └─ Hub::new() + start()     -- dispatch workers, idle reaper
//!  └─ spawn
//!       ├─ tcp_server::serve   (accept loop, one task per connection)
//!       └─ egress::run_egress_link  (one task per [[egress]] target)
//! ```
//!
//! # Usage
//!
//! ```text
//! lf-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>          Config file [env: LF_SERVER_CONFIG]
//!   --bind <ADDR>            Override network.bind_address [env: LF_BIND]
//!   --port <PORT>            Override network.port [env: LF_PORT]
//!   --print-default-config   Print the default TOML and exit
//!   --init-config            Write the default TOML to the config path and exit
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lf_server::application::hub::Hub;
use lf_server::infrastructure::network::{egress, tcp_server};
use lf_server::infrastructure::storage::config::{load_config, save_config, ServerConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Learning Factory hub server.
#[derive(Debug, Parser)]
#[command(name = "lf-server", about = "Learning Factory message hub", version)]
struct Cli {
    /// Path to the TOML config file.  Defaults to the platform config dir.
    #[arg(long, env = "LF_SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to listen on (overrides `network.bind_address`).
    #[arg(long, env = "LF_BIND")]
    bind: Option<String>,

    /// TCP port to listen on (overrides `network.port`).
    #[arg(long, env = "LF_PORT")]
    port: Option<u16>,

    /// Print the default configuration as TOML and exit.
    #[arg(long)]
    print_default_config: bool,

    /// Write the default configuration to the config path and exit.
    #[arg(long, conflicts_with = "print_default_config")]
    init_config: bool,
}

impl Cli {
    /// Applies the CLI overrides and resolves the listen address.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address is not a valid IP address.
    fn listen_addr(&self, config: &mut ServerConfig) -> anyhow::Result<SocketAddr> {
        if let Some(bind) = &self.bind {
            config.network.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        let raw = format!("{}:{}", config.network.bind_address, config.network.port);
        raw.parse()
            .with_context(|| format!("invalid listen address: '{raw}'"))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_default_config {
        print!("{}", toml::to_string_pretty(&ServerConfig::default())?);
        return Ok(());
    }
    if cli.init_config {
        save_config(&ServerConfig::default(), cli.config.as_deref()).context("failed to write configuration")?;
        println!("default configuration written");
        return Ok(());
    }

    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    let addr = cli.listen_addr(&mut config)?;
    info!("Learning Factory hub starting on {addr}");

    let hub = Hub::new(config.to_hub_config(), config.build_policy());
    hub.start();

    let running = Arc::new(AtomicBool::new(true));

    // ── TCP listener ──────────────────────────────────────────────────────────
    let listener = tcp_server::bind(addr).await?;
    let server = tokio::spawn(tcp_server::serve(listener, hub.clone(), Arc::clone(&running)));

    // ── Egress links ──────────────────────────────────────────────────────────
    let links: Vec<_> = config
        .egress
        .iter()
        .cloned()
        .map(|target| {
            info!(identity = %target.identity, address = %target.address, "starting egress link");
            tokio::spawn(egress::run_egress_link(target, hub.clone(), Arc::clone(&running)))
        })
        .collect();

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

    info!("hub ready.  Press Ctrl-C to exit.");
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    hub.shutdown().await;
    if let Err(e) = server.await {
        error!("accept loop panicked: {e}");
    }
    for link in links {
        if let Err(e) = link.await {
            error!("egress link panicked: {e}");
        }
    }

    info!("Learning Factory hub stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
