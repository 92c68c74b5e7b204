//! dev-gateway
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌──────────────────────────────────────────────────┐
//!                          │                   DEV GATEWAY                    │
//!                          │                                                  │
//!     Browser (HTTPS)      │  ┌──────────┐   ┌─────────┐   ┌──────────────┐   │
//!     ─────────────────────┼─▶│   net    │──▶│  http   │──▶│   routing    │   │
//!                          │  │ listener │   │dispatch │   │  classifier  │   │
//!                          │  │  + tls   │   └─────────┘   └──────┬───────┘   │
//!                          │  └──────────┘                        │           │
//!                          │                         Proxy ┌──────┴─────┐     │
//!                          │                       ┌───────┘            │     │
//!                          │                       ▼          LocalServe ▼     │
//!                          │               ┌──────────────┐   ┌────────────┐  │
//!     Backend API  ◀───────┼───────────────│    proxy     │   │   build    │  │
//!                          │               │  forwarder   │   │  adapter   │  │
//!                          │               └──────────────┘   └─────┬──────┘  │
//!                          │                                        │ rebuilt │
//!                          │                                  ┌─────▼──────┐  │
//!     Browser (SSE)  ◀─────┼──────────────────────────────────│    live    │  │
//!                          │                                  │    hub     │  │
//!                          │                                  └────────────┘  │
//!                          │  config · error · lifecycle · observability      │
//!                          └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use dev_gateway::config::{load_with_overrides, ConfigOverrides, GatewayConfig};
use dev_gateway::lifecycle::spawn_signal_handler;
use dev_gateway::net::Listener;
use dev_gateway::observability::{init_logging, init_metrics};
use dev_gateway::{GatewayServer, Shutdown, StartupError};

#[derive(Debug, Parser)]
#[command(name = "dev-gateway", version, about = "TLS-terminating development gateway")]
struct Cli {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,

    /// Override `upstream.url`.
    #[arg(long)]
    upstream: Option<String>,

    /// Serve plain HTTP instead of TLS.
    #[arg(long)]
    plaintext: bool,

    /// Validate configuration and TLS material, then exit.
    #[arg(long)]
    check: bool,
}

impl Cli {
    fn load(&self) -> Result<GatewayConfig, StartupError> {
        let overrides = ConfigOverrides {
            bind_address: self.bind.clone(),
            upstream_url: self.upstream.clone(),
            plaintext: self.plaintext,
        };
        Ok(load_with_overrides(self.config.as_deref(), &overrides)?)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("dev-gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dev-gateway starting");

    match run(cli.check, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Gateway failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(check: bool, config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let listener_config = config.listener.clone();
    let observability = config.observability.clone();

    // Every check happens here, before any port is opened.
    let server = GatewayServer::new(config).await?;
    if check {
        tracing::info!("Configuration OK");
        return Ok(());
    }

    if observability.metrics_enabled {
        match observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::warn!(error = %e, "Metrics exporter disabled");
                }
            }
            Err(_) => tracing::warn!(
                metrics_address = %observability.metrics_address,
                "Invalid metrics address, exporter disabled"
            ),
        }
    }

    let listener = Listener::bind(&listener_config).await?;

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
