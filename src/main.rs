//! Session Guard
//!
//! A session-keeping HTTP client built with Tokio and reqwest.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌───────────────────────────────────────────────────────┐
//!                     │                    SESSION GUARD                      │
//!                     │                                                       │
//!     Caller          │  ┌──────────┐    ┌───────────┐    ┌──────────────┐    │
//!     ────────────────┼─▶│ pipeline │───▶│ transport │───▶│   backend    │────┼──── API
//!                     │  └────┬─────┘    └───────────┘    └──────────────┘    │
//!                     │       │ failure                                       │
//!                     │       ▼                                               │
//!                     │  ┌─────────────┐   401   ┌─────────────────────────┐  │
//!                     │  │  endpoints  │────────▶│  refresh coordinator    │  │
//!                     │  │  classifier │         │  breaker → retry → call │  │
//!                     │  └──────┬──────┘         │  queue → replay         │  │
//!                     │         │ transient      └───────────┬─────────────┘  │
//!                     │         ▼                            │ broadcast      │
//!                     │  ┌─────────────┐              ┌──────▼──────┐         │
//!                     │  │ retry policy│              │  notifier   │◀────────┼──── Other
//!                     │  └─────────────┘              └─────────────┘         │     participants
//!                     │                                                       │
//!                     │  ┌─────────────────────────────────────────────────┐  │
//!                     │  │  config │ observability │ lifecycle             │  │
//!                     │  └─────────────────────────────────────────────────┘  │
//!                     └───────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use futures_util::future::join_all;
use reqwest::Method;

use session_guard::config::{load_config, GuardConfig};
use session_guard::http::{ApiRequest, Priority};
use session_guard::lifecycle::signals::shutdown_signal;
use session_guard::observability::{logging, metrics};
use session_guard::SessionClient;

#[derive(Parser)]
#[command(name = "session-guard")]
#[command(about = "Issue requests through a session-keeping HTTP client", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "SESSION_GUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Override transport.base_url
    #[arg(short, long, env = "SESSION_GUARD_BASE_URL")]
    base_url: Option<String>,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request path, relative to the base URL
    path: String,

    /// JSON request body
    #[arg(short, long)]
    data: Option<String>,

    /// Queue priority while a refresh is pending
    #[arg(short, long, default_value = "normal")]
    priority: Priority,

    /// Number of identical requests issued concurrently
    #[arg(short = 'n', long, default_value_t = 1)]
    concurrency: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };
    if let Some(base_url) = cli.base_url {
        config.transport.base_url = base_url;
    }

    logging::init_logging(&config.observability);
    tracing::info!("session-guard v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let method = Method::from_str(&cli.method.to_ascii_uppercase())?;
    let mut template = ApiRequest::new(method, cli.path).with_priority(cli.priority);
    if let Some(data) = cli.data {
        let value: serde_json::Value = serde_json::from_str(&data)?;
        template = template.with_json(&value)?;
    }

    let client = SessionClient::from_config(&config)?;

    tracing::info!(
        base_url = %config.transport.base_url,
        method = %template.method,
        path = %template.path,
        concurrency = cli.concurrency,
        "Sending requests"
    );

    let requests = (0..cli.concurrency.max(1)).map(|_| {
        let client = client.clone();
        let request = ApiRequest {
            id: Default::default(),
            ..template.clone()
        };
        async move { client.send(request).await }
    });

    let results = tokio::select! {
        results = join_all(requests) => results,
        _ = shutdown_signal() => {
            client.shutdown();
            return Ok(());
        }
    };

    let mut failed = 0;
    for result in results {
        match result {
            Ok(response) => println!("{} {}", response.status, response.text()),
            Err(e) => {
                failed += 1;
                eprintln!("error ({}): {}", e.kind(), e);
            }
        }
    }

    client.shutdown();
    tracing::info!(failed, "Shutdown complete");

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
