//! netpulse collector agent binary.
//!
//! Delivers a collected batch (a JSON array of entries, read from a file
//! argument or stdin) to the configured upload endpoint, replaying any
//! spooled batches from earlier failed cycles first.
//!
//! Environment variables:
//! - `NETPULSE_UPLOAD_URL`: upload endpoint (default: "http://localhost:8080/upload")
//! - `NETPULSE_SPOOL_DIR`: spool directory (default: "netpulse-spool")

use std::io::Read;

use netpulse::collector::{Agent, DeliveryReport, HttpTransport, SpoolBuffer};
use netpulse::db::MetricBatchEntry;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("netpulse=info".parse()?),
        )
        .init();

    let endpoint = std::env::var("NETPULSE_UPLOAD_URL")
        .unwrap_or_else(|_| "http://localhost:8080/upload".to_string());
    let spool_dir =
        std::env::var("NETPULSE_SPOOL_DIR").unwrap_or_else(|_| "netpulse-spool".to_string());

    let raw = match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let batch: Vec<MetricBatchEntry> = serde_json::from_str(&raw)?;

    let agent = Agent::new(HttpTransport::new(endpoint), SpoolBuffer::new(spool_dir)?);
    match agent.deliver(&batch).await? {
        DeliveryReport::Delivered => tracing::info!("batch delivered"),
        DeliveryReport::AlreadyDelivered => tracing::info!("batch already delivered"),
        DeliveryReport::Discarded(reason) => {
            tracing::error!(reason = %reason, "batch rejected by server, discarded");
            std::process::exit(1);
        }
        DeliveryReport::Buffered(reason) => {
            tracing::warn!(reason = %reason, "upload failed, batch spooled for next cycle");
        }
    }

    Ok(())
}
