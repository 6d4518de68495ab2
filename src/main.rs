//! Intent Host scenario runner
//!
//! Usage: `intent-host <scenario.json>` (or set `INTENT_HOST_SCENARIO`).
//! Prints the final snapshot of every key as JSON on stdout.

use intent_host::scenario::Scenario;
use intent_host::HostConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "intent_host=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let Some(path) = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("INTENT_HOST_SCENARIO").ok())
        .map(PathBuf::from)
    else {
        return Err("usage: intent-host <scenario.json> (or set INTENT_HOST_SCENARIO)".into());
    };

    let config = HostConfig::from_env();
    tracing::info!(path = %path.display(), ?config, "Loading scenario");
    let scenario = Scenario::load(&path)?;

    let report = scenario.run(config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
