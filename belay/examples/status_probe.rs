//! Connect to the configured endpoints and print the live congestion snapshot
//! and routing table. Endpoints come from `BELAY_RPC_ENDPOINTS` (defaults to
//! devnet).
//!
//!   cargo run --example status_probe

use std::time::Duration;

use belay::{Belay, BelayConfig};
use profile::ProfileTable;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let belay = Belay::connect(BelayConfig::from_env(), ProfileTable::builtin());

    // Let the background loops take their first samples.
    tokio::time::sleep(Duration::from_secs(12)).await;

    let congestion = belay.current_congestion();
    println!(
        "congestion: {:?} ({:.0}%) avg slot time {:.3}s: {}",
        congestion.status,
        congestion.percentage,
        congestion.average_slot_time,
        congestion.recommendation
    );

    for h in belay.endpoint_health().iter() {
        println!(
            "endpoint {:<12} priority {} status {:?} latency {:?}ms",
            h.name, h.priority, h.status, h.latency_ms
        );
    }

    belay.shutdown();
    Ok(())
}
