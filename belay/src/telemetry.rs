//! Network telemetry collector.
//!
//! Responsibilities:
//! - Poll recent block-production performance samples from the primary gateway
//! - Derive a 0-100 congestion percentage, a status bucket, and a short-horizon
//!   trend prediction
//! - Keep the latest snapshot available process-wide via an atomic Arc swap,
//!   refreshed on a fixed interval independent of submission traffic
//!
//! Poll failures degrade to a documented conservative fallback snapshot rather
//! than propagating: callers are guaranteed a snapshot at all times.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gateway::{PerfSample, RpcGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CongestionStatus {
    Low,
    Medium,
    High,
    Critical,
}

impl CongestionStatus {
    /// Bucket thresholds at 20/50/80, upper-bucket-inclusive: a percentage of
    /// exactly 20 is MEDIUM, 50 is HIGH, 80 is CRITICAL.
    pub fn from_percentage(pct: f64) -> Self {
        if pct < 20.0 {
            CongestionStatus::Low
        } else if pct < 50.0 {
            CongestionStatus::Medium
        } else if pct < 80.0 {
            CongestionStatus::High
        } else {
            CongestionStatus::Critical
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongestionSnapshot {
    pub status: CongestionStatus,
    /// Congestion score in [0, 100], rounded.
    pub percentage: f64,
    /// Mean per-slot time across the sampled window, seconds.
    pub average_slot_time: f64,
    /// Predicted minutes until conditions change meaningfully.
    pub predicted_window_minutes: u8,
    /// Confidence in the trend prediction, 0-100.
    pub confidence: u8,
    pub recommendation: String,
    pub timestamp: DateTime<Utc>,
}

impl CongestionSnapshot {
    /// Conservative snapshot used whenever the network gives us nothing.
    pub fn fallback() -> Self {
        Self {
            status: CongestionStatus::Medium,
            percentage: 50.0,
            average_slot_time: 0.5,
            predicted_window_minutes: 5,
            confidence: 50,
            recommendation: "Unable to determine network status. Proceed with caution."
                .to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("no performance samples available")]
    Unavailable,
    #[error("performance sample fetch failed: {0}")]
    Fetch(String),
}

/// Knobs for congestion derivation and background refresh.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// How many recent samples to fetch per poll.
    pub sample_size: usize,
    /// Background refresh cadence.
    pub poll_interval: Duration,
    /// Per-slot time mapped to 0% congestion, seconds.
    pub lower_bound_secs: f64,
    /// Per-slot time mapped to 100% congestion, seconds.
    pub upper_bound_secs: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sample_size: 20,
            poll_interval: Duration::from_secs(10),
            lower_bound_secs: 0.4,
            upper_bound_secs: 1.0,
        }
    }
}

pub struct TelemetryCollector {
    gateway: Arc<dyn RpcGateway>,
    cfg: TelemetryConfig,
    current: RwLock<Arc<CongestionSnapshot>>,
}

impl TelemetryCollector {
    pub fn new(gateway: Arc<dyn RpcGateway>, cfg: TelemetryConfig) -> Self {
        Self {
            gateway,
            cfg,
            current: RwLock::new(Arc::new(CongestionSnapshot::fallback())),
        }
    }

    /// Latest snapshot; never blocks on the network. Before the first
    /// successful poll this is the fallback snapshot.
    pub fn current(&self) -> Arc<CongestionSnapshot> {
        self.current.read().expect("congestion cache lock").clone()
    }

    /// Fetch samples and derive a fresh snapshot. Errors when the network
    /// returns nothing usable; `refresh` is the degrading wrapper.
    pub async fn poll(&self) -> Result<CongestionSnapshot, TelemetryError> {
        let samples = self
            .gateway
            .performance_samples(self.cfg.sample_size)
            .await
            .map_err(|e| TelemetryError::Fetch(format!("{e:#}")))?;
        if samples.is_empty() {
            return Err(TelemetryError::Unavailable);
        }
        Ok(self.derive(&samples))
    }

    /// Poll and swap the shared snapshot, falling back on failure.
    pub async fn refresh(&self) {
        let snapshot = match self.poll().await {
            Ok(s) => {
                debug!(
                    target: "telemetry",
                    status = ?s.status,
                    percentage = s.percentage,
                    avg_slot_time = s.average_slot_time,
                    "congestion refreshed"
                );
                s
            }
            Err(err) => {
                warn!(target: "telemetry", "congestion poll failed, using fallback: {err}");
                CongestionSnapshot::fallback()
            }
        };
        *self.current.write().expect("congestion cache lock") = Arc::new(snapshot);
    }

    /// Background refresh loop; runs until the token is cancelled.
    pub fn spawn_refresh(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.cfg.poll_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => this.refresh().await,
                }
            }
        })
    }

    fn derive(&self, samples: &[PerfSample]) -> CongestionSnapshot {
        let avg_slot_time =
            samples.iter().map(|s| s.slot_time_secs).sum::<f64>() / samples.len() as f64;

        let span = self.cfg.upper_bound_secs - self.cfg.lower_bound_secs;
        let percentage = (((avg_slot_time - self.cfg.lower_bound_secs) / span) * 100.0)
            .clamp(0.0, 100.0)
            .round();
        let status = CongestionStatus::from_percentage(percentage);

        // Trend over the newest five samples (samples arrive newest first):
        // slots getting slower means conditions are worsening.
        let recent = &samples[..samples.len().min(5)];
        let worsening = recent[0].slot_time_secs > recent[recent.len() - 1].slot_time_secs;
        let (predicted_window_minutes, confidence) = if worsening { (3, 75) } else { (5, 85) };

        let recommendation = match status {
            CongestionStatus::Low => "Optimal time to submit transactions".to_string(),
            CongestionStatus::Medium => {
                "Network slightly congested. Increase priority fee slightly.".to_string()
            }
            CongestionStatus::High => format!(
                "High congestion. Consider waiting {predicted_window_minutes} minutes or increase fees by 2x."
            ),
            CongestionStatus::Critical => {
                "Critical congestion. Wait for network to calm down.".to_string()
            }
        };

        CongestionSnapshot {
            status,
            percentage,
            average_slot_time: avg_slot_time,
            predicted_window_minutes,
            confidence,
            recommendation,
            timestamp: Utc::now(),
        }
    }
}
