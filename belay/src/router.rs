//! Endpoint health router.
//!
//! Responsibilities:
//! - Hold the candidate gateway endpoints with their priority ranks
//! - Probe liveness/latency on a fixed interval, independent of submission
//!   traffic, driving each endpoint's UNKNOWN -> HEALTHY <-> UNHEALTHY state
//! - Select the best endpoint for token fetches and fan a submission across
//!   candidates in ascending priority order, moving on at the first error
//!
//! The health table is rebuilt whole and swapped atomically so the many
//! concurrent readers on the submission path never observe a partially
//! updated entry. Per-attempt retries are the retry engine's job, not ours:
//! one routing pass tries each eligible endpoint at most once.

use std::env;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gateway::{RpcGateway, SolanaGateway};

/// One candidate gateway endpoint. Lower `priority` is preferred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub name: String,
    pub url: String,
    pub priority: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointStatus {
    /// Not yet probed; eligible for traffic until proven otherwise.
    Unknown,
    Healthy,
    Unhealthy,
}

/// Routing-table entry, refreshed only by the probe loop.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    pub name: String,
    pub url: String,
    pub status: EndpointStatus,
    pub latency_ms: Option<u64>,
    pub priority: u32,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Accepted submission: which endpoint took it, and its gateway handle so
/// confirmation can be awaited against the same endpoint.
#[derive(Clone)]
pub struct Submission {
    pub signature: Signature,
    pub endpoint: String,
    pub gateway: Arc<dyn RpcGateway>,
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no healthy endpoint available")]
    NoHealthyEndpoint,
    #[error("all endpoints failed, last error: {0}")]
    AllEndpointsFailed(String),
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub endpoints: Vec<EndpointSpec>,
    /// Probe cadence for the background health loop.
    pub probe_interval: Duration,
    /// Hard timeout on a single liveness probe.
    pub probe_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![EndpointSpec {
                name: "default".to_string(),
                url: "https://api.devnet.solana.com".to_string(),
                priority: 1,
            }],
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

impl RouterConfig {
    /// `BELAY_RPC_ENDPOINTS` is a comma-separated `name=url` list in priority
    /// order, e.g. `helius=https://...,default=https://api.devnet.solana.com`.
    /// Unset or empty keeps the default endpoint set.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(raw) = env::var("BELAY_RPC_ENDPOINTS") {
            let endpoints: Vec<EndpointSpec> = raw
                .split(',')
                .filter_map(|pair| {
                    let (name, url) = pair.split_once('=')?;
                    Some((name.trim().to_string(), url.trim().to_string()))
                })
                .enumerate()
                .map(|(i, (name, url))| EndpointSpec {
                    name,
                    url,
                    priority: i as u32 + 1,
                })
                .collect();
            if !endpoints.is_empty() {
                cfg.endpoints = endpoints;
            }
        }
        cfg
    }
}

struct Candidate {
    spec: EndpointSpec,
    gateway: Arc<dyn RpcGateway>,
}

pub struct EndpointRouter {
    /// Sorted by ascending priority at construction.
    candidates: Vec<Candidate>,
    health: RwLock<Arc<Vec<EndpointHealth>>>,
    cfg: RouterConfig,
}

impl EndpointRouter {
    /// Build RPC gateways for every configured endpoint.
    pub fn connect(cfg: RouterConfig) -> Self {
        let gateways = cfg
            .endpoints
            .iter()
            .map(|spec| {
                (
                    spec.clone(),
                    Arc::new(SolanaGateway::new(spec.url.clone())) as Arc<dyn RpcGateway>,
                )
            })
            .collect();
        Self::with_gateways(gateways, cfg)
    }

    /// Injectable-gateway constructor, used by tests and embedders.
    pub fn with_gateways(
        endpoints: Vec<(EndpointSpec, Arc<dyn RpcGateway>)>,
        cfg: RouterConfig,
    ) -> Self {
        let mut candidates: Vec<Candidate> = endpoints
            .into_iter()
            .map(|(spec, gateway)| Candidate { spec, gateway })
            .collect();
        candidates.sort_by_key(|c| c.spec.priority);
        let initial: Vec<EndpointHealth> = candidates
            .iter()
            .map(|c| EndpointHealth {
                name: c.spec.name.clone(),
                url: c.spec.url.clone(),
                status: EndpointStatus::Unknown,
                latency_ms: None,
                priority: c.spec.priority,
                last_checked: None,
            })
            .collect();
        Self {
            candidates,
            health: RwLock::new(Arc::new(initial)),
            cfg,
        }
    }

    /// Current routing table snapshot (observability query).
    pub fn health(&self) -> Arc<Vec<EndpointHealth>> {
        self.health.read().expect("health table lock").clone()
    }

    /// Probe every candidate once and swap in a fresh table.
    pub async fn probe_all(&self) {
        let mut table = Vec::with_capacity(self.candidates.len());
        for c in &self.candidates {
            let started = Instant::now();
            let probe = tokio::time::timeout(self.cfg.probe_timeout, c.gateway.slot()).await;
            let (status, latency_ms) = match probe {
                Ok(Ok(_)) => (
                    EndpointStatus::Healthy,
                    Some(started.elapsed().as_millis() as u64),
                ),
                Ok(Err(err)) => {
                    warn!(target: "router", endpoint = %c.spec.name, "probe failed: {err:#}");
                    (EndpointStatus::Unhealthy, None)
                }
                Err(_) => {
                    warn!(target: "router", endpoint = %c.spec.name, "probe timed out");
                    (EndpointStatus::Unhealthy, None)
                }
            };
            table.push(EndpointHealth {
                name: c.spec.name.clone(),
                url: c.spec.url.clone(),
                status,
                latency_ms,
                priority: c.spec.priority,
                last_checked: Some(Utc::now()),
            });
        }
        *self.health.write().expect("health table lock") = Arc::new(table);
    }

    /// Background probe loop; runs until the token is cancelled.
    pub fn spawn_refresh(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.cfg.probe_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => this.probe_all().await,
                }
            }
        })
    }

    fn eligible_indices(&self) -> Vec<usize> {
        let table = self.health();
        // candidates and table share ordering (both priority-ascending)
        let healthy: Vec<usize> = table
            .iter()
            .enumerate()
            .filter(|(_, h)| h.status == EndpointStatus::Healthy)
            .map(|(i, _)| i)
            .collect();
        if !healthy.is_empty() {
            return healthy;
        }
        // Before the first probe completes, unknown endpoints carry traffic.
        table
            .iter()
            .enumerate()
            .filter(|(_, h)| h.status == EndpointStatus::Unknown)
            .map(|(i, _)| i)
            .collect()
    }

    /// Best endpoint for token fetches: lowest priority rank among healthy
    /// candidates, falling back to unprobed ones.
    pub fn select(&self) -> Result<(String, Arc<dyn RpcGateway>), RouterError> {
        let idx = *self
            .eligible_indices()
            .first()
            .ok_or(RouterError::NoHealthyEndpoint)?;
        let c = &self.candidates[idx];
        Ok((c.spec.name.clone(), c.gateway.clone()))
    }

    /// Submit through eligible candidates in ascending priority order,
    /// returning on the first acceptance. Eligible means healthy, or unprobed
    /// when no candidate is healthy yet. Any endpoint error moves straight to
    /// the next candidate; retrying a given endpoint is the retry engine's
    /// decision.
    pub async fn submit(&self, tx: &Transaction) -> Result<Submission, RouterError> {
        let eligible = self.eligible_indices();
        if eligible.is_empty() {
            return Err(RouterError::NoHealthyEndpoint);
        }
        let mut last_error = String::new();
        for idx in eligible {
            let c = &self.candidates[idx];
            match c.gateway.send_transaction(tx).await {
                Ok(sig) => {
                    debug!(target: "router", endpoint = %c.spec.name, signature = %sig, "submission accepted");
                    return Ok(Submission {
                        signature: sig,
                        endpoint: c.spec.name.clone(),
                        gateway: c.gateway.clone(),
                    });
                }
                Err(err) => {
                    warn!(target: "router", endpoint = %c.spec.name, "submission failed: {err:#}");
                    last_error = format!("{err:#}");
                }
            }
        }
        Err(RouterError::AllEndpointsFailed(last_error))
    }
}
