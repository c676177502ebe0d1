//! Retry engine and the `Belay` facade.
//!
//! Responsibilities:
//! - Drive one submission through the INIT -> ATTEMPT(n) -> SUCCESS/EXHAUSTED
//!   state machine with exponential backoff between attempts
//! - Take a fresh blockhash lease immediately before signing every attempt
//!   (never reuse a lease across attempts: stale leases are the dominant
//!   baseline failure mode)
//! - Classify each failure and let the optimizer adjust parameters for the
//!   next attempt
//! - Record an append-only attempt log and hand it to the caller on every
//!   terminal outcome, success or not
//!
//! Concurrent `send` calls are independent: the only shared state is the
//! congestion snapshot and the endpoint health table, both read-only here and
//! refreshed by the background loops the facade owns.

use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use profile::ProfileTable;
use serde::Serialize;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::classify::{classify, FailureClass, FailurePayload};
use crate::gateway::SolanaGateway;
use crate::optimizer::{OptimizationParams, Optimizer, OptimizerConfig};
use crate::router::{EndpointHealth, EndpointRouter, RouterConfig, RouterError, Submission};
use crate::telemetry::{CongestionSnapshot, TelemetryCollector, TelemetryConfig};

/// Base fee per required signature, lamports (runtime constant).
const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

/// Engine knobs. Every bound and multiplier is overridable configuration with
/// a documented default, never a hardcoded constant.
#[derive(Debug, Clone)]
pub struct BelayConfig {
    /// Attempt budget per `send` call.
    pub max_attempts: u32,
    /// First inter-attempt delay; attempt n waits `base_backoff × 2^(n-1)`.
    pub base_backoff: Duration,
    /// When false, every inter-attempt delay is `base_backoff` flat.
    pub exponential: bool,
    /// Upper bound on waiting for a submitted signature to confirm.
    pub confirm_timeout: Duration,
    /// Poll cadence while waiting for confirmation.
    pub confirm_poll: Duration,
    /// Hard timeout on a single RPC call within an attempt.
    pub rpc_timeout: Duration,
    pub optimizer: OptimizerConfig,
    pub telemetry: TelemetryConfig,
    pub router: RouterConfig,
}

impl Default for BelayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(2_000),
            exponential: true,
            confirm_timeout: Duration::from_secs(30),
            confirm_poll: Duration::from_millis(500),
            rpc_timeout: Duration::from_secs(10),
            optimizer: OptimizerConfig::default(),
            telemetry: TelemetryConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

impl BelayConfig {
    /// Environment overrides: `BELAY_MAX_ATTEMPTS`, `BELAY_BACKOFF_MS`,
    /// `BELAY_EXPONENTIAL`, plus the router's `BELAY_RPC_ENDPOINTS`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env::var("BELAY_MAX_ATTEMPTS").ok().and_then(|v| v.parse().ok()) {
            cfg.max_attempts = v;
        }
        if let Some(ms) = env::var("BELAY_BACKOFF_MS").ok().and_then(|v| v.parse().ok()) {
            cfg.base_backoff = Duration::from_millis(ms);
        }
        if let Some(v) = env::var("BELAY_EXPONENTIAL").ok().and_then(|v| v.parse().ok()) {
            cfg.exponential = v;
        }
        cfg.router = RouterConfig::from_env();
        cfg
    }

    fn backoff_after(&self, attempt: u32) -> Duration {
        if self.exponential {
            self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
        } else {
            self.base_backoff
        }
    }
}

/// The caller's unsigned transaction: payer plus instruction list. Budget and
/// fee directives are injected per attempt; the caller's instructions keep
/// their relative order.
#[derive(Debug, Clone)]
pub struct TransactionTemplate {
    pub payer: Pubkey,
    pub instructions: Vec<Instruction>,
}

#[derive(Default)]
pub struct SendOptions {
    /// Override of the configured attempt budget.
    pub max_attempts: Option<u32>,
    /// External cancellation; aborts mid-backoff or mid-confirmation-wait.
    pub cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Confirmed,
    Failed,
}

/// Append-only log entry, one per attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub params: OptimizationParams,
    pub endpoint: Option<String>,
    pub outcome: AttemptOutcome,
    pub failure_class: Option<FailureClass>,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SendReport {
    pub signature: Signature,
    pub confirmed_slot: u64,
    pub fee_paid_lamports: u64,
    pub attempts: u32,
    pub attempt_log: Vec<AttemptRecord>,
    pub elapsed: Duration,
}

/// Terminal failures. Every variant carries the attempt log: diagnosing which
/// parameter adjustment failed is the point of this layer, so callers never
/// see a bare error without history.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("all {attempts} attempts exhausted")]
    Exhausted {
        attempts: u32,
        attempt_log: Vec<AttemptRecord>,
        elapsed: Duration,
    },
    #[error("no healthy endpoint available")]
    NoHealthyEndpoint { attempt_log: Vec<AttemptRecord> },
    #[error("cancelled by caller")]
    Cancelled { attempt_log: Vec<AttemptRecord> },
}

impl SendError {
    pub fn attempt_log(&self) -> &[AttemptRecord] {
        match self {
            SendError::Exhausted { attempt_log, .. }
            | SendError::NoHealthyEndpoint { attempt_log }
            | SendError::Cancelled { attempt_log } => attempt_log,
        }
    }
}

enum AttemptResult {
    Confirmed {
        signature: Signature,
        endpoint: String,
        confirmed_slot: u64,
        fee_paid_lamports: u64,
    },
    Failed {
        payload: FailurePayload,
        endpoint: Option<String>,
    },
    NoHealthyEndpoint,
    Cancelled,
}

/// The submission reliability facade: owns the telemetry collector, the
/// endpoint router, and the optimizer as explicitly injected services (no
/// hidden globals) plus the background refresh tasks.
pub struct Belay {
    telemetry: Arc<TelemetryCollector>,
    router: Arc<EndpointRouter>,
    optimizer: Optimizer,
    cfg: BelayConfig,
    shutdown: CancellationToken,
}

impl Belay {
    /// Build gateways from config, load the profile table, and start both
    /// background refresh loops. Must be called within a tokio runtime.
    pub fn connect(cfg: BelayConfig, table: ProfileTable) -> Self {
        let router = Arc::new(EndpointRouter::connect(cfg.router.clone()));
        let primary_url = cfg
            .router
            .endpoints
            .iter()
            .min_by_key(|e| e.priority)
            .map(|e| e.url.clone())
            .unwrap_or_else(|| RouterConfig::default().endpoints[0].url.clone());
        let telemetry = Arc::new(TelemetryCollector::new(
            Arc::new(SolanaGateway::new(primary_url)),
            cfg.telemetry.clone(),
        ));
        let optimizer = Optimizer::new(table, cfg.optimizer.clone());

        let shutdown = CancellationToken::new();
        telemetry.spawn_refresh(shutdown.clone());
        router.spawn_refresh(shutdown.clone());

        Self {
            telemetry,
            router,
            optimizer,
            cfg,
            shutdown,
        }
    }

    /// Injected-services constructor; spawns nothing. Used by tests and by
    /// embedders that manage the refresh loops themselves.
    pub fn with_parts(
        telemetry: Arc<TelemetryCollector>,
        router: Arc<EndpointRouter>,
        optimizer: Optimizer,
        cfg: BelayConfig,
    ) -> Self {
        Self {
            telemetry,
            router,
            optimizer,
            cfg,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop the background refresh loops.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Observability query: latest congestion snapshot (never blocks).
    pub fn current_congestion(&self) -> Arc<CongestionSnapshot> {
        self.telemetry.current()
    }

    /// Observability query: current endpoint routing table.
    pub fn endpoint_health(&self) -> Arc<Vec<EndpointHealth>> {
        self.router.health()
    }

    /// Submit with automatic parameter optimization, endpoint failover, and
    /// bounded retries. Attempts are strictly sequential; the attempt log is
    /// returned on every terminal outcome.
    pub async fn send(
        &self,
        template: &TransactionTemplate,
        signers: &[&dyn Signer],
        opts: SendOptions,
    ) -> Result<SendReport, SendError> {
        let started = Instant::now();
        let cancel = opts.cancel.unwrap_or_default();
        let max_attempts = opts.max_attempts.unwrap_or(self.cfg.max_attempts).max(1);

        let profile = self.optimizer.analyze(&template.instructions);
        let congestion = self.telemetry.current();
        let mut params = self.optimizer.recommend(&profile, &congestion);
        info!(
            target: "retry",
            programs = profile.program_ids.len(),
            accounts = profile.account_count,
            congestion = congestion.percentage,
            compute_units = params.compute_units,
            priority_fee = params.priority_fee_microlamports,
            "initial parameters"
        );

        let mut attempt_log: Vec<AttemptRecord> = Vec::new();
        let mut attempt = 1u32;
        loop {
            if cancel.is_cancelled() {
                return Err(SendError::Cancelled { attempt_log });
            }
            match self.attempt_once(template, signers, &params, &cancel).await {
                AttemptResult::Confirmed {
                    signature,
                    endpoint,
                    confirmed_slot,
                    fee_paid_lamports,
                } => {
                    info!(
                        target: "retry",
                        %signature,
                        attempt,
                        endpoint = %endpoint,
                        confirmed_slot,
                        "confirmed"
                    );
                    attempt_log.push(AttemptRecord {
                        attempt,
                        params: params.clone(),
                        endpoint: Some(endpoint),
                        outcome: AttemptOutcome::Confirmed,
                        failure_class: None,
                        error: None,
                        at: Utc::now(),
                    });
                    return Ok(SendReport {
                        signature,
                        confirmed_slot,
                        fee_paid_lamports,
                        attempts: attempt,
                        attempt_log,
                        elapsed: started.elapsed(),
                    });
                }
                AttemptResult::Cancelled => return Err(SendError::Cancelled { attempt_log }),
                AttemptResult::NoHealthyEndpoint => {
                    attempt_log.push(AttemptRecord {
                        attempt,
                        params: params.clone(),
                        endpoint: None,
                        outcome: AttemptOutcome::Failed,
                        failure_class: None,
                        error: Some("no healthy endpoint available".to_string()),
                        at: Utc::now(),
                    });
                    return Err(SendError::NoHealthyEndpoint { attempt_log });
                }
                AttemptResult::Failed { payload, endpoint } => {
                    let class = classify(&payload);
                    warn!(
                        target: "retry",
                        attempt,
                        class = ?class,
                        endpoint = endpoint.as_deref().unwrap_or("-"),
                        "attempt failed: {}",
                        payload.message
                    );
                    attempt_log.push(AttemptRecord {
                        attempt,
                        params: params.clone(),
                        endpoint,
                        outcome: AttemptOutcome::Failed,
                        failure_class: Some(class),
                        error: Some(payload.message.clone()),
                        at: Utc::now(),
                    });

                    if attempt >= max_attempts {
                        return Err(SendError::Exhausted {
                            attempts: attempt,
                            attempt_log,
                            elapsed: started.elapsed(),
                        });
                    }

                    // No wait after the terminal failure; only between attempts.
                    let delay = self.cfg.backoff_after(attempt);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SendError::Cancelled { attempt_log }),
                        _ = tokio::time::sleep(delay) => {}
                    }

                    params = self.optimizer.adjust(&params, attempt, &payload);
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt_once(
        &self,
        template: &TransactionTemplate,
        signers: &[&dyn Signer],
        params: &OptimizationParams,
        cancel: &CancellationToken,
    ) -> AttemptResult {
        let (lease_endpoint, gateway) = match self.router.select() {
            Ok(pair) => pair,
            Err(RouterError::NoHealthyEndpoint) => return AttemptResult::NoHealthyEndpoint,
            Err(other) => {
                return AttemptResult::Failed {
                    payload: FailurePayload::from_message(other.to_string()),
                    endpoint: None,
                }
            }
        };

        // Fresh lease immediately before signing; leases are never reused
        // across attempts.
        let lease = tokio::select! {
            _ = cancel.cancelled() => return AttemptResult::Cancelled,
            fetched = tokio::time::timeout(self.cfg.rpc_timeout, gateway.latest_blockhash()) => {
                match fetched {
                    Ok(Ok(lease)) => lease,
                    Ok(Err(err)) => {
                        return AttemptResult::Failed {
                            payload: FailurePayload::from_message(format!("{err:#}")),
                            endpoint: Some(lease_endpoint),
                        }
                    }
                    Err(_) => {
                        return AttemptResult::Failed {
                            payload: FailurePayload::from_message("blockhash fetch timed out"),
                            endpoint: Some(lease_endpoint),
                        }
                    }
                }
            }
        };

        let instructions = self.optimizer.apply(params, &template.instructions);
        let message =
            Message::new_with_blockhash(&instructions, Some(&template.payer), &lease.hash);
        let mut tx = Transaction::new_unsigned(message);
        if let Err(err) = tx.try_sign(&signers.to_vec(), lease.hash) {
            return AttemptResult::Failed {
                payload: FailurePayload::from_message(format!("signing failed: {err}")),
                endpoint: Some(lease_endpoint),
            };
        }
        let fee_paid_lamports = self.fee_paid(&tx, params);

        let submission = tokio::select! {
            _ = cancel.cancelled() => return AttemptResult::Cancelled,
            submitted = tokio::time::timeout(self.cfg.rpc_timeout, self.router.submit(&tx)) => {
                match submitted {
                    Ok(Ok(s)) => s,
                    Ok(Err(RouterError::NoHealthyEndpoint)) => return AttemptResult::NoHealthyEndpoint,
                    Ok(Err(RouterError::AllEndpointsFailed(msg))) => {
                        return AttemptResult::Failed {
                            payload: FailurePayload::from_message(msg),
                            endpoint: None,
                        }
                    }
                    Err(_) => {
                        return AttemptResult::Failed {
                            payload: FailurePayload::from_message("submission timed out"),
                            endpoint: None,
                        }
                    }
                }
            }
        };

        self.await_confirmation(submission, fee_paid_lamports, cancel)
            .await
    }

    async fn await_confirmation(
        &self,
        submission: Submission,
        fee_paid_lamports: u64,
        cancel: &CancellationToken,
    ) -> AttemptResult {
        let deadline = tokio::time::Instant::now() + self.cfg.confirm_timeout;
        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => return AttemptResult::Cancelled,
                polled = tokio::time::timeout(
                    self.cfg.rpc_timeout,
                    submission.gateway.signature_status(&submission.signature),
                ) => polled,
            };
            match polled {
                Err(_) => {
                    return AttemptResult::Failed {
                        payload: FailurePayload::from_message("signature status poll timed out"),
                        endpoint: Some(submission.endpoint),
                    }
                }
                Ok(Ok(Some(status))) => {
                    if let Some(err) = status.err {
                        return AttemptResult::Failed {
                            payload: FailurePayload::from_message(format!(
                                "transaction failed: {err}"
                            )),
                            endpoint: Some(submission.endpoint),
                        };
                    }
                    if status.confirmed {
                        return AttemptResult::Confirmed {
                            signature: submission.signature,
                            endpoint: submission.endpoint,
                            confirmed_slot: status.slot,
                            fee_paid_lamports,
                        };
                    }
                }
                // Not seen yet, or a transient status error: keep polling
                // until the deadline bounds the wait.
                Ok(Ok(None)) | Ok(Err(_)) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return AttemptResult::Failed {
                    payload: FailurePayload::from_message("confirmation timed out"),
                    endpoint: Some(submission.endpoint),
                };
            }
            tokio::select! {
                _ = cancel.cancelled() => return AttemptResult::Cancelled,
                _ = tokio::time::sleep(self.cfg.confirm_poll) => {}
            }
        }
    }

    fn fee_paid(&self, tx: &Transaction, params: &OptimizationParams) -> u64 {
        let required_signers = tx.message.header.num_required_signatures as u64;
        let cu_limit = params
            .compute_units
            .min(self.cfg.optimizer.max_compute_units);
        let cu_price = params.priority_fee_microlamports.max(0.0).floor() as u64;
        let priority = cu_limit.saturating_mul(cu_price) / 1_000_000;
        LAMPORTS_PER_SIGNATURE * required_signers + priority
    }
}

impl Drop for Belay {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
