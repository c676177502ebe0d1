//! RPC seam between the engine and a Solana gateway endpoint.
//!
//! Everything the reliability layer needs from the network goes through the
//! `RpcGateway` trait so tests can swap in deterministic fakes and the router
//! can hold one handle per candidate endpoint.

use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;

/// One recent block-production performance sample, normalized to a per-slot
/// time so congestion bounds are sampling-period independent.
#[derive(Debug, Clone, Copy)]
pub struct PerfSample {
    pub slot: u64,
    pub num_transactions: u64,
    pub slot_time_secs: f64,
}

/// The time-bound authorization to submit: a recent blockhash lease.
///
/// A lease expires once the chain passes `last_valid_block_height`; signing
/// with an expired lease is the dominant baseline failure mode, which is why
/// the engine takes a fresh one immediately before every signing.
#[derive(Debug, Clone, Copy)]
pub struct BlockhashLease {
    pub hash: Hash,
    pub last_valid_block_height: u64,
    pub fetched_at: Instant,
}

/// Confirmation status of a submitted signature.
#[derive(Debug, Clone)]
pub struct ConfirmStatus {
    pub slot: u64,
    /// On-chain execution error, if the transaction landed but failed.
    pub err: Option<String>,
    /// True once the signature reached confirmed commitment.
    pub confirmed: bool,
}

#[async_trait]
pub trait RpcGateway: Send + Sync {
    /// Most recent performance samples, newest first.
    async fn performance_samples(&self, limit: usize) -> Result<Vec<PerfSample>>;

    async fn latest_blockhash(&self) -> Result<BlockhashLease>;

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature>;

    /// None until the cluster has seen the signature at all.
    async fn signature_status(&self, sig: &Signature) -> Result<Option<ConfirmStatus>>;

    /// Liveness probe; also used to measure endpoint latency.
    async fn slot(&self) -> Result<u64>;
}

/// `RpcGateway` over the nonblocking Solana RPC client, confirmed commitment.
pub struct SolanaGateway {
    rpc: RpcClient,
    commitment: CommitmentConfig,
}

impl SolanaGateway {
    pub fn new(url: impl Into<String>) -> Self {
        let commitment = CommitmentConfig::confirmed();
        Self {
            rpc: RpcClient::new_with_commitment(url.into(), commitment),
            commitment,
        }
    }
}

#[async_trait]
impl RpcGateway for SolanaGateway {
    async fn performance_samples(&self, limit: usize) -> Result<Vec<PerfSample>> {
        let samples = self
            .rpc
            .get_recent_performance_samples(Some(limit))
            .await
            .context("getRecentPerformanceSamples")?;
        Ok(samples
            .into_iter()
            .map(|s| PerfSample {
                slot: s.slot,
                num_transactions: s.num_transactions,
                slot_time_secs: s.sample_period_secs as f64 / s.num_slots.max(1) as f64,
            })
            .collect())
    }

    async fn latest_blockhash(&self) -> Result<BlockhashLease> {
        let (hash, last_valid_block_height) = self
            .rpc
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(|e| anyhow!("getLatestBlockhash: {e}"))?;
        Ok(BlockhashLease {
            hash,
            last_valid_block_height,
            fetched_at: Instant::now(),
        })
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature> {
        self.rpc
            .send_transaction_with_config(
                tx,
                RpcSendTransactionConfig {
                    skip_preflight: false,
                    preflight_commitment: Some(CommitmentLevel::Processed),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| anyhow!("sendTransaction: {e}"))
    }

    async fn signature_status(&self, sig: &Signature) -> Result<Option<ConfirmStatus>> {
        let response = self
            .rpc
            .get_signature_statuses(&[*sig])
            .await
            .map_err(|e| anyhow!("getSignatureStatuses: {e}"))?;
        let status = match response.value.into_iter().next().flatten() {
            Some(s) => s,
            None => return Ok(None),
        };
        Ok(Some(ConfirmStatus {
            slot: status.slot,
            err: status.err.as_ref().map(|e| format!("{e:?}")),
            confirmed: status.satisfies_commitment(self.commitment),
        }))
    }

    async fn slot(&self) -> Result<u64> {
        self.rpc.get_slot().await.map_err(|e| anyhow!("getSlot: {e}"))
    }
}
