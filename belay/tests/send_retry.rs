//! End-to-end retry engine behavior against scripted gateways.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use belay::{
    AttemptOutcome, Belay, BelayConfig, BlockhashLease, ConfirmStatus, EndpointRouter,
    EndpointSpec, FailureClass, Optimizer, OptimizerConfig, PerfSample, RouterConfig, RpcGateway,
    SendError, SendOptions, TelemetryCollector, TelemetryConfig, TransactionTemplate,
};
use profile::ProfileTable;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct ScriptedGateway {
    lease_fetches: AtomicU32,
    /// Some(text) makes every submission fail with that error.
    send_error: Option<String>,
    /// Some(text) reports an on-chain execution error at confirmation.
    confirm_error: Option<String>,
    probe_fails: bool,
    /// Submission never resolves (dead endpoint that accepted the socket).
    send_hangs: bool,
    /// Status polls never resolve.
    status_hangs: bool,
}

#[async_trait]
impl RpcGateway for ScriptedGateway {
    async fn performance_samples(&self, limit: usize) -> Result<Vec<PerfSample>> {
        Ok((0..limit.min(5))
            .map(|i| PerfSample {
                slot: i as u64,
                num_transactions: 1_000,
                slot_time_secs: 0.5,
            })
            .collect())
    }

    async fn latest_blockhash(&self) -> Result<BlockhashLease> {
        self.lease_fetches.fetch_add(1, Ordering::Relaxed);
        Ok(BlockhashLease {
            hash: Hash::new_unique(),
            last_valid_block_height: 1_000,
            fetched_at: std::time::Instant::now(),
        })
    }

    async fn send_transaction(&self, _tx: &Transaction) -> Result<Signature> {
        if self.send_hangs {
            std::future::pending::<()>().await;
        }
        match &self.send_error {
            Some(msg) => anyhow::bail!("{msg}"),
            None => Ok(Signature::new_unique()),
        }
    }

    async fn signature_status(&self, _sig: &Signature) -> Result<Option<ConfirmStatus>> {
        if self.status_hangs {
            std::future::pending::<()>().await;
        }
        Ok(Some(ConfirmStatus {
            slot: 42,
            err: self.confirm_error.clone(),
            confirmed: true,
        }))
    }

    async fn slot(&self) -> Result<u64> {
        if self.probe_fails {
            anyhow::bail!("probe refused")
        }
        Ok(1)
    }
}

fn endpoint(name: &str, priority: u32) -> EndpointSpec {
    EndpointSpec {
        name: name.to_string(),
        url: format!("http://{name}.invalid"),
        priority,
    }
}

fn belay_over(gateways: Vec<(EndpointSpec, Arc<ScriptedGateway>)>) -> (Belay, Arc<EndpointRouter>) {
    let first = gateways[0].1.clone();
    let router = Arc::new(EndpointRouter::with_gateways(
        gateways
            .into_iter()
            .map(|(spec, gw)| (spec, gw as Arc<dyn RpcGateway>))
            .collect(),
        RouterConfig::default(),
    ));
    let telemetry = Arc::new(TelemetryCollector::new(first, TelemetryConfig::default()));
    let optimizer = Optimizer::new(ProfileTable::builtin(), OptimizerConfig::default());
    let belay = Belay::with_parts(
        telemetry,
        router.clone(),
        optimizer,
        BelayConfig::default(),
    );
    (belay, router)
}

fn template(payer: Pubkey) -> TransactionTemplate {
    let program = Pubkey::new_unique();
    TransactionTemplate {
        payer,
        instructions: vec![Instruction {
            program_id: program,
            accounts: vec![
                AccountMeta::new(Pubkey::new_unique(), false),
                AccountMeta::new_readonly(Pubkey::new_unique(), false),
            ],
            data: vec![1, 2, 3],
        }],
    }
}

#[tokio::test]
async fn confirms_on_first_attempt() {
    let gw = Arc::new(ScriptedGateway::default());
    let (belay, _router) = belay_over(vec![(endpoint("primary", 1), gw.clone())]);
    let payer = Keypair::new();

    let report = belay
        .send(
            &template(payer.pubkey()),
            &[&payer as &dyn Signer],
            SendOptions::default(),
        )
        .await
        .expect("send should succeed");

    assert_eq!(report.attempts, 1);
    assert_eq!(report.confirmed_slot, 42);
    assert_eq!(report.attempt_log.len(), 1);
    assert_eq!(report.attempt_log[0].attempt, 1);
    assert_eq!(report.attempt_log[0].outcome, AttemptOutcome::Confirmed);
    assert_eq!(report.attempt_log[0].endpoint.as_deref(), Some("primary"));
    assert_eq!(gw.lease_fetches.load(Ordering::Relaxed), 1);

    // base fee per signature plus the declared priority fee
    let params = &report.attempt_log[0].params;
    let expected_priority = params.compute_units.min(1_400_000)
        * params.priority_fee_microlamports.floor() as u64
        / 1_000_000;
    assert_eq!(report.fee_paid_lamports, 5_000 + expected_priority);
}

#[tokio::test(start_paused = true)]
async fn exhausts_with_exact_backoff_and_fresh_leases() {
    let gw = Arc::new(ScriptedGateway {
        send_error: Some("connection reset by peer".to_string()),
        ..Default::default()
    });
    let (belay, _router) = belay_over(vec![(endpoint("primary", 1), gw.clone())]);
    let payer = Keypair::new();

    let started = tokio::time::Instant::now();
    let err = belay
        .send(
            &template(payer.pubkey()),
            &[&payer as &dyn Signer],
            SendOptions::default(),
        )
        .await
        .expect_err("send should exhaust");

    // two inter-attempt waits (2s + 4s), none after the terminal failure
    assert_eq!(started.elapsed(), Duration::from_millis(6_000));

    match &err {
        SendError::Exhausted { attempts, attempt_log, .. } => {
            assert_eq!(*attempts, 3);
            assert_eq!(attempt_log.len(), 3);
            // contiguous attempt numbers from 1
            for (i, rec) in attempt_log.iter().enumerate() {
                assert_eq!(rec.attempt, i as u32 + 1);
                assert_eq!(rec.outcome, AttemptOutcome::Failed);
                assert_eq!(rec.failure_class, Some(FailureClass::Generic));
            }
        }
        other => panic!("unexpected error: {other}"),
    }

    // one fresh lease per attempt, never reused
    assert_eq!(gw.lease_fetches.load(Ordering::Relaxed), 3);
}

#[tokio::test(start_paused = true)]
async fn fee_failures_double_the_fee_between_attempts() {
    let gw = Arc::new(ScriptedGateway {
        send_error: Some("priority fee too low for inclusion".to_string()),
        ..Default::default()
    });
    let (belay, _router) = belay_over(vec![(endpoint("primary", 1), gw)]);
    let payer = Keypair::new();

    let err = belay
        .send(
            &template(payer.pubkey()),
            &[&payer as &dyn Signer],
            SendOptions::default(),
        )
        .await
        .expect_err("send should exhaust");

    let log = err.attempt_log();
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].failure_class, Some(FailureClass::FeeTooLow));

    let first = &log[0].params;
    let second = &log[1].params;
    assert_eq!(
        second.priority_fee_microlamports,
        first.priority_fee_microlamports * 2.0
    );
    assert_eq!(
        second.compute_units,
        (first.compute_units as f64 * 1.1).ceil() as u64
    );
}

#[tokio::test(start_paused = true)]
async fn onchain_compute_errors_raise_the_budget() {
    let gw = Arc::new(ScriptedGateway {
        confirm_error: Some("computational budget exceeded".to_string()),
        ..Default::default()
    });
    let (belay, _router) = belay_over(vec![(endpoint("primary", 1), gw)]);
    let payer = Keypair::new();

    let err = belay
        .send(
            &template(payer.pubkey()),
            &[&payer as &dyn Signer],
            SendOptions::default(),
        )
        .await
        .expect_err("send should exhaust");

    let log = err.attempt_log();
    assert_eq!(
        log[0].failure_class,
        Some(FailureClass::ResourceExhaustion)
    );
    let first = &log[0].params;
    let second = &log[1].params;
    assert_eq!(
        second.compute_units,
        (first.compute_units as f64 * 1.5).ceil() as u64
    );
    assert_eq!(
        second.priority_fee_microlamports,
        first.priority_fee_microlamports * 1.2
    );
}

#[tokio::test]
async fn fails_over_to_second_endpoint_within_one_attempt() {
    let bad = Arc::new(ScriptedGateway {
        send_error: Some("gateway overloaded".to_string()),
        ..Default::default()
    });
    let good = Arc::new(ScriptedGateway::default());
    let (belay, _router) = belay_over(vec![
        (endpoint("primary", 1), bad),
        (endpoint("backup", 2), good),
    ]);
    let payer = Keypair::new();

    let report = belay
        .send(
            &template(payer.pubkey()),
            &[&payer as &dyn Signer],
            SendOptions::default(),
        )
        .await
        .expect("failover should succeed");

    assert_eq!(report.attempts, 1);
    assert_eq!(report.attempt_log[0].endpoint.as_deref(), Some("backup"));
}

#[tokio::test]
async fn all_endpoints_unhealthy_is_fatal() {
    let gw = Arc::new(ScriptedGateway {
        probe_fails: true,
        ..Default::default()
    });
    let (belay, router) = belay_over(vec![(endpoint("primary", 1), gw)]);
    router.probe_all().await;
    let payer = Keypair::new();

    let err = belay
        .send(
            &template(payer.pubkey()),
            &[&payer as &dyn Signer],
            SendOptions::default(),
        )
        .await
        .expect_err("send should fail fast");

    match &err {
        SendError::NoHealthyEndpoint { attempt_log } => {
            assert_eq!(attempt_log.len(), 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_backoff_returns_partial_log() {
    let gw = Arc::new(ScriptedGateway {
        send_error: Some("connection reset".to_string()),
        ..Default::default()
    });
    let (belay, _router) = belay_over(vec![(endpoint("primary", 1), gw)]);
    let payer = Keypair::new();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        // fires during the second backoff window (2s + 4s schedule)
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        canceller.cancel();
    });

    let err = belay
        .send(
            &template(payer.pubkey()),
            &[&payer as &dyn Signer],
            SendOptions {
                cancel: Some(cancel),
                ..Default::default()
            },
        )
        .await
        .expect_err("send should be cancelled");

    match &err {
        SendError::Cancelled { attempt_log } => {
            assert_eq!(attempt_log.len(), 2);
            assert_eq!(attempt_log[0].attempt, 1);
            assert_eq!(attempt_log[1].attempt, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn hanging_status_polls_are_bounded_by_rpc_timeout() {
    let gw = Arc::new(ScriptedGateway {
        status_hangs: true,
        ..Default::default()
    });
    let (belay, _router) = belay_over(vec![(endpoint("primary", 1), gw)]);
    let payer = Keypair::new();

    let started = tokio::time::Instant::now();
    let err = belay
        .send(
            &template(payer.pubkey()),
            &[&payer as &dyn Signer],
            SendOptions {
                max_attempts: Some(1),
                ..Default::default()
            },
        )
        .await
        .expect_err("send should fail, not hang");

    // one rpc_timeout window, no backoff after the terminal failure
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    let log = err.attempt_log();
    assert_eq!(log.len(), 1);
    assert_eq!(
        log[0].error.as_deref(),
        Some("signature status poll timed out")
    );
}

#[tokio::test(start_paused = true)]
async fn hanging_submission_is_bounded_by_rpc_timeout() {
    let gw = Arc::new(ScriptedGateway {
        send_hangs: true,
        ..Default::default()
    });
    let (belay, _router) = belay_over(vec![(endpoint("primary", 1), gw)]);
    let payer = Keypair::new();

    let started = tokio::time::Instant::now();
    let err = belay
        .send(
            &template(payer.pubkey()),
            &[&payer as &dyn Signer],
            SendOptions {
                max_attempts: Some(1),
                ..Default::default()
            },
        )
        .await
        .expect_err("send should fail, not hang");

    assert_eq!(started.elapsed(), Duration::from_secs(10));
    let log = err.attempt_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].error.as_deref(), Some("submission timed out"));
}

#[tokio::test]
async fn max_attempts_override_is_respected() {
    let gw = Arc::new(ScriptedGateway {
        send_error: Some("nope".to_string()),
        ..Default::default()
    });
    let (belay, _router) = belay_over(vec![(endpoint("primary", 1), gw)]);
    let payer = Keypair::new();

    let err = belay
        .send(
            &template(payer.pubkey()),
            &[&payer as &dyn Signer],
            SendOptions {
                max_attempts: Some(1),
                ..Default::default()
            },
        )
        .await
        .expect_err("send should exhaust");

    match &err {
        SendError::Exhausted { attempts, attempt_log, .. } => {
            assert_eq!(*attempts, 1);
            assert_eq!(attempt_log.len(), 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}
