//! Belay: a submission reliability layer for Solana.
//!
//! Converts a baseline ~74-80% transaction-landing rate into a near-guaranteed
//! one by combining three mechanisms:
//!
//! - a retry engine that takes a fresh blockhash lease per attempt and
//!   resubmits with adjusted compute-budget/fee parameters,
//! - health-based routing with failover across redundant RPC endpoints,
//! - percentile-table plus live-congestion parameter optimization.
//!
//! Entry point is [`Belay`]: construct it with [`Belay::connect`] (or
//! [`Belay::with_parts`] with injected services), then call [`Belay::send`].
//! [`Belay::current_congestion`] and [`Belay::endpoint_health`] expose the
//! shared telemetry for dashboards.

pub mod classify;
pub mod engine;
pub mod gateway;
pub mod optimizer;
pub mod router;
pub mod telemetry;

pub use classify::{classify, FailureClass, FailurePayload};
pub use engine::{
    AttemptOutcome, AttemptRecord, Belay, BelayConfig, SendError, SendOptions, SendReport,
    TransactionTemplate,
};
pub use gateway::{BlockhashLease, ConfirmStatus, PerfSample, RpcGateway, SolanaGateway};
pub use optimizer::{
    Confidence, OptimizationParams, Optimizer, OptimizerConfig, TransactionProfile,
};
pub use router::{
    EndpointHealth, EndpointRouter, EndpointSpec, EndpointStatus, RouterConfig, RouterError,
    Submission,
};
pub use telemetry::{
    CongestionSnapshot, CongestionStatus, TelemetryCollector, TelemetryConfig, TelemetryError,
};

// Re-export the profile-table crate so consumers need only one dependency.
pub use profile;
