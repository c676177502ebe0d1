//! Congestion-aware compute-budget and priority-fee optimizer.
//!
//! Responsibilities:
//! - Fingerprint a pending submission from its instruction list
//! - Recommend an initial compute-unit budget and priority fee from the static
//!   profile table plus the live congestion snapshot
//! - Adjust parameters between retry attempts from the classified failure
//!   (a pure rule table, no hidden state)
//! - Inject the resulting compute-budget directives ahead of the caller's
//!   instructions

use profile::ProfileTable;
use serde::{Deserialize, Serialize};
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;

use crate::classify::{classify, FailureClass, FailurePayload};
use crate::telemetry::{CongestionSnapshot, CongestionStatus};

/// Resource-usage fingerprint of one pending submission. Immutable once
/// computed; recomputed per submission.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionProfile {
    pub program_ids: Vec<Pubkey>,
    pub account_count: usize,
    pub instruction_count: usize,
    /// Sum of per-program recommended budgets from the profile table.
    pub estimated_units: u64,
    /// True when every target program had its own table entry (no default
    /// fallback was needed).
    pub fully_profiled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// The live, per-attempt decision. `adjust` produces a new value; exactly one
/// is current at any point in a retry sequence.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationParams {
    pub compute_units: u64,
    /// Priority fee bid, micro-lamports per compute unit.
    pub priority_fee_microlamports: f64,
    pub confidence: Confidence,
    pub reasoning: String,
}

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Flat base priority fee, micro-lamports per CU, before account scaling.
    pub base_priority_fee: f64,
    /// Max extra budget under full congestion (0.30 = +30%).
    pub congestion_budget_max: f64,
    /// Max extra fee under full congestion (2.0 = +200%).
    pub congestion_fee_max: f64,
    /// Hard cap applied when injecting the compute-unit limit directive.
    pub max_compute_units: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            base_priority_fee: 100.0,
            congestion_budget_max: 0.30,
            congestion_fee_max: 2.0,
            max_compute_units: 1_400_000,
        }
    }
}

pub struct Optimizer {
    table: ProfileTable,
    cfg: OptimizerConfig,
}

impl Optimizer {
    pub fn new(table: ProfileTable, cfg: OptimizerConfig) -> Self {
        Self { table, cfg }
    }

    /// Static inspection of the instruction list. An empty list still
    /// resolves to the default entry's budget so downstream math never sees a
    /// zero estimate.
    pub fn analyze(&self, instructions: &[Instruction]) -> TransactionProfile {
        let mut program_ids: Vec<Pubkey> = Vec::new();
        let mut account_count = 0usize;
        for ix in instructions {
            if !program_ids.contains(&ix.program_id) {
                program_ids.push(ix.program_id);
            }
            account_count += ix.accounts.len();
        }

        let mut estimated_units = 0u64;
        let mut fully_profiled = true;
        for id in &program_ids {
            let (rec, known) = self.table.lookup_known(&id.to_string());
            estimated_units += rec.recommended_units;
            fully_profiled &= known;
        }
        if program_ids.is_empty() {
            estimated_units = self.table.default.recommended_units;
            fully_profiled = false;
        }

        TransactionProfile {
            program_ids,
            account_count,
            instruction_count: instructions.len(),
            estimated_units,
            fully_profiled,
        }
    }

    /// Initial parameters for attempt 1.
    ///
    /// Budget: table estimate × complexity factor `min(1 + accounts/20, 1.5)`,
    /// then × `1 + pct/100 × congestion_budget_max`. Fee: base rate scaled by
    /// account count, then × `1 + pct/100 × congestion_fee_max`.
    pub fn recommend(
        &self,
        profile: &TransactionProfile,
        congestion: &CongestionSnapshot,
    ) -> OptimizationParams {
        let complexity = (1.0 + profile.account_count as f64 / 20.0).min(1.5);
        let base_units = (profile.estimated_units as f64 * complexity).ceil();
        let base_fee = self.cfg.base_priority_fee * profile.account_count as f64 / 10.0;

        let pct = congestion.percentage / 100.0;
        let units_multiplier = 1.0 + pct * self.cfg.congestion_budget_max;
        let fee_multiplier = 1.0 + pct * self.cfg.congestion_fee_max;

        let (confidence, reasoning) = match congestion.status {
            CongestionStatus::Low => (Confidence::High, "Low congestion - standard parameters"),
            CongestionStatus::Medium => (
                Confidence::Medium,
                "Moderate congestion - slightly increased parameters",
            ),
            CongestionStatus::High => (
                Confidence::Medium,
                "High congestion - significantly increased parameters",
            ),
            CongestionStatus::Critical => (
                Confidence::Low,
                "Critical congestion - maximum parameters recommended",
            ),
        };

        OptimizationParams {
            compute_units: (base_units * units_multiplier).ceil() as u64,
            priority_fee_microlamports: base_fee * fee_multiplier,
            confidence,
            reasoning: reasoning.to_string(),
        }
    }

    /// Derive the next attempt's parameters from this attempt's failure.
    /// Pure: no telemetry access, same inputs always yield the same output.
    pub fn adjust(
        &self,
        params: &OptimizationParams,
        attempt_number: u32,
        failure: &FailurePayload,
    ) -> OptimizationParams {
        match classify(failure) {
            FailureClass::ResourceExhaustion => OptimizationParams {
                compute_units: (params.compute_units as f64 * 1.5).ceil() as u64,
                priority_fee_microlamports: params.priority_fee_microlamports * 1.2,
                confidence: Confidence::Medium,
                reasoning: format!(
                    "Retry attempt {attempt_number}: increased compute units significantly"
                ),
            },
            FailureClass::FeeTooLow => OptimizationParams {
                compute_units: (params.compute_units as f64 * 1.1).ceil() as u64,
                priority_fee_microlamports: params.priority_fee_microlamports * 2.0,
                confidence: Confidence::Medium,
                reasoning: format!(
                    "Retry attempt {attempt_number}: increased priority fee significantly"
                ),
            },
            FailureClass::Generic => {
                let units_multiplier = 1.0 + 0.2 * attempt_number as f64;
                let fee_multiplier = 1.0 + 0.5 * attempt_number as f64;
                OptimizationParams {
                    compute_units: (params.compute_units as f64 * units_multiplier).ceil() as u64,
                    priority_fee_microlamports: params.priority_fee_microlamports * fee_multiplier,
                    confidence: Confidence::Low,
                    reasoning: format!(
                        "Retry attempt {attempt_number}: increased both compute units and priority fee"
                    ),
                }
            }
        }
    }

    /// Prepend the compute-budget directives, preserving the relative order of
    /// the caller's instructions. The unit limit is capped here, not in the
    /// retry math, so adjustment multipliers stay exact across attempts.
    pub fn apply(&self, params: &OptimizationParams, instructions: &[Instruction]) -> Vec<Instruction> {
        let limit = params.compute_units.min(self.cfg.max_compute_units) as u32;
        let price = params.priority_fee_microlamports.max(0.0).floor() as u64;
        let mut out = Vec::with_capacity(instructions.len() + 2);
        out.push(ComputeBudgetInstruction::set_compute_unit_limit(limit));
        out.push(ComputeBudgetInstruction::set_compute_unit_price(price));
        out.extend_from_slice(instructions);
        out
    }
}
