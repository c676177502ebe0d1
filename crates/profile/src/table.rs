//! Per-program compute-usage profile table.
//!
//! The table is a versioned artifact produced by an offline analysis job over
//! historical transactions. At runtime it is loaded once, treated as immutable
//! configuration, and queried per submission. Lookups never fail: unknown
//! programs resolve to the `default` entry.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Historical compute profile for one program, plus the derived budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecommendation {
    /// Mean observed compute units.
    pub avg_units: u64,
    /// 95th-percentile observed compute units.
    pub p95_units: u64,
    /// Budget to request: P95 plus safety margin (see `margin`).
    pub recommended_units: u64,
    /// Fraction of observed submissions that landed, in [0, 1].
    pub success_rate: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("failed to read profile table: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse profile table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Immutable, versioned lookup table keyed by base58 program id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileTable {
    /// Artifact version written by the offline job.
    pub version: String,
    /// RFC 3339 generation timestamp of the artifact.
    #[serde(default)]
    pub generated_at: Option<String>,
    pub programs: HashMap<String, ResourceRecommendation>,
    /// Fallback entry for programs absent from `programs`.
    pub default: ResourceRecommendation,
}

impl ProfileTable {
    pub fn from_json_str(s: &str) -> Result<Self, ProfileError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Resolve a program id to its recommendation, falling back to the
    /// default entry. Total: never fails.
    pub fn lookup(&self, program_id: &str) -> &ResourceRecommendation {
        self.programs.get(program_id).unwrap_or(&self.default)
    }

    /// Like `lookup`, additionally reporting whether the entry was found
    /// (false means the default fallback was used).
    pub fn lookup_known(&self, program_id: &str) -> (&ResourceRecommendation, bool) {
        match self.programs.get(program_id) {
            Some(rec) => (rec, true),
            None => (&self.default, false),
        }
    }

    /// Compiled-in table so the engine works without an artifact on disk.
    /// Entries mirror the well-known program defaults the artifact ships.
    pub fn builtin() -> Self {
        let mut programs = HashMap::new();
        // Jupiter v6 aggregator
        programs.insert(
            "JUP4Fb2cqiRUcaTHdrPC8h2gNsA2ETXiPDD33WcGuJB".to_string(),
            ResourceRecommendation {
                avg_units: 280_000,
                p95_units: 363_636,
                recommended_units: 400_000,
                success_rate: 0.92,
            },
        );
        // Raydium AMM v4
        programs.insert(
            "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8".to_string(),
            ResourceRecommendation {
                avg_units: 210_000,
                p95_units: 272_727,
                recommended_units: 300_000,
                success_rate: 0.90,
            },
        );
        Self {
            version: "builtin-1".to_string(),
            generated_at: None,
            programs,
            default: ResourceRecommendation {
                avg_units: 150_000,
                p95_units: 181_818,
                recommended_units: 200_000,
                success_rate: 0.85,
            },
        }
    }
}
