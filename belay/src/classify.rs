//! Failure classification for retry-parameter adjustment.
//!
//! The network does not hand us a structured taxonomy: submission, simulation
//! and on-chain errors all surface as free text (sometimes with a JSON-RPC
//! code). Classification is therefore an ordered list of named substring
//! predicates over a normalized payload, falling through to `Generic`. This is
//! a best-effort heuristic; predicates are kept few, mutually exclusive by
//! first-match, and individually testable.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    /// The declared compute budget was exceeded at execution time.
    ResourceExhaustion,
    /// The priority-fee bid was too low for inclusion.
    FeeTooLow,
    Generic,
}

/// Normalized failure payload: optional JSON-RPC error code plus lowercased
/// message text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePayload {
    pub code: Option<i64>,
    pub message: String,
}

impl FailurePayload {
    pub fn from_message(message: impl AsRef<str>) -> Self {
        Self {
            code: None,
            message: message.as_ref().to_lowercase(),
        }
    }

    pub fn with_code(code: i64, message: impl AsRef<str>) -> Self {
        Self {
            code: Some(code),
            message: message.as_ref().to_lowercase(),
        }
    }
}

struct Predicate {
    class: FailureClass,
    keywords: &'static [&'static str],
}

/// Ordered: the first predicate with any keyword hit wins. Resource keywords
/// come first so "computational budget exceeded, fee charged" classifies as
/// exhaustion rather than a fee problem.
const PREDICATES: &[Predicate] = &[
    Predicate {
        class: FailureClass::ResourceExhaustion,
        keywords: &["compute", "exceeded", "unit limit", "budget"],
    },
    Predicate {
        class: FailureClass::FeeTooLow,
        keywords: &["fee", "priority"],
    },
];

pub fn classify(payload: &FailurePayload) -> FailureClass {
    let msg = payload.message.to_lowercase();
    for p in PREDICATES {
        if p.keywords.iter().any(|k| msg.contains(k)) {
            return p.class;
        }
    }
    FailureClass::Generic
}
