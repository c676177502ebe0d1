//! Safety-margin arithmetic shared with the offline profiling job.

/// Recommended budget from a P95 observation: `p95 × margin`, rounded to the
/// nearest unit.
///
/// The offline job writes `recommended_units` with margin 1.10; keeping the
/// rule here lets consumers re-derive or validate artifact entries.
pub fn recommended_from_p95(p95_units: u64, margin: f64) -> u64 {
    (p95_units as f64 * margin).round() as u64
}

/// Default multiplicative safety margin applied on top of the P95.
pub const DEFAULT_SAFETY_MARGIN: f64 = 1.10;
