//! Small numeric helpers shared across the decision core.

/// Minutes per CGM tick.
pub const TICK_MIN: f64 = 5.0;

/// Bolus delivery resolution in units.
pub const BOLUS_STEP_U: f64 = 0.05;

/// Round `value` to the nearest multiple of `step`.
///
/// Non-finite input yields 0.0 so a degenerate upstream value can never
/// reach the pump.
#[inline]
pub fn round_to_step(value: f64, step: f64) -> f64 {
    if !value.is_finite() || step <= 0.0 {
        return 0.0;
    }
    let q = (value / step).round() * step;
    // Strip float noise like 0.15000000000000002
    (q * 1e6).round() / 1e6
}

/// Nearest deliverable bolus; negative amounts become 0.0.
#[inline]
pub fn round_bolus(units: f64) -> f64 {
    round_to_step(units.max(0.0), BOLUS_STEP_U)
}

/// Largest deliverable bolus that does not exceed `limit`.
#[inline]
pub fn floor_bolus(limit: f64) -> f64 {
    if !limit.is_finite() || limit <= 0.0 {
        return 0.0;
    }
    // Tolerate a quotient like 19.999999999999996 for an exact multiple
    let q = (limit / BOLUS_STEP_U + 1e-9).floor() * BOLUS_STEP_U;
    (q * 1e6).round() / 1e6
}
