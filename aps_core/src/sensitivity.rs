//! Dynamic insulin-sensitivity estimation.
//!
//! Raw ISF from the log-TDD formula, smoothed across cycles with a
//! single-state Kalman filter, blended with a glucose/ISF curve and corrected
//! for the direction of the trend. Results are cached per 30-minute bucket.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SensitivityCfg;
use crate::types::{Modes, PersistedIsf, TddStats};

pub const ISF_MIN: f64 = 10.0;
pub const ISF_MAX: f64 = 300.0;
const BUCKET_SECS: i64 = 1800;
const HYPER_GLUCOSE: f64 = 120.0;

/// Glucose (mg/dL) to profile-ISF multiplier. Denser where dosing decisions
/// are made.
const ISF_CURVE: [(f64, f64); 12] = [
    (40.0, 1.5),
    (60.0, 1.3),
    (80.0, 1.15),
    (100.0, 1.0),
    (120.0, 0.92),
    (140.0, 0.86),
    (160.0, 0.8),
    (180.0, 0.75),
    (220.0, 0.68),
    (260.0, 0.63),
    (300.0, 0.6),
    (400.0, 0.55),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Cached,
    Database,
    Computed,
    /// Inputs were degenerate; last valid value or the profile ISF was used.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensitivityEstimate {
    pub value: f64,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Copy)]
pub struct SensitivityInput<'a> {
    pub glucose: f64,
    pub delta: f64,
    pub tdd: &'a TddStats,
    pub modes: &'a Modes,
    /// Time of the glucose reading the estimate is for.
    pub timestamp: DateTime<Utc>,
    pub persisted: &'a [PersistedIsf],
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    value: f64,
    stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Kalman {
    x: f64,
    p: f64,
}

/// Owns the cache and filter state; one instance per engine.
#[derive(Debug)]
pub struct SensitivityEstimator {
    cfg: SensitivityCfg,
    profile_isf: f64,
    cache: HashMap<(i64, i32), CacheEntry>,
    kalman: Option<Kalman>,
    last_valid: Option<f64>,
    degenerate: u64,
}

/// Linear interpolation on [`ISF_CURVE`], flat beyond both ends.
pub fn curve_factor(glucose: f64) -> f64 {
    let first = ISF_CURVE[0];
    let last = ISF_CURVE[ISF_CURVE.len() - 1];
    if glucose <= first.0 {
        return first.1;
    }
    if glucose >= last.0 {
        return last.1;
    }
    for w in ISF_CURVE.windows(2) {
        let (g0, f0) = w[0];
        let (g1, f1) = w[1];
        if glucose <= g1 {
            return f0 + (f1 - f0) * (glucose - g0) / (g1 - g0);
        }
    }
    last.1
}

/// Weighted 1/2/7-day TDD with outlier clamping, mode scaling and the
/// hyper/normal multiplier. `None` when no positive aggregate is available.
pub fn effective_tdd(tdd: &TddStats, modes: &Modes, glucose: f64, cfg: &SensitivityCfg) -> Option<f64> {
    let usable = |v: f64| v.is_finite() && v > 0.0;
    let reference = [tdd.tdd_7d, tdd.tdd_24h, tdd.tdd_1d, tdd.tdd_2d]
        .into_iter()
        .find(|v| usable(*v))?;
    let bounded = |v: f64| {
        if usable(v) {
            v.clamp(cfg.outlier_floor * reference, cfg.outlier_ceiling * reference)
        } else {
            reference
        }
    };
    let w = cfg.tdd_weight_1d + cfg.tdd_weight_2d + cfg.tdd_weight_7d;
    if w <= 0.0 {
        return None;
    }
    let blended = (cfg.tdd_weight_1d * bounded(tdd.tdd_1d)
        + cfg.tdd_weight_2d * bounded(tdd.tdd_2d)
        + cfg.tdd_weight_7d * reference)
        / w;

    let pct = modes.primary().map_or(100.0, |(m, _)| cfg.mode_pct.get(m));
    let glucose_mult = if glucose > HYPER_GLUCOSE {
        cfg.hyper_multiplier
    } else {
        cfg.normal_multiplier
    };
    let v = blended * pct / 100.0 * glucose_mult;
    usable(v).then_some(v)
}

/// `1800 / (tdd · ln(glucose/75 + 1))` clamped to the ISF range.
pub fn raw_isf(effective_tdd: f64, glucose: f64) -> f64 {
    (1800.0 / (effective_tdd * (glucose / 75.0 + 1.0).ln())).clamp(ISF_MIN, ISF_MAX)
}

impl SensitivityEstimator {
    pub fn new(cfg: SensitivityCfg, profile_isf: f64) -> Self {
        Self {
            cfg,
            profile_isf,
            cache: HashMap::new(),
            kalman: None,
            last_valid: None,
            degenerate: 0,
        }
    }

    /// Clear cache and filter state.
    pub fn reset(&mut self) {
        self.cache.clear();
        self.kalman = None;
        self.last_valid = None;
    }

    /// Number of degenerate inputs seen since construction.
    pub fn degenerate_events(&self) -> u64 {
        self.degenerate
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn fallback(&mut self, reason: &str) -> SensitivityEstimate {
        self.degenerate += 1;
        let value = self.last_valid.unwrap_or(self.profile_isf);
        tracing::warn!(reason, value, events = self.degenerate, "sensitivity fallback");
        SensitivityEstimate {
            value,
            provenance: Provenance::Fallback,
        }
    }

    fn store(&mut self, key: (i64, i32), value: f64, now: DateTime<Utc>) {
        if self.cache.len() >= self.cfg.cache_capacity {
            tracing::debug!(entries = self.cache.len(), "sensitivity cache cleared");
            self.cache.clear();
        }
        self.cache.insert(key, CacheEntry { value, stored_at: now });
    }

    fn kalman_update(&mut self, raw: f64, delta: f64) -> f64 {
        let r = self.cfg.kalman_measurement_var * (1.0 + delta.abs() / 2.0);
        let k = match self.kalman {
            None => Kalman { x: raw, p: r },
            Some(mut k) => {
                k.p += self.cfg.kalman_process_var;
                let gain = k.p / (k.p + r);
                k.x += gain * (raw - k.x);
                k.p *= 1.0 - gain;
                k
            }
        };
        self.kalman = Some(k);
        k.x
    }

    /// Estimate ISF for this cycle.
    pub fn estimate(&mut self, input: &SensitivityInput<'_>, now: DateTime<Utc>) -> SensitivityEstimate {
        if !input.glucose.is_finite() || !input.delta.is_finite() {
            return self.fallback("non-finite glucose or delta");
        }
        let key = (
            input.timestamp.timestamp().div_euclid(BUCKET_SECS),
            input.glucose.round() as i32,
        );
        let future = input.timestamp > now;

        if !future {
            let ttl_ms = (self.cfg.cache_ttl_min * 60_000.0) as i64;
            match self.cache.get(&key) {
                Some(e) if (now - e.stored_at).num_milliseconds() <= ttl_ms => {
                    return SensitivityEstimate {
                        value: e.value,
                        provenance: Provenance::Cached,
                    };
                }
                Some(_) => {
                    self.cache.remove(&key);
                }
                None => {}
            }
            if let Some(p) = input
                .persisted
                .iter()
                .find(|p| p.bucket == key.0 && p.glucose == key.1 && p.value.is_finite())
            {
                let value = p.value.clamp(ISF_MIN, ISF_MAX);
                self.store(key, value, now);
                self.last_valid = Some(value);
                return SensitivityEstimate {
                    value,
                    provenance: Provenance::Database,
                };
            }
        }

        let Some(tdd) = effective_tdd(input.tdd, input.modes, input.glucose, &self.cfg) else {
            return self.fallback("no usable TDD aggregate");
        };
        let raw = raw_isf(tdd, input.glucose);
        let filtered = self.kalman_update(raw, input.delta);
        let curve = self.profile_isf * curve_factor(input.glucose);
        let blended = (1.0 - self.cfg.curve_weight) * filtered + self.cfg.curve_weight * curve;
        let correction = (1.0 - self.cfg.delta_correction * input.delta).clamp(0.7, 1.3);
        let value = blended * correction;
        if !value.is_finite() {
            self.kalman = None;
            return self.fallback("non-finite estimate");
        }
        let value = value.clamp(ISF_MIN, ISF_MAX);

        if !future {
            self.store(key, value, now);
        }
        self.last_valid = Some(value);
        tracing::debug!(tdd, raw, filtered, curve, value, "sensitivity computed");
        SensitivityEstimate {
            value,
            provenance: Provenance::Computed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_760_000_400, 0).unwrap()
    }

    fn tdd() -> TddStats {
        TddStats {
            tdd_1d: 40.0,
            tdd_2d: 40.0,
            tdd_7d: 40.0,
            tdd_24h: 40.0,
        }
    }

    #[test]
    fn curve_interpolates_and_saturates() {
        assert_eq!(curve_factor(100.0), 1.0);
        assert!((curve_factor(110.0) - 0.96).abs() < 1e-9);
        assert_eq!(curve_factor(20.0), 1.5);
        assert_eq!(curve_factor(500.0), 0.55);
    }

    #[test]
    fn outlier_day_is_clamped() {
        let cfg = SensitivityCfg::default();
        let t = TddStats {
            tdd_1d: 200.0,
            ..tdd()
        };
        let v = effective_tdd(&t, &Modes::default(), 100.0, &cfg).unwrap();
        // 1-day contribution is capped at 1.25 x 40
        let expected = (0.3 * 50.0 + 0.3 * 40.0 + 0.4 * 40.0) / 1.0;
        assert!((v - expected).abs() < 1e-9);
    }

    #[test]
    fn second_call_in_bucket_is_cached() {
        let mut est = SensitivityEstimator::new(SensitivityCfg::default(), 50.0);
        let t = tdd();
        let modes = Modes::default();
        let input = SensitivityInput {
            glucose: 140.0,
            delta: 0.0,
            tdd: &t,
            modes: &modes,
            timestamp: t0(),
            persisted: &[],
        };
        let a = est.estimate(&input, t0());
        let b = est.estimate(&input, t0() + Duration::minutes(1));
        assert_eq!(a.provenance, Provenance::Computed);
        assert_eq!(b.provenance, Provenance::Cached);
        assert_eq!(a.value, b.value);
    }

    #[test]
    fn future_timestamp_bypasses_cache() {
        let mut est = SensitivityEstimator::new(SensitivityCfg::default(), 50.0);
        let t = tdd();
        let modes = Modes::default();
        let input = SensitivityInput {
            glucose: 140.0,
            delta: 0.0,
            tdd: &t,
            modes: &modes,
            timestamp: t0() + Duration::minutes(10),
            persisted: &[],
        };
        assert_eq!(est.estimate(&input, t0()).provenance, Provenance::Computed);
        assert_eq!(est.estimate(&input, t0()).provenance, Provenance::Computed);
        assert_eq!(est.cache_len(), 0);
    }

    #[test]
    fn degenerate_inputs_fall_back_and_are_counted() {
        let mut est = SensitivityEstimator::new(SensitivityCfg::default(), 55.0);
        let t = TddStats::default();
        let modes = Modes::default();
        let input = SensitivityInput {
            glucose: 140.0,
            delta: 0.0,
            tdd: &t,
            modes: &modes,
            timestamp: t0(),
            persisted: &[],
        };
        let e = est.estimate(&input, t0());
        assert_eq!(e.provenance, Provenance::Fallback);
        assert_eq!(e.value, 55.0);
        assert_eq!(est.degenerate_events(), 1);
    }

    #[test]
    fn rising_glucose_lowers_isf() {
        let t = tdd();
        let modes = Modes::default();
        let mk = |delta| SensitivityInput {
            glucose: 150.0,
            delta,
            tdd: &t,
            modes: &modes,
            timestamp: t0(),
            persisted: &[],
        };
        let mut a = SensitivityEstimator::new(SensitivityCfg::default(), 50.0);
        let mut b = SensitivityEstimator::new(SensitivityCfg::default(), 50.0);
        let flat = a.estimate(&mk(0.0), t0()).value;
        let rising = b.estimate(&mk(10.0), t0()).value;
        assert!(rising < flat);
    }
}
