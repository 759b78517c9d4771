use aps_core::config::SensitivityCfg;
use aps_core::sensitivity::{ISF_MAX, ISF_MIN, SensitivityEstimator, SensitivityInput};
use aps_core::types::{Modes, PersistedIsf, TddStats};
use aps_core::Provenance;
use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

fn t0() -> DateTime<Utc> {
    // aligned to a 30-minute bucket
    DateTime::<Utc>::from_timestamp(1_760_000_400, 0).unwrap()
}

fn tdd(v: f64) -> TddStats {
    TddStats {
        tdd_1d: v,
        tdd_2d: v,
        tdd_7d: v,
        tdd_24h: v,
    }
}

#[test]
fn persisted_estimate_is_served_then_cached() {
    let mut est = SensitivityEstimator::new(SensitivityCfg::default(), 50.0);
    let t = tdd(40.0);
    let modes = Modes::default();
    let persisted = [PersistedIsf {
        bucket: t0().timestamp().div_euclid(1800),
        glucose: 140,
        value: 42.0,
    }];
    let input = SensitivityInput {
        glucose: 140.2,
        delta: 1.0,
        tdd: &t,
        modes: &modes,
        timestamp: t0(),
        persisted: &persisted,
    };
    let first = est.estimate(&input, t0());
    assert_eq!(first.provenance, Provenance::Database);
    assert_eq!(first.value, 42.0);
    let second = est.estimate(&input, t0() + Duration::minutes(5));
    assert_eq!(second.provenance, Provenance::Cached);
}

#[test]
fn expired_entry_is_recomputed() {
    let mut est = SensitivityEstimator::new(SensitivityCfg::default(), 50.0);
    let t = tdd(40.0);
    let modes = Modes::default();
    let input = SensitivityInput {
        glucose: 120.0,
        delta: 0.0,
        tdd: &t,
        modes: &modes,
        timestamp: t0(),
        persisted: &[],
    };
    est.estimate(&input, t0());
    let late = est.estimate(&input, t0() + Duration::minutes(31));
    assert_eq!(late.provenance, Provenance::Computed);
}

#[test]
fn reset_clears_cache() {
    let mut est = SensitivityEstimator::new(SensitivityCfg::default(), 50.0);
    let t = tdd(40.0);
    let modes = Modes::default();
    let input = SensitivityInput {
        glucose: 120.0,
        delta: 0.0,
        tdd: &t,
        modes: &modes,
        timestamp: t0(),
        persisted: &[],
    };
    est.estimate(&input, t0());
    assert_eq!(est.cache_len(), 1);
    est.reset();
    assert_eq!(est.cache_len(), 0);
    assert_eq!(est.estimate(&input, t0()).provenance, Provenance::Computed);
}

#[test]
fn nan_glucose_uses_last_valid_value() {
    let mut est = SensitivityEstimator::new(SensitivityCfg::default(), 50.0);
    let t = tdd(40.0);
    let modes = Modes::default();
    let good = SensitivityInput {
        glucose: 150.0,
        delta: 0.0,
        tdd: &t,
        modes: &modes,
        timestamp: t0(),
        persisted: &[],
    };
    let v = est.estimate(&good, t0()).value;
    let bad = SensitivityInput {
        glucose: f64::NAN,
        ..good
    };
    let e = est.estimate(&bad, t0());
    assert_eq!(e.provenance, Provenance::Fallback);
    assert_eq!(e.value, v);
    assert_eq!(est.degenerate_events(), 1);
}

proptest! {
    #[test]
    fn estimate_stays_in_range(
        glucose in 40.0f64..400.0,
        delta in -20.0f64..20.0,
        day in 1.0f64..200.0,
        week in 1.0f64..200.0,
        sport in any::<bool>(),
    ) {
        let mut est = SensitivityEstimator::new(SensitivityCfg::default(), 50.0);
        let t = TddStats { tdd_1d: day, tdd_2d: day, tdd_7d: week, tdd_24h: day };
        let modes = Modes { sport: sport.then_some(10.0), ..Modes::default() };
        let e = est.estimate(
            &SensitivityInput { glucose, delta, tdd: &t, modes: &modes, timestamp: t0(), persisted: &[] },
            t0(),
        );
        prop_assert!((ISF_MIN..=ISF_MAX).contains(&e.value));
        prop_assert_eq!(e.provenance, Provenance::Computed);
    }
}
