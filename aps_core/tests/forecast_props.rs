use aps_core::config::ForecastCfg;
use aps_core::forecast::{BG_CEIL, BG_FLOOR, ForecastInput, predict};
use aps_core::types::{IobTick, MealData, ZeroTempIob};
use aps_core::{ForecastError, GlucoseTrend};
use chrono::{DateTime, Utc};
use proptest::prelude::*;

fn trend(bg: f64, delta: f64, short: f64, long: f64) -> GlucoseTrend {
    GlucoseTrend {
        glucose: bg,
        delta,
        short_avg_delta: short,
        long_avg_delta: long,
        acceleration: 0.0,
        combined_delta: delta,
        fit_r2: 0.0,
        fit_duration_min: 0.0,
        delta_minus5: delta,
        delta_plus5: delta,
        fit_glucose: bg,
        date: DateTime::<Utc>::from_timestamp(1_760_000_000, 0).unwrap(),
    }
}

prop_compose! {
    fn iob_strategy()(
        activity in proptest::collection::vec(-0.02f64..0.12, 48),
        zt_activity in proptest::collection::vec(-0.02f64..0.12, 48),
        iob0 in 0.0f64..8.0,
    ) -> Vec<IobTick> {
        activity
            .into_iter()
            .zip(zt_activity)
            .enumerate()
            .map(|(k, (a, z))| IobTick {
                iob: (iob0 - 0.1 * k as f64).max(0.0),
                activity: a,
                iob_with_zero_temp: Some(ZeroTempIob { iob: 0.0, activity: z }),
            })
            .collect()
    }
}

fn ends_flat_past(series: &[f64], keep: usize) -> bool {
    series.len() > keep + 1 && series[series.len() - 1] == series[series.len() - 2]
}

proptest! {
    #[test]
    fn every_prediction_is_clamped_and_trimmed(
        bg in 40.0f64..400.0,
        delta in -25.0f64..25.0,
        short in -20.0f64..20.0,
        long in -15.0f64..15.0,
        isf in 10.0f64..300.0,
        target in 80.0f64..160.0,
        cob in 0.0f64..80.0,
        remaining in 0.0f64..10.0,
        slope_max in 0.0f64..5.0,
        slope_min in -5.0f64..0.0,
        horizon in 1usize..=48,
        dynamic_isf in any::<bool>(),
        iob in iob_strategy(),
    ) {
        let meal = MealData {
            cob,
            last_carb_age_min: None,
            remaining_ci_peak: remaining,
            slope_from_max_deviation: slope_max,
            slope_from_min_deviation: slope_min,
        };
        let t = trend(bg, delta, short, long);
        let cfg = ForecastCfg { horizon_ticks: horizon, enable_uam: true, dynamic_isf };
        let input = ForecastInput {
            trend: &t,
            iob: &iob,
            isf,
            target,
            meal: &meal,
            insulin_peak_min: 75.0,
            tdd: 40.0,
        };
        let f = predict(&input, &cfg).unwrap();
        for series in [&f.iob_pred, &f.uam_pred, &f.zt_pred] {
            prop_assert!(!series.is_empty());
            prop_assert!(series.iter().all(|v| (BG_FLOOR..=BG_CEIL).contains(v)), "{series:?}");
        }
        prop_assert!(!ends_flat_past(&f.iob_pred, 12));
        prop_assert!(!ends_flat_past(&f.uam_pred, 12));
        let zt = &f.zt_pred;
        if zt.len() > 7 {
            let (prev, last) = (zt[zt.len() - 2], zt[zt.len() - 1]);
            prop_assert!(!(prev <= last && last > target), "{zt:?}");
        }
        prop_assert!((BG_FLOOR..=BG_CEIL).contains(&f.min_pred_bg));
        prop_assert!((BG_FLOOR..=BG_CEIL).contains(&f.min_guard_bg));
    }

    #[test]
    fn missing_zero_temp_tick_is_reported(gap in 0usize..24) {
        let mut iob: Vec<IobTick> = (0..48)
            .map(|_| IobTick {
                iob: 1.0,
                activity: 0.01,
                iob_with_zero_temp: Some(ZeroTempIob { iob: 0.0, activity: 0.0 }),
            })
            .collect();
        iob[gap].iob_with_zero_temp = None;
        let t = trend(150.0, 1.0, 1.0, 1.0);
        let meal = MealData::default();
        let input = ForecastInput {
            trend: &t,
            iob: &iob,
            isf: 50.0,
            target: 110.0,
            meal: &meal,
            insulin_peak_min: 75.0,
            tdd: 40.0,
        };
        let err = predict(&input, &ForecastCfg::default()).unwrap_err();
        prop_assert_eq!(err, ForecastError::MissingSimulationInput { tick: gap });
    }
}
