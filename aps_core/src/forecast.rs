//! Multi-series BG forecast.
//!
//! Three trajectories are grown tick by tick from the current glucose:
//! insulin-only (IOB), unannounced-meal (UAM) and zero-temp (ZT). Each series
//! owns its vector; in dynamic-ISF mode a series' insulin effect reads only
//! its own previous value.

use crate::config::{ForecastCfg, MAX_HORIZON_TICKS};
use crate::error::ForecastError;
use crate::types::{GlucoseTrend, IobTick, MealData};

pub const BG_FLOOR: f64 = 39.0;
pub const BG_CEIL: f64 = 401.0;
/// Carb deviation in the IOB series decays to zero over this many ticks.
const CI_DECAY_TICKS: f64 = 12.0;
/// UAM impact is capped by a linear decay to zero over this many ticks.
const UAM_MAX_TICKS: f64 = 36.0;
/// The UAM floor is not trusted before this many ticks.
const UAM_SETTLE_TICKS: usize = 6;
/// IOB and UAM series are only trimmed past this index.
const IOB_TRIM_FROM: usize = 12;
/// ZT series is only trimmed past this index.
const ZT_TRIM_FROM: usize = 6;

#[inline]
fn round_to(v: f64, digits: i32) -> f64 {
    let p = 10f64.powi(digits);
    (v * p).round() / p
}

/// Everything the forecaster reads for one cycle.
#[derive(Debug, Clone, Copy)]
pub struct ForecastInput<'a> {
    pub trend: &'a GlucoseTrend,
    pub iob: &'a [IobTick],
    pub isf: f64,
    pub target: f64,
    pub meal: &'a MealData,
    pub insulin_peak_min: f64,
    /// Daily dose used by the dynamic-ISF formula.
    pub tdd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub iob_pred: Vec<f64>,
    pub uam_pred: Vec<f64>,
    pub zt_pred: Vec<f64>,
    pub bgi: f64,
    pub ci: f64,
    pub deviation: f64,
    pub naive_eventual_bg: f64,
    pub eventual_bg: f64,
    pub uam_duration_hours: f64,
    pub min_iob_pred_bg: f64,
    pub min_uam_pred_bg: f64,
    pub min_guard_bg: f64,
    pub min_zt_guard_bg: f64,
    pub min_pred_bg: f64,
}

/// Insulin-effect divisor for the log-TDD sensitivity formula.
pub fn dynamic_isf_divisor(insulin_peak_min: f64) -> f64 {
    if insulin_peak_min > 65.0 {
        55.0
    } else if insulin_peak_min > 50.0 {
        65.0
    } else {
        75.0
    }
}

/// Sensitivity the dynamic mode assigns to `bg`; `None` if the inputs are unusable.
pub fn dynamic_isf(bg: f64, tdd: f64, divisor: f64) -> Option<f64> {
    let denom = tdd * (bg.max(BG_FLOOR) / divisor + 1.0).ln();
    let isf = 1800.0 / denom;
    (tdd > 0.0 && isf.is_finite() && isf > 0.0).then_some(isf)
}

/// Drop a flat tail past `IOB_TRIM_FROM`.
pub fn trim_flat_tail(series: &mut Vec<f64>) {
    while series.len() > IOB_TRIM_FROM + 1 && series[series.len() - 1] == series[series.len() - 2] {
        series.pop();
    }
}

/// Drop a non-decreasing tail that is already above `target` past `ZT_TRIM_FROM`.
pub fn trim_rising_tail(series: &mut Vec<f64>, target: f64) {
    while series.len() > ZT_TRIM_FROM + 1 {
        let last = series[series.len() - 1];
        let prev = series[series.len() - 2];
        if prev <= last && last > target {
            series.pop();
        } else {
            break;
        }
    }
}

/// Every tick the simulation reads must carry finite zero-temp activity.
fn check_ticks(ticks: &[IobTick], horizon: usize) -> Result<(), ForecastError> {
    for (tick, step) in ticks.iter().enumerate().take(horizon.max(1)) {
        let zt = step
            .iob_with_zero_temp
            .ok_or(ForecastError::MissingSimulationInput { tick })?;
        if ![step.iob, step.activity, zt.iob, zt.activity].iter().all(|v| v.is_finite()) {
            return Err(ForecastError::NonFiniteInput { tick });
        }
    }
    Ok(())
}

fn finish(series: &mut [f64]) {
    for v in series.iter_mut() {
        *v = v.clamp(BG_FLOOR, BG_CEIL).round();
    }
}

/// Simulate the three series and derive eventual BG and the guard minima.
pub fn predict(input: &ForecastInput<'_>, cfg: &ForecastCfg) -> Result<Forecast, ForecastError> {
    let trend = input.trend;
    let bg = trend.glucose;
    let horizon = cfg.horizon_ticks.min(MAX_HORIZON_TICKS);
    let Some(now_tick) = input.iob.first() else {
        return Err(ForecastError::MissingSimulationInput { tick: 0 });
    };
    check_ticks(input.iob, horizon)?;

    let sens = input.isf;
    let bgi = round_to(-now_tick.activity * sens * 5.0, 2);
    let min_delta = trend.delta.min(trend.short_avg_delta);
    let ci = round_to(min_delta - bgi, 1);
    let uci = ci;

    let mut deviation = (6.0 * (min_delta - bgi)).round();
    if deviation < 0.0 {
        deviation = (6.0 * (trend.short_avg_delta - bgi)).round();
        if deviation < 0.0 {
            deviation = (6.0 * (trend.long_avg_delta - bgi)).round();
        }
    }
    let naive_eventual_bg = (bg - now_tick.iob * sens).round();
    let mut eventual_bg = naive_eventual_bg + deviation;

    let slope_from_deviations = input
        .meal
        .slope_from_max_deviation
        .min(-input.meal.slope_from_min_deviation / 3.0);
    let divisor = dynamic_isf_divisor(input.insulin_peak_min);
    let insulin_peak_ticks = (input.insulin_peak_min / 5.0).round() as usize;

    // Sensitivity for one series, evaluated at that series' own previous value.
    let sens_for = |prev: f64| -> f64 {
        if cfg.dynamic_isf {
            dynamic_isf(prev, input.tdd, divisor).unwrap_or(sens)
        } else {
            sens
        }
    };

    let mut iob_pred = Vec::with_capacity(horizon + 1);
    let mut uam_pred = Vec::with_capacity(horizon + 1);
    let mut zt_pred = Vec::with_capacity(horizon + 1);
    iob_pred.push(bg);
    uam_pred.push(bg);
    zt_pred.push(bg);

    let mut uam_duration_hours = 0.0;
    let mut min_iob_pred = f64::INFINITY;
    let mut min_uam_pred = f64::INFINITY;
    let mut min_iob_guard = f64::INFINITY;
    let mut min_uam_guard = f64::INFINITY;
    let mut min_zt_guard = f64::INFINITY;

    for (tick, step) in input.iob.iter().enumerate().take(horizon) {
        let zt = step
            .iob_with_zero_temp
            .ok_or(ForecastError::MissingSimulationInput { tick })?;

        let last_iob = iob_pred[iob_pred.len() - 1];
        let last_uam = uam_pred[uam_pred.len() - 1];
        let last_zt = zt_pred[zt_pred.len() - 1];

        let iob_bgi = round_to(-step.activity * sens_for(last_iob) * 5.0, 2);
        let uam_bgi = round_to(-step.activity * sens_for(last_uam) * 5.0, 2);
        let zt_bgi = round_to(-zt.activity * sens_for(last_zt) * 5.0, 2);

        let n_iob = iob_pred.len() as f64;
        let pred_dev = ci * (1.0 - (n_iob / CI_DECAY_TICKS).min(1.0));

        let n_uam = uam_pred.len() as f64;
        let uci_slope = (uci + n_uam * slope_from_deviations).max(0.0);
        let uci_cap = (uci * (1.0 - n_uam / UAM_MAX_TICKS)).max(0.0);
        let pred_uci = uci_slope.min(uci_cap);
        if pred_uci > 0.0 {
            uam_duration_hours = round_to((n_uam + 1.0) * 5.0 / 60.0, 1);
        }

        let iob_bg = last_iob + iob_bgi + pred_dev;
        let uam_bg = last_uam + uam_bgi + pred_dev.min(0.0) + pred_uci;
        let zt_bg = last_zt + zt_bgi;

        iob_pred.push(iob_bg);
        uam_pred.push(uam_bg);
        zt_pred.push(zt_bg);

        min_iob_guard = min_iob_guard.min(iob_bg.round());
        min_uam_guard = min_uam_guard.min(uam_bg.round());
        min_zt_guard = min_zt_guard.min(zt_bg.round());
        if iob_pred.len() > insulin_peak_ticks {
            min_iob_pred = min_iob_pred.min(iob_bg.round());
        }
        if uam_pred.len() > UAM_SETTLE_TICKS {
            min_uam_pred = min_uam_pred.min(uam_bg.round());
        }
    }

    finish(&mut iob_pred);
    finish(&mut uam_pred);
    finish(&mut zt_pred);
    trim_flat_tail(&mut iob_pred);
    trim_flat_tail(&mut uam_pred);
    trim_rising_tail(&mut zt_pred, input.target);

    let uam_active = cfg.enable_uam && (ci > 0.0 || input.meal.remaining_ci_peak > 0.0);
    let uam_last = uam_pred[uam_pred.len() - 1];
    if uam_active {
        eventual_bg = eventual_bg.max(uam_last);
    }

    let settle = |v: f64, fallback: f64| if v.is_finite() { v } else { fallback };
    let iob_last = iob_pred[iob_pred.len() - 1];
    let zt_last = zt_pred[zt_pred.len() - 1];
    let min_iob_pred_bg = settle(min_iob_pred, iob_last).clamp(BG_FLOOR, BG_CEIL);
    let min_uam_pred_bg = settle(min_uam_pred, uam_last).clamp(BG_FLOOR, BG_CEIL);
    let min_iob_guard = settle(min_iob_guard, iob_last);
    let min_uam_guard = settle(min_uam_guard, uam_last);
    let min_zt_guard_bg = settle(min_zt_guard, zt_last).clamp(BG_FLOOR, BG_CEIL);
    let min_guard_bg = if uam_active {
        min_iob_guard.min(min_uam_guard)
    } else {
        min_iob_guard
    }
    .clamp(BG_FLOOR, BG_CEIL);
    let min_pred_bg = if uam_active {
        min_iob_pred_bg.min(min_uam_pred_bg)
    } else {
        min_iob_pred_bg
    };

    tracing::debug!(
        bgi,
        ci,
        deviation,
        eventual_bg,
        min_pred_bg,
        min_guard_bg,
        iob_len = iob_pred.len(),
        uam_len = uam_pred.len(),
        zt_len = zt_pred.len(),
        "forecast"
    );

    Ok(Forecast {
        iob_pred,
        uam_pred,
        zt_pred,
        bgi,
        ci,
        deviation,
        naive_eventual_bg,
        eventual_bg,
        uam_duration_hours,
        min_iob_pred_bg,
        min_uam_pred_bg,
        min_guard_bg,
        min_zt_guard_bg,
        min_pred_bg,
    })
}
