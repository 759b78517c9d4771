//! Micro-bolus blend: a discretized model-predictive search and a PI term,
//! mixed with the baseline estimate by a fit-confidence score.

use crate::config::SmbCfg;
use crate::types::{GlucoseTrend, MealData};
use crate::util::BOLUS_STEP_U;

/// Feature vector handed to the external regression model, in this order:
/// glucose, delta, short average delta, long average delta, acceleration,
/// IOB, COB, ISF, target, 24 h TDD.
pub fn model_features(trend: &GlucoseTrend, iob: f64, meal: &MealData, isf: f64, target: f64, tdd_24h: f64) -> Vec<f64> {
    vec![
        trend.glucose,
        trend.delta,
        trend.short_avg_delta,
        trend.long_avg_delta,
        trend.acceleration,
        iob,
        meal.cob,
        isf,
        target,
        tdd_24h,
    ]
}

/// Dose estimate used when no external model value is available.
pub fn pre_model_baseline(eventual_bg: f64, target: f64, isf: f64, cfg: &SmbCfg) -> f64 {
    if isf <= 0.0 || !eventual_bg.is_finite() {
        return 0.0;
    }
    ((eventual_bg - target) / isf).max(0.0) * cfg.delivery_ratio
}

/// Linear BG model: glucose moves from `bg` toward `eventual_bg` over the
/// horizon while a dose `d` acts proportionally.
fn mpc_cost(bg: f64, eventual_bg: f64, target: f64, isf: f64, dose: f64, cfg: &SmbCfg) -> f64 {
    let h = cfg.mpc_horizon_ticks.max(1) as f64;
    let mut cost = 0.0;
    for k in 1..=cfg.mpc_horizon_ticks.max(1) {
        let frac = k as f64 / h;
        let p = bg + (eventual_bg - bg) * frac - dose * isf * frac;
        cost += (p - target).powi(2);
    }
    cost + cfg.mpc_lambda * dose * dose
}

/// Candidate dose in `[0, max_dose]` (0.05 U grid) with the lowest cost.
pub fn mpc_dose(bg: f64, eventual_bg: f64, target: f64, isf: f64, max_dose: f64, cfg: &SmbCfg) -> f64 {
    if max_dose <= 0.0 || isf <= 0.0 {
        return 0.0;
    }
    let steps = (max_dose / BOLUS_STEP_U).floor() as usize;
    (0..=steps)
        .map(|s| s as f64 * BOLUS_STEP_U)
        .map(|d| (d, mpc_cost(bg, eventual_bg, target, isf, d, cfg)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(0.0, |(d, _)| d)
}

/// Proportional term on the current error plus an integral over the
/// recent error history (mg/dL·h).
pub fn pi_dose(bg: f64, target: f64, integral_mgdl_h: f64, isf: f64, cfg: &SmbCfg) -> f64 {
    if isf <= 0.0 {
        return 0.0;
    }
    ((cfg.pi_kp * (bg - target) + cfg.pi_ki * integral_mgdl_h) / isf).max(0.0)
}

/// Trust in the baseline: good fits with little curvature score high.
pub fn confidence(trend: &GlucoseTrend) -> f64 {
    let r2 = if trend.fit_r2.is_finite() { trend.fit_r2.clamp(0.0, 1.0) } else { 0.0 };
    let curvature = (trend.acceleration.abs() / 0.2).min(1.0);
    r2 * (1.0 - curvature)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blend {
    pub mpc: f64,
    pub pi: f64,
    pub optimizer: f64,
    pub confidence: f64,
    pub units: f64,
}

#[allow(clippy::too_many_arguments)]
pub fn blend(
    baseline: f64,
    trend: &GlucoseTrend,
    eventual_bg: f64,
    target: f64,
    isf: f64,
    integral_mgdl_h: f64,
    max_dose: f64,
    cfg: &SmbCfg,
) -> Blend {
    let mpc = mpc_dose(trend.glucose, eventual_bg, target, isf, max_dose, cfg);
    let pi = pi_dose(trend.glucose, target, integral_mgdl_h, isf, cfg);
    let optimizer = (cfg.optimizer_mpc_weight * mpc + (1.0 - cfg.optimizer_mpc_weight) * pi) * cfg.delivery_ratio;
    let c = confidence(trend);
    let units = (c * baseline + (1.0 - c) * optimizer).max(0.0);
    Blend {
        mpc,
        pi,
        optimizer,
        confidence: c,
        units,
    }
}
