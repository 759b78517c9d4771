//! Safety gate: a hard veto built from named predicates and a continuous
//! damping factor applied to any proposed micro-bolus.

use serde::{Deserialize, Serialize};

use crate::config::SafetyCfg;

/// Upper bound of the continuous damping factor.
pub const MAX_BOLUS_SCALE: f64 = 1.4;

/// Inputs of one evaluation. Deltas are mg/dL per 5 minutes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SafetyInput {
    pub bg: f64,
    pub delta: f64,
    pub short_avg_delta: f64,
    pub long_avg_delta: f64,
    pub combined_delta: f64,
    pub acceleration: f64,
    pub eventual_bg: f64,
    pub min_pred_bg: f64,
    pub min_guard_bg: f64,
    pub target: f64,
    pub iob: f64,
    pub max_iob: f64,
    pub max_smb: f64,
    pub meal_active: bool,
    pub honeymoon: bool,
    pub minutes_since_bolus: Option<f64>,
    /// Positive when glucose is falling, mg/dL per hour over 30 minutes.
    pub drop_rate_mgdl_h: f64,
    pub insulin_last_hour: f64,
    pub avg_hourly_tdd: f64,
    pub hypo_pct: f64,
    pub zero_basal_min: f64,
}

impl SafetyInput {
    #[inline]
    fn bolus_within(&self, minutes: f64) -> bool {
        self.minutes_since_bolus.is_some_and(|m| m < minutes)
    }
}

type Predicate = fn(&SafetyInput, &SafetyCfg) -> bool;

fn bg_below_90(i: &SafetyInput, _: &SafetyCfg) -> bool {
    i.bg < 90.0
}
fn honeymoon_iob_accumulation(i: &SafetyInput, _: &SafetyCfg) -> bool {
    i.honeymoon && i.iob > 0.0 && !i.meal_active && i.bg < 180.0
}
fn negative_delta_low_eventual(i: &SafetyInput, _: &SafetyCfg) -> bool {
    i.delta < 0.0 && !i.meal_active && i.eventual_bg < 100.0
}
fn iob_over_twice_smb_low_bg(i: &SafetyInput, _: &SafetyCfg) -> bool {
    i.iob > 2.0 * i.max_smb && (i.bg < 120.0 || i.delta < 0.0)
}
fn accelerating_drop_recent_bolus(i: &SafetyInput, _: &SafetyCfg) -> bool {
    i.delta < 0.0 && i.acceleration < 0.0 && i.bolus_within(30.0)
}
fn decelerating_drop_recent_bolus(i: &SafetyInput, _: &SafetyCfg) -> bool {
    i.delta < -2.0 && i.acceleration > 0.0 && i.bolus_within(20.0)
}
fn prediction_below_target(i: &SafetyInput, _: &SafetyCfg) -> bool {
    i.eventual_bg < i.target && i.bg < 135.0
}
fn min_pred_below_70(i: &SafetyInput, _: &SafetyCfg) -> bool {
    i.min_pred_bg < 70.0
}
fn min_guard_below_65(i: &SafetyInput, _: &SafetyCfg) -> bool {
    i.min_guard_bg < 65.0
}
fn eventual_below_80(i: &SafetyInput, _: &SafetyCfg) -> bool {
    i.eventual_bg < 80.0
}
fn falling_fast(i: &SafetyInput, _: &SafetyCfg) -> bool {
    i.delta <= -5.0
}
fn short_avg_falling_low(i: &SafetyInput, _: &SafetyCfg) -> bool {
    i.short_avg_delta < -2.0 && i.bg < 120.0
}
fn sustained_fall_near_target(i: &SafetyInput, _: &SafetyCfg) -> bool {
    i.long_avg_delta < -1.0 && i.short_avg_delta < -1.0 && i.bg < i.target + 20.0
}
fn iob_at_max(i: &SafetyInput, _: &SafetyCfg) -> bool {
    i.max_iob > 0.0 && i.iob >= i.max_iob
}
fn stacked_iob_no_meal(i: &SafetyInput, _: &SafetyCfg) -> bool {
    !i.meal_active && i.iob > 0.6 * i.max_iob && i.combined_delta < 2.0
}
fn low_plateau_with_iob(i: &SafetyInput, _: &SafetyCfg) -> bool {
    i.bg < 110.0 && i.combined_delta.abs() < 1.0 && i.iob > i.max_smb
}
fn drop_rate_stop(i: &SafetyInput, c: &SafetyCfg) -> bool {
    i.drop_rate_mgdl_h >= c.drop_rate_stop_mgdl_h
}
fn hypo_time_excess_low_bg(i: &SafetyInput, c: &SafetyCfg) -> bool {
    i.hypo_pct >= c.hypo_tir_pct && i.bg < 110.0
}

/// Named hard-veto predicates. Any match vetoes the micro-bolus.
pub const VETO_PREDICATES: [(&str, Predicate); 18] = [
    ("bg_below_90", bg_below_90),
    ("honeymoon_iob_accumulation", honeymoon_iob_accumulation),
    ("negative_delta_low_eventual", negative_delta_low_eventual),
    ("iob_over_twice_smb_low_bg", iob_over_twice_smb_low_bg),
    ("accelerating_drop_recent_bolus", accelerating_drop_recent_bolus),
    ("decelerating_drop_recent_bolus", decelerating_drop_recent_bolus),
    ("prediction_below_target", prediction_below_target),
    ("min_pred_below_70", min_pred_below_70),
    ("min_guard_below_65", min_guard_below_65),
    ("eventual_below_80", eventual_below_80),
    ("falling_fast", falling_fast),
    ("short_avg_falling_low", short_avg_falling_low),
    ("sustained_fall_near_target", sustained_fall_near_target),
    ("iob_at_max", iob_at_max),
    ("stacked_iob_no_meal", stacked_iob_no_meal),
    ("low_plateau_with_iob", low_plateau_with_iob),
    ("drop_rate_stop", drop_rate_stop),
    ("hypo_time_excess_low_bg", hypo_time_excess_low_bg),
];

/// Evaluate every predicate and return the names of those that hold.
pub fn any_of<I, C>(preds: &[(&'static str, fn(&I, &C) -> bool)], input: &I, cfg: &C) -> Vec<&'static str> {
    preds
        .iter()
        .filter(|(_, p)| p(input, cfg))
        .map(|(name, _)| *name)
        .collect()
}

/// Outcome of the continuous damping stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub scale: f64,
    pub stop_basal: bool,
    pub basal_floor_forced: bool,
    pub notes: Vec<String>,
}

/// Multiply in each damping stage, then apply the rapid-rise override and the
/// zero-basal escape.
pub fn safety_adjustment(i: &SafetyInput, cfg: &SafetyCfg) -> Adjustment {
    let mut scale = 1.0;
    let mut stop_basal = false;
    let mut notes = Vec::new();

    if i.drop_rate_mgdl_h >= cfg.drop_rate_damp_mgdl_h {
        scale *= 0.3;
        notes.push(format!("drop {:.0} mg/dL/h: x0.3", i.drop_rate_mgdl_h));
        if i.drop_rate_mgdl_h >= cfg.drop_rate_stop_mgdl_h {
            stop_basal = true;
            notes.push("drop rate stop: basal suspended".to_string());
        }
    }

    let band = if i.combined_delta < 1.0 {
        0.6
    } else if i.combined_delta < 2.0 {
        0.8
    } else {
        (0.7 + 0.05 * i.combined_delta).clamp(0.8, MAX_BOLUS_SCALE)
    };
    scale *= band;
    notes.push(format!("combined delta {:.1}: x{band:.2}", i.combined_delta));

    if i.bg > 160.0 && i.combined_delta < 1.0 {
        scale *= 0.8;
        notes.push("high plateau: x0.8".to_string());
    }
    if i.max_iob > 0.0 && i.iob >= cfg.iob_fraction * i.max_iob {
        scale *= 0.85;
        notes.push(format!("IOB {:.2} near max: x0.85", i.iob));
    }
    if i.avg_hourly_tdd > 0.0 && i.insulin_last_hour > cfg.tdd_rate_ratio * i.avg_hourly_tdd {
        scale *= 0.9;
        notes.push(format!("last hour {:.2} U above TDD rate: x0.9", i.insulin_last_hour));
    }
    if i.hypo_pct >= cfg.hypo_tir_pct {
        scale *= 0.6;
        notes.push(format!("hypo time {:.1}%: x0.6", i.hypo_pct));
    }
    if i.eventual_bg < i.target + 10.0 {
        scale *= 0.5;
        notes.push("prediction near target: x0.5".to_string());
    }

    if i.delta > cfg.rapid_rise_delta {
        scale = 1.0;
        notes.push(format!("rapid rise {:.1}: scale reset to 1.0", i.delta));
    }

    let mut basal_floor_forced = false;
    if i.zero_basal_min >= cfg.zero_basal_ceiling_min {
        stop_basal = false;
        scale = 1.0;
        basal_floor_forced = true;
        notes.push(format!("zero basal for {:.0} min: basal floor forced", i.zero_basal_min));
    }

    Adjustment {
        scale: scale.clamp(0.0, MAX_BOLUS_SCALE),
        stop_basal,
        basal_floor_forced,
        notes,
    }
}

/// Fresh per-cycle verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub veto: bool,
    pub fired_conditions: Vec<String>,
    pub bolus_scale: f64,
    pub stop_basal: bool,
    pub basal_floor_forced: bool,
    pub rationale: String,
}

pub fn evaluate(i: &SafetyInput, cfg: &SafetyCfg) -> SafetyVerdict {
    let fired = any_of(&VETO_PREDICATES, i, cfg);
    let adj = safety_adjustment(i, cfg);
    let veto = !fired.is_empty();
    let mut rationale = adj.notes.join("; ");
    if veto {
        rationale = format!("veto [{}]; {rationale}", fired.join(", "));
        tracing::info!(conditions = ?fired, "safety veto");
    }
    SafetyVerdict {
        veto,
        fired_conditions: fired.into_iter().map(str::to_string).collect(),
        bolus_scale: adj.scale,
        stop_basal: adj.stop_basal,
        basal_floor_forced: adj.basal_floor_forced,
        rationale,
    }
}
