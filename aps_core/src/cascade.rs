//! Temp-basal rule cascade.
//!
//! An ordered table of `(name, predicate, rate, rationale)` rules evaluated by
//! a generic first-match combinator. If nothing matches, the scheduled basal
//! is used.

use crate::config::{BasalCfg, Mode, Profile};
use crate::modes::is_night_hour;
use crate::types::{ActivityStats, Modes};

/// One named rule over input `I`.
pub struct Rule<I> {
    pub name: &'static str,
    pub applies: fn(&I) -> bool,
    pub rate: fn(&I) -> f64,
    pub rationale: &'static str,
}

/// A rule that fired and the rate it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub rule: &'static str,
    pub rate: f64,
    pub rationale: &'static str,
}

/// Evaluate `rules` top to bottom and return the first that applies.
pub fn first_match<I>(rules: &[Rule<I>], input: &I) -> Option<Choice> {
    rules.iter().find(|r| (r.applies)(input)).map(|r| Choice {
        rule: r.name,
        rate: (r.rate)(input).max(0.0),
        rationale: r.rationale,
    })
}

/// Everything the basal rules look at.
#[derive(Debug, Clone, Copy)]
pub struct BasalInput<'a> {
    pub bg: f64,
    pub delta: f64,
    pub short_avg_delta: f64,
    pub combined_delta: f64,
    pub acceleration: f64,
    pub eventual_bg: f64,
    pub min_pred_bg: f64,
    pub iob: f64,
    pub local_hour: u32,
    pub stop_basal: bool,
    pub basal_floor_forced: bool,
    pub active_steps_30min: u32,
    pub profile: &'a Profile,
    pub modes: &'a Modes,
    pub activity: &'a ActivityStats,
    pub cfg: &'a BasalCfg,
}

impl BasalInput<'_> {
    #[inline]
    fn scheduled(&self) -> f64 {
        self.profile.current_basal
    }

    #[inline]
    fn target(&self) -> f64 {
        self.profile.target()
    }

    fn meal(&self) -> Option<(Mode, f64)> {
        self.modes.active_meal()
    }
}

const MEAL_ONSET_WINDOW_MIN: f64 = 30.0;
const MEAL_ELAPSED_MAX_MIN: f64 = 120.0;
const SNACK_ELAPSED_MAX_MIN: f64 = 60.0;

fn meal_onset(i: &BasalInput<'_>) -> bool {
    i.bg >= 90.0
        && !i.stop_basal
        && i.meal()
            .is_some_and(|(m, e)| m != Mode::Snack && e <= MEAL_ONSET_WINDOW_MIN)
}
fn early_meal(i: &BasalInput<'_>) -> bool {
    i.meal().is_none()
        && (100.0..180.0).contains(&i.bg)
        && i.short_avg_delta > 3.0
        && i.delta > i.short_avg_delta + 2.0
        && i.acceleration > 0.02
}
fn floor_forced(i: &BasalInput<'_>) -> bool {
    i.basal_floor_forced && (i.bg < 100.0 || i.min_pred_bg < 100.0)
}
fn hard_cut(i: &BasalInput<'_>) -> bool {
    !i.basal_floor_forced
        && ((i.min_pred_bg < 100.0 && i.combined_delta <= 0.0) || (i.profile.max_iob > 0.0 && i.iob > i.profile.max_iob))
}
fn safety_stop(i: &BasalInput<'_>) -> bool {
    i.stop_basal && !i.basal_floor_forced
}
fn hypo(i: &BasalInput<'_>) -> bool {
    i.bg < 80.0 && !i.basal_floor_forced
}
fn near_hypo_low(i: &BasalInput<'_>) -> bool {
    (80.0..90.0).contains(&i.bg)
}
fn near_hypo_high(i: &BasalInput<'_>) -> bool {
    (90.0..100.0).contains(&i.bg) && i.delta <= 0.0
}
fn fast_rise(i: &BasalInput<'_>) -> bool {
    i.bg >= 100.0 && i.delta >= i.cfg.fast_rise_threshold
}
fn slow_rise(i: &BasalInput<'_>) -> bool {
    i.bg > i.target() && i.delta > 0.0
}
fn sport(i: &BasalInput<'_>) -> bool {
    i.modes.is_active(Mode::Sport)
}
fn high_activity(i: &BasalInput<'_>) -> bool {
    i.activity.steps_30min >= i.active_steps_30min || i.activity.hr_15min > 120.0
}
fn sleep(i: &BasalInput<'_>) -> bool {
    i.modes.is_active(Mode::Sleep) && i.bg < i.target() + 20.0
}
fn night_low(i: &BasalInput<'_>) -> bool {
    is_night_hour(i.local_hour) && i.bg < i.target()
}
fn meal_elapsed(i: &BasalInput<'_>) -> bool {
    i.bg > i.target()
        && i.meal()
            .is_some_and(|(m, e)| m != Mode::Snack && e > MEAL_ONSET_WINDOW_MIN && e <= MEAL_ELAPSED_MAX_MIN)
}
fn snack_elapsed(i: &BasalInput<'_>) -> bool {
    i.bg > i.target() && i.meal().is_some_and(|(m, e)| m == Mode::Snack && e <= SNACK_ELAPSED_MAX_MIN)
}
// Honeymoon mode has its own hyperglycemia rule below.
fn hyper_250(i: &BasalInput<'_>) -> bool {
    !i.modes.honeymoon && i.bg >= 250.0
}
fn hyper_180(i: &BasalInput<'_>) -> bool {
    !i.modes.honeymoon && i.bg >= 180.0
}
fn honeymoon_low(i: &BasalInput<'_>) -> bool {
    i.modes.honeymoon && i.bg < 140.0
}
fn honeymoon_high(i: &BasalInput<'_>) -> bool {
    i.modes.honeymoon && i.bg >= 180.0
}
fn pregnancy(i: &BasalInput<'_>) -> bool {
    i.modes.pregnancy && i.bg > i.profile.target_high
}

/// Rules in priority order.
pub fn basal_rules<'a>() -> [Rule<BasalInput<'a>>; 22] {
    [
        Rule {
            name: "meal_onset_window",
            applies: meal_onset,
            rate: |i| i.scheduled() * i.cfg.meal_onset_multiplier,
            rationale: "meal mode onset window",
        },
        Rule {
            name: "early_meal_onset",
            applies: early_meal,
            rate: |i| i.scheduled() * i.cfg.early_meal_multiplier,
            rationale: "accelerating rise looks like an unannounced meal",
        },
        Rule {
            name: "zero_basal_floor",
            applies: floor_forced,
            rate: |i| i.scheduled() * 0.5,
            rationale: "zero-basal ceiling reached, resuming reduced basal",
        },
        Rule {
            name: "hard_safety_cut",
            applies: hard_cut,
            rate: |_| 0.0,
            rationale: "predicted low with non-rising trend or IOB over max",
        },
        Rule {
            name: "safety_stop",
            applies: safety_stop,
            rate: |_| 0.0,
            rationale: "safety gate requested basal stop",
        },
        Rule {
            name: "hypo",
            applies: hypo,
            rate: |_| 0.0,
            rationale: "glucose below 80",
        },
        Rule {
            name: "near_hypo_low",
            applies: near_hypo_low,
            rate: |i| i.scheduled() * 0.25,
            rationale: "glucose 80-90",
        },
        Rule {
            name: "near_hypo_high",
            applies: near_hypo_high,
            rate: |i| i.scheduled() * 0.5,
            rationale: "glucose 90-100 and not rising",
        },
        Rule {
            name: "fast_rise",
            applies: fast_rise,
            rate: |i| i.scheduled() * (1.0 + i.cfg.fast_rise_gain * i.delta),
            rationale: "fast rise, rate proportional to delta",
        },
        Rule {
            name: "slow_rise",
            applies: slow_rise,
            rate: |i| i.scheduled() * (1.0 + i.cfg.slow_rise_gain * i.delta),
            rationale: "slow rise above target",
        },
        Rule {
            name: "sport",
            applies: sport,
            rate: |i| i.scheduled() * i.cfg.sport_multiplier,
            rationale: "sport mode",
        },
        Rule {
            name: "high_activity",
            applies: high_activity,
            rate: |i| i.scheduled() * (i.cfg.sport_multiplier + 1.0) / 2.0,
            rationale: "recent steps or heart rate indicate activity",
        },
        Rule {
            name: "sleep",
            applies: sleep,
            rate: |i| i.scheduled() * i.cfg.sleep_multiplier,
            rationale: "sleep mode near target",
        },
        Rule {
            name: "night_below_target",
            applies: night_low,
            rate: |i| i.scheduled() * i.cfg.sleep_multiplier,
            rationale: "night hours below target",
        },
        Rule {
            name: "meal_elapsed",
            applies: meal_elapsed,
            rate: |i| i.scheduled() * (1.0 + i.cfg.meal_onset_multiplier) / 2.0,
            rationale: "meal absorption above target",
        },
        Rule {
            name: "snack_elapsed",
            applies: snack_elapsed,
            rate: |i| i.scheduled() * (1.0 + i.cfg.early_meal_multiplier) / 2.0,
            rationale: "snack absorption above target",
        },
        Rule {
            name: "hyper_250",
            applies: hyper_250,
            rate: |i| i.scheduled() * i.cfg.hyper_250_multiplier,
            rationale: "glucose at or above 250",
        },
        Rule {
            name: "hyper_180",
            applies: hyper_180,
            rate: |i| i.scheduled() * i.cfg.hyper_180_multiplier,
            rationale: "glucose at or above 180",
        },
        Rule {
            name: "honeymoon_low",
            applies: honeymoon_low,
            rate: |i| i.scheduled() * i.cfg.honeymoon_low_multiplier,
            rationale: "honeymoon mode below 140",
        },
        Rule {
            name: "honeymoon_high",
            applies: honeymoon_high,
            rate: |i| i.scheduled() * i.cfg.honeymoon_high_multiplier,
            rationale: "honeymoon mode at or above 180",
        },
        Rule {
            name: "pregnancy",
            applies: pregnancy,
            rate: |i| i.scheduled() * i.cfg.pregnancy_multiplier,
            rationale: "pregnancy mode above target",
        },
        Rule {
            name: "eventual_above_target",
            applies: |i| i.eventual_bg > i.profile.target_high + 40.0 && i.combined_delta >= 0.0,
            rate: |i| i.scheduled() * 1.2,
            rationale: "eventual glucose well above target",
        },
    ]
}

/// Run the cascade, falling back to the scheduled basal.
pub fn choose_basal(input: &BasalInput<'_>) -> Choice {
    let rules = basal_rules();
    first_match(&rules, input).unwrap_or(Choice {
        rule: "profile_basal",
        rate: input.scheduled(),
        rationale: "no rule matched, scheduled basal",
    })
}
