//! Pre-emption triggers. At most one fires per cycle, in a fixed priority
//! order, and it replaces the regular micro-bolus and basal cascade.

use crate::config::{BasalCfg, PrebolusCfg, Profile};
use crate::types::Modes;
use crate::util::{floor_bolus, round_bolus};

#[derive(Debug, Clone, Copy)]
pub struct PrebolusInput<'a> {
    pub bg: f64,
    pub delta: f64,
    pub acceleration: f64,
    pub iob: f64,
    pub minutes_since_bolus: Option<f64>,
    pub modes: &'a Modes,
    pub profile: &'a Profile,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prebolus {
    pub trigger: &'static str,
    pub units: f64,
    pub basal_rate: f64,
    /// Skip the safe-maximum clamp on the accompanying basal.
    pub override_safety: bool,
    pub rationale: String,
}

fn gap_ok(i: &PrebolusInput<'_>, min_gap: f64) -> bool {
    i.minutes_since_bolus.is_none_or(|m| m >= min_gap)
}

/// No bolus since `minutes_ago`.
fn quiet_since(i: &PrebolusInput<'_>, minutes_ago: f64) -> bool {
    i.minutes_since_bolus.is_none_or(|m| m > minutes_ago)
}

fn autodrive(i: &PrebolusInput<'_>, cfg: &PrebolusCfg, basal: &BasalCfg) -> Option<Prebolus> {
    (i.modes.autodrive
        && i.bg >= cfg.autodrive_min_bg
        && i.delta >= cfg.autodrive_min_delta
        && gap_ok(i, cfg.min_bolus_gap_min))
    .then(|| Prebolus {
        trigger: "autodrive",
        units: cfg.autodrive_units,
        basal_rate: i.profile.current_basal * basal.meal_onset_multiplier,
        override_safety: true,
        rationale: format!("autodrive: bg {:.0} rising {:+.1}", i.bg, i.delta),
    })
}

fn meal_onset_detected(i: &PrebolusInput<'_>, cfg: &PrebolusCfg, basal: &BasalCfg) -> Option<Prebolus> {
    (!i.modes.meal_active()
        && i.bg >= 100.0
        && i.delta >= cfg.meal_detect_min_delta
        && i.acceleration >= cfg.meal_detect_min_accel
        && gap_ok(i, cfg.min_bolus_gap_min))
    .then(|| Prebolus {
        trigger: "meal_onset_detected",
        units: cfg.meal_detect_units,
        basal_rate: i.profile.current_basal * basal.early_meal_multiplier,
        override_safety: false,
        rationale: format!(
            "meal onset detected: delta {:+.1}, accel {:.3}",
            i.delta, i.acceleration
        ),
    })
}

fn meal_phase(i: &PrebolusInput<'_>, cfg: &PrebolusCfg, basal: &BasalCfg) -> Option<Prebolus> {
    let (mode, elapsed) = i.modes.active_meal()?;
    let (trigger, units) = if elapsed <= cfg.phase1_window_min && quiet_since(i, elapsed) {
        ("meal_phase_1", cfg.phase1_units.get(mode))
    } else if (cfg.phase2_start_min..=cfg.phase2_end_min).contains(&elapsed)
        && quiet_since(i, elapsed - cfg.phase2_start_min)
    {
        ("meal_phase_2", cfg.phase2_units.get(mode))
    } else {
        return None;
    };
    (units > 0.0).then(|| Prebolus {
        trigger,
        units,
        basal_rate: i.profile.current_basal * basal.meal_onset_multiplier,
        override_safety: false,
        rationale: format!("{trigger} for {} at {elapsed:.0} min", mode.name()),
    })
}

/// First trigger that fires, with its amount rounded to the pump step and
/// never above the IOB headroom.
pub fn evaluate(i: &PrebolusInput<'_>, cfg: &PrebolusCfg, basal: &BasalCfg, max_iob: f64) -> Option<Prebolus> {
    let triggers: [fn(&PrebolusInput<'_>, &PrebolusCfg, &BasalCfg) -> Option<Prebolus>; 3] =
        [autodrive, meal_onset_detected, meal_phase];
    let mut p = triggers.iter().find_map(|t| t(i, cfg, basal))?;
    let headroom = max_iob - i.iob;
    p.units = round_bolus(p.units).min(floor_bolus(headroom));
    if p.units <= 0.0 {
        tracing::debug!(trigger = p.trigger, "pre-bolus skipped: no IOB headroom");
        return None;
    }
    tracing::info!(trigger = p.trigger, units = p.units, "pre-bolus");
    Some(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(modes: &'a Modes, profile: &'a Profile) -> PrebolusInput<'a> {
        PrebolusInput {
            bg: 130.0,
            delta: 2.0,
            acceleration: 0.0,
            iob: 0.5,
            minutes_since_bolus: None,
            modes,
            profile,
        }
    }

    #[test]
    fn autodrive_wins_over_phase_window() {
        let modes = Modes {
            autodrive: true,
            lunch: Some(3.0),
            ..Modes::default()
        };
        let p = Profile::default();
        let i = PrebolusInput {
            delta: 6.0,
            ..input(&modes, &p)
        };
        let out = evaluate(&i, &PrebolusCfg::default(), &BasalCfg::default(), 6.0).unwrap();
        assert_eq!(out.trigger, "autodrive");
        assert!(out.override_safety);
    }

    #[test]
    fn phase_two_needs_quiet_window() {
        let modes = Modes {
            dinner: Some(18.0),
            ..Modes::default()
        };
        let p = Profile::default();
        let fresh = input(&modes, &p);
        let out = evaluate(&fresh, &PrebolusCfg::default(), &BasalCfg::default(), 6.0).unwrap();
        assert_eq!(out.trigger, "meal_phase_2");
        assert!((out.units - 0.8).abs() < 1e-9);

        let already = PrebolusInput {
            minutes_since_bolus: Some(2.0),
            ..fresh
        };
        assert!(evaluate(&already, &PrebolusCfg::default(), &BasalCfg::default(), 6.0).is_none());
    }

    #[test]
    fn amount_is_clamped_to_headroom() {
        let modes = Modes {
            high_carb: Some(1.0),
            ..Modes::default()
        };
        let p = Profile::default();
        let i = PrebolusInput {
            iob: 5.5,
            ..input(&modes, &p)
        };
        let out = evaluate(&i, &PrebolusCfg::default(), &BasalCfg::default(), 6.0).unwrap();
        assert!((out.units - 0.5).abs() < 1e-9);
    }

    #[test]
    fn clamped_amount_rounds_down() {
        let modes = Modes {
            lunch: Some(3.0),
            ..Modes::default()
        };
        let p = Profile::default();
        let i = PrebolusInput {
            iob: 4.97,
            ..input(&modes, &p)
        };
        let out = evaluate(&i, &PrebolusCfg::default(), &BasalCfg::default(), 6.0).unwrap();
        assert_eq!(out.trigger, "meal_phase_1");
        assert_eq!(out.units, 1.0);
        assert!(i.iob + out.units <= 6.0);
    }

    #[test]
    fn headroom_below_one_step_skips() {
        let modes = Modes {
            lunch: Some(3.0),
            ..Modes::default()
        };
        let p = Profile::default();
        let i = PrebolusInput {
            iob: 5.98,
            ..input(&modes, &p)
        };
        assert!(evaluate(&i, &PrebolusCfg::default(), &BasalCfg::default(), 6.0).is_none());
    }
}
