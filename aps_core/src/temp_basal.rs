//! Final "set temp basal" step shared by every path.

use crate::config::{BasalCfg, Profile};
use crate::types::{BasalAction, TempBasal};
use crate::util::round_to_step;

const RATE_STEP: f64 = 0.05;
/// A running temp with more than this left is not reissued.
const MIN_REMAINING_MIN: f64 = 15.0;

#[derive(Debug, Clone, PartialEq)]
pub struct BasalCommand {
    pub rate: f64,
    pub duration_min: u32,
    pub action: BasalAction,
    pub note: String,
}

/// Highest rate allowed without an explicit safety override.
pub fn safe_max_basal(profile: &Profile, ngr_basal_multiplier: f64) -> f64 {
    let m = profile
        .max_basal
        .min(profile.max_daily_safety_multiplier * profile.max_daily_basal)
        .min(profile.current_basal_safety_multiplier * profile.current_basal);
    (m * ngr_basal_multiplier.max(1.0)).max(0.0)
}

/// Clamp, round and compare the candidate against what is already running.
pub fn finalize(
    candidate: f64,
    profile: &Profile,
    current: Option<&TempBasal>,
    ngr_basal_multiplier: f64,
    override_safety: bool,
    cfg: &BasalCfg,
) -> BasalCommand {
    let candidate = if candidate.is_finite() { candidate.max(0.0) } else { 0.0 };
    let max = safe_max_basal(profile, ngr_basal_multiplier);
    let (clamped, mut note) = if override_safety || candidate <= max {
        (candidate, String::new())
    } else {
        (max, format!("clamped {candidate:.2} to safe max {max:.2}; "))
    };
    let rate = round_to_step(clamped, RATE_STEP);
    let duration_min = cfg.temp_duration_min;

    // A zero rate is only equivalent to a running zero temp.
    let equivalent = |running: f64| {
        if rate == 0.0 {
            running == 0.0
        } else {
            (running - rate).abs() <= cfg.reissue_tolerance
        }
    };
    if let Some(t) = current
        && equivalent(t.rate)
        && t.remaining_min() > MIN_REMAINING_MIN
    {
        note.push_str(&format!(
            "temp {:.2} U/h has {:.0} min left, continuing",
            t.rate,
            t.remaining_min()
        ));
        return BasalCommand {
            rate: t.rate,
            duration_min,
            action: BasalAction::Continue,
            note,
        };
    }

    if (rate - round_to_step(profile.current_basal, RATE_STEP)).abs() < 1e-9 {
        let action = if current.is_some() {
            note.push_str("rate equals scheduled basal, cancelling temp");
            BasalAction::Cancel
        } else {
            note.push_str("scheduled basal already running");
            BasalAction::Continue
        };
        return BasalCommand {
            rate,
            duration_min,
            action,
            note,
        };
    }

    note.push_str(&format!("set temp {rate:.2} U/h for {duration_min} min"));
    BasalCommand {
        rate,
        duration_min,
        action: BasalAction::Set,
        note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile {
            current_basal: 1.0,
            max_basal: 3.5,
            max_daily_basal: 1.0,
            ..Profile::default()
        }
    }

    #[test]
    fn clamps_to_smallest_limit() {
        let p = profile();
        assert_eq!(safe_max_basal(&p, 1.0), 3.0);
        let c = finalize(5.0, &p, None, 1.0, false, &BasalCfg::default());
        assert_eq!(c.rate, 3.0);
        assert_eq!(c.action, BasalAction::Set);
    }

    #[test]
    fn override_skips_clamp() {
        let c = finalize(5.0, &profile(), None, 1.0, true, &BasalCfg::default());
        assert_eq!(c.rate, 5.0);
    }

    #[test]
    fn equivalent_running_temp_continues() {
        let t = TempBasal {
            rate: 1.52,
            duration_min: 30.0,
            minutes_running: 5.0,
        };
        let c = finalize(1.5, &profile(), Some(&t), 1.0, false, &BasalCfg::default());
        assert_eq!(c.action, BasalAction::Continue);
        assert_eq!(c.rate, 1.52);
    }

    #[test]
    fn zero_rate_is_never_within_tolerance_of_a_low_temp() {
        let low = TempBasal {
            rate: 0.1,
            duration_min: 30.0,
            minutes_running: 5.0,
        };
        let c = finalize(0.0, &profile(), Some(&low), 1.0, false, &BasalCfg::default());
        assert_eq!(c.action, BasalAction::Set);
        assert_eq!(c.rate, 0.0);

        let zero = TempBasal { rate: 0.0, ..low };
        let c = finalize(0.0, &profile(), Some(&zero), 1.0, false, &BasalCfg::default());
        assert_eq!(c.action, BasalAction::Continue);
    }

    #[test]
    fn scheduled_rate_cancels_temp() {
        let t = TempBasal {
            rate: 0.0,
            duration_min: 30.0,
            minutes_running: 25.0,
        };
        let c = finalize(1.0, &profile(), Some(&t), 1.0, false, &BasalCfg::default());
        assert_eq!(c.action, BasalAction::Cancel);
    }
}
