//! Mode, time-of-day and hyperglycemia factors, and the micro-bolus interval.

use crate::config::SmbCfg;
use crate::types::{ActivityStats, Modes};

/// Local hours treated as night for interval and factor purposes.
#[inline]
pub fn is_night_hour(hour: u32) -> bool {
    !(6..22).contains(&hour)
}

/// Factor of the highest-priority active timed mode, 1.0 when none.
pub fn mode_factor(modes: &Modes, cfg: &SmbCfg) -> f64 {
    modes.primary().map_or(1.0, |(m, _)| cfg.mode_factor.get(m))
}

pub fn time_of_day_factor(local_hour: u32, cfg: &SmbCfg) -> f64 {
    match local_hour {
        6..=10 => cfg.morning_factor,
        11..=16 => cfg.afternoon_factor,
        17..=21 => cfg.evening_factor,
        _ => cfg.night_factor,
    }
}

pub fn hyper_factor(bg: f64, cfg: &SmbCfg) -> f64 {
    if bg >= 250.0 {
        cfg.hyper_250_factor
    } else if bg >= 180.0 {
        cfg.hyper_180_factor
    } else {
        1.0
    }
}

/// Combined scaling applied to the blended micro-bolus.
///
/// An active meal mode replaces the time-of-day factor.
pub fn bolus_mode_scale(modes: &Modes, local_hour: u32, bg: f64, cfg: &SmbCfg) -> f64 {
    let tod = if modes.meal_active() {
        1.0
    } else {
        time_of_day_factor(local_hour, cfg)
    };
    mode_factor(modes, cfg) * tod * hyper_factor(bg, cfg)
}

/// Minimum minutes between micro-boluses.
pub fn smb_interval_min(
    modes: &Modes,
    activity: &ActivityStats,
    local_hour: u32,
    delta: f64,
    rapid_rise_delta: f64,
    cfg: &SmbCfg,
) -> f64 {
    if delta > rapid_rise_delta {
        cfg.rapid_rise_interval_min
    } else if modes.meal_active() {
        cfg.meal_interval_min
    } else if activity.steps_30min >= cfg.active_steps_30min {
        cfg.active_interval_min
    } else if is_night_hour(local_hour) {
        cfg.night_interval_min
    } else {
        cfg.interval_min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_priority() {
        let cfg = SmbCfg::default();
        let idle = ActivityStats::default();
        let busy = ActivityStats {
            steps_30min: 3000,
            ..ActivityStats::default()
        };
        let meal = Modes {
            lunch: Some(10.0),
            ..Modes::default()
        };
        assert_eq!(smb_interval_min(&Modes::default(), &idle, 12, 20.0, 15.0, &cfg), 1.0);
        assert_eq!(smb_interval_min(&meal, &busy, 2, 3.0, 15.0, &cfg), 2.0);
        assert_eq!(smb_interval_min(&Modes::default(), &busy, 2, 3.0, 15.0, &cfg), 6.0);
        assert_eq!(smb_interval_min(&Modes::default(), &idle, 2, 3.0, 15.0, &cfg), 8.0);
        assert_eq!(smb_interval_min(&Modes::default(), &idle, 12, 3.0, 15.0, &cfg), 3.0);
    }

    #[test]
    fn meal_replaces_time_of_day() {
        let cfg = SmbCfg::default();
        let dinner = Modes {
            dinner: Some(5.0),
            ..Modes::default()
        };
        assert!((bolus_mode_scale(&dinner, 3, 150.0, &cfg) - 1.2).abs() < 1e-9);
        assert!((bolus_mode_scale(&Modes::default(), 3, 150.0, &cfg) - 0.7).abs() < 1e-9);
        assert!((bolus_mode_scale(&Modes::default(), 12, 260.0, &cfg) - 1.3).abs() < 1e-9);
    }
}
