//! `From` implementations bridging `aps_config` types to `aps_core` types.

use crate::config::{
    BasalCfg, EngineCfg, ForecastCfg, MAX_HORIZON_TICKS, Mode, ModeTable, NightGrowthCfg,
    PrebolusCfg, Profile, SafetyCfg, SensitivityCfg, SmbCfg, TrendCfg,
};

/// Overlay TOML overrides onto a table of core defaults.
fn overlay(mut base: ModeTable, o: &aps_config::ModeOverrides) -> ModeTable {
    let pairs = [
        (Mode::Sleep, o.sleep),
        (Mode::Sport, o.sport),
        (Mode::Snack, o.snack),
        (Mode::Meal, o.meal),
        (Mode::Breakfast, o.breakfast),
        (Mode::Lunch, o.lunch),
        (Mode::Dinner, o.dinner),
        (Mode::HighCarb, o.high_carb),
        (Mode::LowCarb, o.low_carb),
        (Mode::Fasting, o.fasting),
    ];
    for (mode, v) in pairs {
        if let Some(v) = v {
            base.set(mode, v);
        }
    }
    base
}

// ── Profile ──────────────────────────────────────────────────────────────────

impl From<&aps_config::Profile> for Profile {
    fn from(c: &aps_config::Profile) -> Self {
        Self {
            current_basal: c.current_basal,
            max_basal: c.max_basal,
            max_daily_basal: c.max_daily_basal.unwrap_or(c.current_basal),
            max_iob: c.max_iob,
            max_smb: c.max_smb,
            isf: c.isf,
            carb_ratio: c.carb_ratio,
            target_low: c.target_low,
            target_high: c.target_high,
            dia_hours: c.dia_hours,
            insulin_peak_min: c.insulin_peak_min,
            max_daily_safety_multiplier: c.max_daily_safety_multiplier,
            current_basal_safety_multiplier: c.current_basal_safety_multiplier,
            age_years: c.age_years,
            utc_offset_min: c.utc_offset_min,
        }
    }
}

// ── Trend / Forecast ─────────────────────────────────────────────────────────

impl From<&aps_config::TrendCfg> for TrendCfg {
    fn from(c: &aps_config::TrendCfg) -> Self {
        Self {
            fresh_min: c.fresh_min,
            weight_delta: c.weight_delta,
            weight_short: c.weight_short,
            weight_long: c.weight_long,
            fit_gap_min: c.fit_gap_min,
            fit_horizon_min: c.fit_horizon_min,
        }
    }
}

impl From<&aps_config::ForecastCfg> for ForecastCfg {
    fn from(c: &aps_config::ForecastCfg) -> Self {
        Self {
            horizon_ticks: c.horizon_ticks.clamp(1, MAX_HORIZON_TICKS),
            enable_uam: c.enable_uam,
            dynamic_isf: c.dynamic_isf,
        }
    }
}

// ── Sensitivity ──────────────────────────────────────────────────────────────

impl From<&aps_config::SensitivityCfg> for SensitivityCfg {
    fn from(c: &aps_config::SensitivityCfg) -> Self {
        Self {
            tdd_weight_1d: c.tdd_weight_1d,
            tdd_weight_2d: c.tdd_weight_2d,
            tdd_weight_7d: c.tdd_weight_7d,
            outlier_floor: c.outlier_floor,
            outlier_ceiling: c.outlier_ceiling,
            hyper_multiplier: c.hyper_multiplier,
            normal_multiplier: c.normal_multiplier,
            kalman_process_var: c.kalman_process_var,
            kalman_measurement_var: c.kalman_measurement_var,
            curve_weight: c.curve_weight,
            delta_correction: c.delta_correction,
            cache_ttl_min: c.cache_ttl_min,
            cache_capacity: c.cache_capacity,
            mode_pct: overlay(SensitivityCfg::default().mode_pct, &c.mode_pct),
        }
    }
}

// ── Safety / Night growth ────────────────────────────────────────────────────

impl From<&aps_config::SafetyCfg> for SafetyCfg {
    fn from(c: &aps_config::SafetyCfg) -> Self {
        Self {
            zero_basal_ceiling_min: c.zero_basal_ceiling_min,
            zero_basal_lookback_min: c.zero_basal_lookback_min,
            drop_rate_damp_mgdl_h: c.drop_rate_damp_mgdl_h,
            drop_rate_stop_mgdl_h: c.drop_rate_stop_mgdl_h,
            hypo_tir_pct: c.hypo_tir_pct,
            iob_fraction: c.iob_fraction,
            tdd_rate_ratio: c.tdd_rate_ratio,
            rapid_rise_delta: c.rapid_rise_delta,
        }
    }
}

impl From<&aps_config::NightGrowthCfg> for NightGrowthCfg {
    fn from(c: &aps_config::NightGrowthCfg) -> Self {
        Self {
            enabled: c.enabled,
            max_age_years: c.max_age_years,
            start_hour: c.start_hour,
            end_hour: c.end_hour,
            min_rise_slope: c.min_rise_slope,
            sustained_min: c.sustained_min,
            eventual_margin: c.eventual_margin,
            max_cob: c.max_cob,
            smb_boost: c.smb_boost,
            basal_boost: c.basal_boost,
            iob_headroom: c.iob_headroom,
            decay_min: c.decay_min,
        }
    }
}

// ── SMB / Basal / Pre-bolus ──────────────────────────────────────────────────

impl From<&aps_config::SmbCfg> for SmbCfg {
    fn from(c: &aps_config::SmbCfg) -> Self {
        Self {
            interval_min: c.interval_min,
            meal_interval_min: c.meal_interval_min,
            active_interval_min: c.active_interval_min,
            night_interval_min: c.night_interval_min,
            rapid_rise_interval_min: c.rapid_rise_interval_min,
            active_steps_30min: c.active_steps_30min,
            delivery_ratio: c.delivery_ratio,
            mpc_horizon_ticks: c.mpc_horizon_ticks,
            mpc_lambda: c.mpc_lambda,
            pi_kp: c.pi_kp,
            pi_ki: c.pi_ki,
            optimizer_mpc_weight: c.optimizer_mpc_weight,
            corrector_epochs: c.corrector_epochs,
            corrector_learning_rate: c.corrector_learning_rate,
            corrector_min_records: c.corrector_min_records,
            corrector_max_fraction: c.corrector_max_fraction,
            mode_factor: overlay(SmbCfg::default().mode_factor, &c.mode_factor),
            morning_factor: c.morning_factor,
            afternoon_factor: c.afternoon_factor,
            evening_factor: c.evening_factor,
            night_factor: c.night_factor,
            hyper_180_factor: c.hyper_180_factor,
            hyper_250_factor: c.hyper_250_factor,
        }
    }
}

impl From<&aps_config::BasalCfg> for BasalCfg {
    fn from(c: &aps_config::BasalCfg) -> Self {
        Self {
            meal_onset_multiplier: c.meal_onset_multiplier,
            early_meal_multiplier: c.early_meal_multiplier,
            slow_rise_gain: c.slow_rise_gain,
            fast_rise_gain: c.fast_rise_gain,
            fast_rise_threshold: c.fast_rise_threshold,
            hyper_180_multiplier: c.hyper_180_multiplier,
            hyper_250_multiplier: c.hyper_250_multiplier,
            honeymoon_low_multiplier: c.honeymoon_low_multiplier,
            honeymoon_high_multiplier: c.honeymoon_high_multiplier,
            pregnancy_multiplier: c.pregnancy_multiplier,
            sport_multiplier: c.sport_multiplier,
            sleep_multiplier: c.sleep_multiplier,
            temp_duration_min: c.temp_duration_min,
            reissue_tolerance: c.reissue_tolerance,
        }
    }
}

impl From<&aps_config::PrebolusCfg> for PrebolusCfg {
    fn from(c: &aps_config::PrebolusCfg) -> Self {
        let defaults = PrebolusCfg::default();
        Self {
            autodrive_units: c.autodrive_units,
            autodrive_min_bg: c.autodrive_min_bg,
            autodrive_min_delta: c.autodrive_min_delta,
            meal_detect_units: c.meal_detect_units,
            meal_detect_min_delta: c.meal_detect_min_delta,
            meal_detect_min_accel: c.meal_detect_min_accel,
            min_bolus_gap_min: c.min_bolus_gap_min,
            phase1_window_min: c.phase1_window_min,
            phase2_start_min: c.phase2_start_min,
            phase2_end_min: c.phase2_end_min,
            phase1_units: overlay(defaults.phase1_units, &c.phase1_units),
            phase2_units: overlay(defaults.phase2_units, &c.phase2_units),
        }
    }
}

// ── Whole config ─────────────────────────────────────────────────────────────

impl From<&aps_config::Config> for EngineCfg {
    fn from(c: &aps_config::Config) -> Self {
        Self {
            profile: (&c.profile).into(),
            trend: (&c.trend).into(),
            forecast: (&c.forecast).into(),
            sensitivity: (&c.sensitivity).into(),
            safety: (&c.safety).into(),
            night_growth: (&c.night_growth).into(),
            smb: (&c.smb).into(),
            basal: (&c.basal).into(),
            prebolus: (&c.prebolus).into(),
        }
    }
}
