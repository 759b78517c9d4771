//! Runtime configuration for the decision core.
//!
//! These structs are what the engine reads each cycle. They are separate from
//! the TOML-deserialized schema in `aps_config`; see `conversions`.

use serde::{Deserialize, Serialize};

/// Context modes that carry an elapsed-time-since-onset value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Sleep,
    Sport,
    Snack,
    Meal,
    Breakfast,
    Lunch,
    Dinner,
    HighCarb,
    LowCarb,
    Fasting,
}

impl Mode {
    pub const ALL: [Mode; 10] = [
        Mode::Sleep,
        Mode::Sport,
        Mode::Snack,
        Mode::Meal,
        Mode::Breakfast,
        Mode::Lunch,
        Mode::Dinner,
        Mode::HighCarb,
        Mode::LowCarb,
        Mode::Fasting,
    ];

    /// Modes that announce carbohydrate intake.
    pub const MEALS: [Mode; 6] = [
        Mode::HighCarb,
        Mode::Breakfast,
        Mode::Lunch,
        Mode::Dinner,
        Mode::Meal,
        Mode::Snack,
    ];

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Mode::Sleep => "sleep",
            Mode::Sport => "sport",
            Mode::Snack => "snack",
            Mode::Meal => "meal",
            Mode::Breakfast => "breakfast",
            Mode::Lunch => "lunch",
            Mode::Dinner => "dinner",
            Mode::HighCarb => "high_carb",
            Mode::LowCarb => "low_carb",
            Mode::Fasting => "fasting",
        }
    }

    pub const fn is_meal(self) -> bool {
        matches!(
            self,
            Mode::Snack
                | Mode::Meal
                | Mode::Breakfast
                | Mode::Lunch
                | Mode::Dinner
                | Mode::HighCarb
        )
    }
}

/// One value per [`Mode`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeTable {
    values: [f64; 10],
}

impl ModeTable {
    /// Build from values in [`Mode::ALL`] order.
    pub const fn new(values: [f64; 10]) -> Self {
        Self { values }
    }

    pub const fn uniform(v: f64) -> Self {
        Self { values: [v; 10] }
    }

    #[inline]
    pub fn get(&self, mode: Mode) -> f64 {
        self.values[mode.index()]
    }

    pub fn set(&mut self, mode: Mode, v: f64) {
        self.values[mode.index()] = v;
    }
}

/// Therapy profile constants for the current hour.
#[derive(Debug, Clone)]
pub struct Profile {
    pub current_basal: f64,
    pub max_basal: f64,
    pub max_daily_basal: f64,
    pub max_iob: f64,
    pub max_smb: f64,
    pub isf: f64,
    pub carb_ratio: f64,
    pub target_low: f64,
    pub target_high: f64,
    pub dia_hours: f64,
    pub insulin_peak_min: f64,
    pub max_daily_safety_multiplier: f64,
    pub current_basal_safety_multiplier: f64,
    pub age_years: u32,
    pub utc_offset_min: i32,
}

impl Profile {
    /// Midpoint of the target band.
    #[inline]
    pub fn target(&self) -> f64 {
        (self.target_low + self.target_high) / 2.0
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            current_basal: 0.8,
            max_basal: 3.0,
            max_daily_basal: 1.0,
            max_iob: 6.0,
            max_smb: 1.0,
            isf: 50.0,
            carb_ratio: 10.0,
            target_low: 100.0,
            target_high: 120.0,
            dia_hours: 5.0,
            insulin_peak_min: 75.0,
            max_daily_safety_multiplier: 3.0,
            current_basal_safety_multiplier: 4.0,
            age_years: 30,
            utc_offset_min: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrendCfg {
    pub fresh_min: f64,
    pub weight_delta: f64,
    pub weight_short: f64,
    pub weight_long: f64,
    pub fit_gap_min: f64,
    pub fit_horizon_min: f64,
}

impl Default for TrendCfg {
    fn default() -> Self {
        Self {
            fresh_min: 7.0,
            weight_delta: 0.6,
            weight_short: 0.3,
            weight_long: 0.1,
            fit_gap_min: 11.0,
            fit_horizon_min: 47.5,
        }
    }
}

/// Maximum number of 5-minute ticks any series may be simulated for.
pub const MAX_HORIZON_TICKS: usize = 48;

#[derive(Debug, Clone)]
pub struct ForecastCfg {
    /// Ticks simulated per series, capped at [`MAX_HORIZON_TICKS`].
    pub horizon_ticks: usize,
    pub enable_uam: bool,
    pub dynamic_isf: bool,
}

impl Default for ForecastCfg {
    fn default() -> Self {
        Self {
            horizon_ticks: 24,
            enable_uam: true,
            dynamic_isf: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SensitivityCfg {
    pub tdd_weight_1d: f64,
    pub tdd_weight_2d: f64,
    pub tdd_weight_7d: f64,
    pub outlier_floor: f64,
    pub outlier_ceiling: f64,
    pub hyper_multiplier: f64,
    pub normal_multiplier: f64,
    pub kalman_process_var: f64,
    pub kalman_measurement_var: f64,
    pub curve_weight: f64,
    pub delta_correction: f64,
    pub cache_ttl_min: f64,
    pub cache_capacity: usize,
    /// TDD adjustment percentage per mode (100 = unchanged).
    pub mode_pct: ModeTable,
}

impl Default for SensitivityCfg {
    fn default() -> Self {
        Self {
            tdd_weight_1d: 0.3,
            tdd_weight_2d: 0.3,
            tdd_weight_7d: 0.4,
            outlier_floor: 0.75,
            outlier_ceiling: 1.25,
            hyper_multiplier: 1.1,
            normal_multiplier: 1.0,
            kalman_process_var: 4.0,
            kalman_measurement_var: 25.0,
            curve_weight: 0.2,
            delta_correction: 0.02,
            cache_ttl_min: 30.0,
            cache_capacity: 256,
            //                    sleep sport snack meal  brk   lunch dinner hi    lo    fast
            mode_pct: ModeTable::new([90.0, 70.0, 110.0, 120.0, 125.0, 115.0, 115.0, 130.0, 105.0, 90.0]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyCfg {
    pub zero_basal_ceiling_min: f64,
    pub zero_basal_lookback_min: f64,
    pub drop_rate_damp_mgdl_h: f64,
    pub drop_rate_stop_mgdl_h: f64,
    pub hypo_tir_pct: f64,
    pub iob_fraction: f64,
    pub tdd_rate_ratio: f64,
    pub rapid_rise_delta: f64,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            zero_basal_ceiling_min: 60.0,
            zero_basal_lookback_min: 120.0,
            drop_rate_damp_mgdl_h: 25.0,
            drop_rate_stop_mgdl_h: 45.0,
            hypo_tir_pct: 8.0,
            iob_fraction: 0.85,
            tdd_rate_ratio: 1.5,
            rapid_rise_delta: 15.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NightGrowthCfg {
    pub enabled: bool,
    pub max_age_years: u32,
    pub start_hour: u32,
    pub end_hour: u32,
    pub min_rise_slope: f64,
    pub sustained_min: f64,
    pub eventual_margin: f64,
    pub max_cob: f64,
    pub smb_boost: f64,
    pub basal_boost: f64,
    pub iob_headroom: f64,
    pub decay_min: f64,
}

impl Default for NightGrowthCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            max_age_years: 18,
            start_hour: 22,
            end_hour: 6,
            min_rise_slope: 0.15,
            sustained_min: 20.0,
            eventual_margin: 15.0,
            max_cob: 5.0,
            smb_boost: 1.3,
            basal_boost: 1.2,
            iob_headroom: 0.5,
            decay_min: 30.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmbCfg {
    pub interval_min: f64,
    pub meal_interval_min: f64,
    pub active_interval_min: f64,
    pub night_interval_min: f64,
    pub rapid_rise_interval_min: f64,
    pub active_steps_30min: u32,
    /// Fraction of the optimizer's required dose delivered per cycle.
    pub delivery_ratio: f64,
    pub mpc_horizon_ticks: usize,
    pub mpc_lambda: f64,
    pub pi_kp: f64,
    pub pi_ki: f64,
    pub optimizer_mpc_weight: f64,
    pub corrector_epochs: usize,
    pub corrector_learning_rate: f64,
    pub corrector_min_records: usize,
    pub corrector_max_fraction: f64,
    pub mode_factor: ModeTable,
    pub morning_factor: f64,
    pub afternoon_factor: f64,
    pub evening_factor: f64,
    pub night_factor: f64,
    pub hyper_180_factor: f64,
    pub hyper_250_factor: f64,
}

impl Default for SmbCfg {
    fn default() -> Self {
        Self {
            interval_min: 3.0,
            meal_interval_min: 2.0,
            active_interval_min: 6.0,
            night_interval_min: 8.0,
            rapid_rise_interval_min: 1.0,
            active_steps_30min: 1500,
            delivery_ratio: 0.5,
            mpc_horizon_ticks: 6,
            mpc_lambda: 400.0,
            pi_kp: 0.3,
            pi_ki: 0.05,
            optimizer_mpc_weight: 0.7,
            corrector_epochs: 40,
            corrector_learning_rate: 0.05,
            corrector_min_records: 12,
            corrector_max_fraction: 0.5,
            mode_factor: ModeTable::new([0.8, 0.5, 1.1, 1.2, 1.3, 1.2, 1.2, 1.4, 1.05, 0.8]),
            morning_factor: 1.1,
            afternoon_factor: 1.0,
            evening_factor: 0.9,
            night_factor: 0.7,
            hyper_180_factor: 1.15,
            hyper_250_factor: 1.3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BasalCfg {
    pub meal_onset_multiplier: f64,
    pub early_meal_multiplier: f64,
    pub slow_rise_gain: f64,
    pub fast_rise_gain: f64,
    pub fast_rise_threshold: f64,
    pub hyper_180_multiplier: f64,
    pub hyper_250_multiplier: f64,
    pub honeymoon_low_multiplier: f64,
    pub honeymoon_high_multiplier: f64,
    pub pregnancy_multiplier: f64,
    pub sport_multiplier: f64,
    pub sleep_multiplier: f64,
    pub temp_duration_min: u32,
    pub reissue_tolerance: f64,
}

impl Default for BasalCfg {
    fn default() -> Self {
        Self {
            meal_onset_multiplier: 2.5,
            early_meal_multiplier: 2.0,
            slow_rise_gain: 0.05,
            fast_rise_gain: 0.1,
            fast_rise_threshold: 4.0,
            hyper_180_multiplier: 1.5,
            hyper_250_multiplier: 2.0,
            honeymoon_low_multiplier: 0.7,
            honeymoon_high_multiplier: 1.2,
            pregnancy_multiplier: 1.3,
            sport_multiplier: 0.5,
            sleep_multiplier: 0.8,
            temp_duration_min: 30,
            reissue_tolerance: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrebolusCfg {
    pub autodrive_units: f64,
    pub autodrive_min_bg: f64,
    pub autodrive_min_delta: f64,
    pub meal_detect_units: f64,
    pub meal_detect_min_delta: f64,
    pub meal_detect_min_accel: f64,
    pub min_bolus_gap_min: f64,
    pub phase1_window_min: f64,
    pub phase2_start_min: f64,
    pub phase2_end_min: f64,
    pub phase1_units: ModeTable,
    pub phase2_units: ModeTable,
}

impl Default for PrebolusCfg {
    fn default() -> Self {
        Self {
            autodrive_units: 1.0,
            autodrive_min_bg: 110.0,
            autodrive_min_delta: 5.0,
            meal_detect_units: 0.5,
            meal_detect_min_delta: 6.0,
            meal_detect_min_accel: 0.04,
            min_bolus_gap_min: 20.0,
            phase1_window_min: 7.0,
            phase2_start_min: 15.0,
            phase2_end_min: 22.0,
            phase1_units: ModeTable::new([0.0, 0.0, 0.5, 1.0, 1.5, 1.2, 1.2, 2.0, 0.5, 0.0]),
            phase2_units: ModeTable::new([0.0, 0.0, 0.3, 0.8, 1.0, 0.8, 0.8, 1.5, 0.3, 0.0]),
        }
    }
}

/// Everything the engine needs besides the per-cycle context.
#[derive(Debug, Clone, Default)]
pub struct EngineCfg {
    pub profile: Profile,
    pub trend: TrendCfg,
    pub forecast: ForecastCfg,
    pub sensitivity: SensitivityCfg,
    pub safety: SafetyCfg,
    pub night_growth: NightGrowthCfg,
    pub smb: SmbCfg,
    pub basal: BasalCfg,
    pub prebolus: PrebolusCfg,
}
