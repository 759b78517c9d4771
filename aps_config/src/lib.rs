#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and CGM history parsing for the dosing decision core.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The CGM CSV loader enforces headers and strictly ordered timestamps
//!   before handing rows to the core, newest first.
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// CGM history CSV schema.
///
/// Expected headers:
/// timestamp,mg_dl,gap_filled
///
/// Example:
/// timestamp,mg_dl,gap_filled
/// 2026-03-01T06:55:00Z,142,false
/// 2026-03-01T07:00:00Z,146,false
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct GlucoseRow {
    pub timestamp: DateTime<Utc>,
    pub mg_dl: f64,
    #[serde(default)]
    pub gap_filled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Profile {
    /// Scheduled basal for the current hour (U/h)
    pub current_basal: f64,
    pub max_basal: f64,
    /// Highest scheduled basal of the day; defaults to `current_basal` when absent
    #[serde(default)]
    pub max_daily_basal: Option<f64>,
    pub max_iob: f64,
    pub max_smb: f64,
    /// Profile insulin sensitivity (mg/dL per U)
    pub isf: f64,
    pub carb_ratio: f64,
    pub target_low: f64,
    pub target_high: f64,
    #[serde(default = "default_dia_hours")]
    pub dia_hours: f64,
    #[serde(default = "default_insulin_peak_min")]
    pub insulin_peak_min: f64,
    #[serde(default = "default_daily_safety_multiplier")]
    pub max_daily_safety_multiplier: f64,
    #[serde(default = "default_current_basal_safety_multiplier")]
    pub current_basal_safety_multiplier: f64,
    #[serde(default = "default_age_years")]
    pub age_years: u32,
    /// Local time offset from UTC in minutes (night windows, time-of-day factors)
    #[serde(default)]
    pub utc_offset_min: i32,
}

fn default_dia_hours() -> f64 {
    5.0
}
fn default_insulin_peak_min() -> f64 {
    75.0
}
fn default_daily_safety_multiplier() -> f64 {
    3.0
}
fn default_current_basal_safety_multiplier() -> f64 {
    4.0
}
fn default_age_years() -> u32 {
    30
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TrendCfg {
    /// Newest sample older than this is stale
    pub fresh_min: f64,
    pub weight_delta: f64,
    pub weight_short: f64,
    pub weight_long: f64,
    /// Largest gap between consecutive samples allowed inside the quadratic fit
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ForecastCfg {
    /// Number of 5-minute ticks simulated per series
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

/// Per-mode overrides; absent entries keep the core defaults.
#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(default)]
pub struct ModeOverrides {
    pub sleep: Option<f64>,
    pub sport: Option<f64>,
    pub snack: Option<f64>,
    pub meal: Option<f64>,
    pub breakfast: Option<f64>,
    pub lunch: Option<f64>,
    pub dinner: Option<f64>,
    pub high_carb: Option<f64>,
    pub low_carb: Option<f64>,
    pub fasting: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SensitivityCfg {
    pub tdd_weight_1d: f64,
    pub tdd_weight_2d: f64,
    pub tdd_weight_7d: f64,
    /// Daily TDD is clamped to [floor, ceiling] x 7-day average before blending
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
    /// TDD scaling percentage per active mode (100 = unchanged)
    pub mode_pct: ModeOverrides,
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
            mode_pct: ModeOverrides::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NightGrowthCfg {
    pub enabled: bool,
    /// Only patients strictly younger than this are eligible
    pub max_age_years: u32,
    pub start_hour: u32,
    pub end_hour: u32,
    /// mg/dL per 5 minutes
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SmbCfg {
    pub interval_min: f64,
    pub meal_interval_min: f64,
    pub active_interval_min: f64,
    pub night_interval_min: f64,
    pub rapid_rise_interval_min: f64,
    /// Steps in the last 30 minutes above which the patient counts as active
    pub active_steps_30min: u32,
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
    pub mode_factor: ModeOverrides,
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
            mode_factor: ModeOverrides::default(),
            morning_factor: 1.1,
            afternoon_factor: 1.0,
            evening_factor: 0.9,
            night_factor: 0.7,
            hyper_180_factor: 1.15,
            hyper_250_factor: 1.3,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
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
    /// Running temp within this many U/h of the candidate is left alone
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PrebolusCfg {
    pub autodrive_units: f64,
    pub autodrive_min_bg: f64,
    pub autodrive_min_delta: f64,
    pub meal_detect_units: f64,
    pub meal_detect_min_delta: f64,
    /// mg/dL/min^2
    pub meal_detect_min_accel: f64,
    pub min_bolus_gap_min: f64,
    pub phase1_window_min: f64,
    pub phase2_start_min: f64,
    pub phase2_end_min: f64,
    pub phase1_units: ModeOverrides,
    pub phase2_units: ModeOverrides,
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
            phase1_units: ModeOverrides::default(),
            phase2_units: ModeOverrides::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub profile: Profile,
    #[serde(default)]
    pub trend: TrendCfg,
    #[serde(default)]
    pub forecast: ForecastCfg,
    #[serde(default)]
    pub sensitivity: SensitivityCfg,
    #[serde(default)]
    pub safety: SafetyCfg,
    #[serde(default)]
    pub night_growth: NightGrowthCfg,
    #[serde(default)]
    pub smb: SmbCfg,
    #[serde(default)]
    pub basal: BasalCfg,
    #[serde(default)]
    pub prebolus: PrebolusCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Load CGM history from a CSV file, returned newest first.
///
/// Rows must be strictly ordered by timestamp (either direction) without
/// duplicates; anything else is rejected with the offending row number.
pub fn load_glucose_csv(path: &std::path::Path) -> eyre::Result<Vec<GlucoseRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open glucose CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["timestamp", "mg_dl", "gap_filled"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "glucose CSV must have headers 'timestamp,mg_dl,gap_filled', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<GlucoseRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    order_newest_first(rows)
}

/// Check strict timestamp ordering and return the rows newest first.
pub fn order_newest_first(mut rows: Vec<GlucoseRow>) -> eyre::Result<Vec<GlucoseRow>> {
    let mut dir: i8 = 0; // 1 for ascending, -1 for descending
    for i in 1..rows.len() {
        let d = rows[i].timestamp - rows[i - 1].timestamp;
        if d.is_zero() {
            eyre::bail!(
                "glucose rows have duplicate timestamps at index {} and {}",
                i - 1,
                i
            );
        }
        let step_dir = if d > chrono::Duration::zero() { 1 } else { -1 };
        if dir == 0 {
            dir = step_dir;
        } else if dir != step_dir {
            eyre::bail!("glucose timestamps must be strictly ordered (ascending or descending)");
        }
    }
    if dir > 0 {
        rows.reverse();
    }
    Ok(rows)
}

fn check_mode_overrides(name: &str, m: &ModeOverrides, lo: f64, hi: f64) -> eyre::Result<()> {
    let entries = [
        ("sleep", m.sleep),
        ("sport", m.sport),
        ("snack", m.snack),
        ("meal", m.meal),
        ("breakfast", m.breakfast),
        ("lunch", m.lunch),
        ("dinner", m.dinner),
        ("high_carb", m.high_carb),
        ("low_carb", m.low_carb),
        ("fasting", m.fasting),
    ];
    for (key, v) in entries {
        if let Some(v) = v
            && !(v.is_finite() && (lo..=hi).contains(&v))
        {
            eyre::bail!("{name}.{key} must be in [{lo}, {hi}]");
        }
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Profile
        let p = &self.profile;
        if !(p.current_basal >= 0.0 && p.current_basal <= 10.0) {
            eyre::bail!("profile.current_basal must be in [0.0, 10.0]");
        }
        if !(p.max_basal > 0.0 && p.max_basal <= 20.0) {
            eyre::bail!("profile.max_basal must be in (0.0, 20.0]");
        }
        if let Some(mdb) = p.max_daily_basal
            && !(mdb >= 0.0 && mdb <= 10.0)
        {
            eyre::bail!("profile.max_daily_basal must be in [0.0, 10.0]");
        }
        if !(p.max_iob >= 0.0 && p.max_iob <= 30.0) {
            eyre::bail!("profile.max_iob must be in [0.0, 30.0]");
        }
        if !(p.max_smb >= 0.0 && p.max_smb <= 5.0) {
            eyre::bail!("profile.max_smb must be in [0.0, 5.0]");
        }
        if !(p.isf >= 10.0 && p.isf <= 300.0) {
            eyre::bail!("profile.isf must be in [10, 300]");
        }
        if !(p.carb_ratio >= 2.0 && p.carb_ratio <= 100.0) {
            eyre::bail!("profile.carb_ratio must be in [2, 100]");
        }
        if !(p.target_low >= 72.0 && p.target_low <= 180.0) {
            eyre::bail!("profile.target_low must be in [72, 180]");
        }
        if p.target_high < p.target_low || p.target_high > 200.0 {
            eyre::bail!("profile.target_high must be in [target_low, 200]");
        }
        if !(p.dia_hours >= 3.0 && p.dia_hours <= 10.0) {
            eyre::bail!("profile.dia_hours must be in [3, 10]");
        }
        if !(p.insulin_peak_min >= 35.0 && p.insulin_peak_min <= 120.0) {
            eyre::bail!("profile.insulin_peak_min must be in [35, 120]");
        }
        if p.max_daily_safety_multiplier < 1.0 || p.current_basal_safety_multiplier < 1.0 {
            eyre::bail!("profile basal safety multipliers must be >= 1.0");
        }
        if p.utc_offset_min.abs() > 14 * 60 {
            eyre::bail!("profile.utc_offset_min must be within +/-14h");
        }

        // Trend
        if self.trend.fresh_min <= 0.0 {
            eyre::bail!("trend.fresh_min must be > 0");
        }
        let w = self.trend.weight_delta + self.trend.weight_short + self.trend.weight_long;
        if self.trend.weight_delta < 0.0
            || self.trend.weight_short < 0.0
            || self.trend.weight_long < 0.0
            || w <= 0.0
        {
            eyre::bail!("trend weights must be >= 0 with a positive sum");
        }
        if self.trend.fit_gap_min <= 0.0 || self.trend.fit_horizon_min <= 0.0 {
            eyre::bail!("trend.fit_gap_min and trend.fit_horizon_min must be > 0");
        }

        // Forecast
        if self.forecast.horizon_ticks == 0 || self.forecast.horizon_ticks > 48 {
            eyre::bail!("forecast.horizon_ticks must be in [1, 48]");
        }

        // Sensitivity
        let s = &self.sensitivity;
        if s.tdd_weight_1d < 0.0 || s.tdd_weight_2d < 0.0 || s.tdd_weight_7d < 0.0 {
            eyre::bail!("sensitivity TDD weights must be >= 0");
        }
        if s.tdd_weight_1d + s.tdd_weight_2d + s.tdd_weight_7d <= 0.0 {
            eyre::bail!("sensitivity TDD weights must have a positive sum");
        }
        if !(s.outlier_floor > 0.0 && s.outlier_floor <= 1.0) {
            eyre::bail!("sensitivity.outlier_floor must be in (0.0, 1.0]");
        }
        if s.outlier_ceiling < 1.0 {
            eyre::bail!("sensitivity.outlier_ceiling must be >= 1.0");
        }
        if s.kalman_process_var <= 0.0 || s.kalman_measurement_var <= 0.0 {
            eyre::bail!("sensitivity Kalman variances must be > 0");
        }
        if !(0.0..=1.0).contains(&s.curve_weight) {
            eyre::bail!("sensitivity.curve_weight must be in [0.0, 1.0]");
        }
        if s.cache_capacity == 0 {
            eyre::bail!("sensitivity.cache_capacity must be >= 1");
        }
        if s.cache_ttl_min <= 0.0 {
            eyre::bail!("sensitivity.cache_ttl_min must be > 0");
        }
        check_mode_overrides("sensitivity.mode_pct", &s.mode_pct, 10.0, 300.0)?;

        // Safety
        let sf = &self.safety;
        if sf.zero_basal_ceiling_min < 1.0 {
            eyre::bail!("safety.zero_basal_ceiling_min must be >= 1");
        }
        if sf.zero_basal_lookback_min < sf.zero_basal_ceiling_min {
            eyre::bail!("safety.zero_basal_lookback_min must be >= zero_basal_ceiling_min");
        }
        if sf.drop_rate_damp_mgdl_h <= 0.0 || sf.drop_rate_stop_mgdl_h < sf.drop_rate_damp_mgdl_h
        {
            eyre::bail!("safety drop-rate thresholds must satisfy 0 < damp <= stop");
        }
        if !(0.0..=100.0).contains(&sf.hypo_tir_pct) {
            eyre::bail!("safety.hypo_tir_pct must be in [0, 100]");
        }
        if !(sf.iob_fraction > 0.0 && sf.iob_fraction <= 1.0) {
            eyre::bail!("safety.iob_fraction must be in (0.0, 1.0]");
        }
        if sf.rapid_rise_delta <= 0.0 {
            eyre::bail!("safety.rapid_rise_delta must be > 0");
        }

        // Night growth
        let ng = &self.night_growth;
        if ng.start_hour > 23 || ng.end_hour > 23 {
            eyre::bail!("night_growth hours must be in [0, 23]");
        }
        if ng.smb_boost < 1.0 || ng.basal_boost < 1.0 || ng.iob_headroom < 0.0 {
            eyre::bail!("night_growth boosts must be >= 1.0 and headroom >= 0");
        }
        if ng.decay_min <= 0.0 || ng.sustained_min < 0.0 {
            eyre::bail!("night_growth.decay_min must be > 0 and sustained_min >= 0");
        }

        // SMB
        let smb = &self.smb;
        if smb.interval_min < 0.0
            || smb.meal_interval_min < 0.0
            || smb.active_interval_min < 0.0
            || smb.night_interval_min < 0.0
            || smb.rapid_rise_interval_min < 0.0
        {
            eyre::bail!("smb intervals must be >= 0");
        }
        if !(smb.delivery_ratio > 0.0 && smb.delivery_ratio <= 1.0) {
            eyre::bail!("smb.delivery_ratio must be in (0.0, 1.0]");
        }
        if smb.mpc_horizon_ticks == 0 || smb.mpc_horizon_ticks > 24 {
            eyre::bail!("smb.mpc_horizon_ticks must be in [1, 24]");
        }
        if smb.mpc_lambda < 0.0 {
            eyre::bail!("smb.mpc_lambda must be >= 0");
        }
        if !(0.0..=1.0).contains(&smb.optimizer_mpc_weight) {
            eyre::bail!("smb.optimizer_mpc_weight must be in [0.0, 1.0]");
        }
        if smb.corrector_learning_rate <= 0.0 || smb.corrector_learning_rate > 1.0 {
            eyre::bail!("smb.corrector_learning_rate must be in (0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&smb.corrector_max_fraction) {
            eyre::bail!("smb.corrector_max_fraction must be in [0.0, 1.0]");
        }
        check_mode_overrides("smb.mode_factor", &smb.mode_factor, 0.0, 3.0)?;

        // Basal
        if self.basal.temp_duration_min == 0 || self.basal.temp_duration_min > 120 {
            eyre::bail!("basal.temp_duration_min must be in [1, 120]");
        }
        if self.basal.reissue_tolerance < 0.0 {
            eyre::bail!("basal.reissue_tolerance must be >= 0");
        }

        // Pre-bolus
        let pb = &self.prebolus;
        if pb.autodrive_units < 0.0 || pb.meal_detect_units < 0.0 {
            eyre::bail!("prebolus amounts must be >= 0");
        }
        if pb.phase2_end_min <= pb.phase2_start_min {
            eyre::bail!("prebolus.phase2_end_min must be > phase2_start_min");
        }
        check_mode_overrides("prebolus.phase1_units", &pb.phase1_units, 0.0, 10.0)?;
        check_mode_overrides("prebolus.phase2_units", &pb.phase2_units, 0.0, 10.0)?;

        Ok(())
    }
}
