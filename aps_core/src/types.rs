//! Per-cycle data contracts: the input snapshot handed to the engine and the
//! decision it returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Mode;
use crate::night_growth::NightGrowthPhase;
use crate::sensitivity::Provenance;

/// One CGM reading. Values at or below 39 mg/dL and gap-filled samples are
/// excluded from every statistic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub is_gap_filled: bool,
}

impl GlucoseSample {
    #[inline]
    pub fn is_usable(&self) -> bool {
        !self.is_gap_filled && self.value.is_finite() && self.value > 39.0
    }
}

impl From<&aps_config::GlucoseRow> for GlucoseSample {
    fn from(r: &aps_config::GlucoseRow) -> Self {
        Self {
            timestamp: r.timestamp,
            value: r.mg_dl,
            is_gap_filled: r.gap_filled,
        }
    }
}

/// Trend statistics derived once per cycle. Deltas are mg/dL per 5 minutes,
/// acceleration is mg/dL/min².
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseTrend {
    pub glucose: f64,
    pub delta: f64,
    pub short_avg_delta: f64,
    pub long_avg_delta: f64,
    pub acceleration: f64,
    pub combined_delta: f64,
    pub fit_r2: f64,
    pub fit_duration_min: f64,
    /// Parabola slope over the previous 5 minutes.
    pub delta_minus5: f64,
    /// Parabola slope over the next 5 minutes.
    pub delta_plus5: f64,
    /// Fitted value at the newest sample time.
    pub fit_glucose: f64,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ZeroTempIob {
    pub iob: f64,
    pub activity: f64,
}

/// One 5-minute tick of the externally supplied insulin activity curve.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IobTick {
    pub iob: f64,
    pub activity: f64,
    #[serde(default)]
    pub iob_with_zero_temp: Option<ZeroTempIob>,
}

/// Temp basal currently running on the pump.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TempBasal {
    pub rate: f64,
    pub duration_min: f64,
    pub minutes_running: f64,
}

impl TempBasal {
    #[inline]
    pub fn remaining_min(&self) -> f64 {
        (self.duration_min - self.minutes_running).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MealData {
    pub cob: f64,
    pub last_carb_age_min: Option<f64>,
    pub remaining_ci_peak: f64,
    pub slope_from_max_deviation: f64,
    pub slope_from_min_deviation: f64,
}

/// Mode flags. Timed modes carry minutes elapsed since onset; `None` means off.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Modes {
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
    pub pregnancy: bool,
    pub honeymoon: bool,
    pub autodrive: bool,
}

/// Priority used when several timed modes are active at once.
const MODE_PRIORITY: [Mode; 10] = [
    Mode::HighCarb,
    Mode::Breakfast,
    Mode::Lunch,
    Mode::Dinner,
    Mode::Meal,
    Mode::Snack,
    Mode::Sport,
    Mode::Sleep,
    Mode::LowCarb,
    Mode::Fasting,
];

impl Modes {
    pub fn elapsed(&self, mode: Mode) -> Option<f64> {
        let v = match mode {
            Mode::Sleep => self.sleep,
            Mode::Sport => self.sport,
            Mode::Snack => self.snack,
            Mode::Meal => self.meal,
            Mode::Breakfast => self.breakfast,
            Mode::Lunch => self.lunch,
            Mode::Dinner => self.dinner,
            Mode::HighCarb => self.high_carb,
            Mode::LowCarb => self.low_carb,
            Mode::Fasting => self.fasting,
        };
        v.filter(|m| m.is_finite() && *m >= 0.0)
    }

    #[inline]
    pub fn is_active(&self, mode: Mode) -> bool {
        self.elapsed(mode).is_some()
    }

    /// Highest-priority active timed mode.
    pub fn primary(&self) -> Option<(Mode, f64)> {
        MODE_PRIORITY
            .iter()
            .find_map(|&m| self.elapsed(m).map(|e| (m, e)))
    }

    /// Highest-priority active meal-type mode.
    pub fn active_meal(&self) -> Option<(Mode, f64)> {
        Mode::MEALS
            .iter()
            .find_map(|&m| self.elapsed(m).map(|e| (m, e)))
    }

    #[inline]
    pub fn meal_active(&self) -> bool {
        self.active_meal().is_some()
    }
}

/// Step counts and mean heart rate over trailing windows.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityStats {
    pub steps_5min: u32,
    pub steps_10min: u32,
    pub steps_15min: u32,
    pub steps_30min: u32,
    pub steps_60min: u32,
    pub steps_180min: u32,
    pub hr_5min: f64,
    pub hr_10min: f64,
    pub hr_15min: f64,
    pub hr_30min: f64,
    pub hr_60min: f64,
    pub hr_180min: f64,
}

/// Total-daily-dose aggregates in units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TddStats {
    pub tdd_1d: f64,
    pub tdd_2d: f64,
    pub tdd_7d: f64,
    pub tdd_24h: f64,
}

impl TddStats {
    /// Average hourly insulin from the longest available aggregate.
    pub fn avg_hourly(&self) -> f64 {
        [self.tdd_7d, self.tdd_24h, self.tdd_1d]
            .into_iter()
            .find(|v| v.is_finite() && *v > 0.0)
            .map_or(0.0, |v| v / 24.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BolusRecord {
    pub timestamp: DateTime<Utc>,
    pub units: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempBasalRecord {
    pub timestamp: DateTime<Utc>,
    pub rate: f64,
    pub duration_min: f64,
}

/// Past cycle outcome used to train the residual corrector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub bg: f64,
    pub delta: f64,
    pub iob: f64,
    pub cob: f64,
    /// Baseline estimate issued at that cycle.
    pub baseline_units: f64,
    /// Glucose observed 30 minutes later.
    pub bg_after_30: f64,
}

/// Sensitivity value previously stored by the host for a 30-minute bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistedIsf {
    pub bucket: i64,
    pub glucose: i32,
    pub value: f64,
}

/// Immutable per-cycle input snapshot assembled by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleContext {
    /// Most recent first.
    pub glucose: Vec<GlucoseSample>,
    pub allow_stale: bool,
    /// Index 0 is the current tick.
    pub iob: Vec<IobTick>,
    pub meal: MealData,
    pub current_temp: Option<TempBasal>,
    pub modes: Modes,
    pub activity: ActivityStats,
    pub tdd: TddStats,
    /// Baseline from the external regression model, when the host ran it.
    pub model_estimate: Option<f64>,
    pub bolus_history: Vec<BolusRecord>,
    pub temp_basal_history: Vec<TempBasalRecord>,
    pub log_history: Vec<LogRecord>,
    pub persisted_isf: Vec<PersistedIsf>,
    /// Upstream low-glucose or aggressive-reactivity alert.
    pub low_signal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasalAction {
    /// Issue a new temp basal.
    Set,
    /// Leave the running temp basal alone.
    Continue,
    /// Cancel any temp basal and fall back to the scheduled rate.
    Cancel,
}

/// Values that explain a decision but are not commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub eventual_bg: Option<f64>,
    pub min_pred_bg: Option<f64>,
    pub isf: Option<f64>,
    pub isf_provenance: Option<Provenance>,
    pub bolus_scale: f64,
    pub veto: bool,
    pub basal_floor_forced: bool,
    pub night_growth: NightGrowthPhase,
    pub basal_rule: Option<String>,
    pub prebolus: Option<String>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            eventual_bg: None,
            min_pred_bg: None,
            isf: None,
            isf_provenance: None,
            bolus_scale: 1.0,
            veto: false,
            basal_floor_forced: false,
            night_growth: NightGrowthPhase::Inactive,
            basal_rule: None,
            prebolus: None,
        }
    }
}

/// The sole externally visible output of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DosingDecision {
    pub basal_rate_uph: f64,
    pub basal_duration_min: u32,
    pub basal_action: BasalAction,
    /// Always a multiple of 0.05 U.
    pub bolus_units: f64,
    pub deliver_at: DateTime<Utc>,
    pub rationale: Vec<String>,
    pub safety_conditions: Vec<String>,
    pub diagnostics: Diagnostics,
}
