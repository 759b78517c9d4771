//! Night growth resistance monitor.
//!
//! Inactive → Suspected → Confirmed → Decay → Inactive. The monitor is the
//! only writer of its state; the engine owns one instance and calls
//! [`NightGrowthMonitor::update`] once per cycle.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::NightGrowthCfg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NightGrowthPhase {
    Inactive,
    Suspected,
    Confirmed,
    Decay,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Multipliers {
    pub smb: f64,
    pub basal: f64,
    pub extra_iob_headroom: f64,
}

impl Multipliers {
    pub const NEUTRAL: Multipliers = Multipliers {
        smb: 1.0,
        basal: 1.0,
        extra_iob_headroom: 0.0,
    };

    fn is_neutral(&self) -> bool {
        (self.smb - 1.0).abs() < 1e-6 && (self.basal - 1.0).abs() < 1e-6 && self.extra_iob_headroom.abs() < 1e-6
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NightGrowthInput {
    pub now: DateTime<Utc>,
    pub bg: f64,
    pub delta: f64,
    pub short_avg_delta: f64,
    pub long_avg_delta: f64,
    pub eventual_bg: f64,
    pub target: f64,
    pub cob: f64,
    pub meal_active: bool,
    pub low_signal: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NightGrowthOutput {
    pub phase: NightGrowthPhase,
    pub multipliers: Multipliers,
    pub note: Option<String>,
}

#[derive(Debug)]
pub struct NightGrowthMonitor {
    cfg: NightGrowthCfg,
    age_years: u32,
    utc_offset_min: i32,
    phase: NightGrowthPhase,
    rise_started: Option<DateTime<Utc>>,
    consecutive: u32,
    entered_at: Option<DateTime<Utc>>,
    snapshot: Multipliers,
    decay_started: Option<DateTime<Utc>>,
}

fn minutes(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 60_000.0
}

impl NightGrowthMonitor {
    pub fn new(cfg: NightGrowthCfg, age_years: u32, utc_offset_min: i32) -> Self {
        Self {
            cfg,
            age_years,
            utc_offset_min,
            phase: NightGrowthPhase::Inactive,
            rise_started: None,
            consecutive: 0,
            entered_at: None,
            snapshot: Multipliers::NEUTRAL,
            decay_started: None,
        }
    }

    pub fn phase(&self) -> NightGrowthPhase {
        self.phase
    }

    /// When the current active episode began.
    pub fn entered_at(&self) -> Option<DateTime<Utc>> {
        self.entered_at
    }

    /// Drop all episode state.
    pub fn reset(&mut self) {
        self.phase = NightGrowthPhase::Inactive;
        self.rise_started = None;
        self.consecutive = 0;
        self.entered_at = None;
        self.snapshot = Multipliers::NEUTRAL;
        self.decay_started = None;
    }

    /// Whether `now` falls in the configured local night window.
    pub fn in_night_window(&self, now: DateTime<Utc>) -> bool {
        let local = now + Duration::minutes(i64::from(self.utc_offset_min));
        let h = local.hour();
        let (start, end) = (self.cfg.start_hour, self.cfg.end_hour);
        if start == end {
            false
        } else if start < end {
            (start..end).contains(&h)
        } else {
            h >= start || h < end
        }
    }

    fn eligible(&self, now: DateTime<Utc>) -> bool {
        self.cfg.enabled && self.age_years < self.cfg.max_age_years && self.in_night_window(now)
    }

    fn guard_reason(i: &NightGrowthInput) -> Option<&'static str> {
        if i.bg < 110.0 {
            Some("bg below 110")
        } else if i.delta <= 0.0 {
            Some("delta not rising")
        } else if i.short_avg_delta <= 0.0 {
            Some("short average not rising")
        } else if i.eventual_bg <= i.target {
            Some("eventual at or below target")
        } else if i.low_signal {
            Some("low signal active")
        } else if i.target <= 90.0 {
            Some("target at or below 90")
        } else {
            None
        }
    }

    fn output(&self, multipliers: Multipliers, note: Option<String>) -> NightGrowthOutput {
        NightGrowthOutput {
            phase: self.phase,
            multipliers,
            note,
        }
    }

    fn begin_decay(&mut self, now: DateTime<Utc>, reason: &str) -> NightGrowthOutput {
        tracing::info!(reason, from = ?self.phase, "night growth decay");
        self.phase = NightGrowthPhase::Decay;
        self.decay_started = Some(now);
        self.rise_started = None;
        self.consecutive = 0;
        self.decay_step(now, Some(format!("night growth decay: {reason}")))
    }

    fn decay_step(&mut self, now: DateTime<Utc>, note: Option<String>) -> NightGrowthOutput {
        let started = self.decay_started.unwrap_or(now);
        let remaining = self.cfg.decay_min - minutes(now, started);
        let ratio = (remaining / self.cfg.decay_min).clamp(0.0, 1.0);
        if ratio <= 0.0 || self.snapshot.is_neutral() {
            self.reset();
            return self.output(Multipliers::NEUTRAL, Some("night growth inactive".to_string()));
        }
        let s = self.snapshot;
        let m = Multipliers {
            smb: 1.0 + (s.smb - 1.0) * ratio,
            basal: 1.0 + (s.basal - 1.0) * ratio,
            extra_iob_headroom: s.extra_iob_headroom * ratio,
        };
        self.output(m, note.or_else(|| Some(format!("night growth decay {:.0}%", ratio * 100.0))))
    }

    fn active_multipliers(&self, intensity: f64) -> Multipliers {
        Multipliers {
            smb: 1.0 + (self.cfg.smb_boost - 1.0) * intensity,
            basal: 1.0 + (self.cfg.basal_boost - 1.0) * intensity,
            extra_iob_headroom: self.cfg.iob_headroom * intensity,
        }
    }

    /// Advance the state machine by one cycle.
    pub fn update(&mut self, i: &NightGrowthInput) -> NightGrowthOutput {
        if !self.eligible(i.now) {
            if self.phase != NightGrowthPhase::Inactive {
                tracing::debug!("night growth window closed");
            }
            self.reset();
            return self.output(Multipliers::NEUTRAL, None);
        }

        if let Some(reason) = Self::guard_reason(i) {
            return match self.phase {
                NightGrowthPhase::Suspected | NightGrowthPhase::Confirmed => self.begin_decay(i.now, reason),
                NightGrowthPhase::Decay => self.decay_step(i.now, None),
                NightGrowthPhase::Inactive => {
                    self.rise_started = None;
                    self.consecutive = 0;
                    self.output(Multipliers::NEUTRAL, None)
                }
            };
        }

        let slope = i.delta.max(i.short_avg_delta).max(i.long_avg_delta);
        if slope >= self.cfg.min_rise_slope {
            self.rise_started.get_or_insert(i.now);
            self.consecutive += 1;
        } else {
            self.rise_started = None;
            self.consecutive = 0;
        }
        let sustained = self
            .rise_started
            .is_some_and(|s| minutes(i.now, s) >= self.cfg.sustained_min);
        let suspected = sustained && i.eventual_bg - i.target >= self.cfg.eventual_margin && i.cob <= self.cfg.max_cob;

        if suspected {
            let confirmed =
                self.consecutive >= 3 || (i.long_avg_delta > i.short_avg_delta && i.short_avg_delta > 0.0);
            let next = if confirmed {
                NightGrowthPhase::Confirmed
            } else {
                NightGrowthPhase::Suspected
            };
            if matches!(self.phase, NightGrowthPhase::Inactive | NightGrowthPhase::Decay) {
                self.entered_at = Some(i.now);
            }
            if self.phase != next {
                tracing::info!(from = ?self.phase, to = ?next, "night growth transition");
            }
            self.phase = next;
            self.decay_started = None;
            let mut intensity = if confirmed { 1.0 } else { 0.6 };
            if i.meal_active {
                intensity *= 0.5;
            }
            let m = self.active_multipliers(intensity);
            self.snapshot = m;
            return self.output(
                m,
                Some(format!(
                    "night growth {:?}: smb x{:.2}, basal x{:.2}, +{:.2} U IOB",
                    next, m.smb, m.basal, m.extra_iob_headroom
                )),
            );
        }

        match self.phase {
            NightGrowthPhase::Suspected | NightGrowthPhase::Confirmed => {
                self.begin_decay(i.now, "rise no longer sustained")
            }
            NightGrowthPhase::Decay => self.decay_step(i.now, None),
            NightGrowthPhase::Inactive => self.output(Multipliers::NEUTRAL, None),
        }
    }
}
