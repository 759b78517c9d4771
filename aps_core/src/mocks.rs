//! Test and helper collaborators for aps_core

use std::sync::Mutex;

use aps_traits::{BolusModel, Clock, PumpDriver};
use chrono::{DateTime, Duration, Utc};

type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Clock pinned to a settable instant; replays and tests drive it by hand.
#[derive(Debug)]
pub struct FixedClock {
    at: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at: Mutex::new(at) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut g) = self.at.lock() {
            *g = at;
        }
    }

    pub fn advance_min(&self, minutes: i64) {
        if let Ok(mut g) = self.at.lock() {
            *g += Duration::minutes(minutes);
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.at.lock().map_or_else(|p| *p.into_inner(), |g| *g)
    }
}

/// Regression model that always answers with the same estimate.
#[derive(Debug, Clone, Copy)]
pub struct StaticBolusModel(pub f64);

impl BolusModel for StaticBolusModel {
    fn estimate(&self, _features: &[f64]) -> Result<f64, DynError> {
        Ok(self.0)
    }
}

/// Regression model that always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingBolusModel;

impl BolusModel for FailingBolusModel {
    fn estimate(&self, _features: &[f64]) -> Result<f64, DynError> {
        Err(Box::new(std::io::Error::other("model unavailable")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PumpCall {
    SetTemp { rate_uph: f64, duration_min: u32 },
    CancelTemp,
    Bolus { units: f64 },
}

/// Pump that records every command; `fail_bolus` makes boluses error.
#[derive(Debug, Default)]
pub struct RecordingPump {
    pub calls: Vec<PumpCall>,
    pub fail_bolus: bool,
}

impl PumpDriver for RecordingPump {
    fn set_temp_basal(&mut self, rate_uph: f64, duration_min: u32) -> Result<(), DynError> {
        self.calls.push(PumpCall::SetTemp { rate_uph, duration_min });
        Ok(())
    }

    fn cancel_temp_basal(&mut self) -> Result<(), DynError> {
        self.calls.push(PumpCall::CancelTemp);
        Ok(())
    }

    fn deliver_bolus(&mut self, units: f64) -> Result<(), DynError> {
        if self.fail_bolus {
            return Err(Box::new(std::io::Error::other("occlusion")));
        }
        self.calls.push(PumpCall::Bolus { units });
        Ok(())
    }
}
