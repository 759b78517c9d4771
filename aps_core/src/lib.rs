#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Decision core of a closed-loop insulin dosing controller.
//!
//! Every cycle turns an immutable [`CycleContext`] snapshot into one
//! [`DosingDecision`]. Nothing here performs I/O; pump and regression-model
//! access go through `aps_traits`.
//!
//! ## Architecture
//!
//! - **Trend**: deltas, averages and quadratic fit over CGM history (`trend`)
//! - **Forecast**: IOB-only, UAM and zero-temp predicted series (`forecast`)
//! - **Sensitivity**: TDD-based ISF with cache and Kalman smoothing (`sensitivity`)
//! - **Safety**: named veto predicates and a continuous bolus scale (`safety`)
//! - **Night growth**: nocturnal resistance state machine (`night_growth`)
//! - **Engine**: pre-emption, micro-bolus and basal cascade (`engine`)
//!
//! Deltas are mg/dL per 5 minutes and insulin is in units throughout.

pub mod cascade;
pub mod config;
pub mod conversions;
pub mod corrector;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod forecast;
pub mod history;
pub mod mocks;
pub mod modes;
pub mod night_growth;
pub mod optimizer;
pub mod prebolus;
pub mod safety;
pub mod sensitivity;
pub mod temp_basal;
pub mod trend;
pub mod types;
pub mod util;
pub mod worker;

pub use config::{EngineCfg, Mode, ModeTable, Profile};
pub use delivery::apply_decision;
pub use engine::{DosingEngine, EngineBuilder};
pub use error::{ApsError, BuildError, ForecastError, Result, TrendError};
pub use forecast::Forecast;
pub use night_growth::NightGrowthPhase;
pub use safety::SafetyVerdict;
pub use sensitivity::{Provenance, SensitivityEstimate};
pub use types::{BasalAction, CycleContext, DosingDecision, GlucoseSample, GlucoseTrend};
pub use worker::CycleWorker;
