use thiserror::Error;

/// Failures of the trend extractor. Returned to the engine, which holds basal.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrendError {
    #[error("insufficient glucose data")]
    InsufficientData,
    #[error("stale glucose data: newest sample is {age_min:.1} min old")]
    StaleData { age_min: f64 },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ForecastError {
    #[error("missing zero-temp insulin activity at tick {tick}")]
    MissingSimulationInput { tick: usize },
    #[error("non-finite insulin activity input at tick {tick}")]
    NonFiniteInput { tick: usize },
}

#[derive(Debug, Error, Clone)]
pub enum ApsError {
    #[error("trend unavailable: {0}")]
    Trend(#[from] TrendError),
    #[error("forecast failed: {0}")]
    Forecast(#[from] ForecastError),
    #[error("pump error: {0}")]
    Pump(String),
    #[error("control cycle exceeded its deadline of {deadline_ms} ms")]
    CycleTimeout { deadline_ms: u64 },
    #[error("cycle worker is no longer running")]
    WorkerGone,
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing profile")]
    MissingProfile,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
