pub mod clock;

pub use clock::{Clock, SystemClock};

/// Pump-side collaborator that executes the decision of a control cycle.
///
/// Implementations talk to the actual device; the decision core never does.
pub trait PumpDriver {
    fn set_temp_basal(
        &mut self,
        rate_uph: f64,
        duration_min: u32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn cancel_temp_basal(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn deliver_bolus(&mut self, units: f64) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// External regression model consulted for the baseline micro-bolus estimate.
///
/// `features` is the fixed-order vector documented on
/// `aps_core::optimizer::model_features`.
pub trait BolusModel {
    fn estimate(&self, features: &[f64]) -> Result<f64, Box<dyn std::error::Error + Send + Sync>>;
}
