//! Pushes a decision through a [`PumpDriver`]: basal first, then bolus.

use aps_traits::PumpDriver;
use eyre::WrapErr;

use crate::error::{ApsError, Result};
use crate::types::{BasalAction, DosingDecision};

fn pump_error(e: &(dyn std::error::Error + Send + Sync)) -> eyre::Report {
    eyre::Report::new(ApsError::Pump(e.to_string()))
}

pub fn apply_decision(pump: &mut dyn PumpDriver, decision: &DosingDecision) -> Result<()> {
    match decision.basal_action {
        BasalAction::Set => pump
            .set_temp_basal(decision.basal_rate_uph, decision.basal_duration_min)
            .map_err(|e| pump_error(&*e))
            .wrap_err("set temp basal")?,
        BasalAction::Cancel => pump
            .cancel_temp_basal()
            .map_err(|e| pump_error(&*e))
            .wrap_err("cancel temp basal")?,
        BasalAction::Continue => tracing::debug!("temp basal unchanged"),
    }
    if decision.bolus_units > 0.0 {
        pump.deliver_bolus(decision.bolus_units)
            .map_err(|e| pump_error(&*e))
            .wrap_err("deliver bolus")?;
    }
    tracing::info!(
        rate = decision.basal_rate_uph,
        action = ?decision.basal_action,
        bolus = decision.bolus_units,
        "decision delivered"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{PumpCall, RecordingPump};
    use crate::types::Diagnostics;
    use chrono::{DateTime, Utc};

    fn decision(action: BasalAction, bolus: f64) -> DosingDecision {
        DosingDecision {
            basal_rate_uph: 1.2,
            basal_duration_min: 30,
            basal_action: action,
            bolus_units: bolus,
            deliver_at: DateTime::<Utc>::from_timestamp(1_760_000_000, 0).unwrap(),
            rationale: Vec::new(),
            safety_conditions: Vec::new(),
            diagnostics: Diagnostics::default(),
        }
    }

    #[test]
    fn basal_then_bolus() {
        let mut pump = RecordingPump::default();
        apply_decision(&mut pump, &decision(BasalAction::Set, 0.3)).unwrap();
        assert_eq!(
            pump.calls,
            vec![
                PumpCall::SetTemp {
                    rate_uph: 1.2,
                    duration_min: 30
                },
                PumpCall::Bolus { units: 0.3 }
            ]
        );
    }

    #[test]
    fn continue_without_bolus_is_silent() {
        let mut pump = RecordingPump::default();
        apply_decision(&mut pump, &decision(BasalAction::Continue, 0.0)).unwrap();
        assert!(pump.calls.is_empty());
    }

    #[test]
    fn bolus_failure_maps_to_pump_error() {
        let mut pump = RecordingPump {
            fail_bolus: true,
            ..RecordingPump::default()
        };
        let err = apply_decision(&mut pump, &decision(BasalAction::Cancel, 0.5)).unwrap_err();
        assert!(matches!(err.downcast_ref::<ApsError>(), Some(ApsError::Pump(m)) if m == "occlusion"));
        assert_eq!(pump.calls, vec![PumpCall::CancelTemp]);
    }
}
