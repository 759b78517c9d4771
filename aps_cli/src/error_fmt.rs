//! Human-readable error descriptions and structured JSON error formatting.

use aps_core::error::{ApsError, BuildError, ForecastError, TrendError};

fn trend_error(err: &eyre::Report) -> Option<&TrendError> {
    match err.downcast_ref::<ApsError>() {
        Some(ApsError::Trend(t)) => Some(t),
        _ => err.downcast_ref::<TrendError>(),
    }
}

fn forecast_error(err: &eyre::Report) -> Option<&ForecastError> {
    match err.downcast_ref::<ApsError>() {
        Some(ApsError::Forecast(f)) => Some(f),
        _ => err.downcast_ref::<ForecastError>(),
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingProfile => {
                "What happened: No profile was provided to the dosing engine.\nLikely causes: The engine builder was not given a config or profile.\nHow to fix: Pass a config via builder().config(...) or builder().profile(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `aps self-check`."
            ),
        };
    }

    if let Some(te) = trend_error(err) {
        return match te {
            TrendError::InsufficientData => "What happened: No usable glucose readings.\nLikely causes: Empty CGM history, only gap-filled samples, or values at or below 39 mg/dL.\nHow to fix: Provide recent readings via the snapshot or --glucose.".to_string(),
            TrendError::StaleData { age_min } => format!(
                "What happened: Newest glucose reading is {age_min:.1} min old.\nLikely causes: CGM upload delay, or --now set later than the data.\nHow to fix: Refresh the CGM history, pass --now at the reading time, or set allow_stale in the snapshot."
            ),
        };
    }

    match forecast_error(err) {
        Some(ForecastError::MissingSimulationInput { tick }) => {
            return format!(
                "What happened: Zero-temp insulin activity is missing at tick {tick}.\nLikely causes: The snapshot's iob array is shorter than the forecast horizon or lacks iob_with_zero_temp.\nHow to fix: Supply one iob entry per tick with zero-temp activity, or lower forecast.horizon_ticks."
            );
        }
        Some(ForecastError::NonFiniteInput { tick }) => {
            return format!(
                "What happened: Insulin activity at tick {tick} is NaN or infinite.\nLikely causes: The upstream IOB calculation divided by zero or lost data.\nHow to fix: Recompute the iob array; the dosing cycle holds basal until it is finite."
            );
        }
        None => {}
    }

    if let Some(ae) = err.downcast_ref::<ApsError>() {
        // Specific domain cases first
        if let ApsError::CycleTimeout { deadline_ms } = ae {
            return format!(
                "What happened: The decision cycle did not finish within {deadline_ms} ms.\nLikely causes: A slow regression model or an overloaded host.\nHow to fix: Raise --deadline-ms or investigate the model latency."
            );
        }
        if let ApsError::Pump(msg) = ae {
            return format!(
                "What happened: The pump rejected a command ({msg}).\nLikely causes: Occlusion, suspended pump, or lost connection.\nHow to fix: Check the pump, then rerun the cycle; the next cycle re-evaluates from scratch."
            );
        }
        // Fallback to generic for other domain errors
        return format!(
            "What happened: {ae}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
        );
    }

    if err.downcast_ref::<toml::de::Error>().is_some() {
        return format!(
            "What happened: The config file is not valid TOML for this schema.\nLikely causes: Typo in a key, wrong value type, or a missing [profile] table.\nHow to fix: Compare the file against etc/aps_config.toml. Detail: {err:#}"
        );
    }

    if err.downcast_ref::<serde_json::Error>().is_some() {
        return format!(
            "What happened: The snapshot is not a valid cycle context.\nLikely causes: Malformed JSON or a field with the wrong type.\nHow to fix: Check the snapshot file. Detail: {err:#}"
        );
    }

    // String-based heuristics for errors coming from config validation or CSV loading
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("invalid configuration") {
        return format!(
            "What happened: Configuration is invalid.\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file and try again. Detail: {msg}"
        );
    }

    // Glucose CSV header special-case
    if lower.contains("glucose csv must have headers") {
        return "Invalid headers in glucose CSV. Expected 'timestamp,mg_dl,gap_filled'.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable process exit codes: 3 no usable trend, 4 missing simulation input,
/// 5 cycle timeout, 1 for anything else.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if trend_error(err).is_some() {
        return 3;
    }
    if let Some(ForecastError::MissingSimulationInput { .. }) = forecast_error(err) {
        return 4;
    }
    if let Some(ApsError::CycleTimeout { .. }) = err.downcast_ref::<ApsError>() {
        return 5;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(te) = trend_error(err) {
        return match te {
            TrendError::InsufficientData => "InsufficientData",
            TrendError::StaleData { .. } => "StaleData",
        };
    }
    match forecast_error(err) {
        Some(ForecastError::MissingSimulationInput { .. }) => return "MissingSimulationInput",
        Some(ForecastError::NonFiniteInput { .. }) => return "NonFiniteInput",
        None => {}
    }
    match err.downcast_ref::<ApsError>() {
        Some(ApsError::CycleTimeout { .. }) => "CycleTimeout",
        Some(ApsError::Pump(_)) => "Pump",
        Some(ApsError::WorkerGone) => "WorkerGone",
        _ if err.downcast_ref::<BuildError>().is_some() => "InvalidConfig",
        _ => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let details = match (trend_error(err), forecast_error(err), err.downcast_ref::<ApsError>()) {
        (Some(TrendError::StaleData { age_min }), _, _) => Some(json!({ "age_min": age_min })),
        (
            _,
            Some(ForecastError::MissingSimulationInput { tick } | ForecastError::NonFiniteInput { tick }),
            _,
        ) => Some(json!({ "tick": tick })),
        (_, _, Some(ApsError::CycleTimeout { deadline_ms })) => Some(json!({ "deadline_ms": deadline_ms })),
        _ => None,
    };

    let obj = match details {
        Some(d) => json!({
            "reason": reason_name(err),
            "exit_code": exit_code_for_error(err),
            "details": d,
            "message": humanize(err),
        }),
        None => json!({
            "reason": reason_name(err),
            "exit_code": exit_code_for_error(err),
            "message": humanize(err),
        }),
    };
    obj.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_trend_maps_to_exit_3() {
        let err = eyre::Report::new(ApsError::from(TrendError::StaleData { age_min: 12.0 })).wrap_err("extracting glucose trend");
        assert_eq!(exit_code_for_error(&err), 3);
        assert!(humanize(&err).contains("12.0 min old"));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "StaleData");
        assert_eq!(v["details"]["age_min"], 12.0);
    }

    #[test]
    fn missing_zero_temp_maps_to_exit_4() {
        let err = eyre::Report::new(ApsError::from(ForecastError::MissingSimulationInput { tick: 3 }));
        assert_eq!(exit_code_for_error(&err), 4);
        assert!(humanize(&err).contains("tick 3"));
    }

    #[test]
    fn non_finite_activity_is_generic_exit() {
        let err = eyre::Report::new(ApsError::from(ForecastError::NonFiniteInput { tick: 2 }));
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).contains("tick 2 is NaN"));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "NonFiniteInput");
        assert_eq!(v["details"]["tick"], 2);
    }

    #[test]
    fn timeout_maps_to_exit_5() {
        let err = eyre::Report::new(ApsError::CycleTimeout { deadline_ms: 20 });
        assert_eq!(exit_code_for_error(&err), 5);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["details"]["deadline_ms"], 20);
    }

    #[test]
    fn build_errors_are_generic_exit() {
        let err = eyre::Report::new(BuildError::InvalidConfig("profile isf must be > 0"));
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).contains("profile isf must be > 0"));
    }
}
