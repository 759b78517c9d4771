//! Aggregates over the caller-supplied dose and glucose history.

use chrono::{DateTime, Duration, Utc};

use crate::types::{BolusRecord, GlucoseSample, TempBasalRecord};
use crate::util::TICK_MIN;

const HYPO_BG: f64 = 70.0;

fn minutes(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 60_000.0
}

/// Minutes since the most recent non-zero bolus at or before `now`.
pub fn minutes_since_last_bolus(history: &[BolusRecord], now: DateTime<Utc>) -> Option<f64> {
    history
        .iter()
        .filter(|b| b.units > 0.0 && b.timestamp <= now)
        .map(|b| b.timestamp)
        .max()
        .map(|ts| minutes(now, ts))
}

/// Temp basal records as `[start, end)` intervals; a later record cuts the
/// one before it short.
fn temp_intervals(history: &[TempBasalRecord]) -> Vec<(DateTime<Utc>, DateTime<Utc>, f64)> {
    let mut sorted: Vec<&TempBasalRecord> = history.iter().collect();
    sorted.sort_by_key(|r| r.timestamp);
    let mut out = Vec::with_capacity(sorted.len());
    for (i, r) in sorted.iter().enumerate() {
        let nominal_end = r.timestamp + Duration::milliseconds((r.duration_min.max(0.0) * 60_000.0) as i64);
        let end = sorted
            .get(i + 1)
            .map_or(nominal_end, |next| nominal_end.min(next.timestamp));
        out.push((r.timestamp, end, r.rate));
    }
    out
}

fn overlap_min(start: DateTime<Utc>, end: DateTime<Utc>, from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let s = start.max(from);
    let e = end.min(to);
    if e > s { minutes(e, s) } else { 0.0 }
}

/// Minutes spent at a zero temp basal within the lookback window.
pub fn zero_basal_minutes(history: &[TempBasalRecord], now: DateTime<Utc>, lookback_min: f64) -> f64 {
    let from = now - Duration::milliseconds((lookback_min * 60_000.0) as i64);
    temp_intervals(history)
        .into_iter()
        .filter(|(_, _, rate)| *rate <= 0.0)
        .map(|(s, e, _)| overlap_min(s, e, from, now))
        .sum()
}

/// Units delivered in the last hour by boluses and temp basals.
pub fn insulin_last_hour(bolus: &[BolusRecord], temps: &[TempBasalRecord], now: DateTime<Utc>) -> f64 {
    let from = now - Duration::minutes(60);
    let boluses: f64 = bolus
        .iter()
        .filter(|b| b.timestamp > from && b.timestamp <= now)
        .map(|b| b.units.max(0.0))
        .sum();
    let basal: f64 = temp_intervals(temps)
        .into_iter()
        .map(|(s, e, rate)| rate.max(0.0) * overlap_min(s, e, from, now) / 60.0)
        .sum();
    boluses + basal
}

/// Glucose fall over roughly the last 30 minutes in mg/dL per hour; positive
/// when falling, 0.0 without a reading 25 to 35 minutes back.
pub fn drop_rate_30min(samples: &[GlucoseSample]) -> f64 {
    let mut usable: Vec<&GlucoseSample> = samples.iter().filter(|s| s.is_usable()).collect();
    usable.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let Some(newest) = usable.first() else {
        return 0.0;
    };
    let past = usable
        .iter()
        .map(|s| (minutes(newest.timestamp, s.timestamp), s.value))
        .filter(|(m, _)| (25.0..=35.0).contains(m))
        .min_by(|a, b| (a.0 - 30.0).abs().total_cmp(&(b.0 - 30.0).abs()));
    match past {
        Some((m, v)) => (v - newest.value) / m * 60.0,
        None => 0.0,
    }
}

/// Percentage of usable readings below 70 mg/dL.
pub fn hypo_pct(samples: &[GlucoseSample]) -> f64 {
    let usable: Vec<f64> = samples.iter().filter(|s| s.is_usable()).map(|s| s.value).collect();
    if usable.is_empty() {
        return 0.0;
    }
    let low = usable.iter().filter(|v| **v < HYPO_BG).count();
    low as f64 * 100.0 / usable.len() as f64
}

/// Signed glucose error against `target` integrated over the last hour, in
/// mg/dL·h, one 5-minute slice per usable reading.
pub fn glucose_integral_mgdl_h(samples: &[GlucoseSample], target: f64) -> f64 {
    let Some(newest) = samples.iter().filter(|s| s.is_usable()).map(|s| s.timestamp).max() else {
        return 0.0;
    };
    samples
        .iter()
        .filter(|s| s.is_usable() && minutes(newest, s.timestamp) < 60.0)
        .map(|s| (s.value - target) * TICK_MIN / 60.0)
        .sum()
}
