//! Trend extraction: deltas over three age windows, a local quadratic fit,
//! and the weighted combined delta.

use chrono::{DateTime, Utc};

use crate::config::TrendCfg;
use crate::error::TrendError;
use crate::types::{GlucoseSample, GlucoseTrend};

/// Samples this close to the newest one are treated as duplicate uploads.
const DUP_WINDOW_MIN: f64 = 2.5;
const LAST_WINDOW: (f64, f64) = (2.5, 7.5);
const SHORT_WINDOW: (f64, f64) = (2.5, 17.5);
const LONG_WINDOW: (f64, f64) = (17.5, 42.5);
/// Fewest points a quadratic fit is attempted on.
const MIN_FIT_POINTS: usize = 4;

#[inline]
fn minutes_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 60_000.0
}

#[inline]
fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn mean(v: &[f64]) -> Option<f64> {
    if v.is_empty() {
        None
    } else {
        Some(v.iter().sum::<f64>() / v.len() as f64)
    }
}

/// Result of the best quadratic fit over the recent window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadraticFit {
    /// y = a·x² + b·x + c with x in 5-minute units, 0 at the newest sample.
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub r2: f64,
    pub duration_min: f64,
}

fn det3(m: [[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1]) - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Least-squares parabola through `(x, y)` points, solved with Cramer's rule.
fn fit_parabola(points: &[(f64, f64)]) -> Option<(f64, f64, f64, f64)> {
    let n = points.len() as f64;
    let (mut s1, mut s2, mut s3, mut s4) = (0.0, 0.0, 0.0, 0.0);
    let (mut t0, mut t1, mut t2) = (0.0, 0.0, 0.0);
    for &(x, y) in points {
        let x2 = x * x;
        s1 += x;
        s2 += x2;
        s3 += x2 * x;
        s4 += x2 * x2;
        t0 += y;
        t1 += x * y;
        t2 += x2 * y;
    }
    let m = [[s4, s3, s2], [s3, s2, s1], [s2, s1, n]];
    let d = det3(m);
    if d.abs() < 1e-9 {
        return None;
    }
    let a = det3([[t2, s3, s2], [t1, s2, s1], [t0, s1, n]]) / d;
    let b = det3([[s4, t2, s2], [s3, t1, s1], [s2, t0, n]]) / d;
    let c = det3([[s4, s3, t2], [s3, s2, t1], [s2, s1, t0]]) / d;

    let y_mean = t0 / n;
    let (mut ss_res, mut ss_tot) = (0.0, 0.0);
    for &(x, y) in points {
        let f = a * x * x + b * x + c;
        ss_res += (y - f).powi(2);
        ss_tot += (y - y_mean).powi(2);
    }
    let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };
    if !(a.is_finite() && b.is_finite() && c.is_finite() && r2.is_finite()) {
        return None;
    }
    Some((a, b, c, r2))
}

/// Scan growing windows from the newest sample and keep the best-R² fit.
///
/// `samples` must be usable and sorted newest first. The scan stops at the
/// first gap wider than `fit_gap_min` or once a sample is older than
/// `fit_horizon_min`.
pub fn best_quadratic_fit(samples: &[GlucoseSample], cfg: &TrendCfg) -> Option<QuadraticFit> {
    let newest = samples.first()?;
    let mut points: Vec<(f64, f64)> = Vec::with_capacity(samples.len());
    let mut best: Option<QuadraticFit> = None;
    let mut prev_ts = newest.timestamp;

    for s in samples {
        let age = minutes_between(newest.timestamp, s.timestamp);
        if age > cfg.fit_horizon_min || minutes_between(prev_ts, s.timestamp) > cfg.fit_gap_min {
            break;
        }
        prev_ts = s.timestamp;
        points.push((-age / 5.0, s.value));
        if points.len() < MIN_FIT_POINTS {
            continue;
        }
        if let Some((a, b, c, r2)) = fit_parabola(&points)
            && best.is_none_or(|f| r2 > f.r2)
        {
            best = Some(QuadraticFit {
                a,
                b,
                c,
                r2,
                duration_min: age,
            });
        }
    }
    best
}

/// Derive the cycle's glucose trend.
///
/// `samples` is expected newest first and is re-sorted anyway. Fails with
/// `InsufficientData` when no usable sample exists and with `StaleData` when
/// the newest one is older than `cfg.fresh_min` and `allow_stale` is false.
pub fn extract(
    samples: &[GlucoseSample],
    now: DateTime<Utc>,
    allow_stale: bool,
    cfg: &TrendCfg,
) -> Result<GlucoseTrend, TrendError> {
    let mut data: Vec<GlucoseSample> = samples.iter().copied().filter(GlucoseSample::is_usable).collect();
    if data.is_empty() {
        return Err(TrendError::InsufficientData);
    }
    data.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let newest = data[0];
    let age_min = minutes_between(now, newest.timestamp).max(0.0);
    if age_min > cfg.fresh_min && !allow_stale {
        return Err(TrendError::StaleData { age_min });
    }

    let mut now_value = newest.value;
    let mut dup_count = 1.0;
    let (mut last, mut short, mut long) = (Vec::new(), Vec::new(), Vec::new());

    for s in data.iter().skip(1) {
        let minutes_ago = minutes_between(newest.timestamp, s.timestamp);
        if minutes_ago <= DUP_WINDOW_MIN {
            // Running average keeps later deltas relative to the merged value
            now_value = (now_value * dup_count + s.value) / (dup_count + 1.0);
            dup_count += 1.0;
            continue;
        }
        if minutes_ago > LONG_WINDOW.1 {
            break;
        }
        let avg_delta = (now_value - s.value) / minutes_ago * 5.0;
        if minutes_ago > LAST_WINDOW.0 && minutes_ago < LAST_WINDOW.1 {
            last.push(avg_delta);
        }
        if minutes_ago > SHORT_WINDOW.0 && minutes_ago < SHORT_WINDOW.1 {
            short.push(avg_delta);
        } else if minutes_ago > LONG_WINDOW.0 && minutes_ago < LONG_WINDOW.1 {
            long.push(avg_delta);
        }
    }

    let short_avg_delta = mean(&short).unwrap_or(0.0);
    let delta = mean(&last).unwrap_or(short_avg_delta);
    let long_avg_delta = mean(&long).unwrap_or(0.0);

    let fit = best_quadratic_fit(&data, cfg);
    let (acceleration, fit_r2, fit_duration_min, delta_minus5, delta_plus5, fit_glucose) = match fit {
        Some(f) => (
            2.0 * f.a / 25.0,
            f.r2,
            f.duration_min,
            f.b - f.a,
            f.a + f.b,
            f.c,
        ),
        None => (0.0, 0.0, 0.0, 0.0, 0.0, now_value),
    };

    let w = cfg.weight_delta + cfg.weight_short + cfg.weight_long;
    let combined_delta = if w > 0.0 {
        (cfg.weight_delta * delta + cfg.weight_short * short_avg_delta + cfg.weight_long * long_avg_delta) / w
    } else {
        delta
    };

    let trend = GlucoseTrend {
        glucose: now_value,
        delta: round2(delta),
        short_avg_delta: round2(short_avg_delta),
        long_avg_delta: round2(long_avg_delta),
        acceleration,
        combined_delta: round2(combined_delta),
        fit_r2,
        fit_duration_min,
        delta_minus5: round2(delta_minus5),
        delta_plus5: round2(delta_plus5),
        fit_glucose,
        date: newest.timestamp,
    };
    tracing::debug!(
        glucose = trend.glucose,
        delta = trend.delta,
        short = trend.short_avg_delta,
        long = trend.long_avg_delta,
        accel = trend.acceleration,
        r2 = trend.fit_r2,
        "trend extracted"
    );
    Ok(trend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_760_000_000, 0).unwrap()
    }

    /// Samples every 5 minutes, newest first, from a function of minutes ago.
    fn series(n: usize, f: impl Fn(f64) -> f64) -> Vec<GlucoseSample> {
        (0..n)
            .map(|i| {
                let m = i as f64 * 5.0;
                GlucoseSample {
                    timestamp: t0() - Duration::minutes(i as i64 * 5),
                    value: f(m),
                    is_gap_filled: false,
                }
            })
            .collect()
    }

    #[test]
    fn parabola_recovers_exact_coefficients() {
        let pts: Vec<(f64, f64)> = (0..6)
            .map(|i| {
                let x = -(i as f64);
                (x, 2.0 * x * x + 3.0 * x + 100.0)
            })
            .collect();
        let (a, b, c, r2) = fit_parabola(&pts).unwrap();
        assert!((a - 2.0).abs() < 1e-6);
        assert!((b - 3.0).abs() < 1e-6);
        assert!((c - 100.0).abs() < 1e-6);
        assert!((r2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn linear_rise_has_constant_deltas() {
        // +2 mg/dL per minute => +10 per 5 min
        let s = series(9, |m| 200.0 - 2.0 * m);
        let tr = extract(&s, t0(), false, &TrendCfg::default()).unwrap();
        assert_eq!(tr.delta, 10.0);
        assert_eq!(tr.short_avg_delta, 10.0);
        assert_eq!(tr.long_avg_delta, 10.0);
        assert_eq!(tr.combined_delta, 10.0);
        assert!(tr.acceleration.abs() < 1e-6);
    }

    #[test]
    fn duplicates_are_averaged_into_newest() {
        let mut s = series(4, |_| 120.0);
        s.insert(
            1,
            GlucoseSample {
                timestamp: t0() - Duration::seconds(60),
                value: 130.0,
                is_gap_filled: false,
            },
        );
        let tr = extract(&s, t0(), false, &TrendCfg::default()).unwrap();
        assert!((tr.glucose - 125.0).abs() < 1e-9);
        assert_eq!(tr.delta, 5.0);
    }

    #[test]
    fn gap_filled_and_low_values_are_ignored() {
        let mut s = series(3, |_| 110.0);
        s[0].is_gap_filled = true;
        s[1].value = 39.0;
        let tr = extract(&s, t0(), true, &TrendCfg::default()).unwrap();
        assert_eq!(tr.date, s[2].timestamp);
    }

    #[test]
    fn empty_or_stale_history_fails() {
        assert_eq!(
            extract(&[], t0(), false, &TrendCfg::default()),
            Err(TrendError::InsufficientData)
        );
        let s = series(3, |_| 110.0);
        let later = t0() + Duration::minutes(12);
        match extract(&s, later, false, &TrendCfg::default()) {
            Err(TrendError::StaleData { age_min }) => assert!((age_min - 12.0).abs() < 1e-9),
            other => panic!("expected stale, got {other:?}"),
        }
        assert!(extract(&s, later, true, &TrendCfg::default()).is_ok());
    }

    #[test]
    fn curving_rise_reports_positive_acceleration() {
        // value(t) with t in minutes relative to now (negative in the past)
        let s = series(8, |m| 150.0 + 0.05 * m * m - 1.0 * m);
        let tr = extract(&s, t0(), false, &TrendCfg::default()).unwrap();
        assert!(tr.acceleration > 0.0, "accel {}", tr.acceleration);
        assert!(tr.fit_r2 > 0.99);
        assert!(tr.delta_plus5 > tr.delta_minus5);
    }

    #[test]
    fn fit_stops_at_large_gap() {
        let mut s = series(3, |_| 100.0);
        for i in 0..5 {
            s.push(GlucoseSample {
                timestamp: t0() - Duration::minutes(30 + i * 5),
                value: 140.0,
                is_gap_filled: false,
            });
        }
        let fit = best_quadratic_fit(&s, &TrendCfg::default());
        assert!(fit.is_none(), "only three points precede the gap");
    }
}
