//! Gradient-trained residual corrector.
//!
//! A linear model fitted by plain SGD on past cycles. Given the state and the
//! baseline issued at that cycle, it predicts how many units the baseline was
//! short (or over) and nudges the new baseline by at most a configured
//! fraction of the max micro-bolus.

use crate::config::SmbCfg;
use crate::types::LogRecord;

const N_FEATURES: usize = 6;
const RESIDUAL_LIMIT_U: f64 = 2.0;

fn features(bg: f64, delta: f64, iob: f64, cob: f64, baseline: f64) -> [f64; N_FEATURES] {
    [1.0, bg / 100.0, delta / 10.0, iob / 5.0, cob / 50.0, baseline]
}

#[derive(Debug, Clone, PartialEq)]
pub struct Corrector {
    weights: [f64; N_FEATURES],
}

impl Corrector {
    /// Fit on `records`; `None` when there are too few usable rows or the
    /// weights diverge.
    pub fn train(records: &[LogRecord], target: f64, isf: f64, cfg: &SmbCfg) -> Option<Self> {
        if isf <= 0.0 {
            return None;
        }
        let rows: Vec<([f64; N_FEATURES], f64)> = records
            .iter()
            .filter(|r| {
                [r.bg, r.delta, r.iob, r.cob, r.baseline_units, r.bg_after_30]
                    .iter()
                    .all(|v| v.is_finite())
            })
            .map(|r| {
                let residual = ((r.bg_after_30 - target) / isf).clamp(-RESIDUAL_LIMIT_U, RESIDUAL_LIMIT_U);
                (features(r.bg, r.delta, r.iob, r.cob, r.baseline_units), residual)
            })
            .collect();
        if rows.len() < cfg.corrector_min_records {
            return None;
        }

        let mut w = [0.0; N_FEATURES];
        for _ in 0..cfg.corrector_epochs {
            for (x, y) in &rows {
                let pred: f64 = w.iter().zip(x).map(|(wi, xi)| wi * xi).sum();
                let err = pred - y;
                for (wi, xi) in w.iter_mut().zip(x) {
                    *wi -= cfg.corrector_learning_rate * err * xi;
                }
            }
        }
        w.iter().all(|v| v.is_finite()).then_some(Self { weights: w })
    }

    pub fn predict(&self, bg: f64, delta: f64, iob: f64, cob: f64, baseline: f64) -> f64 {
        self.weights
            .iter()
            .zip(features(bg, delta, iob, cob, baseline))
            .map(|(w, x)| w * x)
            .sum()
    }
}

/// Refine `baseline` with a corrector trained on `records`. Any failure
/// returns the baseline unchanged.
#[allow(clippy::too_many_arguments)]
pub fn refine(
    baseline: f64,
    records: &[LogRecord],
    bg: f64,
    delta: f64,
    iob: f64,
    cob: f64,
    target: f64,
    isf: f64,
    max_smb: f64,
    cfg: &SmbCfg,
) -> (f64, Option<String>) {
    let Some(model) = Corrector::train(records, target, isf, cfg) else {
        return (baseline, None);
    };
    let raw = model.predict(bg, delta, iob, cob, baseline);
    if !raw.is_finite() {
        tracing::warn!("corrector produced a non-finite adjustment");
        return (baseline, None);
    }
    let limit = cfg.corrector_max_fraction * max_smb;
    let adj = raw.clamp(-limit, limit);
    let refined = (baseline + adj).max(0.0);
    (refined, Some(format!("corrector {adj:+.2} U on {} records", records.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(bg: f64, after: f64) -> LogRecord {
        LogRecord {
            bg,
            delta: 2.0,
            iob: 1.0,
            cob: 0.0,
            baseline_units: 0.3,
            bg_after_30: after,
        }
    }

    #[test]
    fn too_few_records_keeps_baseline() {
        let recs = vec![rec(150.0, 160.0); 3];
        let (v, note) = refine(0.4, &recs, 150.0, 2.0, 1.0, 0.0, 110.0, 50.0, 1.0, &SmbCfg::default());
        assert_eq!(v, 0.4);
        assert!(note.is_none());
    }

    #[test]
    fn persistent_highs_push_dose_up_within_cap() {
        let recs = vec![rec(180.0, 210.0); 20];
        let (v, note) = refine(0.4, &recs, 180.0, 2.0, 1.0, 0.0, 110.0, 50.0, 1.0, &SmbCfg::default());
        assert!(v > 0.4);
        assert!(v <= 0.9 + 1e-9);
        assert!(note.is_some());
    }

    #[test]
    fn issued_baseline_is_a_feature() {
        let recs = vec![rec(180.0, 210.0); 20];
        let model = Corrector::train(&recs, 110.0, 50.0, &SmbCfg::default()).unwrap();
        let small = model.predict(180.0, 2.0, 1.0, 0.0, 0.1);
        let large = model.predict(180.0, 2.0, 1.0, 0.0, 0.6);
        assert!((small - large).abs() > 1e-6);
    }
}
