//! Per-run evaluation metrics
//!
//! Pure functions over a run's collected artifacts: predictions, predictive
//! quantiles, and deviation scores. Deviation scores are clamped at a
//! configurable bound *before* any moment is computed, so a single diverged
//! sampler cannot dominate the cross-run summary.
//!
//! All functions are deterministic for fixed inputs; the aggregator relies
//! on that for its idempotence guarantee.

use std::collections::BTreeMap;

/// Fixed ordered metric set computed per biomarker per run.
pub const METRIC_NAMES: [&str; 5] = ["smse", "skew", "kurtosis", "normality", "mace"];

/// Clamp deviation scores into `[-bound, bound]` in place.
///
/// A score exactly at the bound is retained unchanged.
pub fn clamp_scores(scores: &mut [f64], bound: f64) {
    for v in scores.iter_mut() {
        *v = v.clamp(-bound, bound);
    }
}

/// Arithmetic mean; NaN for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    values.iter().sum::<f64>() / n
}

/// Unbiased sample variance; NaN for fewer than 2 values.
#[must_use]
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1.0)
}

fn central_moment(values: &[f64], order: i32) -> f64 {
    let m = mean(values);
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    values.iter().map(|v| (v - m).powi(order)).sum::<f64>() / n
}

/// Moment-based skewness g1; NaN for degenerate input.
#[must_use]
pub fn skewness(values: &[f64]) -> f64 {
    if values.len() < 3 {
        return f64::NAN;
    }
    let m2 = central_moment(values, 2);
    if m2 <= 0.0 {
        return f64::NAN;
    }
    central_moment(values, 3) / m2.powf(1.5)
}

/// Moment-based excess kurtosis g2; NaN for degenerate input.
#[must_use]
pub fn excess_kurtosis(values: &[f64]) -> f64 {
    if values.len() < 4 {
        return f64::NAN;
    }
    let m2 = central_moment(values, 2);
    if m2 <= 0.0 {
        return f64::NAN;
    }
    central_moment(values, 4) / (m2 * m2) - 3.0
}

/// Jarque-Bera normality statistic: n/6 * (g1^2 + g2^2/4).
///
/// Zero for a perfectly Gaussian sample, growing with departure from
/// normality in either skew or tail weight.
#[must_use]
pub fn jarque_bera(values: &[f64]) -> f64 {
    let s = skewness(values);
    let k = excess_kurtosis(values);
    if s.is_nan() || k.is_nan() {
        return f64::NAN;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    n / 6.0 * (s * s + k * k / 4.0)
}

/// Standardized mean squared error: MSE of predictions over the sample
/// variance of the observed responses.
#[must_use]
pub fn smse(observed: &[f64], predicted: &[f64]) -> f64 {
    if observed.len() != predicted.len() || observed.is_empty() {
        return f64::NAN;
    }
    let var = sample_variance(observed);
    if !(var > 0.0) {
        return f64::NAN;
    }
    let mse = observed
        .iter()
        .zip(predicted)
        .map(|(y, yh)| (y - yh).powi(2))
        .sum::<f64>();
    #[allow(clippy::cast_precision_loss)]
    let n = observed.len() as f64;
    mse / n / var
}

/// Mean absolute centile error: mean over quantile levels of
/// |empirical coverage - nominal level|, where coverage is the fraction of
/// observed responses at or below the predicted per-row quantile.
///
/// `quantiles[i]` holds the predicted level-`levels[i]` quantile for every
/// row, aligned with `observed`.
#[must_use]
pub fn mace(observed: &[f64], levels: &[f64], quantiles: &[Vec<f64>]) -> f64 {
    if levels.is_empty() || levels.len() != quantiles.len() || observed.is_empty() {
        return f64::NAN;
    }
    let mut total = 0.0;
    for (level, preds) in levels.iter().zip(quantiles) {
        if preds.len() != observed.len() {
            return f64::NAN;
        }
        let covered = observed
            .iter()
            .zip(preds)
            .filter(|(y, q)| y <= q)
            .count();
        #[allow(clippy::cast_precision_loss)]
        let coverage = covered as f64 / observed.len() as f64;
        total += (coverage - level).abs();
    }
    #[allow(clippy::cast_precision_loss)]
    let k = levels.len() as f64;
    total / k
}

/// Column name for a biomarker's predicted quantile at `level` in the
/// quantiles artifact (e.g. `theta_q050` for the 5th centile).
#[must_use]
pub fn quantile_column(biomarker: &str, level: f64) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let tag = (level * 1000.0).round() as u32;
    format!("{biomarker}_q{tag:03}")
}

/// Compute the fixed metric set for one biomarker of one run.
///
/// Deviation scores are clamped at `clip_bound` first; the caller passes
/// the raw artifact columns.
#[must_use]
pub fn run_metrics(
    observed: &[f64],
    predicted: &[f64],
    zscores: &[f64],
    levels: &[f64],
    quantiles: &[Vec<f64>],
    clip_bound: f64,
) -> BTreeMap<String, f64> {
    let mut z = zscores.to_vec();
    clamp_scores(&mut z, clip_bound);

    let mut out = BTreeMap::new();
    out.insert("smse".to_string(), smse(observed, predicted));
    out.insert("skew".to_string(), skewness(&z));
    out.insert("kurtosis".to_string(), excess_kurtosis(&z));
    out.insert("normality".to_string(), jarque_bera(&z));
    out.insert("mace".to_string(), mace(observed, levels, quantiles));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_boundary() {
        let mut z = vec![-9.0, -8.0, 0.5, 8.0, 9.0];
        clamp_scores(&mut z, 8.0);
        // Exactly at the bound: unchanged. One unit beyond: clamped.
        assert_eq!(z, vec![-8.0, -8.0, 0.5, 8.0, 8.0]);
    }

    #[test]
    fn test_symmetric_sample_has_zero_skew() {
        let z = vec![-2.0, -1.0, 0.0, 1.0, 2.0];
        assert!(skewness(&z).abs() < 1e-12);
    }

    #[test]
    fn test_jarque_bera_zero_for_matched_moments() {
        // Uniform grid: symmetric (g1 = 0) but platykurtic, so JB reflects
        // only the kurtosis term.
        let z: Vec<f64> = (0..100).map(|i| f64::from(i) / 10.0).collect();
        let jb = jarque_bera(&z);
        let k = excess_kurtosis(&z);
        #[allow(clippy::cast_precision_loss)]
        let expect = z.len() as f64 / 6.0 * (k * k / 4.0);
        assert!((jb - expect).abs() < 1e-9);
    }

    #[test]
    fn test_smse_perfect_prediction_is_zero() {
        let y = vec![1.0, 2.0, 3.0, 4.0];
        assert!(smse(&y, &y).abs() < 1e-12);
        // Predicting the mean gives SMSE near 1 (population/sample factor).
        let yhat = vec![2.5; 4];
        let v = smse(&y, &yhat);
        assert!(v > 0.5 && v < 1.1);
    }

    #[test]
    fn test_mace_exact_coverage() {
        // Observed uniform on [0,1); predicted quantiles are the exact
        // distribution quantiles, so empirical coverage matches the level.
        let n = 1000;
        let observed: Vec<f64> = (0..n).map(|i| f64::from(i) / f64::from(n)).collect();
        let levels = [0.1, 0.5, 0.9];
        let quantiles: Vec<Vec<f64>> = levels
            .iter()
            .map(|l| vec![l - 1e-9; observed.len()])
            .collect();
        let m = mace(&observed, &levels, &quantiles);
        assert!(m < 1e-3, "mace = {m}");
    }

    #[test]
    fn test_quantile_column_names() {
        assert_eq!(quantile_column("theta", 0.05), "theta_q050");
        assert_eq!(quantile_column("alpha", 0.975), "alpha_q975");
        assert_eq!(quantile_column("beta", 0.5), "beta_q500");
    }

    #[test]
    fn test_run_metrics_has_fixed_keys() {
        let y = vec![0.1, 0.2, 0.3, 0.4, 0.5];
        let z = vec![-1.0, -0.5, 0.0, 0.5, 1.0];
        let levels = [0.5];
        let quants = vec![vec![0.3; 5]];
        let m = run_metrics(&y, &y, &z, &levels, &quants, 8.0);
        let keys: Vec<&str> = m.keys().map(String::as_str).collect();
        let mut expect = METRIC_NAMES.to_vec();
        expect.sort_unstable();
        assert_eq!(keys, expect);
    }
}
