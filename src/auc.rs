//! Deviation-score discrimination
//!
//! Rank-based AUC between patient and held-out healthy deviation scores,
//! with significance from seeded label permutations and Benjamini-Hochberg
//! correction across biomarkers. The permutation count is fixed across
//! biomarkers so corrected significance stays comparable.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Discrimination result for one biomarker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AucTest {
    /// Biomarker name.
    pub biomarker: String,
    /// Area under the ROC curve, patient scores vs healthy scores.
    pub auc: f64,
    /// Two-sided permutation p-value for AUC != 0.5.
    pub p_value: f64,
    /// Benjamini-Hochberg adjusted p-value across the tested biomarkers.
    pub p_adjusted: f64,
}

/// Mid-ranks (1-based, ties averaged) of `values`.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(Ordering::Equal)
    });
    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        #[allow(clippy::cast_precision_loss)]
        let avg = (i + j + 2) as f64 / 2.0;
        for &k in &order[i..=j] {
            ranks[k] = avg;
        }
        i = j + 1;
    }
    ranks
}

/// Rank-based AUC of `patient` against `control`, with tie handling
/// (equivalent to the Mann-Whitney U statistic). NaN for an empty group.
#[must_use]
pub fn rank_auc(patient: &[f64], control: &[f64]) -> f64 {
    if patient.is_empty() || control.is_empty() {
        return f64::NAN;
    }
    let mut pooled = Vec::with_capacity(patient.len() + control.len());
    pooled.extend_from_slice(patient);
    pooled.extend_from_slice(control);
    let ranks = average_ranks(&pooled);
    let r_patient: f64 = ranks[..patient.len()].iter().sum();
    #[allow(clippy::cast_precision_loss)]
    let (np, nc) = (patient.len() as f64, control.len() as f64);
    (r_patient - np * (np + 1.0) / 2.0) / (np * nc)
}

/// Two-sided permutation p-value for the AUC departing from 0.5.
///
/// Labels are permuted `n_perm` times with independently seeded generators
/// per permutation, so the result is deterministic for a fixed `seed`
/// regardless of thread scheduling.
#[must_use]
pub fn permutation_pvalue(patient: &[f64], control: &[f64], n_perm: usize, seed: u64) -> f64 {
    if patient.is_empty() || control.is_empty() || n_perm == 0 {
        return f64::NAN;
    }
    let observed = (rank_auc(patient, control) - 0.5).abs();
    let mut pool = Vec::with_capacity(patient.len() + control.len());
    pool.extend_from_slice(patient);
    pool.extend_from_slice(control);
    let np = patient.len();

    let hits = (0..n_perm)
        .into_par_iter()
        .filter(|&perm| {
            let mut rng =
                StdRng::seed_from_u64(seed ^ (perm as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            let mut shuffled = pool.clone();
            shuffled.shuffle(&mut rng);
            let stat = (rank_auc(&shuffled[..np], &shuffled[np..]) - 0.5).abs();
            stat >= observed
        })
        .count();

    #[allow(clippy::cast_precision_loss)]
    let p = (hits as f64 + 1.0) / (n_perm as f64 + 1.0);
    p
}

/// Benjamini-Hochberg adjusted p-values, preserving input order.
#[must_use]
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    if m == 0 {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| {
        p_values[a]
            .partial_cmp(&p_values[b])
            .unwrap_or(Ordering::Equal)
    });

    #[allow(clippy::cast_precision_loss)]
    let m_f = m as f64;
    let mut adjusted = vec![0.0; m];
    let mut running_min = 1.0_f64;
    for (rank_back, &idx) in order.iter().enumerate().rev() {
        #[allow(clippy::cast_precision_loss)]
        let rank = (rank_back + 1) as f64;
        let candidate = (p_values[idx] * m_f / rank).min(1.0);
        running_min = running_min.min(candidate);
        adjusted[idx] = running_min;
    }
    adjusted
}

/// Run the full discrimination battery: AUC + permutation p-value per
/// biomarker, then BH correction across all of them.
///
/// `pairs` holds `(biomarker, patient_scores, healthy_scores)`; the same
/// permutation count and seed are used for every biomarker.
#[must_use]
pub fn discriminate(
    pairs: &[(String, Vec<f64>, Vec<f64>)],
    n_perm: usize,
    seed: u64,
) -> Vec<AucTest> {
    let mut tests: Vec<AucTest> = pairs
        .iter()
        .map(|(biomarker, patient, control)| AucTest {
            biomarker: biomarker.clone(),
            auc: rank_auc(patient, control),
            p_value: permutation_pvalue(patient, control, n_perm, seed),
            p_adjusted: f64::NAN,
        })
        .collect();
    let raw: Vec<f64> = tests.iter().map(|t| t.p_value).collect();
    for (test, adj) in tests.iter_mut().zip(benjamini_hochberg(&raw)) {
        test.p_adjusted = adj;
    }
    tests
}
