//! Collector / Aggregator
//!
//! Folds completed runs' artifacts into a `MetricsSummary`: biomarker ->
//! metric -> ordered per-run values. Collection is a pure function of the
//! on-disk artifacts and the configuration; the order runs completed in
//! never affects the result, and re-collecting the same outputs yields
//! byte-identical JSON.
//!
//! A run whose job failed, whose artifacts are missing or malformed, or
//! whose metrics come out non-finite (degenerate deviation scores) is
//! skipped and recorded; the summary never silently shortens a value
//! sequence without the skip showing up in `skipped_runs`. Keeping only
//! finite values also keeps the persisted JSON loadable: `serde_json`
//! writes non-finite floats as `null`, which would not deserialize back
//! into `f64`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::metrics::{self, quantile_column};
use crate::run::{JobOutcome, Run};
use crate::table::FeatureTable;
use crate::Result;

/// Cross-run metric summary for one model variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    variant: String,
    quantile_levels: Vec<f64>,
    clip_bound: f64,
    /// Ordinal indices of runs whose metrics are included, ascending.
    collected_runs: Vec<usize>,
    /// Ordinal indices of runs skipped (failed job, unreadable artifact,
    /// or non-finite metrics).
    skipped_runs: Vec<usize>,
    /// biomarker -> metric -> one value per collected run, in run order.
    metrics: BTreeMap<String, BTreeMap<String, Vec<f64>>>,
}

impl MetricsSummary {
    /// Variant name this summary belongs to.
    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Number of runs whose metrics are included.
    #[must_use]
    pub fn n_collected(&self) -> usize {
        self.collected_runs.len()
    }

    /// Number of runs skipped.
    #[must_use]
    pub fn n_skipped(&self) -> usize {
        self.skipped_runs.len()
    }

    /// Indices of skipped runs, ascending.
    #[must_use]
    pub fn skipped_runs(&self) -> &[usize] {
        &self.skipped_runs
    }

    /// Per-run values of one metric for one biomarker, in run order.
    #[must_use]
    pub fn values(&self, biomarker: &str, metric: &str) -> Option<&[f64]> {
        self.metrics
            .get(biomarker)?
            .get(metric)
            .map(Vec::as_slice)
    }

    /// Biomarker names present in the summary, ordered.
    #[must_use]
    pub fn biomarkers(&self) -> Vec<&str> {
        self.metrics.keys().map(String::as_str).collect()
    }

    /// Serialize to pretty JSON bytes. `BTreeMap` keys make this stable, so
    /// identical summaries serialize byte-for-byte identically.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Persist as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error on serialization or IO failure.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json_bytes()?)?;
        Ok(())
    }

    /// Load a persisted summary.
    ///
    /// # Errors
    ///
    /// Returns an error on IO or deserialization failure.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Columns a collected run must provide for one biomarker.
struct RunColumns {
    observed: Vec<f64>,
    predicted: Vec<f64>,
    zscores: Vec<f64>,
    quantiles: Vec<Vec<f64>>,
}

fn read_run_columns(
    run: &Run,
    suffix: &str,
    biomarker: &str,
    levels: &[f64],
) -> Option<RunColumns> {
    let read = |path: std::path::PathBuf| match FeatureTable::read_parquet(&path) {
        Ok(t) => Some(t),
        Err(e) => {
            tracing::warn!(run = run.index(), path = %path.display(), error = %e, "unreadable artifact");
            None
        }
    };
    let y_test = read(run.y_test())?;
    let yhat = read(run.yhat(suffix))?;
    let quants = read(run.quantiles(suffix))?;
    let zscores = read(run.zscores(suffix))?;

    let observed = y_test.column(biomarker)?.to_vec();
    let predicted = yhat.column(biomarker)?.to_vec();
    let z = zscores.column(biomarker)?.to_vec();
    let mut per_level = Vec::with_capacity(levels.len());
    for &level in levels {
        per_level.push(quants.column(&quantile_column(biomarker, level))?.to_vec());
    }
    Some(RunColumns {
        observed,
        predicted,
        zscores: z,
        quantiles: per_level,
    })
}

/// Aggregate all completed runs of one variant into a `MetricsSummary`.
///
/// `outcomes` must cover every dispatched job for the variant; runs without
/// a successful outcome, with unreadable/incomplete artifacts, or with any
/// non-finite metric value are skipped and recorded. Aggregation order is
/// run-index order regardless of the order outcomes arrived in.
///
/// # Errors
///
/// Currently infallible beyond the `Result` signature reserved for future
/// persistence hooks; artifact problems surface as recorded skips, not
/// errors (see DESIGN.md policy).
pub fn collect_variant(
    runs: &[Run],
    outcomes: &[JobOutcome],
    biomarkers: &[String],
    variant: &str,
    levels: &[f64],
    clip_bound: f64,
) -> Result<MetricsSummary> {
    let by_index: HashMap<usize, &JobOutcome> =
        outcomes.iter().map(|o| (o.run_index, o)).collect();

    let mut summary = MetricsSummary {
        variant: variant.to_string(),
        quantile_levels: levels.to_vec(),
        clip_bound,
        collected_runs: Vec::new(),
        skipped_runs: Vec::new(),
        metrics: BTreeMap::new(),
    };

    for run in runs {
        let ok = by_index
            .get(&run.index())
            .is_some_and(|o| o.succeeded());
        if !ok {
            tracing::warn!(run = run.index(), variant, "skipping run without successful job");
            summary.skipped_runs.push(run.index());
            continue;
        }

        // Read every biomarker's columns before committing any of them, so
        // a malformed artifact skips the whole run, not half of it.
        let mut columns = Vec::with_capacity(biomarkers.len());
        let mut complete = true;
        for biomarker in biomarkers {
            match read_run_columns(run, variant, biomarker, levels) {
                Some(c) => columns.push(c),
                None => {
                    tracing::warn!(
                        run = run.index(),
                        biomarker = %biomarker,
                        variant,
                        "incomplete artifact, skipping run"
                    );
                    complete = false;
                    break;
                }
            }
        }
        if !complete {
            summary.skipped_runs.push(run.index());
            continue;
        }

        // Stage every biomarker's metrics before committing any of them;
        // a non-finite value (constant scores, zero response variance)
        // skips the whole run.
        let mut staged = Vec::with_capacity(biomarkers.len());
        let mut finite = true;
        for (biomarker, cols) in biomarkers.iter().zip(columns) {
            let computed = metrics::run_metrics(
                &cols.observed,
                &cols.predicted,
                &cols.zscores,
                levels,
                &cols.quantiles,
                clip_bound,
            );
            if computed.values().any(|v| !v.is_finite()) {
                tracing::warn!(
                    run = run.index(),
                    biomarker = %biomarker,
                    variant,
                    "non-finite metric, skipping run"
                );
                finite = false;
                break;
            }
            staged.push((biomarker.clone(), computed));
        }
        if !finite {
            summary.skipped_runs.push(run.index());
            continue;
        }

        for (biomarker, computed) in staged {
            let slot = summary.metrics.entry(biomarker).or_default();
            for (metric, value) in computed {
                slot.entry(metric).or_default().push(value);
            }
        }
        summary.collected_runs.push(run.index());
    }

    tracing::info!(
        variant,
        collected = summary.n_collected(),
        skipped = summary.n_skipped(),
        "aggregated variant"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::METRIC_NAMES;
    use crate::run::RunStatus;
    use chrono::Utc;
    use std::path::Path;

    fn outcome(run_index: usize, status: RunStatus) -> JobOutcome {
        JobOutcome {
            run_index,
            status,
            attempts: 1,
            error: None,
            started_at: Some(Utc::now()),
            ended_at: Some(Utc::now()),
        }
    }

    /// Write a plausible set of fit artifacts for one run.
    fn write_artifacts(run: &Run, suffix: &str, biomarkers: &[String], levels: &[f64]) {
        std::fs::create_dir_all(run.dir()).unwrap();
        let n = 40;
        let mut y = FeatureTable::new();
        let mut yhat = FeatureTable::new();
        let mut z = FeatureTable::new();
        let mut q = FeatureTable::new();
        for (bi, b) in biomarkers.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let obs: Vec<f64> = (0..n).map(|i| bi as f64 + i as f64 * 0.01).collect();
            y.add_column(b.clone(), obs.clone()).unwrap();
            yhat.add_column(b.clone(), obs.iter().map(|v| v + 0.005).collect::<Vec<_>>())
                .unwrap();
            #[allow(clippy::cast_precision_loss)]
            z.add_column(b.clone(), (0..n).map(|i| (i as f64 - 20.0) / 10.0).collect::<Vec<_>>())
                .unwrap();
            for &level in levels {
                q.add_column(
                    quantile_column(b, level),
                    obs.iter().map(|v| v + level).collect::<Vec<_>>(),
                )
                .unwrap();
            }
        }
        y.write_parquet(run.y_test()).unwrap();
        yhat.write_parquet(run.yhat(suffix)).unwrap();
        z.write_parquet(run.zscores(suffix)).unwrap();
        q.write_parquet(run.quantiles(suffix)).unwrap();
    }

    fn setup(dir: &Path) -> (Vec<Run>, Vec<String>, Vec<f64>) {
        let biomarkers = vec!["theta".to_string(), "alpha".to_string()];
        let levels = vec![0.05, 0.5, 0.95];
        let runs: Vec<Run> = (0..3)
            .map(|i| Run::new(40 + i as u64, i, dir.join(format!("run-{i}"))))
            .collect();
        for run in &runs {
            write_artifacts(run, "shash", &biomarkers, &levels);
        }
        (runs, biomarkers, levels)
    }

    #[test]
    fn test_collect_all_runs() {
        let dir = tempfile::tempdir().unwrap();
        let (runs, biomarkers, levels) = setup(dir.path());
        let outcomes: Vec<JobOutcome> =
            (0..3).map(|i| outcome(i, RunStatus::Success)).collect();
        let s = collect_variant(&runs, &outcomes, &biomarkers, "shash", &levels, 8.0).unwrap();
        assert_eq!(s.n_collected(), 3);
        assert_eq!(s.n_skipped(), 0);
        for b in &biomarkers {
            for m in METRIC_NAMES {
                assert_eq!(s.values(b, m).unwrap().len(), 3, "{b}/{m}");
            }
        }
    }

    #[test]
    fn test_failed_run_is_skipped_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (runs, biomarkers, levels) = setup(dir.path());
        let outcomes = vec![
            outcome(0, RunStatus::Success),
            outcome(1, RunStatus::Failed),
            outcome(2, RunStatus::Success),
        ];
        let s = collect_variant(&runs, &outcomes, &biomarkers, "shash", &levels, 8.0).unwrap();
        assert_eq!(s.n_collected(), 2);
        assert_eq!(s.skipped_runs(), [1]);
        assert_eq!(s.values("theta", "smse").unwrap().len(), 2);
    }

    #[test]
    fn test_missing_artifact_is_skipped_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (runs, biomarkers, levels) = setup(dir.path());
        std::fs::remove_file(runs[2].zscores("shash")).unwrap();
        let outcomes: Vec<JobOutcome> =
            (0..3).map(|i| outcome(i, RunStatus::Success)).collect();
        let s = collect_variant(&runs, &outcomes, &biomarkers, "shash", &levels, 8.0).unwrap();
        assert_eq!(s.n_collected(), 2);
        assert_eq!(s.skipped_runs(), [2]);
    }

    #[test]
    fn test_collection_order_independent_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (runs, biomarkers, levels) = setup(dir.path());
        let forward: Vec<JobOutcome> =
            (0..3).map(|i| outcome(i, RunStatus::Success)).collect();
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = collect_variant(&runs, &forward, &biomarkers, "shash", &levels, 8.0).unwrap();
        let b = collect_variant(&runs, &reversed, &biomarkers, "shash", &levels, 8.0).unwrap();
        assert_eq!(a.to_json_bytes().unwrap(), b.to_json_bytes().unwrap());

        // Re-collecting the same completed outputs is byte-identical.
        let c = collect_variant(&runs, &forward, &biomarkers, "shash", &levels, 8.0).unwrap();
        assert_eq!(a.to_json_bytes().unwrap(), c.to_json_bytes().unwrap());
    }

    #[test]
    fn test_degenerate_scores_skip_run_and_keep_summary_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let (runs, biomarkers, levels) = setup(dir.path());
        // Constant deviation scores leave skewness/kurtosis undefined.
        let mut z = FeatureTable::new();
        for b in &biomarkers {
            z.add_column(b.clone(), vec![0.5; 40]).unwrap();
        }
        z.write_parquet(runs[1].zscores("shash")).unwrap();

        let outcomes: Vec<JobOutcome> =
            (0..3).map(|i| outcome(i, RunStatus::Success)).collect();
        let s = collect_variant(&runs, &outcomes, &biomarkers, "shash", &levels, 8.0).unwrap();
        assert_eq!(s.skipped_runs(), [1]);
        assert_eq!(s.n_collected(), 2);
        for b in &biomarkers {
            assert!(s.values(b, "skew").unwrap().iter().all(|v| v.is_finite()));
        }

        // With only finite values persisted, the file loads back.
        let path = dir.path().join("summary_shash.json");
        s.save(&path).unwrap();
        assert_eq!(MetricsSummary::load(&path).unwrap(), s);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (runs, biomarkers, levels) = setup(dir.path());
        let outcomes: Vec<JobOutcome> =
            (0..3).map(|i| outcome(i, RunStatus::Success)).collect();
        let s = collect_variant(&runs, &outcomes, &biomarkers, "shash", &levels, 8.0).unwrap();
        let path = dir.path().join("summary_shash.json");
        s.save(&path).unwrap();
        let back = MetricsSummary::load(&path).unwrap();
        assert_eq!(back, s);
    }
}
