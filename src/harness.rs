//! Experiment orchestration
//!
//! The repeated-run harness: generate K seeded splits once, then for each
//! model variant dispatch one fit job per run, join on the whole batch,
//! and aggregate the collected artifacts into a per-variant summary. A
//! second pass scores a patient cohort against the fitted models and runs
//! the AUC discrimination battery on the resulting deviation scores.
//!
//! Phase ordering is strict: splits before dispatch, a full join before
//! collection, collection before any cross-variant comparison. Sibling
//! runs share nothing but the filesystem namespace, and every job gets
//! its own output and scratch directories.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auc::{self, AucTest};
use crate::config::ExperimentConfig;
use crate::dispatch::ExecBackend;
use crate::run::{JobMode, JobOutcome, JobSpec, Run};
use crate::split::{self, RunSet};
use crate::summary::{self, MetricsSummary};
use crate::table::FeatureTable;
use crate::variant::ModelVariant;
use crate::Result;

/// Operator-facing result of one variant's repeated-run comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantReport {
    /// Variant name.
    pub variant: String,
    /// Number of runs dispatched.
    pub total_runs: usize,
    /// Jobs that terminated successfully.
    pub succeeded: usize,
    /// Jobs that failed terminally (after any resubmission).
    pub failed: usize,
    /// Runs the aggregator skipped (failed job or unreadable artifact).
    pub skipped_in_aggregation: usize,
    /// Where the persisted metrics summary lives.
    pub summary_path: PathBuf,
    /// Completion timestamp.
    pub finished_at: DateTime<Utc>,
}

/// Per-run discrimination results for one variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDiscrimination {
    /// Ordinal run index.
    pub run_index: usize,
    /// One test per biomarker, BH-corrected within the run.
    pub tests: Vec<AucTest>,
}

/// Discrimination battery output across all runs of a variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscriminationReport {
    /// Variant name.
    pub variant: String,
    /// Permutation count shared by every biomarker.
    pub permutations: usize,
    /// Per-run results, in run order.
    pub runs: Vec<RunDiscrimination>,
    /// Runs skipped for missing deviation-score artifacts.
    pub skipped_runs: Vec<usize>,
}

/// The repeated-run experiment harness.
pub struct Harness {
    config: ExperimentConfig,
    backend: ExecBackend,
    program: PathBuf,
    out_root: PathBuf,
}

impl Harness {
    /// Create a harness rooted at `out_root`, validating the config first.
    ///
    /// `program` is the external modeling executable invoked per job.
    ///
    /// # Errors
    ///
    /// Returns every config validation violation at once.
    pub fn new(
        config: ExperimentConfig,
        backend: ExecBackend,
        program: PathBuf,
        out_root: PathBuf,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            program,
            out_root,
        })
    }

    /// Experiment configuration.
    #[must_use]
    pub const fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Generate the K seeded splits for the healthy cohort.
    ///
    /// # Errors
    ///
    /// Fails fast on missing values or an undersized stratum, before any
    /// job is dispatched.
    pub fn generate_runs(&self, healthy: &FeatureTable) -> Result<RunSet> {
        split::generate_runs(
            healthy,
            &self.config.split_spec(),
            &self.config.seeds,
            &self.out_root,
        )
    }

    fn quantile_arg(&self) -> String {
        self.config
            .quantile_levels
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    fn common_args(&self, run: &Run) -> Vec<String> {
        vec![
            "--x-train".to_string(),
            run.x_train().display().to_string(),
            "--y-train".to_string(),
            run.y_train().display().to_string(),
            "--batch-train".to_string(),
            run.batch_train().display().to_string(),
            "--x-test".to_string(),
            run.x_test().display().to_string(),
            "--y-test".to_string(),
            run.y_test().display().to_string(),
            "--batch-test".to_string(),
            run.batch_test().display().to_string(),
            "--quantiles".to_string(),
            self.quantile_arg(),
            "--cores".to_string(),
            self.config.resources.cores.to_string(),
        ]
    }

    fn fit_job(&self, run: &Run, variant: &ModelVariant) -> JobSpec {
        let scratch = run.scratch_dir(variant.name());
        let mut args = vec!["--mode".to_string(), "fit".to_string()];
        args.extend(self.common_args(run));
        args.push("--output-dir".to_string());
        args.push(run.dir().display().to_string());
        args.push("--scratch-dir".to_string());
        args.push(scratch.display().to_string());
        args.extend(variant.to_args());
        JobSpec {
            run_index: run.index(),
            mode: JobMode::Fit,
            program: self.program.clone(),
            args,
            output_dir: run.dir().to_path_buf(),
            scratch_dir: scratch,
            expected_artifact: run.zscores(variant.name()),
            resources: self.config.resources,
        }
    }

    fn predict_job(&self, run: &Run, variant: &ModelVariant) -> JobSpec {
        let patients = run.patients_dir();
        let scratch = patients.join(format!("scratch_{}", variant.name()));
        let mut args = vec![
            "--mode".to_string(),
            "predict".to_string(),
            "--model-dir".to_string(),
            run.dir().display().to_string(),
            "--x-test".to_string(),
            patients.join("x_test.parquet").display().to_string(),
            "--y-test".to_string(),
            patients.join("y_test.parquet").display().to_string(),
            "--batch-test".to_string(),
            patients.join("batch_test.parquet").display().to_string(),
            "--quantiles".to_string(),
            self.quantile_arg(),
            "--cores".to_string(),
            self.config.resources.cores.to_string(),
            "--output-dir".to_string(),
            patients.display().to_string(),
            "--scratch-dir".to_string(),
            scratch.display().to_string(),
        ];
        args.extend(variant.to_args());
        JobSpec {
            run_index: run.index(),
            mode: JobMode::Predict,
            program: self.program.clone(),
            args,
            output_dir: patients.clone(),
            scratch_dir: scratch,
            expected_artifact: patients.join(format!("zscores_{}.parquet", variant.name())),
            resources: self.config.resources,
        }
    }

    /// Fit one variant across every run, join, aggregate, and persist.
    ///
    /// # Errors
    ///
    /// Returns an error on aggregation persistence failure; per-run job
    /// failures are reported in the `VariantReport` instead.
    pub async fn fit_variant(
        &self,
        set: &RunSet,
        variant: &ModelVariant,
    ) -> Result<(VariantReport, MetricsSummary)> {
        tracing::info!(variant = variant.name(), runs = set.runs.len(), "dispatching fit jobs");
        let jobs: Vec<JobSpec> = set.runs.iter().map(|r| self.fit_job(r, variant)).collect();
        let outcomes = self.backend.dispatch_all(jobs).await;

        let summary = summary::collect_variant(
            &set.runs,
            &outcomes,
            &set.biomarkers,
            variant.name(),
            &self.config.quantile_levels,
            self.config.clip_bound,
        )?;
        let summary_path = self
            .out_root
            .join(format!("summary_{}.json", variant.name()));
        summary.save(&summary_path)?;

        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        let report = VariantReport {
            variant: variant.name().to_string(),
            total_runs: set.runs.len(),
            succeeded,
            failed: set.runs.len() - succeeded,
            skipped_in_aggregation: summary.n_skipped(),
            summary_path,
            finished_at: Utc::now(),
        };
        tracing::info!(
            variant = variant.name(),
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped_in_aggregation,
            "variant complete"
        );
        Ok((report, summary))
    }

    /// Run the whole comparison: generate splits once, then fit every
    /// configured variant over them.
    ///
    /// # Errors
    ///
    /// Fails fast on split preconditions; otherwise per-run failures stay
    /// inside the reports.
    pub async fn compare_variants(
        &self,
        healthy: &FeatureTable,
    ) -> Result<(RunSet, Vec<VariantReport>)> {
        fs::create_dir_all(&self.out_root)?;
        let set = self.generate_runs(healthy)?;
        let mut reports = Vec::with_capacity(self.config.variants.len());
        for variant in &self.config.variants {
            let (report, _summary) = self.fit_variant(&set, variant).await?;
            reports.push(report);
        }
        Ok((set, reports))
    }

    /// Score the patient cohort against each run's fitted model.
    ///
    /// Writes the predict-mode input (all patient rows as test) under each
    /// run directory, then dispatches one predict job per run.
    ///
    /// # Errors
    ///
    /// Fails fast on patient-table preconditions.
    pub async fn predict_patients(
        &self,
        set: &RunSet,
        patients: &FeatureTable,
        variant: &ModelVariant,
    ) -> Result<Vec<JobOutcome>> {
        let spec = self.config.split_spec();
        for run in &set.runs {
            split::prepare_prediction_input(patients, &spec, &run.patients_dir())?;
        }
        let jobs: Vec<JobSpec> = set
            .runs
            .iter()
            .map(|r| self.predict_job(r, variant))
            .collect();
        Ok(self.backend.dispatch_all(jobs).await)
    }

    /// AUC discrimination between patient and held-out healthy deviation
    /// scores, per biomarker per run, with BH correction within each run.
    ///
    /// Runs with missing deviation-score artifacts are skipped and listed
    /// in the report.
    ///
    /// # Errors
    ///
    /// Reserved for persistence failures; artifact problems surface as
    /// recorded skips.
    pub fn discriminate(&self, set: &RunSet, variant: &ModelVariant) -> Result<DiscriminationReport> {
        let mut report = DiscriminationReport {
            variant: variant.name().to_string(),
            permutations: self.config.permutations,
            runs: Vec::new(),
            skipped_runs: Vec::new(),
        };

        for run in &set.runs {
            let healthy_path = run.zscores(variant.name());
            let patient_path = run
                .patients_dir()
                .join(format!("zscores_{}.parquet", variant.name()));
            let (healthy, patient) = match (
                FeatureTable::read_parquet(&healthy_path),
                FeatureTable::read_parquet(&patient_path),
            ) {
                (Ok(h), Ok(p)) => (h, p),
                _ => {
                    tracing::warn!(run = run.index(), "missing deviation scores, skipping run");
                    report.skipped_runs.push(run.index());
                    continue;
                }
            };

            let mut pairs = Vec::with_capacity(set.biomarkers.len());
            let mut complete = true;
            for biomarker in &set.biomarkers {
                match (patient.column(biomarker), healthy.column(biomarker)) {
                    (Some(p), Some(h)) => {
                        pairs.push((biomarker.clone(), p.to_vec(), h.to_vec()));
                    }
                    _ => {
                        complete = false;
                        break;
                    }
                }
            }
            if !complete {
                tracing::warn!(run = run.index(), "malformed deviation scores, skipping run");
                report.skipped_runs.push(run.index());
                continue;
            }

            let tests = auc::discriminate(&pairs, self.config.permutations, run.seed());
            report.runs.push(RunDiscrimination {
                run_index: run.index(),
                tests,
            });
        }
        Ok(report)
    }

    /// Output root directory.
    #[must_use]
    pub fn out_root(&self) -> &Path {
        &self.out_root
    }
}
