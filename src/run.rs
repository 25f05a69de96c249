//! Runs and jobs
//!
//! A `Run` is one randomized train/test partition: a seed, an ordinal
//! index, and an output directory holding the six split artifacts plus
//! the per-variant model outputs. A `JobSpec` binds one run (and one
//! variant) to a concrete invocation of the external modeling backend.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a dispatched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Created but not yet dispatched.
    Pending,
    /// Currently executing.
    Running,
    /// Terminated successfully with a readable output artifact.
    Success,
    /// Terminal failure after all attempts were exhausted.
    Failed,
}

/// One randomized train/test partition. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    seed: u64,
    index: usize,
    dir: PathBuf,
}

impl Run {
    /// Create a run rooted at `dir`.
    #[must_use]
    pub fn new(seed: u64, index: usize, dir: PathBuf) -> Self {
        Self { seed, index, dir }
    }

    /// Split seed.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Ordinal index in 0..N.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Training covariates artifact.
    #[must_use]
    pub fn x_train(&self) -> PathBuf {
        self.dir.join("x_train.parquet")
    }

    /// Training responses artifact.
    #[must_use]
    pub fn y_train(&self) -> PathBuf {
        self.dir.join("y_train.parquet")
    }

    /// Training batch-effect labels artifact.
    #[must_use]
    pub fn batch_train(&self) -> PathBuf {
        self.dir.join("batch_train.parquet")
    }

    /// Test covariates artifact.
    #[must_use]
    pub fn x_test(&self) -> PathBuf {
        self.dir.join("x_test.parquet")
    }

    /// Test responses artifact.
    #[must_use]
    pub fn y_test(&self) -> PathBuf {
        self.dir.join("y_test.parquet")
    }

    /// Test batch-effect labels artifact.
    #[must_use]
    pub fn batch_test(&self) -> PathBuf {
        self.dir.join("batch_test.parquet")
    }

    /// Predictions written by the modeling backend for `suffix`.
    #[must_use]
    pub fn yhat(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("yhat_{suffix}.parquet"))
    }

    /// Predictive quantiles written by the modeling backend for `suffix`.
    #[must_use]
    pub fn quantiles(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("quantiles_{suffix}.parquet"))
    }

    /// Deviation scores written by the modeling backend for `suffix`.
    #[must_use]
    pub fn zscores(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("zscores_{suffix}.parquet"))
    }

    /// Per-variant scratch directory for the backend's compilation cache.
    ///
    /// Concurrent jobs must never share this path.
    #[must_use]
    pub fn scratch_dir(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("scratch_{suffix}"))
    }

    /// Directory holding the patient predict-mode artifacts.
    #[must_use]
    pub fn patients_dir(&self) -> PathBuf {
        self.dir.join("patients")
    }
}

/// Resource parameters passed opaquely to the execution backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Wall-clock limit in minutes (enforced by the batch queue only).
    #[serde(default = "default_time_limit")]
    pub time_limit_minutes: u64,
    /// Memory ceiling in gigabytes.
    #[serde(default = "default_memory")]
    pub memory_gb: u64,
    /// Core count for the sampler.
    #[serde(default = "default_cores")]
    pub cores: usize,
}

const fn default_time_limit() -> u64 {
    240
}
const fn default_memory() -> u64 {
    8
}
const fn default_cores() -> usize {
    4
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            time_limit_minutes: default_time_limit(),
            memory_gb: default_memory(),
            cores: default_cores(),
        }
    }
}

/// Fit the model on a run's train split, or predict against a fitted model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Fit on the train split, evaluate on the test split.
    Fit,
    /// Score new rows against the already-fitted model.
    Predict,
}

/// One unit of model-fitting work bound to exactly one run.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Ordinal index of the owning run.
    pub run_index: usize,
    /// Fit or predict.
    pub mode: JobMode,
    /// External modeling executable.
    pub program: PathBuf,
    /// Fully rendered argument list.
    pub args: Vec<String>,
    /// Run output directory (created before launch).
    pub output_dir: PathBuf,
    /// Distinct per-job scratch directory (created before launch).
    pub scratch_dir: PathBuf,
    /// Artifact whose existence marks the job as succeeded.
    pub expected_artifact: PathBuf,
    /// Opaque resource parameters.
    pub resources: ResourceSpec,
}

/// Outcome of one dispatched job, success or terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    /// Ordinal index of the owning run.
    pub run_index: usize,
    /// Final status; only `Success` or `Failed` after dispatch.
    pub status: RunStatus,
    /// Number of launch attempts actually made.
    pub attempts: u32,
    /// Failure detail, if any.
    pub error: Option<String>,
    /// Dispatch timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Termination timestamp.
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobOutcome {
    /// Whether the job terminated successfully.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_paths_are_per_variant() {
        let run = Run::new(42, 0, PathBuf::from("/tmp/exp/run-000"));
        assert_eq!(
            run.zscores("shash"),
            PathBuf::from("/tmp/exp/run-000/zscores_shash.parquet")
        );
        assert_ne!(run.scratch_dir("shash"), run.scratch_dir("linear"));
    }

    #[test]
    fn test_resource_defaults() {
        let r = ResourceSpec::default();
        assert!(r.time_limit_minutes > 0 && r.cores > 0);
    }
}
