//! Job Dispatcher
//!
//! Launches one model-fitting process per run and joins on all of them
//! before anything is collected (a plain fork-join barrier; no partial
//! results are visible). Two execution backends share the same contract:
//!
//! - `Local`: one OS process per run via `tokio::process`, a single
//!   attempt, no timeout (a hung fit blocks the barrier; the batch queue
//!   is the place for wall-clock enforcement).
//! - `Queue`: one submitted batch job per run, polled until the queue no
//!   longer lists it, resubmitted on detected failure up to `max_try`
//!   total attempts.
//!
//! A failing run never aborts its siblings; every job yields a
//! `JobOutcome`, success or terminal failure.

use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;
use tokio::task::JoinSet;

use crate::run::{JobOutcome, JobSpec, RunStatus};

/// Keep the last few stderr lines for operator-facing failure reports.
const STDERR_TAIL_LINES: usize = 20;

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

async fn prepare_dirs(job: &JobSpec) -> std::io::Result<()> {
    tokio::fs::create_dir_all(&job.output_dir).await?;
    tokio::fs::create_dir_all(&job.scratch_dir).await
}

fn failed(job: &JobSpec, attempts: u32, error: String) -> JobOutcome {
    JobOutcome {
        run_index: job.run_index,
        status: RunStatus::Failed,
        attempts,
        error: Some(error),
        started_at: Some(Utc::now()),
        ended_at: Some(Utc::now()),
    }
}

/// Run one job as a local subprocess, single attempt.
async fn run_local(job: JobSpec) -> JobOutcome {
    let started = Utc::now();
    if let Err(e) = prepare_dirs(&job).await {
        return failed(&job, 1, format!("failed to create job directories: {e}"));
    }

    tracing::debug!(
        run = job.run_index,
        mode = ?job.mode,
        program = %job.program.display(),
        "spawning local process"
    );
    let output = Command::new(&job.program)
        .args(&job.args)
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => JobOutcome {
            run_index: job.run_index,
            status: RunStatus::Success,
            attempts: 1,
            error: None,
            started_at: Some(started),
            ended_at: Some(Utc::now()),
        },
        Ok(out) => {
            let tail = stderr_tail(&out.stderr);
            let message = if tail.is_empty() {
                format!("exit code {:?}", out.status.code())
            } else {
                tail
            };
            tracing::warn!(run = job.run_index, mode = ?job.mode, %message, "local process failed");
            JobOutcome {
                run_index: job.run_index,
                status: RunStatus::Failed,
                attempts: 1,
                error: Some(message),
                started_at: Some(started),
                ended_at: Some(Utc::now()),
            }
        }
        Err(e) => failed(&job, 1, format!("failed to spawn process: {e}")),
    }
}

/// Batch-queue execution backend.
///
/// `submit` and `status` are argv prefixes for the queue's submission and
/// status-listing commands. A submitted job is identified by the first
/// stdout line of the submit command; it counts as finished once the
/// status command stops listing that id, and as succeeded iff the job's
/// expected artifact exists afterwards.
#[derive(Debug, Clone)]
pub struct QueueBackend {
    /// Submission command argv prefix (e.g. `["sbatch", "--parsable"]`).
    pub submit: Vec<String>,
    /// Status command argv prefix; the job id is appended.
    pub status: Vec<String>,
    /// Poll interval between status checks.
    pub poll_interval: Duration,
    /// Maximum total launch attempts per job.
    pub max_try: u32,
}

impl QueueBackend {
    async fn submit_once(&self, job: &JobSpec) -> Result<String, String> {
        let Some((submit_bin, submit_args)) = self.submit.split_first() else {
            return Err("queue backend has no submit command".to_string());
        };
        let mut cmd = Command::new(submit_bin);
        cmd.args(submit_args);
        cmd.arg("--time-limit")
            .arg(job.resources.time_limit_minutes.to_string())
            .arg("--memory-gb")
            .arg(job.resources.memory_gb.to_string())
            .arg("--cores")
            .arg(job.resources.cores.to_string());
        cmd.arg(&job.program).args(&job.args);

        let out = cmd
            .output()
            .await
            .map_err(|e| format!("submit command failed to start: {e}"))?;
        if !out.status.success() {
            return Err(format!(
                "submit rejected (exit {:?}): {}",
                out.status.code(),
                stderr_tail(&out.stderr)
            ));
        }
        let id = String::from_utf8_lossy(&out.stdout)
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        if id.is_empty() {
            return Err("submit printed no job id".to_string());
        }
        Ok(id)
    }

    /// Poll until the queue no longer lists `job_id`.
    async fn wait_unlisted(&self, job_id: &str) {
        let Some((status_bin, status_args)) = self.status.split_first() else {
            return;
        };
        loop {
            let listed = match Command::new(status_bin)
                .args(status_args)
                .arg(job_id)
                .output()
                .await
            {
                Ok(out) => {
                    // Match whole tokens: "job-1" must not count as listed
                    // when the queue shows "job-10".
                    out.status.success()
                        && String::from_utf8_lossy(&out.stdout)
                            .split_whitespace()
                            .any(|token| token == job_id)
                }
                Err(e) => {
                    tracing::warn!(job_id, error = %e, "status command failed, assuming job gone");
                    false
                }
            };
            if !listed {
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Run one job through the queue with bounded resubmission.
    async fn run_queued(&self, job: JobSpec) -> JobOutcome {
        let started = Utc::now();
        if let Err(e) = prepare_dirs(&job).await {
            return failed(&job, 1, format!("failed to create job directories: {e}"));
        }

        let mut last_error = String::new();
        for attempt in 1..=self.max_try {
            match self.submit_once(&job).await {
                Ok(job_id) => {
                    tracing::info!(
                        run = job.run_index,
                        mode = ?job.mode,
                        job_id = %job_id,
                        attempt,
                        "submitted job"
                    );
                    self.wait_unlisted(&job_id).await;
                    if job.expected_artifact.exists() {
                        return JobOutcome {
                            run_index: job.run_index,
                            status: RunStatus::Success,
                            attempts: attempt,
                            error: None,
                            started_at: Some(started),
                            ended_at: Some(Utc::now()),
                        };
                    }
                    last_error = format!(
                        "job {job_id} left the queue without producing {}",
                        job.expected_artifact.display()
                    );
                    tracing::warn!(run = job.run_index, attempt, %last_error, "resubmitting");
                }
                Err(e) => {
                    last_error = e;
                    tracing::warn!(run = job.run_index, attempt, error = %last_error, "submission failed");
                }
            }
        }

        JobOutcome {
            run_index: job.run_index,
            status: RunStatus::Failed,
            attempts: self.max_try,
            error: Some(last_error),
            started_at: Some(started),
            ended_at: Some(Utc::now()),
        }
    }
}

/// Pluggable execution backend with one shared contract.
#[derive(Debug, Clone)]
pub enum ExecBackend {
    /// One local OS process per run.
    Local,
    /// One queued batch job per run.
    Queue(QueueBackend),
}

impl ExecBackend {
    /// Launch every job concurrently and block until all have terminated.
    ///
    /// Returns one outcome per job, ordered by run index. No outcome is
    /// visible to callers before the whole batch has finished.
    pub async fn dispatch_all(&self, jobs: Vec<JobSpec>) -> Vec<JobOutcome> {
        let total = jobs.len();
        let mut set = JoinSet::new();
        for job in jobs {
            match self {
                Self::Local => {
                    set.spawn(run_local(job));
                }
                Self::Queue(queue) => {
                    let queue = queue.clone();
                    set.spawn(async move { queue.run_queued(job).await });
                }
            }
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(error = %e, "job task panicked"),
            }
        }
        outcomes.sort_by_key(|o| o.run_index);

        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        tracing::info!(total, succeeded, failed = total - succeeded, "batch joined");
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{JobMode, ResourceSpec};
    use std::path::PathBuf;

    fn job(run_index: usize, program: &str, dir: &std::path::Path) -> JobSpec {
        JobSpec {
            run_index,
            mode: JobMode::Fit,
            program: PathBuf::from(program),
            args: Vec::new(),
            output_dir: dir.join(format!("run-{run_index}")),
            scratch_dir: dir.join(format!("run-{run_index}/scratch")),
            expected_artifact: dir.join(format!("run-{run_index}/zscores.parquet")),
            resources: ResourceSpec::default(),
        }
    }

    #[tokio::test]
    async fn test_local_success_and_failure_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = vec![
            job(0, "true", dir.path()),
            job(1, "false", dir.path()),
            job(2, "true", dir.path()),
        ];
        let outcomes = ExecBackend::Local.dispatch_all(jobs).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].succeeded());
        assert!(!outcomes[1].succeeded());
        assert!(outcomes[2].succeeded());
        // Outcomes come back in run order regardless of completion order.
        let indices: Vec<usize> = outcomes.iter().map(|o| o.run_index).collect();
        assert_eq!(indices, [0, 1, 2]);
        assert_eq!(outcomes[1].attempts, 1);
    }

    #[tokio::test]
    async fn test_local_spawn_error_reported() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = vec![job(0, "/nonexistent/binary", dir.path())];
        let outcomes = ExecBackend::Local.dispatch_all(jobs).await;
        assert!(!outcomes[0].succeeded());
        assert!(outcomes[0].error.as_deref().unwrap().contains("spawn"));
    }

    #[tokio::test]
    async fn test_local_creates_job_directories() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = vec![job(0, "true", dir.path())];
        let _ = ExecBackend::Local.dispatch_all(jobs).await;
        assert!(dir.path().join("run-0/scratch").is_dir());
    }
}
