// ============================================================
// Layer 5 — TrainingJob State Machine
// ============================================================
// One record per fine-tuning run, mutated only through the
// transition methods below:
//
//   Queued → Running → Checkpointing → Running → ... → Completed
//                 └──────────────────────────────────→ Failed
//
// A divergence mid-run may re-enter Running once via
// `mark_resumed`, which restores from the last good checkpoint.
// Terminal jobs are archived to disk as JSON, never deleted.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::infra::checkpoint::write_atomic;
use crate::infra::metrics::EvalMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Checkpointing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Legal edges of the state machine.
    pub fn can_transition(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Queued, Running)
                | (Running, Checkpointing)
                | (Checkpointing, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Checkpointing, Completed)
                | (Checkpointing, Failed)
                | (Queued, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: String,
    pub user_id: String,

    /// Path of the corpus snapshot the job trains on
    pub corpus_ref: String,

    pub status: JobStatus,

    /// Step of the most recent durable checkpoint
    pub checkpoint_step: Option<usize>,

    /// How many times the job re-entered Running after divergence
    pub resume_count: u32,

    /// Populated when status is Failed
    pub failure: Option<String>,

    pub metrics_history: Vec<EvalMetrics>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrainingJob {
    pub fn new(user_id: impl Into<String>, corpus_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            corpus_ref: corpus_ref.into(),
            status: JobStatus::Queued,
            checkpoint_step: None,
            resume_count: 0,
            failure: None,
            metrics_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `to`, rejecting edges the state machine does not have.
    pub fn transition(&mut self, to: JobStatus) -> Result<()> {
        if !self.status.can_transition(to) {
            bail!("illegal job transition {:?} → {:?} (job {})", self.status, to, self.id);
        }
        tracing::debug!("Job {}: {:?} → {:?}", self.id, self.status, to);
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Re-enter Running after a divergence. Only legal while the
    /// job is still live, and only once per job.
    pub fn mark_resumed(&mut self) -> Result<()> {
        if self.status.is_terminal() {
            bail!("cannot resume terminal job {} ({:?})", self.id, self.status);
        }
        self.resume_count += 1;
        self.status = JobStatus::Running;
        self.updated_at = Utc::now();
        tracing::info!("Job {} resumed (attempt {})", self.id, self.resume_count);
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        // Failure is always reachable; bypassing can_transition here
        // would hide the reason, so route through it when legal and
        // force the status otherwise (e.g. failing a Queued job).
        let reason = reason.into();
        if self.status.can_transition(JobStatus::Failed) {
            self.status = JobStatus::Failed;
        } else if !self.status.is_terminal() {
            self.status = JobStatus::Failed;
        }
        self.failure = Some(reason);
        self.updated_at = Utc::now();
    }

    pub fn record_eval(&mut self, metrics: &EvalMetrics) {
        self.metrics_history.push(metrics.clone());
        self.updated_at = Utc::now();
    }

    pub fn record_checkpoint(&mut self, step: usize) {
        self.checkpoint_step = Some(step);
        self.updated_at = Utc::now();
    }

    /// Persist the job record as JSON under `dir`. Called on every
    /// state change; the final write is the archived record.
    pub fn archive(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create job dir '{}'", dir.display()))?;
        let path = dir.join("job.json");
        write_atomic(&path, &serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut job = TrainingJob::new("sam", "corpus.json");
        assert_eq!(job.status, JobStatus::Queued);
        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Checkpointing).unwrap();
        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Completed).unwrap();
        assert!(job.status.is_terminal());
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut job = TrainingJob::new("sam", "corpus.json");
        // Queued cannot complete or checkpoint directly
        assert!(job.transition(JobStatus::Completed).is_err());
        assert!(job.transition(JobStatus::Checkpointing).is_err());

        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Completed).unwrap();
        // Terminal states are final
        assert!(job.transition(JobStatus::Running).is_err());
        assert!(job.transition(JobStatus::Failed).is_err());
    }

    #[test]
    fn test_resume_re_enters_running_and_counts() {
        let mut job = TrainingJob::new("sam", "corpus.json");
        job.transition(JobStatus::Running).unwrap();
        job.mark_resumed().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.resume_count, 1);
    }

    #[test]
    fn test_resume_rejected_on_terminal_job() {
        let mut job = TrainingJob::new("sam", "corpus.json");
        job.transition(JobStatus::Running).unwrap();
        job.mark_failed("diverged");
        assert!(job.mark_resumed().is_err());
    }

    #[test]
    fn test_archive_round_trip() {
        let dir = std::env::temp_dir().join(format!("mimic-job-{}", Uuid::new_v4()));
        let mut job = TrainingJob::new("sam", "corpus.json");
        job.transition(JobStatus::Running).unwrap();
        job.record_eval(&EvalMetrics::new(1, 40, 5.0, 4.9));

        let path = job.archive(&dir).unwrap();
        let loaded: TrainingJob =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.metrics_history.len(), 1);
    }
}
