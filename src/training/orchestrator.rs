// ============================================================
// Layer 5 — Training Orchestrator
// ============================================================
// Runs fine-tuning jobs end to end:
//
//   corpus snapshot → tokenizer → samples → split → training
//   loop → final checkpoint → artifact store
//
// Concurrency contract:
//   - at most one live job per user; a second `train` request is
//     rejected immediately with TrainingInProgress, never queued
//     silently
//   - the loop itself runs on a blocking thread; this task only
//     coordinates
//   - a cancellation flag is polled between optimizer steps
//
// Failure contract:
//   - divergence triggers exactly one automatic resume from the
//     last good checkpoint, then the job fails for good
//   - job records are archived as JSON on every state change and
//     never deleted

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{Context, Result};

use crate::application::config::PipelineConfig;
use crate::data::corpus::Corpus;
use crate::data::dataset::{build_samples, StyleDataset, StyleSample};
use crate::data::examples::ExampleBuilder;
use crate::data::splitter::split_train_val;
use crate::domain::artifact::ModelArtifact;
use crate::domain::errors::PipelineError;
use crate::domain::profile::StyleProfile;
use crate::infra::artifact_store::ArtifactStore;
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::metrics::{EvalMetrics, MetricsLogger};
use crate::infra::tokenizer_store::TokenizerStore;
use crate::ml::model::StyleLmConfig;
use crate::ml::trainer::{run_training, TrainFailure, TrainObserver, TrainOutcome};
use crate::training::job::{JobStatus, TrainingJob};

pub struct TrainingOrchestrator {
    cfg: PipelineConfig,
    store: Arc<ArtifactStore>,

    /// Users with a live job; the per-user serialization point
    active: Arc<StdMutex<HashSet<String>>>,
}

/// Releases the per-user training slot when dropped.
#[derive(Debug)]
pub(crate) struct UserLease {
    user_id: String,
    active: Arc<StdMutex<HashSet<String>>>,
}

impl Drop for UserLease {
    fn drop(&mut self) {
        self.active.lock().unwrap().remove(&self.user_id);
    }
}

impl TrainingOrchestrator {
    pub fn new(cfg: PipelineConfig, store: Arc<ArtifactStore>) -> Self {
        Self {
            cfg,
            store,
            active: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    /// Claim the single training slot for a user, or report the
    /// contention to the caller right away.
    pub(crate) fn try_lease(&self, user_id: &str) -> Result<UserLease, PipelineError> {
        let mut active = self.active.lock().unwrap();
        if !active.insert(user_id.to_string()) {
            return Err(PipelineError::TrainingInProgress {
                user_id: user_id.to_string(),
            });
        }
        Ok(UserLease {
            user_id: user_id.to_string(),
            active: Arc::clone(&self.active),
        })
    }

    pub async fn train(&self, user_id: &str) -> Result<ModelArtifact> {
        self.train_with_cancel(user_id, Arc::new(AtomicBool::new(false)))
            .await
    }

    /// Run one fine-tuning job for `user_id`. `cancel` may be
    /// raised from anywhere; the loop stops at the next step.
    pub async fn train_with_cancel(
        &self,
        user_id: &str,
        cancel: Arc<AtomicBool>,
    ) -> Result<ModelArtifact> {
        let _lease = self.try_lease(user_id)?;

        let user_dir = self.cfg.user_dir(user_id);

        // ── Load the cloned corpus and its style profile ──────────────────────
        let corpus_path = user_dir.join("corpus.json");
        let corpus: Corpus = serde_json::from_str(
            &fs::read_to_string(&corpus_path).with_context(|| {
                format!("No corpus at '{}'. Run 'clone' first.", corpus_path.display())
            })?,
        )?;

        let authored = corpus.authored_count();
        if authored < self.cfg.min_corpus_size {
            return Err(PipelineError::InsufficientData {
                found: authored,
                required: self.cfg.min_corpus_size,
            }
            .into());
        }

        let profile_path = user_dir.join("style_profile.json");
        let profile: StyleProfile = serde_json::from_str(
            &fs::read_to_string(&profile_path).with_context(|| {
                format!("No style profile at '{}'. Run 'clone' first.", profile_path.display())
            })?,
        )?;
        if !profile.is_sufficient(self.cfg.min_corpus_size) {
            return Err(PipelineError::InsufficientData {
                found: profile.sample_count,
                required: self.cfg.min_corpus_size,
            }
            .into());
        }

        // ── Examples → tokens → train/validation datasets ─────────────────────
        let examples = ExampleBuilder::new(self.cfg.max_context_turns).build(&corpus);

        let texts: Vec<String> = corpus
            .utterances
            .iter()
            .map(|u| u.normalized_text.clone())
            .collect();
        let tokenizer = TokenizerStore::new(user_dir.to_string_lossy().to_string())
            .load_or_build(&texts, self.cfg.vocab_size)?;

        let samples = build_samples(&examples, &tokenizer, self.cfg.max_seq_len)?;
        let (train_samples, val_samples) =
            split_train_val(samples, self.cfg.train_fraction, self.cfg.seed);
        tracing::info!(
            "Training user '{}': {} train / {} validation samples",
            user_id,
            train_samples.len(),
            val_samples.len()
        );

        // ── Job setup ─────────────────────────────────────────────────────────
        let job = Arc::new(StdMutex::new(TrainingJob::new(
            user_id,
            corpus_path.display().to_string(),
        )));
        let job_id = job.lock().unwrap().id.clone();
        let job_dir = user_dir.join("jobs").join(&job_id);
        let checkpoint_dir = job_dir.join("checkpoints");

        let ckpt_manager = CheckpointManager::new(&checkpoint_dir);
        let model_cfg = StyleLmConfig::new(
            self.cfg.vocab_size, self.cfg.max_seq_len, self.cfg.d_model,
            self.cfg.num_heads, self.cfg.num_layers, self.cfg.d_ff, self.cfg.dropout,
        );
        ckpt_manager.save_config(&model_cfg)?;

        {
            let mut j = job.lock().unwrap();
            j.transition(JobStatus::Running)?;
            j.archive(&job_dir)?;
        }

        // ── Run the blocking loop, resuming once on divergence ────────────────
        let cfg = self.cfg.clone();
        let observer_job = Arc::clone(&job);
        let observer_dir = job_dir.clone();
        let result = tokio::task::spawn_blocking(move || {
            let metrics = MetricsLogger::new(&observer_dir)?;
            let mut observer = JobObserver {
                job: observer_job,
                job_dir: observer_dir,
                metrics,
                cancel,
            };

            let mut outcome = run_attempt(&cfg, &train_samples, &val_samples, &ckpt_manager, &mut observer, false);

            if let Err(TrainFailure::Diverged { step, loss }) = &outcome {
                tracing::warn!(
                    "Job diverged at step {} (loss {:.3}); resuming from last checkpoint",
                    step,
                    loss
                );
                observer
                    .job
                    .lock()
                    .unwrap()
                    .mark_resumed()
                    .map_err(TrainFailure::Other)?;
                outcome = run_attempt(&cfg, &train_samples, &val_samples, &ckpt_manager, &mut observer, true);
            }

            outcome
        })
        .await
        .context("training task panicked")?;

        // ── Resolve the outcome into the job record ───────────────────────────
        match result {
            Ok(outcome) => self.complete(user_id, &job, &job_dir, &checkpoint_dir, &profile, outcome),
            Err(TrainFailure::Diverged { step, loss }) => {
                let detail = format!("loss {loss:.3} at step {step} (after one resume)");
                self.fail(&job, &job_dir, &detail);
                Err(PipelineError::TrainingDivergence { job_id, detail }.into())
            }
            Err(TrainFailure::Cancelled) => {
                self.fail(&job, &job_dir, "cancelled");
                anyhow::bail!("training job {job_id} was cancelled")
            }
            Err(TrainFailure::Other(err)) => {
                self.fail(&job, &job_dir, &err.to_string());
                Err(err.context(format!("training job {job_id} failed")))
            }
        }
    }

    fn complete(
        &self,
        user_id: &str,
        job: &Arc<StdMutex<TrainingJob>>,
        job_dir: &PathBuf,
        checkpoint_dir: &PathBuf,
        profile: &StyleProfile,
        outcome: TrainOutcome,
    ) -> Result<ModelArtifact> {
        {
            let mut j = job.lock().unwrap();
            j.transition(JobStatus::Completed)?;
            j.archive(job_dir)?;
        }

        let artifact = self.store.put(
            user_id,
            &outcome.checkpoint_path,
            &checkpoint_dir.join("model_config.json"),
            profile,
            &self.cfg.base_model_ref,
        )?;

        tracing::info!(
            "Job for '{}' completed after {} epochs (early_stop={}) → artifact v{}",
            user_id,
            outcome.epochs_run,
            outcome.early_stopped,
            artifact.version
        );
        Ok(artifact)
    }

    fn fail(&self, job: &Arc<StdMutex<TrainingJob>>, job_dir: &PathBuf, reason: &str) {
        let mut j = job.lock().unwrap();
        j.mark_failed(reason);
        if let Err(err) = j.archive(job_dir) {
            tracing::error!("Failed to archive job record: {err:#}");
        }
    }
}

/// One pass of the training loop over freshly built datasets.
fn run_attempt(
    cfg: &PipelineConfig,
    train_samples: &[StyleSample],
    val_samples: &[StyleSample],
    ckpt_manager: &CheckpointManager,
    observer: &mut JobObserver,
    resume: bool,
) -> Result<TrainOutcome, TrainFailure> {
    run_training(
        cfg,
        StyleDataset::new(train_samples.to_vec()),
        StyleDataset::new(val_samples.to_vec()),
        ckpt_manager,
        observer,
        resume,
    )
}

/// Mirrors trainer events into the job record and the metrics CSV.
struct JobObserver {
    job: Arc<StdMutex<TrainingJob>>,
    job_dir: PathBuf,
    metrics: MetricsLogger,
    cancel: Arc<AtomicBool>,
}

impl JobObserver {
    fn persist(&self, job: &TrainingJob) {
        if let Err(err) = job.archive(&self.job_dir) {
            tracing::warn!("Could not persist job record: {err:#}");
        }
    }
}

impl TrainObserver for JobObserver {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn on_checkpoint_start(&mut self, _step: usize) {
        let mut job = self.job.lock().unwrap();
        if let Err(err) = job.transition(JobStatus::Checkpointing) {
            tracing::warn!("{err:#}");
        }
        self.persist(&job);
    }

    fn on_checkpoint_done(&mut self, step: usize, _path: &std::path::Path) {
        let mut job = self.job.lock().unwrap();
        job.record_checkpoint(step);
        if let Err(err) = job.transition(JobStatus::Running) {
            tracing::warn!("{err:#}");
        }
        self.persist(&job);
    }

    fn on_eval(&mut self, metrics: &EvalMetrics) {
        if let Err(err) = self.metrics.log(metrics) {
            tracing::warn!("Could not log metrics: {err:#}");
        }
        let mut job = self.job.lock().unwrap();
        job.record_eval(metrics);
        self.persist(&job);
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::PipelineConfig;

    fn orchestrator() -> TrainingOrchestrator {
        let work_dir = std::env::temp_dir()
            .join(format!("mimic-orch-{}", uuid::Uuid::new_v4()))
            .display()
            .to_string();
        let mut cfg = PipelineConfig::default();
        cfg.work_dir = work_dir;
        let store = Arc::new(ArtifactStore::new(cfg.artifacts_dir()));
        TrainingOrchestrator::new(cfg, store)
    }

    #[test]
    fn test_second_lease_for_same_user_is_rejected() {
        let orch = orchestrator();
        let first = orch.try_lease("sam").unwrap();

        let err = orch.try_lease("sam").unwrap_err();
        assert!(matches!(err, PipelineError::TrainingInProgress { .. }));

        // Different users are independent
        let _other = orch.try_lease("alex").unwrap();

        // Releasing the first slot unblocks the user
        drop(first);
        assert!(orch.try_lease("sam").is_ok());
    }

    #[tokio::test]
    async fn test_train_without_corpus_fails_fast() {
        let orch = orchestrator();
        let err = orch.train("nobody").await.unwrap_err();
        assert!(err.to_string().contains("clone"));
    }
}
