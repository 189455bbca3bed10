// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Step-driven fine-tuning loop using Burn's DataLoader and Adam.
//
// The loop reports back to its caller (the orchestrator) through
// the TrainObserver seam instead of owning any job state:
//   - cancellation is polled between steps
//   - checkpoint writes are announced before and after, so the
//     job state machine can mirror Running → Checkpointing
//   - evaluation metrics stream out once per epoch
//
// Failure modes are typed: a diverged loss and a cancellation
// must be told apart from ordinary I/O errors, because only
// divergence triggers the orchestrator's single auto-resume.

use std::path::{Path, PathBuf};

use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
};

use crate::application::config::PipelineConfig;
use crate::data::batcher::StyleBatcher;
use crate::data::dataset::StyleDataset;
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::metrics::EvalMetrics;
use crate::ml::model::{StyleLmConfig, StyleLmModel};
use crate::ml::{InferBackend, TrainBackend};

/// Why a training run stopped without completing.
#[derive(Debug)]
pub enum TrainFailure {
    /// Loss became non-finite or exceeded the divergence bound
    Diverged { step: usize, loss: f64 },

    /// The cancellation flag was raised between steps
    Cancelled,

    Other(anyhow::Error),
}

impl From<anyhow::Error> for TrainFailure {
    fn from(err: anyhow::Error) -> Self {
        TrainFailure::Other(err)
    }
}

/// What a completed run hands back to the orchestrator.
#[derive(Debug)]
pub struct TrainOutcome {
    pub final_step: usize,
    pub epochs_run: usize,
    pub early_stopped: bool,
    pub checkpoint_path: PathBuf,
}

/// The orchestrator's window into a running loop.
pub trait TrainObserver: Send {
    fn cancelled(&self) -> bool {
        false
    }
    fn on_checkpoint_start(&mut self, _step: usize) {}
    fn on_checkpoint_done(&mut self, _step: usize, _path: &Path) {}
    fn on_eval(&mut self, _metrics: &EvalMetrics) {}
}

/// Observer that ignores everything — used by tests and the
/// one-shot demo path.
pub struct NoopObserver;

impl TrainObserver for NoopObserver {}

pub fn run_training(
    cfg: &PipelineConfig,
    train_dataset: StyleDataset,
    val_dataset: StyleDataset,
    ckpt_manager: &CheckpointManager,
    observer: &mut dyn TrainObserver,
    resume: bool,
) -> Result<TrainOutcome, TrainFailure> {
    if train_dataset.sample_count() == 0 {
        return Err(TrainFailure::Other(anyhow::anyhow!("no training samples")));
    }

    let device = crate::ml::device();

    // ── Build model, optionally restoring the last checkpoint ─────────────────
    let model_cfg = StyleLmConfig::new(
        cfg.vocab_size, cfg.max_seq_len, cfg.d_model,
        cfg.num_heads, cfg.num_layers, cfg.d_ff, cfg.dropout,
    );
    let mut model: StyleLmModel<TrainBackend> = model_cfg.init(&device);
    let mut global_step = 0usize;

    if resume {
        if let Some(step) = ckpt_manager.latest_step().map_err(TrainFailure::Other)? {
            model = ckpt_manager.load_model(model, &device).map_err(TrainFailure::Other)?;
            global_step = step;
            tracing::info!("Resumed training from checkpoint at step {}", step);
        }
    }

    // ── Adam optimiser ────────────────────────────────────────────────────────
    let optim_cfg = AdamConfig::new().with_epsilon(1e-8);
    let mut optim = optim_cfg.init();

    // ── Data loaders: train on autodiff, validate on the inner backend ────────
    let train_batcher = StyleBatcher::<TrainBackend>::new(device.clone());
    let train_loader = DataLoaderBuilder::new(train_batcher)
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(1)
        .build(train_dataset);

    let val_batcher = StyleBatcher::<InferBackend>::new(device.clone());
    let val_loader = DataLoaderBuilder::new(val_batcher)
        .batch_size(cfg.batch_size)
        .num_workers(1)
        .build(val_dataset);

    // ── Epoch loop with early stopping ────────────────────────────────────────
    let mut best_val_loss = f64::INFINITY;
    let mut epochs_without_improvement = 0usize;
    let mut early_stopped = false;
    let mut epochs_run = 0usize;

    for epoch in 1..=cfg.epochs {
        let mut train_loss_sum = 0.0f64;
        let mut train_batches = 0usize;

        for batch in train_loader.iter() {
            if observer.cancelled() {
                return Err(TrainFailure::Cancelled);
            }

            let loss = model.forward_loss(batch.input_ids);
            let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();

            if !loss_val.is_finite() || loss_val > cfg.divergence_bound {
                tracing::warn!("Training diverged at step {}: loss={}", global_step, loss_val);
                return Err(TrainFailure::Diverged { step: global_step, loss: loss_val });
            }

            train_loss_sum += loss_val;
            train_batches += 1;
            global_step += 1;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(cfg.lr, model, grads);

            // Cadence checkpoint — atomic on disk, mirrored in the job state
            if global_step % cfg.checkpoint_cadence == 0 {
                observer.on_checkpoint_start(global_step);
                let path = ckpt_manager
                    .save_model(&model, global_step)
                    .map_err(TrainFailure::Other)?;
                observer.on_checkpoint_done(global_step, &path);
            }
        }

        let avg_train_loss = if train_batches > 0 {
            train_loss_sum / train_batches as f64
        } else {
            f64::NAN
        };

        // ── Validation on the inner backend, dropout disabled ─────────────────
        let model_valid = model.valid();
        let mut val_loss_sum = 0.0f64;
        let mut val_batches = 0usize;

        for batch in val_loader.iter() {
            let loss: f64 = model_valid.forward_loss(batch.input_ids).into_scalar().elem::<f64>();
            val_loss_sum += loss;
            val_batches += 1;
        }

        let avg_val_loss = if val_batches > 0 {
            val_loss_sum / val_batches as f64
        } else {
            // No validation data — fall back to the training signal
            avg_train_loss
        };

        epochs_run = epoch;
        let metrics = EvalMetrics::new(epoch, global_step, avg_train_loss, avg_val_loss);
        observer.on_eval(&metrics);

        tracing::info!(
            "Epoch {:>3}/{} | step {:>6} | train_loss={:.4} | val_loss={:.4}",
            epoch, cfg.epochs, global_step, avg_train_loss, avg_val_loss,
        );

        // ── Early stopping on the validation metric ───────────────────────────
        if avg_val_loss < best_val_loss {
            best_val_loss = avg_val_loss;
            epochs_without_improvement = 0;
        } else {
            epochs_without_improvement += 1;
            if epochs_without_improvement >= cfg.early_stop_patience {
                tracing::info!(
                    "Early stop: no validation improvement for {} epochs",
                    cfg.early_stop_patience
                );
                early_stopped = true;
                break;
            }
        }
    }

    // Final checkpoint is the artifact candidate
    observer.on_checkpoint_start(global_step);
    let checkpoint_path = ckpt_manager
        .save_model(&model, global_step)
        .map_err(TrainFailure::Other)?;
    observer.on_checkpoint_done(global_step, &checkpoint_path);

    Ok(TrainOutcome {
        final_step: global_step,
        epochs_run,
        early_stopped,
        checkpoint_path,
    })
}
