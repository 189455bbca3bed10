// ============================================================
// Layer 2 — Pipeline Configuration
// ============================================================
// All tunables for a pipeline run in one explicit structure,
// validated once at startup. Nothing downstream re-validates or
// re-interprets free-form settings; stages receive this struct
// (or plain values from it) and trust it.
//
// Serializable so a run's configuration can be saved next to its
// outputs and reloaded for inspection.

use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    // ── Paths & identity ──────────────────────────────────────────────────────
    /// Root directory for per-user working data and artifacts
    pub work_dir:       String,
    /// Name of the base conversational model being personalized
    pub base_model_ref: String,

    // ── Corpus building ───────────────────────────────────────────────────────
    /// Minimum authored utterances; clone and train refuse below it
    pub min_corpus_size:    usize,
    /// Max seconds between same-sender messages that merge into one utterance
    pub merge_gap_secs:     i64,
    /// Window in which a repeated normalized text is a duplicate
    pub dedupe_window_secs: i64,

    // ── Context windows ───────────────────────────────────────────────────────
    /// Turn budget for training examples and session history alike
    pub max_context_turns: usize,

    // ── Training ──────────────────────────────────────────────────────────────
    /// Optimizer steps between durable checkpoints
    pub checkpoint_cadence:  usize,
    /// Loss above this (or non-finite) counts as divergence
    pub divergence_bound:    f64,
    /// Evaluations without improvement before early stop
    pub early_stop_patience: usize,
    pub batch_size:          usize,
    pub epochs:              usize,
    pub lr:                  f64,
    /// Seed for shuffles and splits; fixed for reproducible runs
    pub seed:                u64,
    /// Share of samples used for training (rest validates)
    pub train_fraction:      f64,

    // ── Model architecture ────────────────────────────────────────────────────
    pub max_seq_len: usize,
    pub d_model:     usize,
    pub num_heads:   usize,
    pub num_layers:  usize,
    pub d_ff:        usize,
    pub dropout:     f64,
    pub vocab_size:  usize,

    // ── Inference ─────────────────────────────────────────────────────────────
    /// Similarity below this records a drift warning
    pub style_drift_threshold:   f32,
    /// Per-attempt generation budget; one retry at half length
    pub generation_timeout_secs: u64,
    pub max_new_tokens:          usize,
    pub temperature:             f32,
    pub top_k:                   usize,
    /// Idle seconds before a session is reclaimed
    pub session_idle_secs:       i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir:       "data".to_string(),
            base_model_ref: "style-lm-base".to_string(),

            min_corpus_size:    50,
            merge_gap_secs:     120,
            dedupe_window_secs: 3600,

            max_context_turns: 6,

            checkpoint_cadence:  50,
            divergence_bound:    12.0,
            early_stop_patience: 3,
            batch_size:          16,
            epochs:              10,
            lr:                  3e-4,
            seed:                42,
            train_fraction:      0.9,

            max_seq_len: 128,
            d_model:     128,
            num_heads:   4,
            num_layers:  2,
            d_ff:        512,
            dropout:     0.1,
            vocab_size:  8192,

            style_drift_threshold:   0.55,
            generation_timeout_secs: 30,
            max_new_tokens:          48,
            temperature:             0.9,
            top_k:                   40,
            session_idle_secs:       1800,
        }
    }
}

impl PipelineConfig {
    /// Validate once at pipeline start; everything downstream
    /// assumes these hold.
    pub fn validate(&self) -> Result<()> {
        if self.min_corpus_size == 0 {
            bail!("min_corpus_size must be at least 1");
        }
        if self.max_context_turns == 0 {
            bail!("max_context_turns must be at least 1");
        }
        if self.checkpoint_cadence == 0 {
            bail!("checkpoint_cadence must be at least 1");
        }
        if !(0.0 < self.train_fraction && self.train_fraction <= 1.0) {
            bail!("train_fraction must be in (0, 1], got {}", self.train_fraction);
        }
        if self.d_model % self.num_heads != 0 {
            bail!(
                "d_model ({}) must be divisible by num_heads ({})",
                self.d_model,
                self.num_heads
            );
        }
        if !(0.0..=1.0).contains(&self.style_drift_threshold) {
            bail!(
                "style_drift_threshold must be in [0, 1], got {}",
                self.style_drift_threshold
            );
        }
        if self.temperature <= 0.0 {
            bail!("temperature must be positive");
        }
        if self.generation_timeout_secs == 0 {
            bail!("generation_timeout_secs must be at least 1");
        }
        if self.max_new_tokens == 0 {
            bail!("max_new_tokens must be at least 1");
        }
        // Special tokens occupy ids up to 103
        if self.vocab_size <= 104 {
            bail!("vocab_size must exceed 104, got {}", self.vocab_size);
        }
        if self.divergence_bound <= 0.0 {
            bail!("divergence_bound must be positive");
        }
        Ok(())
    }

    /// Per-user working directory (corpus, profile, tokenizer, jobs).
    pub fn user_dir(&self, user_id: &str) -> PathBuf {
        PathBuf::from(&self.work_dir).join(user_id)
    }

    /// Root of the versioned artifact store.
    pub fn artifacts_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("artifacts")
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_indivisible_heads() {
        let mut cfg = PipelineConfig::default();
        cfg.d_model = 100;
        cfg.num_heads = 3;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let mut cfg = PipelineConfig::default();
        cfg.style_drift_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_sized_knobs() {
        for field in ["min_corpus_size", "max_context_turns", "checkpoint_cadence"] {
            let mut cfg = PipelineConfig::default();
            match field {
                "min_corpus_size" => cfg.min_corpus_size = 0,
                "max_context_turns" => cfg.max_context_turns = 0,
                _ => cfg.checkpoint_cadence = 0,
            }
            assert!(cfg.validate().is_err(), "{field} = 0 should fail validation");
        }
    }
}
