// ============================================================
// Layer 5 — Reply Generator
// ============================================================
// Loads a stored model artifact and produces candidate replies
// by autoregressive sampling (temperature + top-k).
//
// Loaded models are cached per artifact content hash, so two
// sessions answering from the same artifact share one model in
// memory while different users' artifacts coexist side by side —
// there is no process-wide "current model".

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use burn::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokenizers::Tokenizer;

use crate::data::dataset::{BOS_ID, PAD_ID, SEP_ID, UNK_ID};
use crate::domain::artifact::ModelArtifact;
use crate::domain::conversation::Turn;
use crate::domain::traits::{SamplingParams, TextGenerator};
use crate::infra::tokenizer_store::TokenizerStore;
use crate::ml::model::{StyleLmConfig, StyleLmModel};
use crate::ml::InferBackend;

/// One artifact's model and vocabulary, ready to sample from.
struct LoadedArtifact {
    model: StyleLmModel<InferBackend>,
    tokenizer: Tokenizer,
    max_seq_len: usize,
}

pub struct StyleGenerator {
    /// Per-user working directory root (holds each user's tokenizer)
    work_dir: PathBuf,

    /// Models cached by artifact content hash.
    ///
    /// Each artifact is wrapped in its own `Mutex` because the
    /// burn model contains lazily-initialised (`OnceCell`-backed)
    /// parameters and is therefore `!Sync`; the inner lock makes
    /// the cached value shareable so `StyleGenerator` can satisfy
    /// `TextGenerator: Send + Sync`.
    cache: Mutex<HashMap<String, Arc<Mutex<LoadedArtifact>>>>,
}

impl StyleGenerator {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn load_artifact(&self, artifact: &ModelArtifact) -> Result<Arc<Mutex<LoadedArtifact>>> {
        if let Some(loaded) = self.cache.lock().unwrap().get(&artifact.content_hash) {
            return Ok(Arc::clone(loaded));
        }

        let device = crate::ml::device();
        let checkpoint_path = Path::new(&artifact.checkpoint_ref);
        let version_dir = checkpoint_path
            .parent()
            .context("artifact checkpoint has no parent directory")?;

        // The stored config describes the trained architecture; the
        // model is rebuilt with dropout disabled for inference.
        let config_json = std::fs::read_to_string(version_dir.join("model_config.json"))
            .with_context(|| format!("cannot read model config for artifact v{}", artifact.version))?;
        let cfg: StyleLmConfig = serde_json::from_str(&config_json)?;
        let infer_cfg = StyleLmConfig::new(
            cfg.vocab_size, cfg.max_seq_len, cfg.d_model,
            cfg.num_heads, cfg.num_layers, cfg.d_ff, 0.0,
        );

        let model: StyleLmModel<InferBackend> = infer_cfg.init(&device);
        let model = crate::infra::checkpoint::load_checkpoint_file(model, checkpoint_path, &device)?;

        let tokenizer = TokenizerStore::new(
            self.work_dir.join(&artifact.user_id).to_string_lossy().to_string(),
        )
        .load()?;

        let loaded = Arc::new(Mutex::new(LoadedArtifact {
            model,
            tokenizer,
            max_seq_len: cfg.max_seq_len,
        }));
        self.cache
            .lock()
            .unwrap()
            .insert(artifact.content_hash.clone(), Arc::clone(&loaded));
        tracing::info!(
            "Loaded model artifact v{} ({}) for user '{}'",
            artifact.version,
            artifact.short_hash(),
            artifact.user_id
        );
        Ok(loaded)
    }

    /// Encode recent turns into the prompt shape used at training
    /// time: [CLS] turn [SEP] turn [SEP] ... — the model continues
    /// after the trailing [SEP] with the reply.
    fn encode_prompt(&self, loaded: &LoadedArtifact, context: &[Turn]) -> Result<Vec<u32>> {
        let mut ids = vec![BOS_ID];
        for turn in context {
            let encoding = loaded
                .tokenizer
                .encode(turn.text.as_str(), false)
                .map_err(|e| anyhow::anyhow!("Tokenization error: {e}"))?;
            ids.extend_from_slice(encoding.get_ids());
            ids.push(SEP_ID);
        }

        // Keep the most recent tokens; the leading [CLS] survives
        if ids.len() > loaded.max_seq_len {
            let keep_from = ids.len() - (loaded.max_seq_len - 1);
            let mut trimmed = vec![BOS_ID];
            trimmed.extend_from_slice(&ids[keep_from..]);
            ids = trimmed;
        }
        Ok(ids)
    }
}

impl TextGenerator for StyleGenerator {
    fn generate(
        &self,
        artifact: &ModelArtifact,
        context: &[Turn],
        params: &SamplingParams,
    ) -> Result<String> {
        let loaded = self.load_artifact(artifact)?;
        let loaded = loaded.lock().unwrap();
        let loaded = &*loaded;
        let device = crate::ml::device();

        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut ids = self.encode_prompt(loaded, context)?;
        let mut generated: Vec<u32> = Vec::new();

        for _ in 0..params.max_new_tokens {
            // Slide the context window over the most recent tokens
            let window_start = ids.len().saturating_sub(loaded.max_seq_len);
            let window: Vec<i32> = ids[window_start..].iter().map(|&x| x as i32).collect();
            let window_len = window.len();

            let input = Tensor::<InferBackend, 1, Int>::from_ints(window.as_slice(), &device)
                .unsqueeze::<2>();
            let logits = loaded.model.forward(input); // [1, len, vocab]
            let [_, _, vocab_size] = logits.dims();

            let last = logits
                .slice([0..1, window_len - 1..window_len, 0..vocab_size])
                .reshape([vocab_size]);
            let scaled = last.div_scalar(params.temperature.max(1e-3));

            let mut probs: Vec<f32> = burn::tensor::activation::softmax(scaled, 0)
                .into_data()
                .to_vec::<f32>()
                .unwrap_or_default();

            if probs.is_empty() {
                anyhow::bail!("model produced no logits");
            }

            // Never sample structural tokens; never end before the
            // first real token so replies are non-empty
            for special in [PAD_ID, UNK_ID, BOS_ID] {
                if let Some(p) = probs.get_mut(special as usize) {
                    *p = 0.0;
                }
            }
            if generated.is_empty() {
                if let Some(p) = probs.get_mut(SEP_ID as usize) {
                    *p = 0.0;
                }
            }

            let token = sample_top_k(&probs, params.top_k, &mut rng);
            if token == SEP_ID {
                break;
            }
            ids.push(token);
            generated.push(token);
        }

        let text = loaded
            .tokenizer
            .decode(&generated, true)
            .map_err(|e| anyhow::anyhow!("Decode error: {e}"))?;
        Ok(text.trim().to_string())
    }
}

/// Sample one token id from the k most likely entries.
fn sample_top_k(probs: &[f32], top_k: usize, rng: &mut StdRng) -> u32 {
    let mut ranked: Vec<(usize, f32)> = probs
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, p)| *p > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_k.max(1));

    let total: f32 = ranked.iter().map(|(_, p)| p).sum();
    if ranked.is_empty() || total <= 0.0 {
        // Degenerate distribution; fall back to the separator
        return SEP_ID;
    }

    let mut target = rng.gen::<f32>() * total;
    for (index, p) in &ranked {
        target -= p;
        if target <= 0.0 {
            return *index as u32;
        }
    }
    ranked[ranked.len() - 1].0 as u32
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_top_k_respects_k() {
        let mut rng = StdRng::seed_from_u64(3);
        // Token 2 dominates; with k=1 it must always win
        let probs = vec![0.1, 0.2, 0.6, 0.1];
        for _ in 0..20 {
            assert_eq!(sample_top_k(&probs, 1, &mut rng), 2);
        }
    }

    #[test]
    fn test_sample_top_k_is_seed_deterministic() {
        let probs = vec![0.25, 0.25, 0.25, 0.25];
        let a: Vec<u32> = {
            let mut rng = StdRng::seed_from_u64(9);
            (0..10).map(|_| sample_top_k(&probs, 4, &mut rng)).collect()
        };
        let b: Vec<u32> = {
            let mut rng = StdRng::seed_from_u64(9);
            (0..10).map(|_| sample_top_k(&probs, 4, &mut rng)).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_sample_top_k_degenerate_distribution() {
        let mut rng = StdRng::seed_from_u64(0);
        let probs = vec![0.0, 0.0, 0.0];
        assert_eq!(sample_top_k(&probs, 3, &mut rng), SEP_ID);
    }
}
