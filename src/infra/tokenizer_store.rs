// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Builds and persists the per-user vocabulary.
//
// The vocabulary is word-level over whitespace-split tokens with
// punctuation left attached ("hey!" and "hey" are different
// tokens on purpose — trailing punctuation is a big part of a
// person's texting style). The tokenizer JSON is written by hand
// in the HuggingFace format and loaded back through
// `Tokenizer::from_file`, which sidesteps the trainer type
// mismatch in tokenizers 0.15.
//
// The vocabulary is built once per user from the cloned corpus
// and then reused by every training run and by inference, so
// token ids stay stable across model versions.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokenizers::Tokenizer;

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<String>) -> Self {
        Self { dir: PathBuf::from(dir.into()) }
    }

    /// Load the existing tokenizer or build a new one from texts.
    pub fn load_or_build(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        let tok_path = self.dir.join("tokenizer.json");
        if tok_path.exists() {
            tracing::info!("Loading existing tokenizer from disk");
            self.load()
        } else {
            tracing::info!("Building new tokenizer (vocab_size={})", vocab_size);
            self.build_and_save(texts, vocab_size)
        }
    }

    /// Load a previously saved tokenizer from its JSON file.
    pub fn load(&self) -> Result<Tokenizer> {
        let path = self.dir.join("tokenizer.json");
        Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))
    }

    fn build_and_save(&self, texts: &[String], vocab_size: usize) -> Result<Tokenizer> {
        std::fs::create_dir_all(&self.dir).ok();

        // ── Step 1: Count lowercased whitespace tokens ────────────────────────
        use std::collections::HashMap;
        let mut freq: HashMap<String, usize> = HashMap::new();

        for text in texts {
            for word in text.split_whitespace() {
                let w = word.to_lowercase();
                if !w.is_empty() {
                    *freq.entry(w).or_insert(0) += 1;
                }
            }
        }

        // Sort by frequency descending, ties by token for a
        // deterministic vocabulary; keep the top entries with room
        // reserved for special tokens
        let mut words: Vec<(String, usize)> = freq.into_iter().collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let max_words = vocab_size.saturating_sub(5);
        words.truncate(max_words);

        // ── Step 2: Build vocab JSON ──────────────────────────────────────────
        // Special tokens get fixed ids matching the dataset layer
        let mut vocab = serde_json::json!({
            "[PAD]":  0,
            "[UNK]":  1,
            "[CLS]":  101,
            "[SEP]":  102,
            "[MASK]": 103,
        });

        let mut next_id = 104usize;
        for (word, _) in &words {
            if vocab.get(word).is_none() {
                vocab[word] = serde_json::json!(next_id);
                next_id += 1;
            }
        }

        // ── Step 3: Write tokenizer JSON in HuggingFace format ────────────────
        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                {"id": 0,   "content": "[PAD]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 1,   "content": "[UNK]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 101, "content": "[CLS]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 102, "content": "[SEP]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 103, "content": "[MASK]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
            ],
            "normalizer": {
                "type": "Lowercase"
            },
            "pre_tokenizer": {
                "type": "WhitespaceSplit"
            },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": "[UNK]"
            }
        });

        let tok_path = self.dir.join("tokenizer.json");
        std::fs::write(&tok_path, serde_json::to_string_pretty(&tokenizer_json)?)
            .with_context(|| "Cannot write tokenizer JSON")?;

        tracing::info!(
            "Tokenizer built with {} entries, saved to '{}'",
            next_id,
            tok_path.display()
        );

        Tokenizer::from_file(&tok_path)
            .map_err(|e| anyhow::anyhow!("Cannot reload tokenizer: {e}"))
    }
}
