// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights using Burn's CompactRecorder
// (MessagePack + gzip, written as `<name>.mpk.gz`).
//
// Every write is atomic: the recorder writes to a temp name in
// the same directory and the result is renamed into place, so a
// crash mid-write leaves the previous checkpoint untouched and
// a concurrent artifact read never observes a partial file.
//
// Files per checkpoint directory:
//   model_step_<N>.mpk.gz — weights after N optimizer steps
//   latest.json           — the step number of the newest save
//   model_config.json     — architecture needed to rebuild the
//                           model before loading weights into it

use std::{fs, path::{Path, PathBuf}};

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};

use crate::ml::model::{StyleLmConfig, StyleLmModel};

/// Extension the CompactRecorder appends to every base path.
const RECORDER_EXT: &str = ".mpk.gz";

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        fs::create_dir_all(&dir).ok();
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save model weights after `step` optimizer steps.
    /// Returns the path of the finished checkpoint file.
    pub fn save_model<B: AutodiffBackend>(
        &self,
        model: &StyleLmModel<B>,
        step: usize,
    ) -> Result<PathBuf> {
        let tmp_base = self.dir.join(".tmp_checkpoint");
        let tmp_file = self.dir.join(format!(".tmp_checkpoint{RECORDER_EXT}"));
        let final_file = self.dir.join(format!("model_step_{step}{RECORDER_EXT}"));

        CompactRecorder::new()
            .record(model.clone().into_record(), tmp_base)
            .with_context(|| {
                format!("Failed to write checkpoint for step {step} in '{}'", self.dir.display())
            })?;

        fs::rename(&tmp_file, &final_file).with_context(|| {
            format!("Failed to move checkpoint into place at '{}'", final_file.display())
        })?;

        write_atomic(&self.dir.join("latest.json"), &serde_json::to_vec(&step)?)?;

        tracing::debug!("Saved checkpoint: step {}", step);
        Ok(final_file)
    }

    /// Load weights from the latest saved checkpoint. The model
    /// passed in must match the saved architecture.
    pub fn load_model<B: Backend>(
        &self,
        model: StyleLmModel<B>,
        device: &B::Device,
    ) -> Result<StyleLmModel<B>> {
        let step = self
            .latest_step()?
            .context("No checkpoint found. Has training run at least once?")?;
        let path = self.dir.join(format!("model_step_{step}{RECORDER_EXT}"));

        tracing::info!("Loading checkpoint from step {}", step);
        load_checkpoint_file(model, &path, device)
    }

    /// Step number of the newest checkpoint, or `None` before the
    /// first save.
    pub fn latest_step(&self) -> Result<Option<usize>> {
        let path = self.dir.join("latest.json");
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        Ok(Some(serde_json::from_str::<usize>(&raw)?))
    }

    /// Persist the model architecture so inference can rebuild the
    /// exact model before loading weights.
    pub fn save_config(&self, cfg: &StyleLmConfig) -> Result<()> {
        let json = serde_json::to_vec_pretty(cfg)?;
        write_atomic(&self.dir.join("model_config.json"), &json)?;
        tracing::debug!("Saved model config to '{}'", self.dir.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<StyleLmConfig> {
        let path = self.dir.join("model_config.json");
        let json = fs::read_to_string(&path).with_context(|| {
            format!("Cannot read model config from '{}'. Run 'train' first.", path.display())
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join("model_config.json")
    }
}

/// Load weights from an explicit checkpoint file (as stored in an
/// artifact). The recorder wants the base path without extension.
pub fn load_checkpoint_file<B: Backend>(
    model: StyleLmModel<B>,
    path: &Path,
    device: &B::Device,
) -> Result<StyleLmModel<B>> {
    let path_str = path.to_string_lossy();
    let base = path_str
        .strip_suffix(RECORDER_EXT)
        .unwrap_or(&path_str)
        .to_string();

    let record = CompactRecorder::new()
        .load(PathBuf::from(base), device)
        .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))?;

    Ok(model.load_record(record))
}

/// Write bytes to `path` through a temp file in the same directory
/// plus a rename, so readers see either the old or the new content.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().context("path has no parent directory")?;
    let tmp = parent.join(format!(
        ".tmp_{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("write")
    ));
    fs::write(&tmp, bytes).with_context(|| format!("Cannot write '{}'", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Cannot move '{}' into place", path.display()))?;
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mimic-ckpt-{}-{}", tag, uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_latest_step_none_before_first_save() {
        let manager = CheckpointManager::new(scratch_dir("empty"));
        assert!(manager.latest_step().unwrap().is_none());
    }

    #[test]
    fn test_config_round_trip() {
        let manager = CheckpointManager::new(scratch_dir("config"));
        let cfg = StyleLmConfig::new(512, 64, 32, 4, 2, 128, 0.1);
        manager.save_config(&cfg).unwrap();
        let loaded = manager.load_config().unwrap();
        assert_eq!(loaded.vocab_size, 512);
        assert_eq!(loaded.max_seq_len, 64);
        assert_eq!(loaded.num_layers, 2);
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = scratch_dir("atomic");
        let path = dir.join("latest.json");
        write_atomic(&path, b"1").unwrap();
        write_atomic(&path, b"2").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "2");
        // No temp residue left behind
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
    }
}
