// ============================================================
// Layer 6 — Artifact Store
// ============================================================
// Versioned, content-addressed storage of completed models.
//
// Layout per user:
//
//   artifacts/<user>/
//     v0001/
//       checkpoint.mpk.gz   ← copied final checkpoint
//       model_config.json   ← architecture for rebuilding
//       style_profile.json  ← profile the model was trained with
//       manifest.json       ← ModelArtifact record
//     v0002/ ...
//     latest.json           ← {"version": 2}
//
// Guarantees:
//   - version numbers are strictly increasing and never reused
//   - an artifact directory is written once and never touched again
//   - `latest` resolves through an atomically-replaced pointer, so
//     rollback repoints without deleting anything
//   - every read re-hashes checkpoint + profile bytes; a mismatch
//     is ArtifactCorruption and is never silently repaired

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::artifact::ModelArtifact;
use crate::domain::errors::PipelineError;
use crate::domain::profile::StyleProfile;
use crate::infra::checkpoint::write_atomic;

#[derive(Debug, Serialize, Deserialize)]
struct LatestPointer {
    version: u32,
}

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        fs::create_dir_all(&root).ok();
        Self { root }
    }

    fn user_dir(&self, user_id: &str) -> PathBuf {
        self.root.join(user_id)
    }

    fn version_dir(&self, user_id: &str, version: u32) -> PathBuf {
        self.user_dir(user_id).join(format!("v{version:04}"))
    }

    /// Store a completed training run as a new immutable version.
    pub fn put(
        &self,
        user_id: &str,
        checkpoint_src: &Path,
        model_config_src: &Path,
        profile: &StyleProfile,
        base_model_ref: &str,
    ) -> Result<ModelArtifact> {
        let version = self.next_version(user_id)?;
        let dir = self.version_dir(user_id, version);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create artifact dir '{}'", dir.display()))?;

        // ── Copy the payload in ───────────────────────────────────────────────
        let checkpoint_bytes = fs::read(checkpoint_src)
            .with_context(|| format!("Cannot read checkpoint '{}'", checkpoint_src.display()))?;
        let checkpoint_path = dir.join("checkpoint.mpk.gz");
        write_atomic(&checkpoint_path, &checkpoint_bytes)?;

        let config_bytes = fs::read(model_config_src)
            .with_context(|| format!("Cannot read model config '{}'", model_config_src.display()))?;
        write_atomic(&dir.join("model_config.json"), &config_bytes)?;

        let profile_bytes = serde_json::to_vec_pretty(profile)?;
        let profile_path = dir.join("style_profile.json");
        write_atomic(&profile_path, &profile_bytes)?;

        // ── Content address: checkpoint bytes + profile record ────────────────
        let content_hash = content_hash(&checkpoint_bytes, &profile_bytes);

        let artifact = ModelArtifact {
            content_hash,
            base_model_ref: base_model_ref.to_string(),
            style_profile_ref: profile_path.display().to_string(),
            checkpoint_ref: checkpoint_path.display().to_string(),
            version,
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        };

        write_atomic(&dir.join("manifest.json"), &serde_json::to_vec_pretty(&artifact)?)?;
        self.write_latest(user_id, version)?;

        tracing::info!(
            "Stored artifact v{} ({}) for user '{}'",
            version,
            artifact.short_hash(),
            user_id
        );
        Ok(artifact)
    }

    /// Resolve an artifact by version number ("3" or "v0003") or by
    /// content hash (full or unambiguous prefix). Verifies content.
    pub fn get(&self, user_id: &str, reference: &str) -> Result<ModelArtifact> {
        let trimmed = reference.trim_start_matches('v');
        if let Ok(version) = trimmed.parse::<u32>() {
            return self.load_verified(user_id, version);
        }

        // Fall back to hash lookup across all versions
        for version in self.list_versions(user_id)? {
            let manifest = self.read_manifest(user_id, version)?;
            if manifest.content_hash.starts_with(reference) {
                return self.load_verified(user_id, version);
            }
        }
        Err(PipelineError::ArtifactNotFound {
            reference: format!("{user_id}/{reference}"),
        }
        .into())
    }

    /// The artifact the user's `latest` pointer currently names.
    pub fn latest(&self, user_id: &str) -> Result<ModelArtifact> {
        let path = self.user_dir(user_id).join("latest.json");
        if !path.exists() {
            return Err(PipelineError::ArtifactNotFound {
                reference: format!("{user_id}/latest"),
            }
            .into());
        }
        let raw = fs::read_to_string(&path)?;
        let pointer: LatestPointer = serde_json::from_str(&raw)?;
        self.load_verified(user_id, pointer.version)
    }

    /// Repoint `latest` at an older version. The rolled-back-from
    /// version stays on disk untouched.
    pub fn rollback(&self, user_id: &str, to_version: u32) -> Result<ModelArtifact> {
        let artifact = self.load_verified(user_id, to_version)?;
        self.write_latest(user_id, to_version)?;
        tracing::info!("Rolled back user '{}' to artifact v{}", user_id, to_version);
        Ok(artifact)
    }

    /// All stored versions for a user, ascending.
    pub fn list_versions(&self, user_id: &str) -> Result<Vec<u32>> {
        let dir = self.user_dir(user_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(number) = name.strip_prefix('v') {
                if let Ok(version) = number.parse::<u32>() {
                    versions.push(version);
                }
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn next_version(&self, user_id: &str) -> Result<u32> {
        Ok(self.list_versions(user_id)?.last().copied().unwrap_or(0) + 1)
    }

    fn read_manifest(&self, user_id: &str, version: u32) -> Result<ModelArtifact> {
        let path = self.version_dir(user_id, version).join("manifest.json");
        if !path.exists() {
            return Err(PipelineError::ArtifactNotFound {
                reference: format!("{user_id}/v{version}"),
            }
            .into());
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Read a manifest and re-hash the stored payload against it.
    fn load_verified(&self, user_id: &str, version: u32) -> Result<ModelArtifact> {
        let manifest = self.read_manifest(user_id, version)?;

        let checkpoint_bytes = fs::read(&manifest.checkpoint_ref).with_context(|| {
            format!("Cannot read stored checkpoint '{}'", manifest.checkpoint_ref)
        })?;
        let profile_bytes = fs::read(&manifest.style_profile_ref).with_context(|| {
            format!("Cannot read stored profile '{}'", manifest.style_profile_ref)
        })?;

        let actual = content_hash(&checkpoint_bytes, &profile_bytes);
        if actual != manifest.content_hash {
            return Err(PipelineError::ArtifactCorruption {
                reference: format!("{user_id}/v{version}"),
                expected: manifest.content_hash,
                actual,
            }
            .into());
        }
        Ok(manifest)
    }

    fn write_latest(&self, user_id: &str, version: u32) -> Result<()> {
        let pointer = LatestPointer { version };
        write_atomic(
            &self.user_dir(user_id).join("latest.json"),
            &serde_json::to_vec_pretty(&pointer)?,
        )
    }
}

fn content_hash(checkpoint_bytes: &[u8], profile_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(checkpoint_bytes);
    hasher.update(profile_bytes);
    hex::encode(hasher.finalize())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profile::FeatureScore;
    use std::fs::File;
    use std::io::Write;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mimic-store-{}-{}", tag, uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn profile() -> StyleProfile {
        StyleProfile {
            features: vec![FeatureScore {
                name: "mean_utterance_len".into(),
                value: 0.3,
                text_derived: true,
            }],
            sample_count: 100,
            built_at: Utc::now(),
        }
    }

    /// Dummy checkpoint + config files standing in for a real run.
    fn payload(dir: &Path, tag: &str) -> (PathBuf, PathBuf) {
        let checkpoint = dir.join(format!("{tag}.mpk.gz"));
        let mut f = File::create(&checkpoint).unwrap();
        f.write_all(tag.as_bytes()).unwrap();
        let config = dir.join(format!("{tag}_config.json"));
        fs::write(&config, "{\"vocab_size\":8}").unwrap();
        (checkpoint, config)
    }

    #[test]
    fn test_versions_are_strictly_increasing() {
        let dir = scratch_dir("versions");
        let store = ArtifactStore::new(dir.join("artifacts"));
        let (ckpt, cfg) = payload(&dir, "a");

        let v1 = store.put("sam", &ckpt, &cfg, &profile(), "base").unwrap();
        let v2 = store.put("sam", &ckpt, &cfg, &profile(), "base").unwrap();
        let v3 = store.put("sam", &ckpt, &cfg, &profile(), "base").unwrap();
        assert_eq!((v1.version, v2.version, v3.version), (1, 2, 3));
        assert_eq!(store.list_versions("sam").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_latest_follows_put_and_hash_is_stable() {
        let dir = scratch_dir("latest");
        let store = ArtifactStore::new(dir.join("artifacts"));
        let (ckpt_a, cfg) = payload(&dir, "a");
        let (ckpt_b, _) = payload(&dir, "b");

        let first = store.put("sam", &ckpt_a, &cfg, &profile(), "base").unwrap();
        assert_eq!(store.latest("sam").unwrap().version, 1);
        // Stable across repeated reads
        assert_eq!(store.latest("sam").unwrap().content_hash, first.content_hash);

        let second = store.put("sam", &ckpt_b, &cfg, &profile(), "base").unwrap();
        assert_eq!(store.latest("sam").unwrap().version, 2);
        // Different checkpoint bytes — different address
        assert_ne!(second.content_hash, first.content_hash);
    }

    #[test]
    fn test_get_by_version_and_hash_prefix() {
        let dir = scratch_dir("get");
        let store = ArtifactStore::new(dir.join("artifacts"));
        let (ckpt, cfg) = payload(&dir, "a");
        let stored = store.put("sam", &ckpt, &cfg, &profile(), "base").unwrap();

        assert_eq!(store.get("sam", "1").unwrap().version, 1);
        assert_eq!(store.get("sam", "v0001").unwrap().version, 1);
        let by_hash = store.get("sam", &stored.content_hash[..12]).unwrap();
        assert_eq!(by_hash.version, 1);

        let err = store.get("sam", "99").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ArtifactNotFound { .. })
        ));
    }

    #[test]
    fn test_rollback_repoints_latest_without_deleting() {
        let dir = scratch_dir("rollback");
        let store = ArtifactStore::new(dir.join("artifacts"));
        let (ckpt_a, cfg) = payload(&dir, "a");
        let (ckpt_b, _) = payload(&dir, "b");
        store.put("sam", &ckpt_a, &cfg, &profile(), "base").unwrap();
        store.put("sam", &ckpt_b, &cfg, &profile(), "base").unwrap();

        store.rollback("sam", 1).unwrap();
        assert_eq!(store.latest("sam").unwrap().version, 1);
        // The rolled-back-from version is still readable
        assert_eq!(store.get("sam", "2").unwrap().version, 2);
    }

    #[test]
    fn test_tampered_checkpoint_is_corruption() {
        let dir = scratch_dir("tamper");
        let store = ArtifactStore::new(dir.join("artifacts"));
        let (ckpt, cfg) = payload(&dir, "a");
        let stored = store.put("sam", &ckpt, &cfg, &profile(), "base").unwrap();

        // Flip bytes behind the store's back
        fs::write(&stored.checkpoint_ref, b"tampered").unwrap();

        let err = store.latest("sam").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ArtifactCorruption { .. })
        ));
    }

    #[test]
    fn test_users_are_isolated() {
        let dir = scratch_dir("isolation");
        let store = ArtifactStore::new(dir.join("artifacts"));
        let (ckpt, cfg) = payload(&dir, "a");
        store.put("sam", &ckpt, &cfg, &profile(), "base").unwrap();

        assert!(store.latest("alex").is_err());
        assert!(store.list_versions("alex").unwrap().is_empty());
    }
}
