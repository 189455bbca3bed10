// ============================================================
// Layer 3 — ModelArtifact Domain Type
// ============================================================
// A versioned, content-addressed record of one completed
// fine-tuning run: where the checkpoint lives, which style
// profile it was trained against, and the hash that makes the
// artifact tamper-evident.
//
// Artifacts are immutable once written. The artifact store is
// the sole writer; everything else only reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Manifest of one stored model artifact.
///
/// `content_hash` is sha256 over the checkpoint bytes followed by
/// the canonical style-profile JSON, so identity implies
/// byte-equality of both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub content_hash: String,

    /// The base model this artifact personalizes
    pub base_model_ref: String,

    /// Path of the style-profile record inside the store
    pub style_profile_ref: String,

    /// Path of the checkpoint payload inside the store
    pub checkpoint_ref: String,

    /// Strictly increasing per user, starting at 1
    pub version: u32,

    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl ModelArtifact {
    /// Short form of the content hash for logs.
    pub fn short_hash(&self) -> &str {
        &self.content_hash[..self.content_hash.len().min(12)]
    }
}
