// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The seams where external collaborators plug in.
//
// By programming against traits instead of concrete types, the
// session manager never depends on a messaging platform and the
// pipeline never depends on one export format:
//   - JsonExportSource implements ExportSource
//   - StyleGenerator (burn-backed) implements TextGenerator
//   - ConsoleAdapter implements ChatAdapter; platform bot/web
//     clients are expected to implement the same trait

use anyhow::Result;

use crate::domain::artifact::ModelArtifact;
use crate::domain::conversation::Turn;
use crate::domain::errors::PipelineError;
use crate::domain::message::RawMessage;

// ─── ExportSource ─────────────────────────────────────────────────────────────
/// Any component that can load raw messages from a chat export.
pub trait ExportSource {
    /// Load every message record. A malformed export fails the
    /// whole load — no partial corpus.
    fn load_all(&self) -> Result<Vec<RawMessage>, PipelineError>;
}

// ─── TextGenerator ────────────────────────────────────────────────────────────
/// Knobs for one generation attempt.
#[derive(Debug, Clone)]
pub struct SamplingParams {
    /// Softmax temperature; lower is more conservative
    pub temperature: f32,

    /// Keep only the k most likely tokens before sampling
    pub top_k: usize,

    /// Hard cap on generated tokens for this attempt
    pub max_new_tokens: usize,

    /// Fixed seed for reproducible sampling; `None` uses entropy
    pub seed: Option<u64>,
}

/// Any component that can produce a candidate reply from a model
/// artifact and the session's recent turns.
///
/// Implementations are blocking — callers wrap them in
/// `spawn_blocking` and apply their own timeout.
pub trait TextGenerator: Send + Sync {
    fn generate(
        &self,
        artifact: &ModelArtifact,
        context: &[Turn],
        params: &SamplingParams,
    ) -> Result<String>;
}

// ─── ChatAdapter ──────────────────────────────────────────────────────────────
/// The capability a serving surface (bot, web, demo CLI) must
/// provide. The serve loop only ever calls these two methods;
/// it never knows which platform is on the other side.
pub trait ChatAdapter {
    /// Block until the next inbound message, or `None` when the
    /// surface has ended the conversation.
    fn receive_message(&mut self) -> Result<Option<String>>;

    /// Deliver one reply to the surface.
    fn send_message(&mut self, text: &str) -> Result<()>;
}
