// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Every failure mode the pipeline can surface to a caller, as
// one typed enum. The propagation policy:
//
//   - Data-integrity errors (Parse, ArtifactCorruption) never
//     self-heal — correctness over availability.
//   - Runtime errors (GenerationTimeout) favor availability:
//     bounded retries, the session survives.
//   - Style drift is NOT an error; it is recorded on the turn.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed chat export. Fatal: no partial corpus is ever
    /// produced from a half-parsed export.
    #[error("malformed chat export '{path}': {detail}")]
    Parse { path: String, detail: String },

    /// Too few authored utterances to fine-tune on.
    #[error("insufficient corpus: {found} authored utterances, at least {required} required")]
    InsufficientData { found: usize, required: usize },

    /// A second `train` while one is running for the same user.
    /// Rejected immediately so the caller observes contention.
    #[error("a training job is already running for user '{user_id}'")]
    TrainingInProgress { user_id: String },

    /// Loss became non-finite or exceeded the divergence bound,
    /// and the single automatic resume also failed.
    #[error("training job '{job_id}' diverged: {detail}")]
    TrainingDivergence { job_id: String, detail: String },

    /// A stored checkpoint no longer matches its recorded hash.
    /// Never auto-repaired; an operator must re-train or roll back.
    #[error("artifact '{reference}' is corrupt: manifest hash {expected} != content hash {actual}")]
    ArtifactCorruption {
        reference: String,
        expected: String,
        actual: String,
    },

    /// No artifact resolves for the given user/version/hash.
    #[error("no model artifact found for '{reference}'")]
    ArtifactNotFound { reference: String },

    /// Both the initial generation and the shortened retry
    /// exceeded the timeout. Fatal to this reply only.
    #[error("generation timed out after {attempts} attempts ({timeout_secs}s each)")]
    GenerationTimeout { attempts: u32, timeout_secs: u64 },

    /// The session was closed while a reply was pending; the
    /// pending result has been discarded.
    #[error("session '{session_id}' was closed")]
    SessionClosed { session_id: String },

    #[error("unknown session '{session_id}'")]
    SessionNotFound { session_id: String },
}
