// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting persistence concerns used by several layers:
//
//   checkpoint.rs      — Atomic saving and loading of model
//                        weights via Burn's CompactRecorder.
//                        Every write goes temp-then-rename so a
//                        crash mid-write never corrupts the
//                        checkpoint a reader resolves.
//
//   artifact_store.rs  — Versioned, content-addressed storage of
//                        completed models with their style
//                        profiles. Immutable entries, per-user
//                        latest pointer, rollback.
//
//   tokenizer_store.rs — Per-user vocabulary persistence. Built
//                        once from the corpus, reused by every
//                        later training run and by inference.
//
//   metrics.rs         — Per-evaluation training metrics,
//                        appended to a CSV for later analysis.

/// Atomic model checkpoint saving and loading
pub mod checkpoint;

/// Versioned, content-addressed model artifacts
pub mod artifact_store;

/// Tokenizer building, saving, and loading
pub mod tokenizer_store;

/// Training metrics CSV logger
pub mod metrics;
