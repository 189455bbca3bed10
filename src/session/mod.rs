// ============================================================
// Layer 5 — Inference Serving
// ============================================================
// Holds per-user conversational state and produces styled
// replies from the user's current model artifact.
//
// Concurrency contract:
//   - one lock per session: concurrent replies on the same
//     session serialize, different sessions run in parallel
//   - the active model is resolved through the artifact store on
//     every reply — there is no process-wide current model, so
//     artifact switches land on the next reply and never
//     mid-generation

/// Session lifecycle, reply generation, drift checking
pub mod manager;
