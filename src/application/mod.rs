// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers to accomplish one of the modes
// the CLI exposes. Rules for this layer:
//   - No tensor math or model code here
//   - No printing here (that's Layer 1)
//   - Only workflow coordination
//
// One use case per pipeline entry point:
//   clone  → corpus + style profile from a chat export
//   train  → fine-tuning job → stored artifact
//   chat   → demo replies and the adapter serve loop

/// The single validated configuration structure
pub mod config;

/// Corpus extraction and style profiling workflow
pub mod clone_use_case;

/// Fine-tuning workflow
pub mod train_use_case;

/// Demo and serve workflows over the session manager
pub mod chat_use_case;
