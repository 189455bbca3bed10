// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// This layer contains ALL Burn framework specific code.
// No other layer imports from burn directly except the data
// pipeline's Dataset/Batcher glue.
//
// Why isolate Burn code here?
//   - The training math is an external concern; the orchestrator
//     and session manager only see checkpoints and strings
//   - If Burn's API changes, we only update this layer
//   - Everything else is testable without a tensor backend
//
// What's in this layer:
//
//   model.rs     — small causal transformer decoder
//                  (token + position embeddings, pre-norm blocks
//                  with an autoregressive attention mask, LM head)
//
//   trainer.rs   — the step-driven training loop: forward, loss,
//                  backward, Adam update, cadence checkpointing,
//                  divergence detection, validation + early stop
//
//   generator.rs — autoregressive sampling from a stored
//                  artifact (temperature + top-k), behind the
//                  TextGenerator trait

/// Causal transformer language model architecture
pub mod model;

/// Training loop with validation, checkpointing, and early stop
pub mod trainer;

/// Sampling-based reply generation from stored artifacts
pub mod generator;

/// Backend used for training (autodiff on top of ndarray)
pub type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray>;

/// Backend used for inference and validation
pub type InferBackend = burn::backend::NdArray;

/// Device shared by both backends
pub fn device() -> burn::backend::ndarray::NdArrayDevice {
    burn::backend::ndarray::NdArrayDevice::default()
}
