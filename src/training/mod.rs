// ============================================================
// Layer 5 — Training Orchestration
// ============================================================
// Owns the lifecycle of fine-tuning jobs. The ML layer does the
// math; this layer does the state keeping:
//
//   job.rs          — the TrainingJob record and its status
//                     state machine (Queued → Running →
//                     Checkpointing → Completed | Failed, with
//                     one resume re-entering Running)
//
//   orchestrator.rs — per-user serialization of jobs, the
//                     blocking training task, the single
//                     automatic resume after divergence, and
//                     the handoff of completed checkpoints to
//                     the artifact store

/// TrainingJob record and status state machine
pub mod job;

/// Job lifecycle management and artifact handoff
pub mod orchestrator;
