// ============================================================
// Layer 2 — Train Use Case
// ============================================================
// The `train` entry point. All the real work — state machine,
// per-user serialization, checkpointing, artifact handoff —
// lives in the orchestrator; this use case only wires it to the
// store and reports the result.

use std::sync::Arc;

use anyhow::Result;

use crate::application::config::PipelineConfig;
use crate::domain::artifact::ModelArtifact;
use crate::infra::artifact_store::ArtifactStore;
use crate::training::orchestrator::TrainingOrchestrator;

pub struct TrainUseCase {
    config: PipelineConfig,
}

impl TrainUseCase {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run one fine-tuning job for `user_id` and return the stored
    /// artifact.
    pub async fn execute(&self, user_id: &str) -> Result<ModelArtifact> {
        let store = Arc::new(ArtifactStore::new(self.config.artifacts_dir()));
        let orchestrator = TrainingOrchestrator::new(self.config.clone(), store);
        orchestrator.train(user_id).await
    }
}
