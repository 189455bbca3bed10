// ============================================================
// Layer 2 — Chat Use Case
// ============================================================
// The serving entry points over the session manager:
//
//   demo(user, text)  — one-shot: open a session, reply, close
//   serve(user, ...)  — loop an injected ChatAdapter until the
//                       surface ends the conversation
//
// The use case never knows which platform is on the other side
// of the adapter; bot and web surfaces both arrive through the
// same two-method trait.

use std::sync::Arc;

use anyhow::Result;

use crate::application::config::PipelineConfig;
use crate::domain::conversation::Reply;
use crate::domain::traits::ChatAdapter;
use crate::infra::artifact_store::ArtifactStore;
use crate::ml::generator::StyleGenerator;
use crate::session::manager::SessionManager;

pub struct ChatUseCase {
    manager: SessionManager,
}

impl ChatUseCase {
    pub fn new(config: PipelineConfig) -> Self {
        let store = Arc::new(ArtifactStore::new(config.artifacts_dir()));
        let generator = Arc::new(StyleGenerator::new(config.work_dir.clone()));
        Self {
            manager: SessionManager::new(config, store, generator),
        }
    }

    /// One-shot reply for the demo mode.
    pub async fn demo(&self, user_id: &str, input_text: &str) -> Result<Reply> {
        let session = self.manager.open_session(user_id).await?;
        let reply = self.manager.reply(&session.session_id, input_text).await;
        self.manager.close_session(&session.session_id)?;
        reply
    }

    /// Serve a conversation over any ChatAdapter until the surface
    /// ends it. A reply that fails (e.g. a generation timeout after
    /// retry) is reported to the surface; the session survives.
    pub async fn serve(&self, user_id: &str, adapter: &mut dyn ChatAdapter) -> Result<()> {
        let session = self.manager.open_session(user_id).await?;

        loop {
            self.manager.expire_idle();

            let Some(incoming) = adapter.receive_message()? else {
                break;
            };

            match self.manager.reply(&session.session_id, &incoming).await {
                Ok(reply) => {
                    if reply.drift_warning {
                        tracing::warn!(
                            "Reply drifted (similarity {:.2}); delivering anyway",
                            reply.style_similarity
                        );
                    }
                    adapter.send_message(&reply.text)?;
                }
                Err(err) => {
                    tracing::error!("Reply failed: {err:#}");
                    adapter.send_message("(no reply — please try again)")?;
                }
            }
        }

        self.manager.close_session(&session.session_id)?;
        Ok(())
    }
}
