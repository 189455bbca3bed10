// ============================================================
// Layer 5 — Session Manager
// ============================================================
// open_session / reply / close_session.
//
// A reply call:
//   1. re-resolves the user's latest artifact (switches land here)
//   2. appends the input turn and truncates to max context turns
//   3. generates a candidate under the generation timeout,
//      retrying once with half the output budget
//   4. scores the candidate against the artifact's style profile;
//      below the drift threshold it regenerates once with cooler
//      sampling and keeps the best-scoring candidate, recording a
//      drift warning
//   5. discards everything if the session was closed mid-call
//
// A timed-out reply removes the turn it appended, so the history
// only ever holds completed exchanges.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use uuid::Uuid;

use crate::application::config::PipelineConfig;
use crate::domain::artifact::ModelArtifact;
use crate::domain::conversation::{ConversationSession, Reply, Turn};
use crate::domain::errors::PipelineError;
use crate::domain::profile::StyleProfile;
use crate::domain::traits::{SamplingParams, TextGenerator};
use crate::infra::artifact_store::ArtifactStore;
use crate::style::profiler::StyleProfiler;

/// How much the sampling temperature cools for the drift retry.
const DRIFT_RETRY_TEMPERATURE_SCALE: f32 = 0.7;

struct SessionSlot {
    state: tokio::sync::Mutex<ConversationSession>,
    closed: AtomicBool,
}

pub struct SessionManager {
    cfg: PipelineConfig,
    store: Arc<ArtifactStore>,
    generator: Arc<dyn TextGenerator>,
    profiler: StyleProfiler,
    sessions: StdMutex<HashMap<String, Arc<SessionSlot>>>,
}

impl SessionManager {
    pub fn new(
        cfg: PipelineConfig,
        store: Arc<ArtifactStore>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            cfg,
            store,
            generator,
            profiler: StyleProfiler::new(),
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    /// Open a session for `user_id`, resolving their current
    /// artifact. Fails if the user has no trained model yet.
    pub async fn open_session(&self, user_id: &str) -> Result<ConversationSession> {
        self.expire_idle();

        let (artifact, _) = self.resolve_artifact(user_id).await?;

        let now = Utc::now();
        let session = ConversationSession {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            active_artifact_version: artifact.version,
            turn_history: Vec::new(),
            opened_at: now,
            last_activity: now,
        };

        let slot = Arc::new(SessionSlot {
            state: tokio::sync::Mutex::new(session.clone()),
            closed: AtomicBool::new(false),
        });
        self.sessions
            .lock()
            .unwrap()
            .insert(session.session_id.clone(), slot);

        tracing::info!(
            "Opened session {} for '{}' on artifact v{}",
            session.session_id,
            user_id,
            artifact.version
        );
        Ok(session)
    }

    /// Produce one styled reply for the session.
    pub async fn reply(&self, session_id: &str, input_text: &str) -> Result<Reply> {
        let slot = self.slot(session_id)?;
        if slot.closed.load(Ordering::SeqCst) {
            return Err(PipelineError::SessionClosed {
                session_id: session_id.to_string(),
            }
            .into());
        }

        // Serializes concurrent replies on this one session
        let mut state = slot.state.lock().await;

        // ── Re-resolve the active artifact (switches land here) ───────────────
        let (artifact, profile) = self.resolve_artifact(&state.user_id).await?;
        if artifact.version != state.active_artifact_version {
            tracing::info!(
                "Session {}: artifact switched v{} → v{}",
                session_id,
                state.active_artifact_version,
                artifact.version
            );
            state.active_artifact_version = artifact.version;
        }

        state.push_turn(Turn::user(input_text), self.cfg.max_context_turns);
        let context = state.turn_history.clone();

        // ── Generate under timeout, retry once with half the budget ───────────
        let params = SamplingParams {
            temperature: self.cfg.temperature,
            top_k: self.cfg.top_k,
            max_new_tokens: self.cfg.max_new_tokens,
            seed: None,
        };

        let candidate = match self.generate_once(&artifact, &context, params.clone()).await {
            Ok(text) => Ok(text),
            Err(GenerateError::TimedOut) => {
                tracing::warn!("Generation timed out; retrying with reduced length");
                let mut shorter = params.clone();
                shorter.max_new_tokens = (params.max_new_tokens / 2).max(1);
                self.generate_once(&artifact, &context, shorter).await
            }
            Err(GenerateError::Failed(err)) => return self.abort_reply(&mut state, Err(err)),
        };

        let candidate = match candidate {
            Ok(text) => text,
            Err(GenerateError::TimedOut) => {
                let err = PipelineError::GenerationTimeout {
                    attempts: 2,
                    timeout_secs: self.cfg.generation_timeout_secs,
                };
                return self.abort_reply(&mut state, Err(err.into()));
            }
            Err(GenerateError::Failed(err)) => return self.abort_reply(&mut state, Err(err)),
        };

        // ── Style drift check, one cooler regeneration ────────────────────────
        let mut best_text = candidate;
        let mut best_similarity = self.profiler.score(&profile, &best_text);

        if best_similarity < self.cfg.style_drift_threshold {
            let mut cooler = params;
            cooler.temperature *= DRIFT_RETRY_TEMPERATURE_SCALE;
            cooler.top_k = (cooler.top_k / 2).max(1);

            if let Ok(second) = self.generate_once(&artifact, &context, cooler).await {
                let second_similarity = self.profiler.score(&profile, &second);
                if second_similarity > best_similarity {
                    best_text = second;
                    best_similarity = second_similarity;
                }
            }
        }

        let drift_warning = best_similarity < self.cfg.style_drift_threshold;
        if drift_warning {
            tracing::warn!(
                "Session {}: reply kept despite style drift (similarity {:.2} < {:.2})",
                session_id,
                best_similarity,
                self.cfg.style_drift_threshold
            );
        }

        // ── A session closed mid-call discards the pending result ─────────────
        if slot.closed.load(Ordering::SeqCst) {
            state.turn_history.pop();
            return Err(PipelineError::SessionClosed {
                session_id: session_id.to_string(),
            }
            .into());
        }

        state.push_turn(
            Turn::assistant(best_text.clone(), best_similarity, drift_warning),
            self.cfg.max_context_turns,
        );

        Ok(Reply {
            text: best_text,
            style_similarity: best_similarity,
            drift_warning,
        })
    }

    /// Close a session; a reply pending on it will be discarded.
    pub fn close_session(&self, session_id: &str) -> Result<()> {
        let slot = self.slot(session_id)?;
        slot.closed.store(true, Ordering::SeqCst);
        self.sessions.lock().unwrap().remove(session_id);
        tracing::info!("Closed session {}", session_id);
        Ok(())
    }

    /// Snapshot of a live session's state.
    pub async fn session(&self, session_id: &str) -> Result<ConversationSession> {
        let slot = self.slot(session_id)?;
        let state = slot.state.lock().await;
        Ok(state.clone())
    }

    /// Drop sessions idle past the configured timeout.
    pub fn expire_idle(&self) {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap();
        sessions.retain(|session_id, slot| {
            let keep = match slot.state.try_lock() {
                Ok(state) => {
                    (now - state.last_activity).num_seconds() <= self.cfg.session_idle_secs
                }
                // A locked slot has a reply in flight — clearly not idle
                Err(_) => true,
            };
            if !keep {
                slot.closed.store(true, Ordering::SeqCst);
                tracing::info!("Expired idle session {}", session_id);
            }
            keep
        });
    }

    fn slot(&self, session_id: &str) -> Result<Arc<SessionSlot>> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| {
                PipelineError::SessionNotFound {
                    session_id: session_id.to_string(),
                }
                .into()
            })
    }

    /// Resolve the user's latest artifact and its style profile.
    /// Store reads re-hash the payload, so this runs off-loop.
    async fn resolve_artifact(&self, user_id: &str) -> Result<(ModelArtifact, StyleProfile)> {
        let store = Arc::clone(&self.store);
        let user = user_id.to_string();
        let artifact = tokio::task::spawn_blocking(move || store.latest(&user))
            .await
            .context("artifact resolution task panicked")??;

        let profile: StyleProfile = serde_json::from_str(
            &fs::read_to_string(&artifact.style_profile_ref).with_context(|| {
                format!("Cannot read style profile '{}'", artifact.style_profile_ref)
            })?,
        )?;
        Ok((artifact, profile))
    }

    /// One generation attempt on a blocking thread, bounded by the
    /// configured timeout. A timed-out attempt's eventual result is
    /// dropped with its task handle.
    async fn generate_once(
        &self,
        artifact: &ModelArtifact,
        context: &[Turn],
        params: SamplingParams,
    ) -> std::result::Result<String, GenerateError> {
        let generator = Arc::clone(&self.generator);
        let artifact = artifact.clone();
        let context = context.to_vec();

        let task =
            tokio::task::spawn_blocking(move || generator.generate(&artifact, &context, &params));

        match tokio::time::timeout(Duration::from_secs(self.cfg.generation_timeout_secs), task)
            .await
        {
            Err(_elapsed) => Err(GenerateError::TimedOut),
            Ok(joined) => match joined {
                Err(join_err) => Err(GenerateError::Failed(anyhow::anyhow!(
                    "generation task panicked: {join_err}"
                ))),
                Ok(Err(err)) => Err(GenerateError::Failed(err)),
                Ok(Ok(text)) => Ok(text),
            },
        }
    }

    /// Undo the appended input turn so a failed reply leaves no
    /// half-finished exchange behind.
    fn abort_reply(
        &self,
        state: &mut ConversationSession,
        result: Result<Reply>,
    ) -> Result<Reply> {
        state.turn_history.pop();
        result
    }
}

enum GenerateError {
    TimedOut,
    Failed(anyhow::Error),
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profile::FeatureScore;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    /// Generator stub: scripted replies, optional per-call delays.
    struct StubGenerator {
        replies: Vec<String>,
        delays_ms: Vec<u64>,
        calls: AtomicUsize,
    }

    impl StubGenerator {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: replies.iter().map(|s| s.to_string()).collect(),
                delays_ms: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn with_delays(mut self, delays_ms: &[u64]) -> Self {
            self.delays_ms = delays_ms.to_vec();
            self
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TextGenerator for StubGenerator {
        fn generate(
            &self,
            _artifact: &ModelArtifact,
            _context: &[Turn],
            _params: &SamplingParams,
        ) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(&delay) = self.delays_ms.get(call) {
                std::thread::sleep(Duration::from_millis(delay));
            }
            let index = call.min(self.replies.len().saturating_sub(1));
            Ok(self.replies[index].clone())
        }
    }

    fn test_config(work_dir: &PathBuf) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.work_dir = work_dir.display().to_string();
        cfg.max_context_turns = 4;
        cfg.generation_timeout_secs = 1;
        cfg.style_drift_threshold = 0.0; // drift checking off unless a test raises it
        cfg
    }

    fn seed_artifact(store: &ArtifactStore, work_dir: &PathBuf, user: &str) {
        let checkpoint = work_dir.join("ckpt.mpk.gz");
        fs::write(&checkpoint, b"weights").unwrap();
        let config = work_dir.join("model_config.json");
        fs::write(&config, "{}").unwrap();
        let profile = StyleProfile {
            features: vec![
                FeatureScore { name: "mean_utterance_len".into(), value: 0.15, text_derived: true },
                FeatureScore { name: "lexical_diversity".into(), value: 0.9, text_derived: true },
                FeatureScore { name: "question_freq".into(), value: 0.0, text_derived: true },
                FeatureScore { name: "exclamation_freq".into(), value: 0.0, text_derived: true },
                FeatureScore { name: "emoji_freq".into(), value: 0.0, text_derived: true },
                FeatureScore { name: "uppercase_ratio".into(), value: 0.02, text_derived: true },
            ],
            sample_count: 100,
            built_at: Utc::now(),
        };
        store.put(user, &checkpoint, &config, &profile, "base").unwrap();
    }

    fn manager_with(generator: Arc<dyn TextGenerator>, users: &[&str]) -> (SessionManager, PathBuf) {
        let work_dir = std::env::temp_dir().join(format!("mimic-session-{}", Uuid::new_v4()));
        fs::create_dir_all(&work_dir).unwrap();
        let cfg = test_config(&work_dir);
        let store = Arc::new(ArtifactStore::new(cfg.artifacts_dir()));
        for user in users {
            seed_artifact(&store, &work_dir, user);
        }
        (SessionManager::new(cfg, store, generator), work_dir)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reply_appends_and_bounds_history() {
        let (manager, _dir) =
            manager_with(Arc::new(StubGenerator::new(&["sounds good"])), &["sam"]);
        let session = manager.open_session("sam").await.unwrap();

        for i in 0..6 {
            let reply = manager.reply(&session.session_id, &format!("msg {i}")).await.unwrap();
            assert!(!reply.text.is_empty());
            assert!((0.0..=1.0).contains(&reply.style_similarity));
        }

        let state = manager.session(&session.session_id).await.unwrap();
        // Never exceeds max_context_turns no matter how many turns land
        assert_eq!(state.turn_history.len(), 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sessions_of_different_users_are_isolated() {
        let (manager, _dir) =
            manager_with(Arc::new(StubGenerator::new(&["reply"])), &["sam", "alex"]);
        let a = manager.open_session("sam").await.unwrap();
        let b = manager.open_session("alex").await.unwrap();

        let (ra, rb) = tokio::join!(
            manager.reply(&a.session_id, "from sam"),
            manager.reply(&b.session_id, "from alex"),
        );
        ra.unwrap();
        rb.unwrap();

        let state_a = manager.session(&a.session_id).await.unwrap();
        let state_b = manager.session(&b.session_id).await.unwrap();
        assert_eq!(state_a.turn_history[0].text, "from sam");
        assert_eq!(state_b.turn_history[0].text, "from alex");
        assert!(state_a.turn_history.iter().all(|t| t.text != "from alex"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout_then_retry_returns_retried_text() {
        // First attempt sleeps past the 1s timeout, retry is instant
        let stub = Arc::new(
            StubGenerator::new(&["slow reply", "fast reply"]).with_delays(&[1500, 0]),
        );
        let (manager, _dir) = manager_with(stub.clone(), &["sam"]);
        let session = manager.open_session("sam").await.unwrap();

        let reply = manager.reply(&session.session_id, "hello").await.unwrap();
        assert_eq!(reply.text, "fast reply");
        assert_eq!(stub.call_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_double_timeout_is_fatal_to_reply_not_session() {
        let stub = Arc::new(StubGenerator::new(&["slow"]).with_delays(&[1500, 1500, 0]));
        let (manager, _dir) = manager_with(stub, &["sam"]);
        let session = manager.open_session("sam").await.unwrap();

        let err = manager.reply(&session.session_id, "hello").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::GenerationTimeout { attempts: 2, .. })
        ));

        // The failed exchange left no residue and the session still works
        let state = manager.session(&session.session_id).await.unwrap();
        assert!(state.turn_history.is_empty());
        manager.reply(&session.session_id, "again").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drift_triggers_one_regeneration_and_warning() {
        let stub = Arc::new(StubGenerator::new(&[
            "SCREAMING!!! TOTALLY!!! OFF!!! PROFILE!!!",
            "ALSO!!! VERY!!! LOUD!!!",
        ]));
        // Seed the artifact, then rebuild the manager with a raised
        // threshold so the stub's shouting counts as drift
        let (_seeded, work_dir) = manager_with(stub.clone(), &["sam"]);
        let mut cfg = test_config(&work_dir);
        cfg.style_drift_threshold = 0.95;
        let store = Arc::new(ArtifactStore::new(cfg.artifacts_dir()));
        let manager = SessionManager::new(cfg, store, stub.clone());

        let session = manager.open_session("sam").await.unwrap();
        let reply = manager.reply(&session.session_id, "hi").await.unwrap();

        // Non-fatal: the reply arrives, flagged, after one retry
        assert!(reply.drift_warning);
        assert_eq!(stub.call_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_during_generation_discards_result() {
        let stub = Arc::new(StubGenerator::new(&["late reply"]).with_delays(&[500]));
        let (manager, _dir) = manager_with(stub, &["sam"]);
        let manager = Arc::new(manager);
        let session = manager.open_session("sam").await.unwrap();

        let replier = Arc::clone(&manager);
        let session_id = session.session_id.clone();
        let pending = tokio::spawn(async move { replier.reply(&session_id, "hello").await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.close_session(&session.session_id).unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::SessionClosed { .. })
        ));
        // The session is gone; no history survived anywhere
        assert!(manager.session(&session.session_id).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_session_without_artifact_fails() {
        let (manager, _dir) = manager_with(Arc::new(StubGenerator::new(&["x"])), &[]);
        let err = manager.open_session("nobody").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ArtifactNotFound { .. })
        ));
    }
}
