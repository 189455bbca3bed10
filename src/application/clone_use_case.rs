// ============================================================
// Layer 2 — Clone Use Case
// ============================================================
// The `clone` entry point: chat export → cleaned corpus + style
// profile, persisted to the user's work dir for `train` to pick
// up. Nothing is written if any stage fails — a malformed export
// or an undersized corpus leaves the work dir untouched.

use anyhow::Result;

use crate::application::config::PipelineConfig;
use crate::data::corpus::CorpusBuilder;
use crate::data::export::JsonExportSource;
use crate::domain::profile::StyleProfile;
use crate::domain::traits::ExportSource;
use crate::infra::checkpoint::write_atomic;
use crate::style::profiler::StyleProfiler;

/// What `clone` reports back to the CLI.
#[derive(Debug)]
pub struct CloneOutcome {
    pub total_utterances: usize,
    pub authored_utterances: usize,
    pub rejected_messages: usize,
    pub profile: StyleProfile,
}

pub struct CloneUseCase {
    config: PipelineConfig,
}

impl CloneUseCase {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Build and persist corpus + profile for `user_id` from the
    /// export at `export_path`. `target_sender` is the sender id
    /// inside the export whose style is cloned (defaults to the
    /// user id).
    pub fn execute(
        &self,
        export_path: &str,
        user_id: &str,
        target_sender: Option<&str>,
    ) -> Result<CloneOutcome> {
        let cfg = &self.config;
        let sender = target_sender.unwrap_or(user_id);

        // ── Step 1: Parse the export (all-or-nothing) ─────────────────────────
        tracing::info!("Loading chat export from '{}'", export_path);
        let messages = JsonExportSource::new(export_path).load_all()?;

        // ── Step 2: Clean, merge, dedupe ──────────────────────────────────────
        let builder = CorpusBuilder::new(
            sender,
            cfg.merge_gap_secs,
            cfg.dedupe_window_secs,
            cfg.min_corpus_size,
        );
        let corpus = builder.build(&messages)?;

        // ── Step 3: Profile the writing style ─────────────────────────────────
        let profile = StyleProfiler::new().build(&corpus);

        // ── Step 4: Persist for `train` ───────────────────────────────────────
        let user_dir = cfg.user_dir(user_id);
        std::fs::create_dir_all(&user_dir)?;
        write_atomic(&user_dir.join("corpus.json"), &serde_json::to_vec_pretty(&corpus)?)?;
        write_atomic(
            &user_dir.join("style_profile.json"),
            &serde_json::to_vec_pretty(&profile)?,
        )?;
        tracing::info!("Corpus and style profile saved to '{}'", user_dir.display());

        Ok(CloneOutcome {
            total_utterances: corpus.utterances.len(),
            authored_utterances: corpus.authored_count(),
            rejected_messages: corpus.rejected_count,
            profile,
        })
    }
}
