// ============================================================
// Layer 4 — Corpus Builder
// ============================================================
// Turns raw export messages into a cleaned, deduplicated corpus.
//
// Steps, applied per thread in timestamp order:
//   1. Normalize text (unicode whitespace variants, control
//      characters, collapsed spaces)
//   2. Reject unusable messages (empty after cleaning, media-only,
//      bot commands, code blocks)
//   3. Merge consecutive same-sender messages sent within the
//      merge gap into one utterance
//   4. Drop near-duplicate authored utterances — same normalized
//      text hash seen within the dedupe window
//
// The build is fully deterministic: threads are visited in id
// order, messages in (timestamp, message_id) order, and nothing
// draws randomness. Re-running on an unchanged export yields a
// byte-identical corpus.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::errors::PipelineError;
use crate::domain::message::{CleanedUtterance, RawMessage};

/// The cleaned corpus plus build statistics. Serialized to the
/// user's work dir by `clone` and read back by `train`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Corpus {
    /// All cleaned utterances (both sides of every thread),
    /// ordered by thread then turn index. Context building needs
    /// the interlocutor turns; training targets do not.
    pub utterances: Vec<CleanedUtterance>,

    /// The sender whose style is being cloned
    pub target_sender: String,

    /// Messages rejected during cleaning and deduplication
    pub rejected_count: usize,
}

impl Corpus {
    /// Utterances authored by the target sender — the actual
    /// training targets and profiling input.
    pub fn authored(&self) -> impl Iterator<Item = &CleanedUtterance> {
        self.utterances
            .iter()
            .filter(move |u| u.sender == self.target_sender)
    }

    pub fn authored_count(&self) -> usize {
        self.authored().count()
    }
}

pub struct CorpusBuilder {
    target_sender: String,

    /// Max seconds between two same-sender messages for them to
    /// merge into one utterance
    merge_gap_secs: i64,

    /// Window inside which a repeated normalized text counts as
    /// a duplicate
    dedupe_window_secs: i64,

    /// Minimum authored utterances below which the build fails
    min_corpus_size: usize,
}

impl CorpusBuilder {
    pub fn new(
        target_sender: impl Into<String>,
        merge_gap_secs: i64,
        dedupe_window_secs: i64,
        min_corpus_size: usize,
    ) -> Self {
        Self {
            target_sender: target_sender.into(),
            merge_gap_secs,
            dedupe_window_secs,
            min_corpus_size,
        }
    }

    /// Build the cleaned corpus from raw export messages.
    pub fn build(&self, messages: &[RawMessage]) -> Result<Corpus, PipelineError> {
        let mut rejected = 0usize;

        // ── Partition by thread, deterministic thread order ───────────────────
        let mut threads: BTreeMap<i64, Vec<&RawMessage>> = BTreeMap::new();
        for message in messages {
            threads.entry(message.thread_id).or_default().push(message);
        }

        let mut utterances: Vec<CleanedUtterance> = Vec::new();

        for (thread_id, mut thread) in threads {
            thread.sort_by_key(|m| (m.timestamp, m.message_id));

            // ── Clean, then merge consecutive same-sender runs ────────────────
            let mut merged: Vec<CleanedUtterance> = Vec::new();
            let mut last_end: Option<DateTime<Utc>> = None;

            for message in thread {
                let text = normalize(&message.text);
                if !usable(&text) {
                    rejected += 1;
                    continue;
                }

                let within_gap = last_end
                    .map(|t| (message.timestamp - t).num_seconds() <= self.merge_gap_secs)
                    .unwrap_or(false);

                match merged.last_mut() {
                    Some(prev) if prev.sender == message.sender && within_gap => {
                        prev.normalized_text.push(' ');
                        prev.normalized_text.push_str(&text);
                        prev.source_message_ids.push(message.message_id);
                    }
                    _ => {
                        merged.push(CleanedUtterance {
                            source_message_ids: vec![message.message_id],
                            sender: message.sender.clone(),
                            normalized_text: text,
                            turn_index: 0, // assigned below
                            thread_id,
                            timestamp: message.timestamp,
                        });
                    }
                }
                last_end = Some(message.timestamp);
            }

            for (index, utterance) in merged.iter_mut().enumerate() {
                utterance.turn_index = index;
            }
            utterances.extend(merged);
        }

        // ── Dedupe authored utterances within the time window ─────────────────
        // One global chronological pass; duplicates keep the first
        // occurrence. Interlocutor turns are left alone — they only
        // ever serve as context.
        let mut order: Vec<usize> = (0..utterances.len())
            .filter(|&i| utterances[i].sender == self.target_sender)
            .collect();
        order.sort_by_key(|&i| {
            let u = &utterances[i];
            (u.timestamp, u.thread_id, u.turn_index)
        });

        let mut last_seen: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut drop: Vec<bool> = vec![false; utterances.len()];
        for &i in &order {
            let u = &utterances[i];
            let hash = text_hash(&u.normalized_text);
            if let Some(&seen) = last_seen.get(&hash) {
                if (u.timestamp - seen).num_seconds() <= self.dedupe_window_secs {
                    drop[i] = true;
                    rejected += 1;
                    continue;
                }
            }
            last_seen.insert(hash, u.timestamp);
        }

        let mut kept: Vec<CleanedUtterance> = utterances
            .into_iter()
            .zip(drop)
            .filter(|(_, dropped)| !dropped)
            .map(|(u, _)| u)
            .collect();

        // Reassign turn indices per thread after removals
        let mut next_turn: BTreeMap<i64, usize> = BTreeMap::new();
        for utterance in &mut kept {
            let turn = next_turn.entry(utterance.thread_id).or_insert(0);
            utterance.turn_index = *turn;
            *turn += 1;
        }

        let corpus = Corpus {
            utterances: kept,
            target_sender: self.target_sender.clone(),
            rejected_count: rejected,
        };

        let authored = corpus.authored_count();
        tracing::info!(
            "Corpus built: {} utterances ({} authored by '{}'), {} rejected",
            corpus.utterances.len(),
            authored,
            self.target_sender,
            rejected
        );

        if authored < self.min_corpus_size {
            return Err(PipelineError::InsufficientData {
                found: authored,
                required: self.min_corpus_size,
            });
        }

        Ok(corpus)
    }
}

/// Normalize one message text: map unicode whitespace variants
/// and control characters to spaces, then collapse runs.
fn normalize(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| match c {
            '\t' => ' ',
            // Non-breaking space
            '\u{00A0}' => ' ',
            // Zero-width space
            '\u{200B}' => ' ',
            // Byte order mark
            '\u{FEFF}' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();

    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether a cleaned text is worth keeping: non-empty, more than
/// one character, not a bot command or pasted code block.
fn usable(text: &str) -> bool {
    text.chars().count() >= 2 && !text.starts_with('/') && !text.starts_with("```")
}

/// Stable dedupe key for a normalized text.
fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(id: i64, sender: &str, offset_secs: i64, text: &str) -> RawMessage {
        RawMessage {
            message_id: id,
            sender: sender.to_string(),
            timestamp: Utc.timestamp_opt(1_700_000_000 + offset_secs, 0).unwrap(),
            text: text.to_string(),
            thread_id: 1,
        }
    }

    fn builder(min: usize) -> CorpusBuilder {
        CorpusBuilder::new("me", 120, 3600, min)
    }

    #[test]
    fn test_merges_consecutive_same_sender_within_gap() {
        let messages = vec![
            msg(1, "me", 0, "first part"),
            msg(2, "me", 30, "second part"),
            msg(3, "anna", 60, "a reply"),
        ];
        let corpus = builder(1).build(&messages).unwrap();
        assert_eq!(corpus.utterances.len(), 2);
        assert_eq!(corpus.utterances[0].normalized_text, "first part second part");
        assert_eq!(corpus.utterances[0].source_message_ids, vec![1, 2]);
    }

    #[test]
    fn test_gap_breaks_merge() {
        let messages = vec![msg(1, "me", 0, "morning"), msg(2, "me", 500, "evening")];
        let corpus = builder(1).build(&messages).unwrap();
        assert_eq!(corpus.utterances.len(), 2);
    }

    #[test]
    fn test_rejects_empty_commands_and_code() {
        let messages = vec![
            msg(1, "me", 0, "   "),
            msg(2, "me", 10, "/start"),
            msg(3, "me", 20, "```rust fn main() {}"),
            msg(4, "me", 30, "a real message"),
        ];
        let corpus = builder(1).build(&messages).unwrap();
        assert_eq!(corpus.utterances.len(), 1);
        assert_eq!(corpus.rejected_count, 3);
    }

    #[test]
    fn test_dedupes_within_window_only() {
        let messages = vec![
            msg(1, "me", 0, "ok"),
            msg(2, "anna", 200, "sure?"),
            // Same text 5 minutes later — inside the 1h window
            msg(3, "me", 300, "ok"),
            // Same text 2 hours later — outside the window
            msg(4, "me", 7500, "ok"),
        ];
        let corpus = builder(1).build(&messages).unwrap();
        let authored: Vec<_> = corpus.authored().collect();
        assert_eq!(authored.len(), 2);
        assert_eq!(corpus.rejected_count, 1);
    }

    #[test]
    fn test_normalizes_unicode_whitespace() {
        let messages = vec![msg(1, "me", 0, "hello\u{00A0}\u{200B} there\tfriend")];
        let corpus = builder(1).build(&messages).unwrap();
        assert_eq!(corpus.utterances[0].normalized_text, "hello there friend");
    }

    #[test]
    fn test_insufficient_data_error() {
        let messages = vec![
            msg(1, "me", 0, "one"),
            msg(2, "me", 300, "two"),
            msg(3, "me", 600, "three"),
        ];
        let err = builder(50).build(&messages).unwrap_err();
        match err {
            PipelineError::InsufficientData { found, required } => {
                assert_eq!(found, 3);
                assert_eq!(required, 50);
            }
            other => panic!("expected InsufficientData, got {other:?}"),
        }
    }

    #[test]
    fn test_build_is_idempotent() {
        let messages: Vec<RawMessage> = (0..40)
            .map(|i| {
                let sender = if i % 2 == 0 { "me" } else { "anna" };
                msg(i, sender, i * 400, &format!("message number {i}"))
            })
            .collect();

        let a = builder(5).build(&messages).unwrap();
        let b = builder(5).build(&messages).unwrap();
        assert_eq!(a.utterances, b.utterances);
        assert_eq!(a.rejected_count, b.rejected_count);
    }

    #[test]
    fn test_turn_indices_are_sequential_after_dedupe() {
        let messages = vec![
            msg(1, "me", 0, "hello"),
            msg(2, "me", 300, "hello"), // duplicate, dropped
            msg(3, "anna", 600, "hi there"),
            msg(4, "me", 900, "how are you"),
        ];
        let corpus = builder(1).build(&messages).unwrap();
        let indices: Vec<usize> = corpus.utterances.iter().map(|u| u.turn_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
