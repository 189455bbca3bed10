// ============================================================
// Layer 3 — Message Domain Types
// ============================================================
// The three shapes a chat message passes through on its way
// into training:
//
//   RawMessage       — one record of the chat export, untouched
//   CleanedUtterance — merged + normalized text authored by the
//                      target sender
//   TrainingExample  — (context turns, target utterance) pair
//
// RawMessage and CleanedUtterance are created once per corpus
// build and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message exactly as it appears in the chat export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    /// Export-assigned message id, unique within its thread
    pub message_id: i64,

    /// Sender identifier as recorded by the chat platform
    pub sender: String,

    /// When the message was sent
    pub timestamp: DateTime<Utc>,

    /// Message text; empty for media-only messages
    pub text: String,

    /// Thread (dialog) the message belongs to
    pub thread_id: i64,
}

/// One cleaned utterance authored by the target sender.
///
/// Consecutive same-sender messages inside the merge gap are
/// collapsed into a single utterance, so one utterance can carry
/// several source message ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedUtterance {
    /// Ids of the RawMessages merged into this utterance
    pub source_message_ids: Vec<i64>,

    /// Sender of the merged messages; context turns keep their
    /// original sender so examples can label both sides
    pub sender: String,

    /// Normalized text — guaranteed non-empty
    pub normalized_text: String,

    /// Position of this utterance within its thread's turn order
    pub turn_index: usize,

    /// Thread the utterance came from
    pub thread_id: i64,

    /// Timestamp of the first merged message
    pub timestamp: DateTime<Utc>,
}

impl CleanedUtterance {
    /// Word count of the normalized text
    pub fn word_count(&self) -> usize {
        self.normalized_text.split_whitespace().count()
    }
}

/// A supervised pair: the conversation turns leading up to an
/// authored utterance, and the utterance itself as the target.
/// Context length is bounded by the configured max context turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    pub context: Vec<CleanedUtterance>,
    pub target: CleanedUtterance,
}

impl TrainingExample {
    /// Flatten the context into one prompt string, oldest first.
    /// Turns are joined with the separator the tokenizer reserves
    /// a special token for.
    pub fn context_text(&self, separator: &str) -> String {
        self.context
            .iter()
            .map(|u| u.normalized_text.as_str())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utterance(text: &str, turn: usize) -> CleanedUtterance {
        CleanedUtterance {
            source_message_ids: vec![turn as i64],
            sender: "me".to_string(),
            normalized_text: text.to_string(),
            turn_index: turn,
            thread_id: 1,
            timestamp: Utc.timestamp_opt(1_700_000_000 + turn as i64, 0).unwrap(),
        }
    }

    #[test]
    fn test_word_count() {
        assert_eq!(utterance("two words", 0).word_count(), 2);
    }

    #[test]
    fn test_context_text_joins_oldest_first() {
        let example = TrainingExample {
            context: vec![utterance("hi", 0), utterance("how are you", 1)],
            target: utterance("fine", 2),
        };
        assert_eq!(example.context_text(" | "), "hi | how are you");
    }
}
