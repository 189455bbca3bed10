// ============================================================
// Layer 4 — Training Example Builder
// ============================================================
// Turns the cleaned corpus into supervised pairs: the turns
// leading up to an authored utterance become the context, the
// utterance itself becomes the target.
//
// Context keeps both sides of the conversation (the model should
// learn how the target *responds*, which needs the other side),
// but only target-authored utterances ever become targets.

use std::collections::BTreeMap;

use crate::data::corpus::Corpus;
use crate::domain::message::{CleanedUtterance, TrainingExample};

/// Builds (context, target) pairs from a corpus.
pub struct ExampleBuilder {
    /// Upper bound on context turns per example
    max_context_turns: usize,
}

impl ExampleBuilder {
    pub fn new(max_context_turns: usize) -> Self {
        Self { max_context_turns }
    }

    /// One example per authored utterance, in deterministic
    /// thread-then-turn order.
    pub fn build(&self, corpus: &Corpus) -> Vec<TrainingExample> {
        // Re-group by thread; utterances are already thread-ordered
        let mut threads: BTreeMap<i64, Vec<&CleanedUtterance>> = BTreeMap::new();
        for utterance in &corpus.utterances {
            threads.entry(utterance.thread_id).or_default().push(utterance);
        }

        let mut examples = Vec::new();
        for thread in threads.values() {
            for (position, utterance) in thread.iter().enumerate() {
                if utterance.sender != corpus.target_sender {
                    continue;
                }

                let context_start = position.saturating_sub(self.max_context_turns);
                let context: Vec<CleanedUtterance> = thread[context_start..position]
                    .iter()
                    .map(|u| (*u).clone())
                    .collect();

                examples.push(TrainingExample {
                    context,
                    target: (*utterance).clone(),
                });
            }
        }

        tracing::info!(
            "Built {} training examples (max {} context turns)",
            examples.len(),
            self.max_context_turns
        );
        examples
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn utterance(sender: &str, turn: usize, text: &str) -> CleanedUtterance {
        CleanedUtterance {
            source_message_ids: vec![turn as i64],
            sender: sender.to_string(),
            normalized_text: text.to_string(),
            turn_index: turn,
            thread_id: 1,
            timestamp: Utc.timestamp_opt(1_700_000_000 + turn as i64 * 60, 0).unwrap(),
        }
    }

    fn corpus(utterances: Vec<CleanedUtterance>) -> Corpus {
        Corpus {
            utterances,
            target_sender: "me".to_string(),
            rejected_count: 0,
        }
    }

    #[test]
    fn test_one_example_per_authored_utterance() {
        let c = corpus(vec![
            utterance("anna", 0, "hi"),
            utterance("me", 1, "hey"),
            utterance("anna", 2, "coffee?"),
            utterance("me", 3, "sure, when?"),
        ]);
        let examples = ExampleBuilder::new(6).build(&c);
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].target.normalized_text, "hey");
        assert_eq!(examples[1].context.len(), 3);
    }

    #[test]
    fn test_context_is_bounded() {
        let mut utterances = Vec::new();
        for i in 0..10 {
            utterances.push(utterance("anna", i, &format!("q{i}")));
        }
        utterances.push(utterance("me", 10, "answer"));

        let examples = ExampleBuilder::new(4).build(&corpus(utterances));
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].context.len(), 4);
        // The most recent turns are kept
        assert_eq!(examples[0].context[3].normalized_text, "q9");
    }

    #[test]
    fn test_first_turn_target_has_empty_context() {
        let c = corpus(vec![utterance("me", 0, "opening line")]);
        let examples = ExampleBuilder::new(6).build(&c);
        assert_eq!(examples.len(), 1);
        assert!(examples[0].context.is_empty());
    }
}
