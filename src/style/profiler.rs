// ============================================================
// Layer 4 — Style Profiler
// ============================================================
// Computes the style signature of the target sender from the
// cleaned corpus, and scores candidate texts against it.
//
// Features, in stable order (all normalized to [0, 1]):
//   mean_utterance_len — average words per utterance / LEN_SCALE
//   lexical_diversity  — unique words / total words
//   question_freq      — share of utterances containing '?'
//   exclamation_freq   — share of utterances containing '!'
//   emoji_freq         — share of utterances containing an emoji
//   uppercase_ratio    — uppercase share of alphabetic chars
//   response_latency   — median seconds to answer, / LATENCY_SCALE
//
// `response_latency` is inferred from thread timestamps and is
// the one feature a candidate text cannot exhibit, so it is
// excluded from the drift distance (`text_derived = false`).

use chrono::Utc;

use crate::data::corpus::Corpus;
use crate::domain::profile::{FeatureScore, StyleProfile};

/// Word count at which mean_utterance_len saturates at 1.0
const LEN_SCALE: f32 = 30.0;

/// Reply delay (seconds) at which response_latency saturates at 1.0
const LATENCY_SCALE: f32 = 600.0;

pub struct StyleProfiler;

impl StyleProfiler {
    pub fn new() -> Self {
        Self
    }

    /// Build the style signature from the corpus's authored
    /// utterances. Pure: same corpus in, same feature values out.
    pub fn build(&self, corpus: &Corpus) -> StyleProfile {
        let texts: Vec<&str> = corpus.authored().map(|u| u.normalized_text.as_str()).collect();
        let sample_count = texts.len();

        let mut features = text_features(&texts);
        features.push(FeatureScore {
            name: "response_latency".to_string(),
            value: latency_feature(corpus),
            text_derived: false,
        });

        tracing::debug!("Style profile built from {} utterances", sample_count);

        StyleProfile {
            features,
            sample_count,
            built_at: Utc::now(),
        }
    }

    /// Bounded style similarity of a candidate text against a
    /// profile: 1.0 = indistinguishable feature vector, 0.0 =
    /// maximally different. Only text-derived features score.
    pub fn score(&self, profile: &StyleProfile, candidate: &str) -> f32 {
        let candidate_features = text_features(&[candidate]);

        let mut distance = 0.0f32;
        let mut compared = 0usize;
        for feature in profile.text_derived_features() {
            if let Some(candidate_value) = candidate_features
                .iter()
                .find(|f| f.name == feature.name)
                .map(|f| f.value)
            {
                distance += (feature.value - candidate_value).abs();
                compared += 1;
            }
        }

        if compared == 0 {
            return 0.0;
        }
        (1.0 - distance / compared as f32).clamp(0.0, 1.0)
    }
}

impl Default for StyleProfiler {
    fn default() -> Self {
        Self::new()
    }
}

/// The text-derived slice of the feature vector, computed over
/// one or many utterances.
fn text_features(texts: &[&str]) -> Vec<FeatureScore> {
    let count = texts.len().max(1) as f32;

    let mut total_words = 0usize;
    let mut unique_words = std::collections::HashSet::new();
    let mut question = 0usize;
    let mut exclamation = 0usize;
    let mut with_emoji = 0usize;
    let mut upper_chars = 0usize;
    let mut alpha_chars = 0usize;

    for text in texts {
        let words: Vec<&str> = text.split_whitespace().collect();
        total_words += words.len();
        for word in &words {
            unique_words.insert(word.to_lowercase());
        }
        if text.contains('?') {
            question += 1;
        }
        if text.contains('!') {
            exclamation += 1;
        }
        if text.chars().any(is_emoji) {
            with_emoji += 1;
        }
        for c in text.chars() {
            if c.is_alphabetic() {
                alpha_chars += 1;
                if c.is_uppercase() {
                    upper_chars += 1;
                }
            }
        }
    }

    let mean_len = (total_words as f32 / count / LEN_SCALE).min(1.0);
    let diversity = if total_words == 0 {
        0.0
    } else {
        unique_words.len() as f32 / total_words as f32
    };
    let uppercase = if alpha_chars == 0 {
        0.0
    } else {
        upper_chars as f32 / alpha_chars as f32
    };

    vec![
        score("mean_utterance_len", mean_len),
        score("lexical_diversity", diversity.min(1.0)),
        score("question_freq", question as f32 / count),
        score("exclamation_freq", exclamation as f32 / count),
        score("emoji_freq", with_emoji as f32 / count),
        score("uppercase_ratio", uppercase),
    ]
}

fn score(name: &str, value: f32) -> FeatureScore {
    FeatureScore {
        name: name.to_string(),
        value,
        text_derived: true,
    }
}

/// Median delay between an interlocutor turn and the authored
/// reply that follows it, normalized by LATENCY_SCALE.
fn latency_feature(corpus: &Corpus) -> f32 {
    let mut delays: Vec<i64> = Vec::new();

    let mut previous: Option<&crate::domain::message::CleanedUtterance> = None;
    for utterance in &corpus.utterances {
        if let Some(prev) = previous {
            if prev.thread_id == utterance.thread_id
                && utterance.sender == corpus.target_sender
                && prev.sender != corpus.target_sender
            {
                let delay = (utterance.timestamp - prev.timestamp).num_seconds();
                if delay >= 0 {
                    delays.push(delay);
                }
            }
        }
        previous = Some(utterance);
    }

    if delays.is_empty() {
        return 0.0;
    }
    delays.sort_unstable();
    let median = delays[delays.len() / 2] as f32;
    (median / LATENCY_SCALE).min(1.0)
}

fn is_emoji(c: char) -> bool {
    matches!(u32::from(c),
        0x1F300..=0x1F5FF | 0x1F600..=0x1F64F | 0x1F680..=0x1F6FF | 0x2600..=0x27BF | 0x2764
    )
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::CleanedUtterance;
    use chrono::TimeZone;

    fn utterance(sender: &str, turn: usize, offset_secs: i64, text: &str) -> CleanedUtterance {
        CleanedUtterance {
            source_message_ids: vec![turn as i64],
            sender: sender.to_string(),
            normalized_text: text.to_string(),
            turn_index: turn,
            thread_id: 1,
            timestamp: chrono::Utc.timestamp_opt(1_700_000_000 + offset_secs, 0).unwrap(),
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
    fn test_feature_values_are_bounded() {
        let c = corpus(vec![
            utterance("me", 0, 0, "WOW!! Amazing!!! 😂😂😂"),
            utterance("me", 1, 60, "really?! are you sure??"),
        ]);
        let profile = StyleProfiler::new().build(&c);
        for feature in &profile.features {
            assert!((0.0..=1.0).contains(&feature.value), "{} out of range", feature.name);
        }
    }

    #[test]
    fn test_question_and_exclamation_frequencies() {
        let c = corpus(vec![
            utterance("me", 0, 0, "how are you?"),
            utterance("me", 1, 60, "great!"),
            utterance("me", 2, 120, "see you tomorrow"),
        ]);
        let profile = StyleProfiler::new().build(&c);
        let q = profile.feature("question_freq").unwrap();
        let e = profile.feature("exclamation_freq").unwrap();
        assert!((q - 1.0 / 3.0).abs() < 1e-6);
        assert!((e - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_latency_from_reply_gaps() {
        let c = corpus(vec![
            utterance("anna", 0, 0, "hello there"),
            utterance("me", 1, 300, "hi"), // 300s reply delay
        ]);
        let profile = StyleProfiler::new().build(&c);
        let latency = profile.feature("response_latency").unwrap();
        assert!((latency - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_score_is_bounded_and_rewards_similarity() {
        let texts: Vec<CleanedUtterance> = (0..20)
            .map(|i| utterance("me", i, i as i64 * 60, "ok sounds good, see you soon"))
            .collect();
        let c = corpus(texts);
        let profiler = StyleProfiler::new();
        let profile = profiler.build(&c);

        let close = profiler.score(&profile, "ok sounds good, talk later");
        let far = profiler.score(&profile, "DEAR SIR!!! I AM WRITING TO INFORM YOU!!! ??? !!!");

        assert!((0.0..=1.0).contains(&close));
        assert!((0.0..=1.0).contains(&far));
        assert!(close > far);
    }

    #[test]
    fn test_build_is_deterministic() {
        let c = corpus(vec![
            utterance("me", 0, 0, "morning! coffee?"),
            utterance("me", 1, 60, "running late 😅"),
        ]);
        let profiler = StyleProfiler::new();
        let a = profiler.build(&c);
        let b = profiler.build(&c);
        assert_eq!(a.features, b.features);
        assert_eq!(a.sample_count, b.sample_count);
    }

    #[test]
    fn test_empty_corpus_profile_is_insufficient() {
        let profile = StyleProfiler::new().build(&corpus(vec![]));
        assert_eq!(profile.sample_count, 0);
        assert!(!profile.is_sufficient(1));
    }
}
