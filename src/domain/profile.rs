// ============================================================
// Layer 3 — StyleProfile Domain Type
// ============================================================
// The quantitative signature of one person's writing style.
//
// A profile is an ordered vector of named feature scores, all
// normalized to [0, 1]. It is used twice:
//   1. To condition fine-tuning (reported alongside the corpus)
//   2. To validate generated replies for style drift
//
// Features derived purely from text are flagged `text_derived`;
// only those participate in the drift distance, because a
// generated candidate has no timestamps to infer latency from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One named, normalized feature score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScore {
    pub name: String,

    /// Normalized score in [0, 1]
    pub value: f32,

    /// Whether the feature can be recomputed from text alone
    pub text_derived: bool,
}

/// The style signature built from a cleaned corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleProfile {
    /// Ordered feature scores — order is part of the profile's
    /// identity and must be stable across builds
    pub features: Vec<FeatureScore>,

    /// Number of utterances the profile was computed from
    pub sample_count: usize,

    pub built_at: DateTime<Utc>,
}

impl StyleProfile {
    /// A profile below the configured minimum sample count is
    /// insufficient and must not be used to condition training.
    pub fn is_sufficient(&self, min_samples: usize) -> bool {
        self.sample_count >= min_samples
    }

    /// Look up a feature score by name.
    pub fn feature(&self, name: &str) -> Option<f32> {
        self.features
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value)
    }

    /// The text-derived slice of the vector, in stable order.
    pub fn text_derived_features(&self) -> impl Iterator<Item = &FeatureScore> {
        self.features.iter().filter(|f| f.text_derived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(sample_count: usize) -> StyleProfile {
        StyleProfile {
            features: vec![
                FeatureScore { name: "mean_utterance_len".into(), value: 0.4, text_derived: true },
                FeatureScore { name: "response_latency".into(), value: 0.2, text_derived: false },
            ],
            sample_count,
            built_at: Utc::now(),
        }
    }

    #[test]
    fn test_sufficiency_threshold() {
        assert!(profile(50).is_sufficient(50));
        assert!(!profile(49).is_sufficient(50));
    }

    #[test]
    fn test_text_derived_filter_excludes_latency() {
        let p = profile(10);
        let names: Vec<&str> = p.text_derived_features().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["mean_utterance_len"]);
    }
}
