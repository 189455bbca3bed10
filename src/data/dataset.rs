use anyhow::Result;
use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use crate::domain::message::TrainingExample;

// Special token ids, fixed by the tokenizer store's vocabulary.
pub const PAD_ID: u32 = 0;
pub const UNK_ID: u32 = 1;
pub const BOS_ID: u32 = 101;
pub const SEP_ID: u32 = 102;

/// One fully tokenized and padded training sample.
/// Sequence format: [CLS] context turns joined by [SEP] ... [SEP] target [SEP] [PAD]...
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleSample {
    pub input_ids: Vec<u32>,
}

pub struct StyleDataset {
    samples: Vec<StyleSample>,
}

impl StyleDataset {
    pub fn new(samples: Vec<StyleSample>) -> Self {
        Self { samples }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

impl Dataset<StyleSample> for StyleDataset {
    fn get(&self, index: usize) -> Option<StyleSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Tokenize training examples into padded next-token-prediction
/// samples. The target is never truncated; when the sequence runs
/// over `max_seq_len` the context is trimmed from its oldest side.
pub fn build_samples(
    examples: &[TrainingExample],
    tokenizer: &Tokenizer,
    max_seq_len: usize,
) -> Result<Vec<StyleSample>> {
    let mut samples = Vec::with_capacity(examples.len());

    for example in examples {
        let target_ids = encode(tokenizer, &example.target.normalized_text)?;
        // A target the vocabulary cannot represent at all teaches nothing
        if target_ids.is_empty() {
            continue;
        }

        // Tail of the sequence: [SEP] target [SEP]
        let mut tail = vec![SEP_ID];
        tail.extend_from_slice(&target_ids);
        tail.push(SEP_ID);
        if tail.len() + 1 > max_seq_len {
            // Degenerate over-long target; skip rather than truncate it
            continue;
        }

        // Context turns, oldest first, separated by [SEP]
        let mut context_ids: Vec<u32> = Vec::new();
        for (i, turn) in example.context.iter().enumerate() {
            if i > 0 {
                context_ids.push(SEP_ID);
            }
            context_ids.extend(encode(tokenizer, &turn.normalized_text)?);
        }

        // Trim the oldest context tokens to fit the budget
        let budget = max_seq_len - tail.len() - 1;
        if context_ids.len() > budget {
            context_ids.drain(..context_ids.len() - budget);
        }

        let mut input_ids = Vec::with_capacity(max_seq_len);
        input_ids.push(BOS_ID);
        input_ids.extend(context_ids);
        input_ids.extend(tail);
        while input_ids.len() < max_seq_len {
            input_ids.push(PAD_ID);
        }

        samples.push(StyleSample { input_ids });
    }

    Ok(samples)
}

fn encode(tokenizer: &Tokenizer, text: &str) -> Result<Vec<u32>> {
    let encoding = tokenizer
        .encode(text, false)
        .map_err(|e| anyhow::anyhow!("Tokenization error: {e}"))?;
    Ok(encoding.get_ids().to_vec())
}
