// ============================================================
// Layer 4 — Style Batcher
// ============================================================
// Implements Burn's Batcher trait to convert a Vec<StyleSample>
// into a tensor batch for the training loop.
//
// All samples are pre-padded to the same length, so batching is
// a flatten-then-reshape:
//   [s1_t1, ..., s1_tS, s2_t1, ..., sN_tS] → [N, S]
//
// Targets are not materialized here — next-token prediction
// derives them by shifting `input_ids` inside the loss.

use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::data::dataset::StyleSample;

/// A batch of samples ready for the model forward pass.
#[derive(Debug, Clone)]
pub struct StyleBatch<B: Backend> {
    /// Token id sequences — shape: [batch_size, seq_len]
    pub input_ids: Tensor<B, 2, Int>,
}

/// Holds the target device so tensors land on the right backend.
#[derive(Clone, Debug)]
pub struct StyleBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> StyleBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<StyleSample, StyleBatch<B>> for StyleBatcher<B> {
    fn batch(&self, items: Vec<StyleSample>) -> StyleBatch<B> {
        let batch_size = items.len();
        // All sequences are pre-padded to the same length
        let seq_len = items[0].input_ids.len();

        let input_flat: Vec<i32> = items
            .iter()
            .flat_map(|s| s.input_ids.iter().map(|&x| x as i32))
            .collect();

        let input_ids = Tensor::<B, 1, Int>::from_ints(input_flat.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);

        StyleBatch { input_ids }
    }
}
