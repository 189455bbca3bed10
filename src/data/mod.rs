// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from a raw chat export to tensor batches.
//
// The pipeline flows in this order:
//
//   chat export (JSON)
//       │
//       ▼
//   JsonExportSource  → parses records, fails hard on bad input
//       │
//       ▼
//   CorpusBuilder     → merges, normalizes, dedupes utterances
//       │
//       ▼
//   ExampleBuilder    → (context turns, target) training pairs
//       │
//       ▼
//   StyleDataset      → tokenized samples behind Burn's Dataset
//       │
//       ▼
//   StyleBatcher      → stacks samples into Int tensor batches
//
// Each module is responsible for exactly one step.

/// Parses per-dialog JSON exports into RawMessages
pub mod export;

/// Merges, normalizes, and dedupes messages into a corpus
pub mod corpus;

/// Builds supervised (context, target) training examples
pub mod examples;

/// Tokenized samples behind Burn's Dataset trait
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Shuffles and splits samples into train/validation sets
pub mod splitter;
