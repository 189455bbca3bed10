// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Shuffles samples with a fixed seed and splits them into a
// training set and a validation set.
//
// The seed comes from configuration so a resumed run sees the
// exact same split as the original run — without it, resuming
// from a checkpoint would validate against different data and
// the early-stopping signal would be noise.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Shuffle `samples` with `seed` and split into (train, validation).
///
/// `train_fraction` is the proportion kept for training, e.g.
/// 0.8 = 80%. The split index is clamped so tiny datasets never
/// panic.
pub fn split_train_val<T>(
    mut samples: Vec<T>,
    train_fraction: f64,
    seed: u64,
) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total = samples.len();
    let split_at = ((total as f64) * train_fraction).round() as usize;
    let split_at = split_at.min(total);

    let val = samples.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} validation",
        samples.len(),
        val.len()
    );

    (samples, val)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_split_sizes() {
        let items: Vec<usize> = (0..100).collect();
        let (train, val) = split_train_val(items, 0.8, 42);
        assert_eq!(train.len(), 80);
        assert_eq!(val.len(), 20);
    }

    #[test]
    fn test_all_items_preserved() {
        let items: Vec<usize> = (0..50).collect();
        let (train, val) = split_train_val(items, 0.7, 42);
        assert_eq!(train.len() + val.len(), 50);
    }

    #[test]
    fn test_same_seed_same_split() {
        let items: Vec<usize> = (0..64).collect();
        let (train_a, val_a) = split_train_val(items.clone(), 0.8, 7);
        let (train_b, val_b) = split_train_val(items, 0.8, 7);
        assert_eq!(train_a, train_b);
        assert_eq!(val_a, val_b);
    }

    #[test]
    fn test_different_seed_different_order() {
        let items: Vec<usize> = (0..64).collect();
        let (train_a, _) = split_train_val(items.clone(), 0.8, 7);
        let (train_b, _) = split_train_val(items, 0.8, 8);
        assert_ne!(train_a, train_b);
    }

    #[test]
    fn test_empty_dataset() {
        let items: Vec<usize> = Vec::new();
        let (train, val) = split_train_val(items, 0.8, 42);
        assert!(train.is_empty());
        assert!(val.is_empty());
    }
}
