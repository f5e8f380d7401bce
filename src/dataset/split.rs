//! Shuffled train/validation partitioning.

use rand::Rng;
use rand::seq::SliceRandom;

/// Share of shuffled examples that go to validation, as `numerator / denominator`.
const VALIDATION_RATIO: (usize, usize) = (3, 10);

/// Result of [`split`]; features and labels are index-aligned per partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Split<F, L> {
    pub validation_features: Vec<F>,
    pub training_features: Vec<F>,
    pub validation_labels: Vec<L>,
    pub training_labels: Vec<L>,
}

impl<F, L> Split<F, L> {
    pub fn validation_len(&self) -> usize {
        self.validation_features.len()
    }

    pub fn training_len(&self) -> usize {
        self.training_features.len()
    }
}

/// `floor(0.3 * n)`, computed exactly in integers.
pub fn validation_len(n: usize) -> usize {
    n / VALIDATION_RATIO.1 * VALIDATION_RATIO.0
        + n % VALIDATION_RATIO.1 * VALIDATION_RATIO.0 / VALIDATION_RATIO.1
}

/// Shuffle `pairs` with `rng` and cut off the first `floor(0.3 * n)` for validation.
///
/// Order inside each partition is the shuffled order. `n = 0` yields four
/// empty vectors; rejecting that is up to the caller.
pub fn split<F, L, R>(mut pairs: Vec<(F, L)>, rng: &mut R) -> Split<F, L>
where
    R: Rng + ?Sized,
{
    pairs.shuffle(rng);
    let cut = validation_len(pairs.len());
    let training = pairs.split_off(cut);
    let (validation_features, validation_labels) = pairs.into_iter().unzip();
    let (training_features, training_labels) = training.into_iter().unzip();
    Split {
        validation_features,
        training_features,
        validation_labels,
        training_labels,
    }
}
