//! In-memory labelled datasets.
//!
//! Classification data (static vectors and time series) shares one generic
//! implementation, `LabelledDataset`. Regression data pairs input vectors
//! with target vectors and has no class bookkeeping.
use rand::seq::SliceRandom;
use rand::Rng;

use crate::math::Array2;

pub mod class_tracker;
pub mod labelled;
pub mod regression;

pub use class_tracker::ClassTracker;
pub use labelled::{LabelledDataset, LabelledSample, SamplePayload};
pub use regression::{RegressionData, RegressionSample};

/// Reserved label meaning "no gesture" / rejected prediction.
pub const NULL_CLASS_LABEL: u32 = 0;

/// Labelled static feature vectors.
pub type ClassificationData = LabelledDataset<Vec<f64>>;

/// Labelled variable-length time series (rows are time steps).
pub type TimeSeriesClassificationData = LabelledDataset<Array2<f64>>;

/// Shuffles `0..n` and cuts it into `k` contiguous folds; the last fold
/// receives the remainder.
pub(crate) fn contiguous_folds<R: Rng + ?Sized>(n: usize, k: usize, rng: &mut R) -> Vec<Vec<usize>> {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    let per_fold = n / k;
    (0..k)
        .map(|fold| {
            let start = fold * per_fold;
            let end = if fold + 1 == k { n } else { start + per_fold };
            indices[start..end].to_vec()
        })
        .collect()
}
