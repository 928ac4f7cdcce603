//! Dense matrix type used throughout the crate.
//!
//! `Array2` is a small dependency-free row-major container. Row-stochastic
//! normalisation for probability matrices lives here so every model shares
//! one implementation.
pub mod matrix;

pub use matrix::{Array2, ShapeError};

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Deterministic generator when `seed` is given, otherwise seeded from entropy.
pub(crate) fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
