//! Summary statistics, min-max scaling and null-rejection thresholds.
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Arithmetic mean; `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().mean()
}

/// Sample standard deviation; `0.0` when fewer than two values are given.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().std_dev()
}

/// Value range of one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMax {
    pub min: f64,
    pub max: f64,
}

impl MinMax {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// A range that any finite value will widen.
    pub fn empty() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn update(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Linearly maps `x` from `[src_min, src_max]` to `[tgt_min, tgt_max]`.
///
/// A degenerate source range maps everything to `tgt_min`. With `constrain`
/// the result is clamped to the target range.
pub fn scale(x: f64, src_min: f64, src_max: f64, tgt_min: f64, tgt_max: f64, constrain: bool) -> f64 {
    if src_min == src_max {
        return tgt_min;
    }
    let y = (x - src_min) * (tgt_max - tgt_min) / (src_max - src_min) + tgt_min;
    if constrain {
        let (lo, hi) = if tgt_min <= tgt_max {
            (tgt_min, tgt_max)
        } else {
            (tgt_max, tgt_min)
        };
        y.clamp(lo, hi)
    } else {
        y
    }
}

/// Orientation of a classifier score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreDirection {
    /// Log-likelihoods: larger (less negative) means a better fit.
    HigherIsBetter,
    /// Distances: smaller means a better fit.
    LowerIsBetter,
}

/// Per-class rejection threshold from the scores a class's own training
/// samples obtained under its model.
///
/// The coefficient is a strictness knob in standard deviations: the
/// threshold is `mean + coeff * std` for likelihoods and
/// `mean - coeff * std` for distances, so raising `coeff` always moves the
/// threshold towards the better end and never accepts more samples.
pub fn rejection_threshold(scores: &[f64], coeff: f64, direction: ScoreDirection) -> f64 {
    threshold_from_moments(mean(scores), std_dev(scores), coeff, direction)
}

/// Same as [`rejection_threshold`] from a precomputed mean and standard deviation.
pub fn threshold_from_moments(mu: f64, sigma: f64, coeff: f64, direction: ScoreDirection) -> f64 {
    match direction {
        ScoreDirection::HigherIsBetter => mu + coeff * sigma,
        ScoreDirection::LowerIsBetter => mu - coeff * sigma,
    }
}

/// Whether `score` clears `threshold` under the given orientation.
pub fn passes_threshold(score: f64, threshold: f64, direction: ScoreDirection) -> bool {
    match direction {
        ScoreDirection::HigherIsBetter => score >= threshold,
        ScoreDirection::LowerIsBetter => score <= threshold,
    }
}

/// Euclidean distance between two equally sized vectors.
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    squared_euclidean_distance(a, b).sqrt()
}

pub fn squared_euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of the first maximum; ties resolve to the lowest index.
pub fn arg_max(values: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some(b) if v <= values[b] => {}
            _ if v.is_nan() => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Index of the first minimum; ties resolve to the lowest index.
pub fn arg_min(values: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some(b) if v >= values[b] => {}
            _ if v.is_nan() => {}
            _ => best = Some(i),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_likelihood_threshold_matches_mean_at_zero_coeff() {
        // Negated mean absolute log-likelihood equals the plain mean.
        let ll = [-12.0, -10.0, -8.0];
        let t = rejection_threshold(&ll, 0.0, ScoreDirection::HigherIsBetter);
        let mean_abs = ll.iter().map(|v: &f64| v.abs()).sum::<f64>() / 3.0;
        assert!((t + mean_abs).abs() < 1e-12);
    }

    #[test]
    fn higher_likelihood_is_better() {
        let t = rejection_threshold(&[-12.0, -10.0, -8.0], 0.0, ScoreDirection::HigherIsBetter);
        assert!(passes_threshold(-5.0, t, ScoreDirection::HigherIsBetter));
        assert!(!passes_threshold(-20.0, t, ScoreDirection::HigherIsBetter));
    }

    #[test]
    fn larger_coefficient_is_stricter_for_both_directions() {
        let scores = [1.0, 2.0, 3.0, 4.0];
        let lenient = rejection_threshold(&scores, -1.0, ScoreDirection::LowerIsBetter);
        let strict = rejection_threshold(&scores, 1.0, ScoreDirection::LowerIsBetter);
        assert!(strict < lenient);

        let lenient = rejection_threshold(&scores, -1.0, ScoreDirection::HigherIsBetter);
        let strict = rejection_threshold(&scores, 1.0, ScoreDirection::HigherIsBetter);
        assert!(strict > lenient);
    }

    #[test]
    fn arg_max_prefers_first_on_ties() {
        assert_eq!(arg_max(&[1.0, 3.0, 3.0]), Some(1));
        assert_eq!(arg_min(&[2.0, 1.0, 1.0]), Some(1));
        assert_eq!(arg_max(&[]), None);
    }

    #[test]
    fn scale_and_back() {
        let y = scale(5.0, 0.0, 10.0, -1.0, 1.0, false);
        assert!((y - 0.0).abs() < 1e-12);
        assert!((scale(y, -1.0, 1.0, 0.0, 10.0, false) - 5.0).abs() < 1e-12);
        assert_eq!(scale(20.0, 0.0, 10.0, 0.0, 1.0, true), 1.0);
    }
}
