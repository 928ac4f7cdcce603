use serde::Serialize;

use crate::data::NULL_CLASS_LABEL;
use crate::error::GestureError;
use crate::math::Array2;

/// Outcome of one test sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub class_label: u32,
    pub predicted_class_label: u32,
    pub maximum_likelihood: f64,
}

/// Classification test report.
///
/// Per-class vectors follow `class_labels` (the model's classes, null label
/// excluded). The confusion matrix rows are true labels and columns are
/// predicted labels, in `confusion_labels` order, each row normalised to sum
/// to one (rows with no samples stay zero).
#[derive(Debug, Clone, Serialize)]
pub struct TestMetrics {
    /// Percentage of samples whose predicted label equals the true label.
    pub accuracy: f64,
    pub class_labels: Vec<u32>,
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub f_measure: Vec<f64>,
    /// Fraction of null predictions whose true label is null.
    pub rejection_precision: f64,
    /// Fraction of null-labelled samples that were predicted null.
    pub rejection_recall: f64,
    pub confusion_labels: Vec<u32>,
    #[serde(skip)]
    pub confusion_matrix: Array2<f64>,
    pub results: Vec<ClassificationResult>,
    pub test_time_ms: f64,
}

impl TestMetrics {
    /// Aggregates `results` against the model's `class_labels`. The null
    /// label gets its own confusion row and column when `include_null` or
    /// when any result carries it, so every sample lands in the matrix.
    pub fn from_results(class_labels: &[u32], include_null: bool, results: Vec<ClassificationResult>) -> Self {
        let include_null = include_null
            || results
                .iter()
                .any(|r| r.class_label == NULL_CLASS_LABEL || r.predicted_class_label == NULL_CLASS_LABEL);
        let mut confusion_labels = Vec::with_capacity(class_labels.len() + 1);
        if include_null {
            confusion_labels.push(NULL_CLASS_LABEL);
        }
        confusion_labels.extend_from_slice(class_labels);
        let index = |label: u32| confusion_labels.iter().position(|&l| l == label);

        let n = confusion_labels.len();
        let mut counts = Array2::<f64>::zeros(n, n);
        let mut correct = 0usize;
        for r in &results {
            if r.class_label == r.predicted_class_label {
                correct += 1;
            }
            if let (Some(t), Some(p)) = (index(r.class_label), index(r.predicted_class_label)) {
                counts[(t, p)] += 1.0;
            }
        }

        let mut precision = Vec::with_capacity(class_labels.len());
        let mut recall = Vec::with_capacity(class_labels.len());
        let mut f_measure = Vec::with_capacity(class_labels.len());
        for &label in class_labels {
            let k = index(label).unwrap_or(0);
            let tp = counts[(k, k)];
            let predicted: f64 = counts.column(k).iter().sum();
            let actual: f64 = counts.row(k).iter().sum();
            let p = ratio(tp, predicted);
            let r = ratio(tp, actual);
            precision.push(p);
            recall.push(r);
            f_measure.push(if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 });
        }

        let (rejection_precision, rejection_recall) = match index(NULL_CLASS_LABEL) {
            Some(z) => {
                let tp = counts[(z, z)];
                (ratio(tp, counts.column(z).iter().sum()), ratio(tp, counts.row(z).iter().sum()))
            }
            None => (0.0, 0.0),
        };

        let mut confusion_matrix = counts;
        for r in 0..n {
            let total: f64 = confusion_matrix.row(r).iter().sum();
            if total > 0.0 {
                confusion_matrix.row_mut(r).iter_mut().for_each(|v| *v /= total);
            }
        }

        Self {
            accuracy: if results.is_empty() {
                0.0
            } else {
                100.0 * correct as f64 / results.len() as f64
            },
            class_labels: class_labels.to_vec(),
            precision,
            recall,
            f_measure,
            rejection_precision,
            rejection_recall,
            confusion_labels,
            confusion_matrix,
            results,
            test_time_ms: 0.0,
        }
    }

    /// Precision of one class label.
    pub fn class_precision(&self, label: u32) -> Option<f64> {
        self.class_labels.iter().position(|&l| l == label).map(|i| self.precision[i])
    }

    pub fn class_recall(&self, label: u32) -> Option<f64> {
        self.class_labels.iter().position(|&l| l == label).map(|i| self.recall[i])
    }

    pub fn class_f_measure(&self, label: u32) -> Option<f64> {
        self.class_labels.iter().position(|&l| l == label).map(|i| self.f_measure[i])
    }

    /// Fraction of samples predicted as the null label.
    pub fn rejection_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        let rejected = self
            .results
            .iter()
            .filter(|r| r.predicted_class_label == NULL_CLASS_LABEL)
            .count();
        rejected as f64 / self.results.len() as f64
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Regression test report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegressionMetrics {
    /// Sum of squared errors over every output of every sample.
    pub sse: f64,
    /// `sqrt(sse / num_samples)`.
    pub rms_error: f64,
    pub test_time_ms: f64,
}

impl RegressionMetrics {
    pub fn from_errors(squared_errors: &[f64]) -> Result<Self, GestureError> {
        if squared_errors.is_empty() {
            return Err(GestureError::Data("no regression test samples".to_string()));
        }
        let sse: f64 = squared_errors.iter().sum();
        Ok(Self {
            sse,
            rms_error: (sse / squared_errors.len() as f64).sqrt(),
            test_time_ms: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(class_label: u32, predicted_class_label: u32) -> ClassificationResult {
        ClassificationResult {
            class_label,
            predicted_class_label,
            maximum_likelihood: 1.0,
        }
    }

    #[test]
    fn precision_recall_and_confusion() {
        let results = vec![result(1, 1), result(1, 2), result(2, 2), result(2, 2)];
        let m = TestMetrics::from_results(&[1, 2], false, results);
        assert_eq!(m.accuracy, 75.0);
        assert_eq!(m.class_precision(1), Some(1.0));
        assert_eq!(m.class_recall(1), Some(0.5));
        assert!((m.class_precision(2).unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(m.confusion_matrix.row(0), &[0.5, 0.5]);
        assert!(m.confusion_matrix.is_row_stochastic(1e-12));
    }

    #[test]
    fn rejection_metrics_use_the_null_column() {
        let results = vec![result(0, 0), result(0, 1), result(1, 0), result(1, 1)];
        let m = TestMetrics::from_results(&[1], true, results);
        assert_eq!(m.confusion_labels, vec![0, 1]);
        assert_eq!(m.rejection_precision, 0.5);
        assert_eq!(m.rejection_recall, 0.5);
        assert_eq!(m.rejection_rate(), 0.5);
    }

    #[test]
    fn null_predictions_add_a_null_column() {
        let results = vec![result(1, 1), result(1, 0), result(2, 2), result(2, 2)];
        let m = TestMetrics::from_results(&[1, 2], false, results);
        assert_eq!(m.confusion_labels, vec![0, 1, 2]);
        assert_eq!(m.class_recall(1), Some(0.5));
        assert_eq!(m.confusion_matrix.row(1), &[0.5, 0.5, 0.0]);
        assert_eq!(m.rejection_rate(), 0.25);
    }

    #[test]
    fn rms_from_squared_errors() {
        let m = RegressionMetrics::from_errors(&[4.0, 0.0]).unwrap();
        assert_eq!(m.sse, 4.0);
        assert!((m.rms_error - 2.0f64.sqrt()).abs() < 1e-12);
        assert!(RegressionMetrics::from_errors(&[]).is_err());
    }
}
