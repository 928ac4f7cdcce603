use std::f64::consts::PI;

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::clustering::KMeans;
use crate::data::ClassificationData;
use crate::error::GestureError;
use crate::io::tokens::{FieldWriter, TokenReader};
use crate::math::Array2;
use crate::models::classifier_trait::{Classifier, ClassifierCore};
use crate::stats::ScoreDirection;

const FILE_HEADER: &str = "GMM_MODEL_FILE_V1.0";
const VARIANCE_FLOOR: f64 = 1.0e-6;

/// Diagonal-covariance Gaussian mixture.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianMixture {
    pub weights: Vec<f64>,
    pub means: Array2<f64>,
    pub variances: Array2<f64>,
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

impl GaussianMixture {
    pub fn num_components(&self) -> usize {
        self.weights.len()
    }

    fn component_log_densities(&self, x: &[f64]) -> Vec<f64> {
        (0..self.num_components())
            .map(|m| {
                let ll: f64 = x
                    .iter()
                    .zip(self.means.row(m))
                    .zip(self.variances.row(m))
                    .map(|((&xi, &mu), &var)| -0.5 * ((2.0 * PI * var).ln() + (xi - mu) * (xi - mu) / var))
                    .sum();
                self.weights[m].ln() + ll
            })
            .collect()
    }

    pub fn log_likelihood(&self, x: &[f64]) -> f64 {
        log_sum_exp(&self.component_log_densities(x))
    }

    /// Fits a mixture to the rows of `data` with EM, starting from a k-means
    /// clustering. Returns the mean per-row log-likelihood after each iteration.
    pub fn fit(
        data: &Array2<f64>,
        num_components: usize,
        max_iterations: usize,
        min_change: f64,
        seed: Option<u64>,
    ) -> Result<(Self, Vec<f64>)> {
        let (n, dims) = data.shape();
        let components = num_components.min(n).max(1);
        let mut kmeans = KMeans::new(components)?.with_seed(seed);
        kmeans.fit(data).context("Failed to initialise the mixture")?;

        let mut resp = Array2::zeros(n, components);
        for (i, row) in data.rows().enumerate() {
            resp[(i, kmeans.predict(row)?)] = 1.0;
        }
        let mut gmm = Self {
            weights: vec![1.0 / components as f64; components],
            means: Array2::zeros(components, dims),
            variances: Array2::zeros(components, dims),
        };
        gmm.maximise(data, &resp);

        let mut log = Vec::new();
        let mut last = f64::NEG_INFINITY;
        for iteration in 0..max_iterations {
            let mut total = 0.0;
            for (i, row) in data.rows().enumerate() {
                let dens = gmm.component_log_densities(row);
                let lse = log_sum_exp(&dens);
                total += lse;
                for (m, d) in dens.iter().enumerate() {
                    resp[(i, m)] = (d - lse).exp();
                }
            }
            let mean_ll = total / n as f64;
            if !mean_ll.is_finite() {
                return Err(GestureError::Numerical(format!(
                    "mixture log-likelihood became non-finite at iteration {}",
                    iteration
                ))
                .into());
            }
            log::trace!("GMM iteration {}: mean log-likelihood {:.6}", iteration, mean_ll);
            log.push(mean_ll);
            gmm.maximise(data, &resp);
            if (mean_ll - last).abs() < min_change {
                break;
            }
            last = mean_ll;
        }

        if !gmm.weights.iter().all(|w| w.is_finite()) || !gmm.means.all_finite() || !gmm.variances.all_finite() {
            return Err(GestureError::Numerical("mixture parameters are not finite".to_string()).into());
        }
        Ok((gmm, log))
    }

    fn maximise(&mut self, data: &Array2<f64>, resp: &Array2<f64>) {
        let (n, dims) = data.shape();
        for m in 0..self.num_components() {
            let nk: f64 = resp.column(m).iter().sum();
            if nk < 1.0e-12 {
                continue;
            }
            self.weights[m] = nk / n as f64;
            for d in 0..dims {
                let mu = (0..n).map(|i| resp[(i, m)] * data[(i, d)]).sum::<f64>() / nk;
                let var = (0..n)
                    .map(|i| resp[(i, m)] * (data[(i, d)] - mu) * (data[(i, d)] - mu))
                    .sum::<f64>()
                    / nk;
                self.means[(m, d)] = mu;
                self.variances[(m, d)] = var.max(VARIANCE_FLOOR);
            }
        }
        let total: f64 = self.weights.iter().sum();
        self.weights.iter_mut().for_each(|w| *w /= total);
    }
}

/// Gaussian mixture model classifier: one mixture per class, the class with
/// the highest log-likelihood wins.
#[derive(Debug, Clone)]
pub struct Gmm {
    core: ClassifierCore,
    num_mixture_models: usize,
    max_num_iterations: usize,
    min_change: f64,
    seed: Option<u64>,
    models: Vec<GaussianMixture>,
}

impl Default for Gmm {
    fn default() -> Self {
        Self {
            core: ClassifierCore::new(ScoreDirection::HigherIsBetter, -2.0),
            num_mixture_models: 2,
            max_num_iterations: 100,
            min_change: 1.0e-5,
            seed: None,
            models: Vec::new(),
        }
    }
}

impl Gmm {
    pub fn new(num_mixture_models: usize, max_num_iterations: usize, min_change: f64) -> Result<Self> {
        if num_mixture_models == 0 || max_num_iterations == 0 || !(min_change >= 0.0) {
            return Err(GestureError::Configuration(format!(
                "invalid GMM settings: {} mixtures, {} iterations, minimum change {}",
                num_mixture_models, max_num_iterations, min_change
            ))
            .into());
        }
        Ok(Self {
            num_mixture_models,
            max_num_iterations,
            min_change,
            ..Self::default()
        })
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn num_mixture_models(&self) -> usize {
        self.num_mixture_models
    }

    pub fn models(&self) -> &[GaussianMixture] {
        &self.models
    }
}

impl Classifier for Gmm {
    fn type_name(&self) -> &'static str {
        "GMM"
    }

    fn core(&self) -> &ClassifierCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ClassifierCore {
        &mut self.core
    }

    fn train(&mut self, data: &ClassificationData) -> Result<()> {
        self.clear();
        if data.is_empty() {
            return Err(GestureError::Data("training data is empty".to_string()).into());
        }
        if self.core.use_scaling {
            self.core.ranges = data.ranges();
        }

        let labels = data.class_labels();
        let per_class: Vec<Array2<f64>> = labels
            .iter()
            .map(|&label| {
                let rows: Vec<Vec<f64>> = data.class_data(label).iter().map(|s| self.core.scale_input(&s.data)).collect();
                Array2::from_rows(&rows)
            })
            .collect::<Result<_, _>>()?;

        let (components, iterations, min_change, seed) =
            (self.num_mixture_models, self.max_num_iterations, self.min_change, self.seed);
        let models = per_class
            .par_iter()
            .enumerate()
            .map(|(k, rows)| {
                let (gmm, log) = GaussianMixture::fit(rows, components, iterations, min_change, seed.map(|s| s.wrapping_add(k as u64)))
                    .with_context(|| format!("Failed to fit the mixture of class {}", labels[k]))?;
                log::debug!("GMM class {}: {} EM iterations", labels[k], log.len());
                Ok(gmm)
            })
            .collect::<Result<Vec<_>>>()?;

        let scores: Vec<Vec<f64>> = models
            .iter()
            .zip(&per_class)
            .map(|(gmm, rows)| rows.rows().map(|x| gmm.log_likelihood(x)).collect())
            .collect();

        self.core.num_input_dimensions = data.num_dimensions();
        self.core.class_labels = labels;
        self.core.set_training_scores(&scores);
        self.core.trained = true;
        self.models = models;
        log::info!("Trained GMM with {} classes", self.models.len());
        Ok(())
    }

    fn predict(&mut self, input: &[f64]) -> Result<()> {
        self.core.ensure_ready(input.len())?;
        let x = self.core.scale_input(input);
        let scores = self.models.iter().map(|m| m.log_likelihood(&x)).collect();
        self.core.decide_from_scores(scores);
        Ok(())
    }

    fn clear(&mut self) {
        self.core.clear();
        self.models.clear();
    }

    fn save_model(&self, w: &mut FieldWriter) -> Result<()> {
        w.line(FILE_HEADER);
        self.core.save(w);
        w.field("NumMixtureModels:", self.num_mixture_models)
            .field("MaxNumIterations:", self.max_num_iterations)
            .field("MinChange:", self.min_change);
        for (k, m) in self.models.iter().enumerate() {
            w.field("Model_ID:", k + 1)
                .field("NumComponents:", m.num_components())
                .line("Weights:")
                .vector(&m.weights)
                .line("Means:")
                .matrix(&m.means)
                .line("Variances:")
                .matrix(&m.variances);
        }
        Ok(())
    }

    fn load_model(&mut self, r: &mut TokenReader<'_>) -> Result<()> {
        r.expect(FILE_HEADER)?;
        let core = self.core.load(r)?;
        let mut loaded = Gmm::new(r.field("NumMixtureModels:")?, r.field("MaxNumIterations:")?, r.field("MinChange:")?)?;
        let dims = core.num_input_dimensions;
        if core.trained {
            for k in 0..core.num_classes() {
                r.field::<usize>("Model_ID:")
                    .with_context(|| format!("Failed to read mixture {}", k + 1))?;
                let c = r.field::<usize>("NumComponents:")?;
                r.expect("Weights:")?;
                let weights = r.vector::<f64>(c)?;
                r.expect("Means:")?;
                let means = r.matrix(c, dims)?;
                r.expect("Variances:")?;
                let variances = r.matrix(c, dims)?;
                if variances.as_slice().iter().any(|&v| !(v > 0.0)) {
                    return Err(GestureError::Numerical(format!("mixture {} has a non-positive variance", k + 1)).into());
                }
                loaded.models.push(GaussianMixture { weights, means, variances });
            }
        }
        loaded.core = core;
        loaded.seed = self.seed;
        *self = loaded;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Classifier> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> ClassificationData {
        let mut data = ClassificationData::new(1);
        for i in 0..15 {
            let jitter = (i as f64 - 7.0) * 0.05;
            data.add_sample(1, vec![jitter]).unwrap();
            data.add_sample(2, vec![3.0 + jitter]).unwrap();
        }
        data
    }

    #[test]
    fn em_log_likelihood_does_not_decrease() {
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![if i % 2 == 0 { i as f64 * 0.01 } else { 5.0 + i as f64 * 0.01 }]).collect();
        let data = Array2::from_rows(&rows).unwrap();
        let (gmm, log) = GaussianMixture::fit(&data, 2, 50, 1e-9, Some(4)).unwrap();
        assert!(log.windows(2).all(|w| w[1] >= w[0] - 1e-9));
        assert!((gmm.weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn classifies_by_mixture_likelihood() {
        let mut gmm = Gmm::new(2, 50, 1e-6).unwrap().with_seed(Some(2));
        gmm.train(&two_blobs()).unwrap();
        gmm.predict(&[0.1]).unwrap();
        assert_eq!(gmm.predicted_class_label(), 1);
        gmm.predict(&[2.9]).unwrap();
        assert_eq!(gmm.predicted_class_label(), 2);
        let total: f64 = gmm.class_likelihoods().iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_zero_mixtures() {
        assert!(Gmm::new(0, 10, 0.0).is_err());
    }
}
