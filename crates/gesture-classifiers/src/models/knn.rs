use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::data::{ClassificationData, LabelledSample};
use crate::error::GestureError;
use crate::io::tokens::{FieldWriter, TokenReader};
use crate::math::rng_from_seed;
use crate::models::classifier_trait::{Classifier, ClassifierCore};
use crate::stats::{self, arg_max, euclidean_distance, ScoreDirection};

const FILE_HEADER: &str = "KNN_MODEL_FILE_V1.0";

/// k-nearest-neighbour classifier.
///
/// The winner is the class with the most votes among the `k` closest
/// training samples; its likelihood is its share of the votes. The class
/// distances are the mean distance to each class's neighbours, which is also
/// the score compared against the rejection threshold.
#[derive(Debug, Clone)]
pub struct Knn {
    core: ClassifierCore,
    k: usize,
    search_for_best_k: bool,
    min_k: usize,
    max_k: usize,
    seed: Option<u64>,
    samples: Vec<LabelledSample<Vec<f64>>>,
}

impl Default for Knn {
    fn default() -> Self {
        Self {
            core: ClassifierCore::new(ScoreDirection::LowerIsBetter, -2.0),
            k: 10,
            search_for_best_k: false,
            min_k: 1,
            max_k: 10,
            seed: None,
            samples: Vec::new(),
        }
    }
}

struct Vote {
    winner: Option<usize>,
    likelihoods: Vec<f64>,
    distances: Vec<f64>,
}

impl Knn {
    pub fn new(k: usize) -> Result<Self> {
        let mut knn = Self::default();
        knn.set_k(k)?;
        Ok(knn)
    }

    pub fn set_k(&mut self, k: usize) -> Result<()> {
        if k == 0 {
            return Err(GestureError::Configuration("K must be at least 1".to_string()).into());
        }
        self.k = k;
        self.clear();
        Ok(())
    }

    /// Enables the search for the best K in `[min_k, max_k]` during training.
    pub fn set_best_k_search(&mut self, enable: bool, min_k: usize, max_k: usize) -> Result<()> {
        if min_k == 0 || max_k < min_k {
            return Err(GestureError::Configuration(format!("invalid K search range [{}, {}]", min_k, max_k)).into());
        }
        self.search_for_best_k = enable;
        self.min_k = min_k;
        self.max_k = max_k;
        self.clear();
        Ok(())
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn k(&self) -> usize {
        self.k
    }

    fn vote(samples: &[LabelledSample<Vec<f64>>], labels: &[u32], x: &[f64], k: usize, skip: Option<usize>) -> Vote {
        let mut neighbours: Vec<(f64, usize)> = samples
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != skip)
            .map(|(i, s)| (euclidean_distance(&s.data, x), i))
            .collect();
        let k = k.min(neighbours.len());
        if k == 0 {
            return Vote {
                winner: None,
                likelihoods: vec![0.0; labels.len()],
                distances: vec![f64::INFINITY; labels.len()],
            };
        }
        neighbours.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut votes = vec![0.0; labels.len()];
        let mut sums = vec![0.0; labels.len()];
        for &(d, i) in &neighbours[..k] {
            if let Some(c) = labels.iter().position(|&l| l == samples[i].class_label) {
                votes[c] += 1.0;
                sums[c] += d;
            }
        }
        let distances = votes
            .iter()
            .zip(&sums)
            .map(|(&v, &s)| if v > 0.0 { s / v } else { f64::INFINITY })
            .collect();
        Vote {
            winner: arg_max(&votes),
            likelihoods: votes.iter().map(|v| v / k as f64).collect(),
            distances,
        }
    }

    fn scaled_samples(&self, data: &ClassificationData) -> Vec<LabelledSample<Vec<f64>>> {
        data.iter()
            .map(|s| LabelledSample {
                class_label: s.class_label,
                data: self.core.scale_input(&s.data),
            })
            .collect()
    }

    /// Validation accuracy of every K in the search range on a stratified
    /// 80/20 split; the first K with the best accuracy wins.
    fn search_best_k(&self, data: &ClassificationData) -> Result<usize> {
        let mut train = data.clone();
        let mut rng = rng_from_seed(self.seed);
        let validation = train.partition_with_rng(80, true, &mut rng)?;
        if train.is_empty() || validation.is_empty() {
            return Err(GestureError::Data("not enough samples to search for the best K".to_string()).into());
        }
        let train_samples = self.scaled_samples(&train);
        let validation_samples = self.scaled_samples(&validation);
        let labels = data.class_labels();

        let accuracies: Vec<f64> = (self.min_k..=self.max_k)
            .into_par_iter()
            .map(|k| {
                let correct = validation_samples
                    .iter()
                    .filter(|s| {
                        Self::vote(&train_samples, &labels, &s.data, k, None)
                            .winner
                            .is_some_and(|w| labels[w] == s.class_label)
                    })
                    .count();
                correct as f64 / validation_samples.len() as f64
            })
            .collect();
        log::debug!("KNN validation accuracy for K in [{}, {}]: {:?}", self.min_k, self.max_k, accuracies);
        let best = arg_max(&accuracies).unwrap_or(0);
        Ok(self.min_k + best)
    }
}

impl Classifier for Knn {
    fn type_name(&self) -> &'static str {
        "KNN"
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
        if self.search_for_best_k {
            self.k = self.search_best_k(data).context("Failed to search for the best K")?;
            log::info!("KNN selected K = {}", self.k);
        }

        let labels = data.class_labels();
        let samples = self.scaled_samples(data);
        let k = self.k;
        let scores: Vec<Vec<f64>> = labels
            .par_iter()
            .map(|&label| {
                let own: Vec<LabelledSample<Vec<f64>>> =
                    samples.iter().filter(|s| s.class_label == label).cloned().collect();
                (0..own.len())
                    .filter_map(|i| {
                        let vote = Self::vote(&own, &[label], &own[i].data, k, Some(i));
                        vote.distances.first().copied().filter(|d| d.is_finite())
                    })
                    .collect()
            })
            .collect();
        for (label, s) in labels.iter().zip(&scores) {
            log::debug!("KNN class {}: mean in-class neighbour distance {:.4}", label, stats::mean(s));
        }

        self.core.num_input_dimensions = data.num_dimensions();
        self.core.class_labels = labels;
        self.core.set_training_scores(&scores);
        self.core.trained = true;
        self.samples = samples;
        Ok(())
    }

    fn predict(&mut self, input: &[f64]) -> Result<()> {
        self.core.ensure_ready(input.len())?;
        let x = self.core.scale_input(input);
        let vote = Self::vote(&self.samples, &self.core.class_labels, &x, self.k, None);
        match vote.winner {
            Some(winner) => self.core.decide(winner, vote.likelihoods, vote.distances),
            None => self.core.decide_from_scores(vote.distances),
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.core.clear();
        self.samples.clear();
    }

    fn save_model(&self, w: &mut FieldWriter) -> Result<()> {
        w.line(FILE_HEADER);
        self.core.save(w);
        w.field("K:", self.k)
            .flag("SearchForBestK:", self.search_for_best_k)
            .field("MinK:", self.min_k)
            .field("MaxK:", self.max_k);
        if self.core.trained {
            w.field("NumTrainingSamples:", self.samples.len()).line("TrainingData:");
            for s in &self.samples {
                let mut row = vec![s.class_label.to_string()];
                row.extend(s.data.iter().map(f64::to_string));
                w.vector(&row);
            }
        }
        Ok(())
    }

    fn load_model(&mut self, r: &mut TokenReader<'_>) -> Result<()> {
        r.expect(FILE_HEADER)?;
        let core = self.core.load(r)?;
        let mut loaded = Knn::new(r.field("K:")?)?;
        let search = r.flag("SearchForBestK:")?;
        loaded.set_best_k_search(search, r.field("MinK:")?, r.field("MaxK:")?)?;
        if core.trained {
            let n = r.field::<usize>("NumTrainingSamples:")?;
            r.expect("TrainingData:")?;
            for _ in 0..n {
                let class_label = r.value::<u32>()?;
                let data = r.vector::<f64>(core.num_input_dimensions)?;
                loaded.samples.push(LabelledSample { class_label, data });
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

    fn rings() -> ClassificationData {
        let mut data = ClassificationData::new(2);
        for i in 0..20 {
            let angle = i as f64 * std::f64::consts::PI / 10.0;
            data.add_sample(1, vec![angle.cos(), angle.sin()]).unwrap();
            data.add_sample(2, vec![4.0 * angle.cos(), 4.0 * angle.sin()]).unwrap();
        }
        data
    }

    #[test]
    fn votes_give_likelihood_shares() {
        let mut knn = Knn::new(5).unwrap();
        knn.train(&rings()).unwrap();
        knn.predict(&[1.1, 0.0]).unwrap();
        assert_eq!(knn.predicted_class_label(), 1);
        assert_eq!(knn.maximum_likelihood(), 1.0);
        assert!(knn.class_distances()[1].is_infinite());
    }

    #[test]
    fn best_k_stays_in_range() {
        let mut knn = Knn::default().with_seed(Some(9));
        knn.set_best_k_search(true, 2, 6).unwrap();
        knn.train(&rings()).unwrap();
        assert!((2..=6).contains(&knn.k()));
        knn.predict(&[0.0, -3.9]).unwrap();
        assert_eq!(knn.predicted_class_label(), 2);
    }

    #[test]
    fn invalid_k_is_rejected() {
        assert!(Knn::new(0).is_err());
        assert!(Knn::default().set_best_k_search(true, 5, 2).is_err());
    }
}
