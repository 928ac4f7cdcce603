use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::clustering::KMeans;
use crate::data::ClassificationData;
use crate::error::GestureError;
use crate::io::tokens::{FieldWriter, TokenReader};
use crate::models::classifier_trait::{Classifier, ClassifierCore};
use crate::stats::{euclidean_distance, ScoreDirection};

const FILE_HEADER: &str = "MINDIST_MODEL_FILE_V1.0";

/// Minimum-distance classifier: each class is summarised by a handful of
/// k-means centroids and an input is assigned to the class owning the
/// nearest centroid.
#[derive(Debug, Clone)]
pub struct MinDist {
    core: ClassifierCore,
    num_clusters: usize,
    seed: Option<u64>,
    /// Per class, in class-label order.
    models: Vec<KMeans>,
}

impl Default for MinDist {
    fn default() -> Self {
        Self {
            core: ClassifierCore::new(ScoreDirection::LowerIsBetter, -2.0),
            num_clusters: 10,
            seed: None,
            models: Vec::new(),
        }
    }
}

impl MinDist {
    pub fn new(num_clusters: usize) -> Result<Self> {
        let mut classifier = Self::default();
        classifier.set_num_clusters(num_clusters)?;
        Ok(classifier)
    }

    pub fn set_num_clusters(&mut self, num_clusters: usize) -> Result<()> {
        if num_clusters == 0 {
            return Err(GestureError::Configuration("MinDist needs at least one cluster per class".to_string()).into());
        }
        self.num_clusters = num_clusters;
        self.clear();
        Ok(())
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    pub fn class_models(&self) -> &[KMeans] {
        &self.models
    }

    fn nearest_centroid(model: &KMeans, x: &[f64]) -> f64 {
        model
            .centers()
            .map(|c| c.rows().map(|row| euclidean_distance(row, x)).fold(f64::INFINITY, f64::min))
            .unwrap_or(f64::INFINITY)
    }
}

impl Classifier for MinDist {
    fn type_name(&self) -> &'static str {
        "MinDist"
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
        let per_class: Vec<Vec<Vec<f64>>> = labels
            .iter()
            .map(|&label| data.class_data(label).iter().map(|s| self.core.scale_input(&s.data)).collect())
            .collect();

        let num_clusters = self.num_clusters;
        let seed = self.seed;
        let models = per_class
            .par_iter()
            .enumerate()
            .map(|(k, rows)| {
                let mut model = KMeans::new(num_clusters.min(rows.len()))?.with_seed(seed.map(|s| s.wrapping_add(k as u64)));
                let matrix = crate::math::Array2::from_rows(rows)?;
                model
                    .fit(&matrix)
                    .with_context(|| format!("Failed to cluster class {}", labels[k]))?;
                Ok(model)
            })
            .collect::<Result<Vec<_>>>()?;

        let scores: Vec<Vec<f64>> = models
            .iter()
            .zip(&per_class)
            .map(|(model, rows)| rows.iter().map(|x| Self::nearest_centroid(model, x)).collect())
            .collect();

        self.core.num_input_dimensions = data.num_dimensions();
        self.core.class_labels = labels;
        self.core.set_training_scores(&scores);
        self.core.trained = true;
        self.models = models;
        log::info!("Trained MinDist with {} classes", self.models.len());
        Ok(())
    }

    fn predict(&mut self, input: &[f64]) -> Result<()> {
        self.core.ensure_ready(input.len())?;
        let x = self.core.scale_input(input);
        let scores = self.models.iter().map(|m| Self::nearest_centroid(m, &x)).collect();
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
        w.field("NumClusters:", self.num_clusters);
        for (k, model) in self.models.iter().enumerate() {
            w.field("ClassModel_ID:", k + 1);
            model.save(w);
        }
        Ok(())
    }

    fn load_model(&mut self, r: &mut TokenReader<'_>) -> Result<()> {
        r.expect(FILE_HEADER)?;
        let core = self.core.load(r)?;
        let mut loaded = MinDist::new(r.field("NumClusters:")?)?;
        if core.trained {
            for k in 0..core.num_classes() {
                r.field::<usize>("ClassModel_ID:")?;
                let model = KMeans::load(r).with_context(|| format!("Failed to load class model {}", k + 1))?;
                if !model.is_trained() {
                    return Err(GestureError::Data(format!("class model {} is not trained", k + 1)).into());
                }
                loaded.models.push(model);
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
    use crate::data::NULL_CLASS_LABEL;

    fn blobs() -> ClassificationData {
        let mut data = ClassificationData::new(2);
        for i in 0..10 {
            let jitter = i as f64 * 0.01;
            data.add_sample(1, vec![jitter, -jitter]).unwrap();
            data.add_sample(2, vec![5.0 + jitter, 5.0 - jitter]).unwrap();
        }
        data
    }

    #[test]
    fn assigns_to_nearest_class() {
        let mut md = MinDist::new(3).unwrap().with_seed(Some(5));
        md.train(&blobs()).unwrap();
        md.predict(&[0.2, 0.1]).unwrap();
        assert_eq!(md.predicted_class_label(), 1);
        md.predict(&[4.8, 5.1]).unwrap();
        assert_eq!(md.predicted_class_label(), 2);
        assert!(md.class_distances()[1] < md.class_distances()[0]);
    }

    #[test]
    fn far_input_is_rejected() {
        let mut md = MinDist::new(2).unwrap().with_seed(Some(5));
        md.enable_null_rejection(true);
        md.train(&blobs()).unwrap();
        md.predict(&[100.0, -100.0]).unwrap();
        assert_eq!(md.predicted_class_label(), NULL_CLASS_LABEL);
    }

    #[test]
    fn untrained_predict_is_a_precondition_error() {
        let mut md = MinDist::default();
        let err = md.predict(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(crate::error::error_kind(&err), Some(GestureError::Precondition(_))));
    }
}
