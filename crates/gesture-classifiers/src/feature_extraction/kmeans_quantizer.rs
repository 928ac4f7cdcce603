use anyhow::{Context, Result};

use crate::clustering::KMeans;
use crate::error::GestureError;
use crate::feature_extraction::FeatureExtraction;
use crate::io::tokens::{FieldWriter, TokenReader};
use crate::math::Array2;
use crate::preprocessing::{check_input, check_positive};

const FILE_HEADER: &str = "KMEANS_QUANTIZER_FILE_V1.0";

/// Maps an N-dimensional vector to the index of its nearest k-means centre,
/// producing the symbol streams discrete HMMs consume.
#[derive(Debug, Clone)]
pub struct KMeansQuantizer {
    num_dimensions: usize,
    kmeans: KMeans,
    feature: Vec<f64>,
    distances: Vec<f64>,
}

impl Default for KMeansQuantizer {
    fn default() -> Self {
        Self {
            num_dimensions: 1,
            kmeans: KMeans::default(),
            feature: vec![0.0],
            distances: Vec::new(),
        }
    }
}

impl KMeansQuantizer {
    pub fn new(num_clusters: usize, num_dimensions: usize) -> Result<Self> {
        check_positive("quantizer dimensionality", num_dimensions)?;
        Ok(Self {
            num_dimensions,
            kmeans: KMeans::new(num_clusters)?,
            ..Self::default()
        })
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.kmeans.seed = seed;
        self
    }

    /// Number of distinct symbols the quantizer emits.
    pub fn num_clusters(&self) -> usize {
        self.kmeans.num_clusters
    }

    pub fn quantize(&mut self, input: &[f64]) -> Result<usize> {
        check_input(self.type_name(), self.num_dimensions, input)?;
        if input.iter().any(|v| !v.is_finite()) {
            return Err(GestureError::Data(format!("{} cannot quantize a non-finite input", self.type_name())).into());
        }
        let distances = self.kmeans.distances(input).context("Quantizer is not trained")?;
        let symbol = crate::stats::arg_min(&distances)
            .ok_or_else(|| GestureError::Numerical("no finite distance to any cluster centre".to_string()))?;
        self.distances = distances;
        self.feature = vec![symbol as f64];
        Ok(symbol)
    }

    /// Squared distances to every centre from the last quantized vector.
    pub fn quantization_distances(&self) -> &[f64] {
        &self.distances
    }
}

impl FeatureExtraction for KMeansQuantizer {
    fn type_name(&self) -> &'static str {
        "KMeansQuantizer"
    }

    fn num_input_dimensions(&self) -> usize {
        self.num_dimensions
    }

    fn num_output_dimensions(&self) -> usize {
        1
    }

    fn compute_features(&mut self, input: &[f64]) -> Result<()> {
        self.quantize(input).map(|_| ())
    }

    fn feature_vector(&self) -> &[f64] {
        &self.feature
    }

    fn requires_fit(&self) -> bool {
        true
    }

    fn is_fitted(&self) -> bool {
        self.kmeans.is_trained()
    }

    fn fit(&mut self, data: &Array2<f64>) -> Result<()> {
        if data.ncols() != self.num_dimensions {
            return Err(GestureError::Data(format!(
                "quantizer expects {} dimensions but the training data has {}",
                self.num_dimensions,
                data.ncols()
            ))
            .into());
        }
        self.kmeans.fit(data).context("Failed to train the quantizer")?;
        log::info!(
            "Trained k-means quantizer with {} clusters on {} vectors",
            self.kmeans.num_clusters,
            data.nrows()
        );
        Ok(())
    }

    fn reset(&mut self) {
        self.feature = vec![0.0];
        self.distances.clear();
    }

    fn save_settings(&self, w: &mut FieldWriter) -> Result<()> {
        w.line(FILE_HEADER).field("NumInputDimensions:", self.num_dimensions);
        self.kmeans.save(w);
        Ok(())
    }

    fn load_settings(&mut self, r: &mut TokenReader<'_>) -> Result<()> {
        r.expect(FILE_HEADER)?;
        let num_dimensions = r.field::<usize>("NumInputDimensions:")?;
        check_positive("quantizer dimensionality", num_dimensions)?;
        let mut kmeans = KMeans::load(r)?;
        if kmeans.centers().is_some_and(|c| c.ncols() != num_dimensions) {
            return Err(GestureError::Data("quantizer clusters do not match its dimensionality".to_string()).into());
        }
        kmeans.seed = self.kmeans.seed;
        *self = Self {
            num_dimensions,
            kmeans,
            ..Self::default()
        };
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn FeatureExtraction> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_cluster_symbols() {
        let rows: Vec<Vec<f64>> = (0..30).map(|i| vec![(i % 3) as f64 * 10.0, 0.0]).collect();
        let data = Array2::from_rows(&rows).unwrap();
        let mut q = KMeansQuantizer::new(3, 2).unwrap().with_seed(Some(1));
        assert!(!q.is_fitted());
        q.fit(&data).unwrap();
        let a = q.quantize(&[0.1, 0.0]).unwrap();
        let b = q.quantize(&[19.8, 0.0]).unwrap();
        assert_ne!(a, b);
        assert!(a < 3 && b < 3);
        assert_eq!(q.feature_vector(), &[b as f64]);
    }

    #[test]
    fn non_finite_inputs_are_not_given_a_symbol() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![(i % 2) as f64 * 10.0]).collect();
        let mut q = KMeansQuantizer::new(2, 1).unwrap().with_seed(Some(4));
        q.fit(&Array2::from_rows(&rows).unwrap()).unwrap();
        let symbol = q.quantize(&[9.9]).unwrap();

        for bad in [f64::NAN, f64::INFINITY] {
            let err = q.quantize(&[bad]).unwrap_err();
            assert!(matches!(crate::error::error_kind(&err), Some(GestureError::Data(_))));
        }
        assert_eq!(q.feature_vector(), &[symbol as f64]);
    }

    #[test]
    fn untrained_quantizer_fails() {
        let mut q = KMeansQuantizer::new(4, 1).unwrap();
        assert!(q.compute_features(&[0.5]).is_err());
    }
}
