//! Feature-extraction stages.
//!
//! A stage consumes one vector per call and exposes its latest feature
//! vector. Buffered stages may not have output yet; the pipeline drops those
//! samples. Stages that learn from data (quantizers) report
//! [`requires_fit`](FeatureExtraction::requires_fit) and are fitted by the
//! pipeline on the pre-processed training data.
use anyhow::Result;

use crate::io::tokens::{FieldWriter, TokenReader};
use crate::math::Array2;

pub mod kmeans_quantizer;
pub mod movement_index;

pub use kmeans_quantizer::KMeansQuantizer;
pub use movement_index::MovementIndex;

pub trait FeatureExtraction: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn num_input_dimensions(&self) -> usize;

    fn num_output_dimensions(&self) -> usize;

    fn compute_features(&mut self, input: &[f64]) -> Result<()>;

    /// Output of the last [`compute_features`](Self::compute_features) call.
    fn feature_vector(&self) -> &[f64];

    fn feature_data_ready(&self) -> bool {
        true
    }

    fn requires_fit(&self) -> bool {
        false
    }

    fn is_fitted(&self) -> bool {
        true
    }

    /// Learns the stage parameters from the rows of `data`.
    fn fit(&mut self, _data: &Array2<f64>) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self);

    fn save_settings(&self, w: &mut FieldWriter) -> Result<()>;

    fn load_settings(&mut self, r: &mut TokenReader<'_>) -> Result<()>;

    fn clone_box(&self) -> Box<dyn FeatureExtraction>;
}

impl Clone for Box<dyn FeatureExtraction> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl std::fmt::Debug for dyn FeatureExtraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.type_name())
            .field("num_input_dimensions", &self.num_input_dimensions())
            .field("num_output_dimensions", &self.num_output_dimensions())
            .finish()
    }
}
