//! Regressors: models mapping an input vector to a target vector.
use std::path::Path;

use anyhow::{Context, Result};

use crate::data::RegressionData;
use crate::io::tokens::{read_text_file, write_text_file, FieldWriter, TokenReader};

pub mod linear_regression;

pub use linear_regression::LinearRegression;

pub trait Regressor: Send + Sync {
    /// Stable tag used by the factory and in pipeline files.
    fn type_name(&self) -> &'static str;

    fn is_trained(&self) -> bool;

    fn num_input_dimensions(&self) -> usize;

    fn num_output_dimensions(&self) -> usize;

    fn train(&mut self, data: &RegressionData) -> Result<()>;

    fn predict(&mut self, input: &[f64]) -> Result<()>;

    /// Output of the last prediction.
    fn regression_data(&self) -> &[f64];

    /// Root-mean-square error on the training data of the last successful training.
    fn root_mean_squared_training_error(&self) -> f64;

    fn enable_scaling(&mut self, enable: bool);

    fn clear(&mut self);

    fn save_model(&self, w: &mut FieldWriter) -> Result<()>;

    fn load_model(&mut self, r: &mut TokenReader<'_>) -> Result<()>;

    fn clone_box(&self) -> Box<dyn Regressor>;

    fn save_to_file(&self, path: &Path) -> Result<()> {
        let mut w = FieldWriter::new();
        self.save_model(&mut w)?;
        write_text_file(path, w.as_str()).with_context(|| format!("Failed to save {} model", self.type_name()))
    }

    /// Loads a model file; on any failure the regressor is left cleared.
    fn load_from_file(&mut self, path: &Path) -> Result<()> {
        let loaded = read_text_file(path).and_then(|text| self.load_model(&mut TokenReader::new(&text)));
        if let Err(err) = loaded {
            self.clear();
            return Err(err.context(format!("Failed to load {} model from {}", self.type_name(), path.display())));
        }
        Ok(())
    }
}

impl Clone for Box<dyn Regressor> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl std::fmt::Debug for dyn Regressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.type_name())
            .field("trained", &self.is_trained())
            .field("num_input_dimensions", &self.num_input_dimensions())
            .finish()
    }
}
