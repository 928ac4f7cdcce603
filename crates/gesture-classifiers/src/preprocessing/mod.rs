//! Pre-processing stages: per-vector filters applied to raw input before
//! feature extraction.
//!
//! Every stage has a fixed input and output dimensionality and may keep
//! internal buffers, which [`PreProcessing::reset`] clears.
use anyhow::Result;

use crate::error::GestureError;
use crate::io::tokens::{FieldWriter, TokenReader};

pub mod dead_zone;
pub mod double_moving_average;
pub mod moving_average;

pub use dead_zone::DeadZone;
pub use double_moving_average::DoubleMovingAverageFilter;
pub use moving_average::MovingAverageFilter;

pub trait PreProcessing: Send + Sync {
    /// Stable tag used by the factory and in pipeline files.
    fn type_name(&self) -> &'static str;

    fn num_input_dimensions(&self) -> usize;

    fn num_output_dimensions(&self) -> usize;

    fn process(&mut self, input: &[f64]) -> Result<Vec<f64>>;

    fn reset(&mut self);

    fn save_settings(&self, w: &mut FieldWriter) -> Result<()>;

    /// Replaces the settings with the ones read from `r`; on failure the
    /// stage is left unchanged.
    fn load_settings(&mut self, r: &mut TokenReader<'_>) -> Result<()>;

    fn clone_box(&self) -> Box<dyn PreProcessing>;
}

impl Clone for Box<dyn PreProcessing> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl std::fmt::Debug for dyn PreProcessing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.type_name())
            .field("num_input_dimensions", &self.num_input_dimensions())
            .field("num_output_dimensions", &self.num_output_dimensions())
            .finish()
    }
}

/// Fails with a precondition error when `input` does not have `expected` values.
pub(crate) fn check_input(stage: &str, expected: usize, input: &[f64]) -> Result<()> {
    if input.len() != expected {
        return Err(GestureError::Precondition(format!(
            "{} expects {} input dimensions but got {}",
            stage,
            expected,
            input.len()
        ))
        .into());
    }
    Ok(())
}

pub(crate) fn check_positive(what: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(GestureError::Configuration(format!("{} must be greater than zero", what)).into());
    }
    Ok(())
}
