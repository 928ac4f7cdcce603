use anyhow::Result;

use crate::error::GestureError;
use crate::io::tokens::{FieldWriter, TokenReader};
use crate::preprocessing::{check_input, check_positive, PreProcessing};

const FILE_HEADER: &str = "DEAD_ZONE_FILE_V1.0";

/// Zeroes values strictly inside `(lower_limit, upper_limit)` and shifts
/// the rest towards zero by the nearest limit.
#[derive(Debug, Clone)]
pub struct DeadZone {
    lower_limit: f64,
    upper_limit: f64,
    num_dimensions: usize,
}

impl Default for DeadZone {
    fn default() -> Self {
        Self {
            lower_limit: -0.1,
            upper_limit: 0.1,
            num_dimensions: 1,
        }
    }
}

impl DeadZone {
    pub fn new(lower_limit: f64, upper_limit: f64, num_dimensions: usize) -> Result<Self> {
        check_positive("dead zone dimensionality", num_dimensions)?;
        if !(lower_limit < upper_limit) {
            return Err(GestureError::Configuration(format!(
                "dead zone lower limit {} must be below the upper limit {}",
                lower_limit, upper_limit
            ))
            .into());
        }
        Ok(Self {
            lower_limit,
            upper_limit,
            num_dimensions,
        })
    }

    pub fn limits(&self) -> (f64, f64) {
        (self.lower_limit, self.upper_limit)
    }
}

impl PreProcessing for DeadZone {
    fn type_name(&self) -> &'static str {
        "DeadZone"
    }

    fn num_input_dimensions(&self) -> usize {
        self.num_dimensions
    }

    fn num_output_dimensions(&self) -> usize {
        self.num_dimensions
    }

    fn process(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        check_input(self.type_name(), self.num_dimensions, input)?;
        Ok(input
            .iter()
            .map(|&x| {
                if x > self.lower_limit && x < self.upper_limit {
                    0.0
                } else if x >= self.upper_limit {
                    x - self.upper_limit
                } else {
                    x - self.lower_limit
                }
            })
            .collect())
    }

    fn reset(&mut self) {}

    fn save_settings(&self, w: &mut FieldWriter) -> Result<()> {
        w.line(FILE_HEADER)
            .field("NumInputDimensions:", self.num_dimensions)
            .field("LowerLimit:", self.lower_limit)
            .field("UpperLimit:", self.upper_limit);
        Ok(())
    }

    fn load_settings(&mut self, r: &mut TokenReader<'_>) -> Result<()> {
        r.expect(FILE_HEADER)?;
        let num_dimensions = r.field("NumInputDimensions:")?;
        let lower = r.field("LowerLimit:")?;
        let upper = r.field("UpperLimit:")?;
        *self = Self::new(lower, upper, num_dimensions)?;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn PreProcessing> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_small_values() {
        let mut dz = DeadZone::new(-1.0, 1.0, 3).unwrap();
        assert_eq!(dz.process(&[0.5, 3.0, -2.5]).unwrap(), vec![0.0, 2.0, -1.5]);
    }

    #[test]
    fn inverted_limits_are_rejected() {
        assert!(DeadZone::new(1.0, -1.0, 1).is_err());
    }
}
