use anyhow::Result;

use crate::io::tokens::{FieldWriter, TokenReader};
use crate::preprocessing::{check_input, MovingAverageFilter, PreProcessing};

const FILE_HEADER: &str = "DOUBLE_MOVING_AVERAGE_FILTER_FILE_V1.0";

/// Low-pass filter that runs a moving average over a moving average and
/// corrects the lag of the first stage: `y = m1 + (m1 - m2)`.
#[derive(Debug, Clone, Default)]
pub struct DoubleMovingAverageFilter {
    first: MovingAverageFilter,
    second: MovingAverageFilter,
}

impl DoubleMovingAverageFilter {
    pub fn new(filter_size: usize, num_dimensions: usize) -> Result<Self> {
        Ok(Self {
            first: MovingAverageFilter::new(filter_size, num_dimensions)?,
            second: MovingAverageFilter::new(filter_size, num_dimensions)?,
        })
    }

    pub fn filter_size(&self) -> usize {
        self.first.filter_size()
    }
}

impl PreProcessing for DoubleMovingAverageFilter {
    fn type_name(&self) -> &'static str {
        "DoubleMovingAverageFilter"
    }

    fn num_input_dimensions(&self) -> usize {
        self.first.num_input_dimensions()
    }

    fn num_output_dimensions(&self) -> usize {
        self.first.num_output_dimensions()
    }

    fn process(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        check_input(self.type_name(), self.num_input_dimensions(), input)?;
        let m1 = self.first.filter(input);
        let m2 = self.second.filter(&m1);
        Ok(m1.iter().zip(&m2).map(|(a, b)| a + (a - b)).collect())
    }

    fn reset(&mut self) {
        self.first.reset();
        self.second.reset();
    }

    fn save_settings(&self, w: &mut FieldWriter) -> Result<()> {
        w.line(FILE_HEADER)
            .field("NumInputDimensions:", self.num_input_dimensions())
            .field("FilterSize:", self.filter_size());
        Ok(())
    }

    fn load_settings(&mut self, r: &mut TokenReader<'_>) -> Result<()> {
        r.expect(FILE_HEADER)?;
        let num_dimensions = r.field("NumInputDimensions:")?;
        let filter_size = r.field("FilterSize:")?;
        *self = Self::new(filter_size, num_dimensions)?;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn PreProcessing> {
        Box::new(self.clone())
    }
}
