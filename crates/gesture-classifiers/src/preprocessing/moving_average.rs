use std::collections::VecDeque;

use anyhow::Result;

use crate::io::tokens::{FieldWriter, TokenReader};
use crate::preprocessing::{check_input, check_positive, PreProcessing};

const FILE_HEADER: &str = "MOVING_AVERAGE_FILTER_FILE_V1.0";

/// Averages every dimension over the last `filter_size` inputs. Until the
/// window has filled, the average covers the inputs seen so far.
#[derive(Debug, Clone)]
pub struct MovingAverageFilter {
    filter_size: usize,
    num_dimensions: usize,
    buffer: VecDeque<Vec<f64>>,
}

impl Default for MovingAverageFilter {
    fn default() -> Self {
        Self {
            filter_size: 5,
            num_dimensions: 1,
            buffer: VecDeque::new(),
        }
    }
}

impl MovingAverageFilter {
    pub fn new(filter_size: usize, num_dimensions: usize) -> Result<Self> {
        check_positive("moving average filter size", filter_size)?;
        check_positive("moving average dimensionality", num_dimensions)?;
        Ok(Self {
            filter_size,
            num_dimensions,
            buffer: VecDeque::new(),
        })
    }

    pub fn filter_size(&self) -> usize {
        self.filter_size
    }

    pub(crate) fn filter(&mut self, input: &[f64]) -> Vec<f64> {
        if self.buffer.len() == self.filter_size {
            self.buffer.pop_front();
        }
        self.buffer.push_back(input.to_vec());
        let n = self.buffer.len() as f64;
        let mut out = vec![0.0; self.num_dimensions];
        for row in &self.buffer {
            for (o, v) in out.iter_mut().zip(row) {
                *o += v;
            }
        }
        out.iter_mut().for_each(|o| *o /= n);
        out
    }
}

impl PreProcessing for MovingAverageFilter {
    fn type_name(&self) -> &'static str {
        "MovingAverageFilter"
    }

    fn num_input_dimensions(&self) -> usize {
        self.num_dimensions
    }

    fn num_output_dimensions(&self) -> usize {
        self.num_dimensions
    }

    fn process(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        check_input(self.type_name(), self.num_dimensions, input)?;
        Ok(self.filter(input))
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }

    fn save_settings(&self, w: &mut FieldWriter) -> Result<()> {
        w.line(FILE_HEADER)
            .field("NumInputDimensions:", self.num_dimensions)
            .field("FilterSize:", self.filter_size);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_over_partial_then_full_window() {
        let mut f = MovingAverageFilter::new(3, 1).unwrap();
        assert_eq!(f.process(&[3.0]).unwrap(), vec![3.0]);
        assert_eq!(f.process(&[6.0]).unwrap(), vec![4.5]);
        assert_eq!(f.process(&[9.0]).unwrap(), vec![6.0]);
        assert_eq!(f.process(&[12.0]).unwrap(), vec![9.0]);
        f.reset();
        assert_eq!(f.process(&[1.0]).unwrap(), vec![1.0]);
    }

    #[test]
    fn wrong_dimensionality_is_rejected() {
        let mut f = MovingAverageFilter::new(3, 2).unwrap();
        assert!(f.process(&[1.0]).is_err());
        assert!(MovingAverageFilter::new(0, 2).is_err());
    }
}
