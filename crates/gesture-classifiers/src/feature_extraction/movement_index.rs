use std::collections::VecDeque;

use anyhow::Result;

use crate::feature_extraction::FeatureExtraction;
use crate::io::tokens::{FieldWriter, TokenReader};
use crate::preprocessing::{check_input, check_positive};

const FILE_HEADER: &str = "MOVEMENT_INDEX_FILE_V1.0";

/// Per-dimension root-mean-square deviation from the mean over a sliding
/// window. Output is only ready once the window is full.
#[derive(Debug, Clone)]
pub struct MovementIndex {
    buffer_length: usize,
    num_dimensions: usize,
    buffer: VecDeque<Vec<f64>>,
    feature: Vec<f64>,
}

impl Default for MovementIndex {
    fn default() -> Self {
        Self {
            buffer_length: 100,
            num_dimensions: 1,
            buffer: VecDeque::new(),
            feature: Vec::new(),
        }
    }
}

impl MovementIndex {
    pub fn new(buffer_length: usize, num_dimensions: usize) -> Result<Self> {
        check_positive("movement index buffer length", buffer_length)?;
        check_positive("movement index dimensionality", num_dimensions)?;
        Ok(Self {
            buffer_length,
            num_dimensions,
            buffer: VecDeque::new(),
            feature: Vec::new(),
        })
    }

    pub fn buffer_length(&self) -> usize {
        self.buffer_length
    }
}

impl FeatureExtraction for MovementIndex {
    fn type_name(&self) -> &'static str {
        "MovementIndex"
    }

    fn num_input_dimensions(&self) -> usize {
        self.num_dimensions
    }

    fn num_output_dimensions(&self) -> usize {
        self.num_dimensions
    }

    fn compute_features(&mut self, input: &[f64]) -> Result<()> {
        check_input(self.type_name(), self.num_dimensions, input)?;
        if self.buffer.len() == self.buffer_length {
            self.buffer.pop_front();
        }
        self.buffer.push_back(input.to_vec());
        if !self.feature_data_ready() {
            return Ok(());
        }

        let n = self.buffer.len() as f64;
        self.feature.clear();
        for d in 0..self.num_dimensions {
            let mu = self.buffer.iter().map(|row| row[d]).sum::<f64>() / n;
            let ss: f64 = self.buffer.iter().map(|row| (row[d] - mu) * (row[d] - mu)).sum();
            self.feature.push((ss / n).sqrt());
        }
        Ok(())
    }

    fn feature_vector(&self) -> &[f64] {
        &self.feature
    }

    fn feature_data_ready(&self) -> bool {
        self.buffer.len() == self.buffer_length
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.feature.clear();
    }

    fn save_settings(&self, w: &mut FieldWriter) -> Result<()> {
        w.line(FILE_HEADER)
            .field("NumInputDimensions:", self.num_dimensions)
            .field("BufferLength:", self.buffer_length);
        Ok(())
    }

    fn load_settings(&mut self, r: &mut TokenReader<'_>) -> Result<()> {
        r.expect(FILE_HEADER)?;
        let num_dimensions = r.field("NumInputDimensions:")?;
        let buffer_length = r.field("BufferLength:")?;
        *self = Self::new(buffer_length, num_dimensions)?;
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
    fn ready_only_after_the_window_fills() {
        let mut mi = MovementIndex::new(4, 1).unwrap();
        for x in [1.0, 3.0, 1.0] {
            mi.compute_features(&[x]).unwrap();
            assert!(!mi.feature_data_ready());
        }
        mi.compute_features(&[3.0]).unwrap();
        assert!(mi.feature_data_ready());
        assert!((mi.feature_vector()[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn still_input_has_zero_movement() {
        let mut mi = MovementIndex::new(3, 2).unwrap();
        for _ in 0..5 {
            mi.compute_features(&[2.0, -2.0]).unwrap();
        }
        assert_eq!(mi.feature_vector(), &[0.0, 0.0]);
    }
}
