use std::collections::VecDeque;

use anyhow::Result;

use crate::data::NULL_CLASS_LABEL;
use crate::error::GestureError;
use crate::io::tokens::{FieldWriter, TokenReader};
use crate::postprocessing::PostProcessing;

const FILE_HEADER: &str = "CLASS_LABEL_FILTER_FILE_V1.0";

/// Majority vote over the last `buffer_size` labels. The most frequent
/// non-null label is emitted only if it occurs at least
/// `minimum_count` times; otherwise the null label is emitted.
#[derive(Debug, Clone)]
pub struct ClassLabelFilter {
    minimum_count: usize,
    buffer_size: usize,
    buffer: VecDeque<u32>,
    filtered_class_label: u32,
}

impl Default for ClassLabelFilter {
    fn default() -> Self {
        Self {
            minimum_count: 1,
            buffer_size: 1,
            buffer: VecDeque::new(),
            filtered_class_label: NULL_CLASS_LABEL,
        }
    }
}

impl ClassLabelFilter {
    pub fn new(minimum_count: usize, buffer_size: usize) -> Result<Self> {
        if minimum_count == 0 || buffer_size == 0 || minimum_count > buffer_size {
            return Err(GestureError::Configuration(format!(
                "minimum count {} must be in [1, buffer size {}]",
                minimum_count, buffer_size
            ))
            .into());
        }
        Ok(Self {
            minimum_count,
            buffer_size,
            buffer: VecDeque::new(),
            filtered_class_label: NULL_CLASS_LABEL,
        })
    }

    pub fn filtered_class_label(&self) -> u32 {
        self.filtered_class_label
    }
}

impl PostProcessing for ClassLabelFilter {
    fn type_name(&self) -> &'static str {
        "ClassLabelFilter"
    }

    fn process(&mut self, predicted_class_label: u32) -> Result<u32> {
        if self.buffer.len() == self.buffer_size {
            self.buffer.pop_front();
        }
        self.buffer.push_back(predicted_class_label);

        let mut counts: Vec<(u32, usize)> = Vec::new();
        for &label in self.buffer.iter().filter(|&&l| l != NULL_CLASS_LABEL) {
            match counts.iter_mut().find(|(l, _)| *l == label) {
                Some((_, c)) => *c += 1,
                None => counts.push((label, 1)),
            }
        }
        let best = counts.iter().fold(None, |best: Option<(u32, usize)>, &(l, c)| match best {
            Some((_, bc)) if bc >= c => best,
            _ => Some((l, c)),
        });
        self.filtered_class_label = match best {
            Some((label, count)) if count >= self.minimum_count => label,
            _ => NULL_CLASS_LABEL,
        };
        Ok(self.filtered_class_label)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.filtered_class_label = NULL_CLASS_LABEL;
    }

    fn save_settings(&self, w: &mut FieldWriter) -> Result<()> {
        w.line(FILE_HEADER)
            .field("MinimumCount:", self.minimum_count)
            .field("BufferSize:", self.buffer_size);
        Ok(())
    }

    fn load_settings(&mut self, r: &mut TokenReader<'_>) -> Result<()> {
        r.expect(FILE_HEADER)?;
        let minimum_count = r.field("MinimumCount:")?;
        let buffer_size = r.field("BufferSize:")?;
        *self = Self::new(minimum_count, buffer_size)?;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn PostProcessing> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_minimum_agreement() {
        let mut f = ClassLabelFilter::new(3, 5).unwrap();
        assert_eq!(f.process(2).unwrap(), 0);
        assert_eq!(f.process(2).unwrap(), 0);
        assert_eq!(f.process(1).unwrap(), 0);
        assert_eq!(f.process(2).unwrap(), 2);
        for _ in 0..5 {
            f.process(0).unwrap();
        }
        assert_eq!(f.filtered_class_label(), 0);
    }

    #[test]
    fn minimum_count_cannot_exceed_buffer() {
        assert!(ClassLabelFilter::new(6, 5).is_err());
    }
}
