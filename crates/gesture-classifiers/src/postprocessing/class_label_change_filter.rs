use anyhow::Result;

use crate::data::NULL_CLASS_LABEL;
use crate::io::tokens::{FieldWriter, TokenReader};
use crate::postprocessing::PostProcessing;

const FILE_HEADER: &str = "CLASS_LABEL_CHANGE_FILTER_FILE_V1.0";

/// Emits a label only when it differs from the previous one.
#[derive(Debug, Clone, Default)]
pub struct ClassLabelChangeFilter {
    filtered_class_label: u32,
    label_changed: bool,
}

impl ClassLabelChangeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label_changed(&self) -> bool {
        self.label_changed
    }
}

impl PostProcessing for ClassLabelChangeFilter {
    fn type_name(&self) -> &'static str {
        "ClassLabelChangeFilter"
    }

    fn process(&mut self, predicted_class_label: u32) -> Result<u32> {
        self.label_changed = predicted_class_label != self.filtered_class_label;
        if self.label_changed {
            self.filtered_class_label = predicted_class_label;
            return Ok(predicted_class_label);
        }
        Ok(NULL_CLASS_LABEL)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn save_settings(&self, w: &mut FieldWriter) -> Result<()> {
        w.line(FILE_HEADER);
        Ok(())
    }

    fn load_settings(&mut self, r: &mut TokenReader<'_>) -> Result<()> {
        r.expect(FILE_HEADER)?;
        *self = Self::default();
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
    fn emits_on_change_only() {
        let mut f = ClassLabelChangeFilter::new();
        let out: Vec<u32> = [1, 1, 2, 2, 0, 1].iter().map(|&l| f.process(l).unwrap()).collect();
        assert_eq!(out, vec![1, 0, 2, 0, 0, 1]);
    }
}
