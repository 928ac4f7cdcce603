//! Post-processing stages that smooth or debounce the stream of predicted
//! class labels.
use anyhow::Result;

use crate::io::tokens::{FieldWriter, TokenReader};

pub mod class_label_change_filter;
pub mod class_label_filter;
pub mod class_label_timeout_filter;

pub use class_label_change_filter::ClassLabelChangeFilter;
pub use class_label_filter::ClassLabelFilter;
pub use class_label_timeout_filter::{ClassLabelTimeoutFilter, TimeoutFilterMode};

pub trait PostProcessing: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Label filters consume and emit a single class label.
    fn num_input_dimensions(&self) -> usize {
        1
    }

    fn num_output_dimensions(&self) -> usize {
        1
    }

    /// Filters the next predicted label; the null label means "nothing to report".
    fn process(&mut self, predicted_class_label: u32) -> Result<u32>;

    fn reset(&mut self);

    fn save_settings(&self, w: &mut FieldWriter) -> Result<()>;

    fn load_settings(&mut self, r: &mut TokenReader<'_>) -> Result<()>;

    fn clone_box(&self) -> Box<dyn PostProcessing>;
}

impl Clone for Box<dyn PostProcessing> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl std::fmt::Debug for dyn PostProcessing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.type_name()).finish()
    }
}
