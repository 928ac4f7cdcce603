use serde::{Deserialize, Serialize};

/// Name written for classes that were never given one.
pub const UNNAMED_CLASS: &str = "NOT_SET";

/// Per-class bookkeeping kept in step with the samples of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassTracker {
    pub class_label: u32,
    pub counter: usize,
    pub class_name: String,
}

impl ClassTracker {
    pub fn new(class_label: u32, counter: usize, class_name: impl Into<String>) -> Self {
        Self {
            class_label,
            counter,
            class_name: class_name.into(),
        }
    }
}

/// Increments the counter for `class_label`, inserting a new entry (kept
/// sorted by label) when the label is new.
pub(crate) fn increment(tracker: &mut Vec<ClassTracker>, class_label: u32, class_name: Option<&str>) {
    match tracker.binary_search_by_key(&class_label, |t| t.class_label) {
        Ok(pos) => tracker[pos].counter += 1,
        Err(pos) => tracker.insert(
            pos,
            ClassTracker::new(class_label, 1, class_name.unwrap_or(UNNAMED_CLASS)),
        ),
    }
}

/// Decrements the counter for `class_label`, dropping the entry at zero.
pub(crate) fn decrement(tracker: &mut Vec<ClassTracker>, class_label: u32) {
    if let Ok(pos) = tracker.binary_search_by_key(&class_label, |t| t.class_label) {
        tracker[pos].counter -= 1;
        if tracker[pos].counter == 0 {
            tracker.remove(pos);
        }
    }
}

pub(crate) fn name_of(tracker: &[ClassTracker], class_label: u32) -> Option<&str> {
    tracker
        .iter()
        .find(|t| t.class_label == class_label)
        .map(|t| t.class_name.as_str())
}
