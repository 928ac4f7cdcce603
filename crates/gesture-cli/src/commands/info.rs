use std::path::Path;

use anyhow::Result;

use gesture_classifiers::stats::MinMax;

use crate::dataset::{load_dataset, Dataset};

/// Dataset statistics as printable text.
pub fn run_info<P: AsRef<Path>>(path: P) -> Result<String> {
    let dataset = load_dataset(&path)?;
    let mut out = format!(
        "File: {}\nKind: {}\nSamples: {}\n",
        path.as_ref().display(),
        dataset.kind(),
        dataset.num_samples()
    );
    match &dataset {
        Dataset::Static(d) => {
            out.push_str(&format!("Name: {}\nDimensions: {}\n", d.dataset_name(), d.num_dimensions()));
            push_classes(&mut out, d.class_tracker());
            push_ranges(&mut out, &d.ranges());
        }
        Dataset::TimeSeries(d) => {
            out.push_str(&format!("Name: {}\nDimensions: {}\n", d.dataset_name(), d.num_dimensions()));
            let lengths: Vec<usize> = d.iter().map(|s| s.data.nrows()).collect();
            if let (Some(min), Some(max)) = (lengths.iter().min(), lengths.iter().max()) {
                out.push_str(&format!("Series length: {} to {}\n", min, max));
            }
            push_classes(&mut out, d.class_tracker());
            push_ranges(&mut out, &d.ranges());
        }
        Dataset::Regression(d) => {
            out.push_str(&format!(
                "Input dimensions: {}\nTarget dimensions: {}\n",
                d.num_input_dimensions(),
                d.num_target_dimensions()
            ));
            push_ranges(&mut out, &d.input_ranges());
            out.push_str("Targets:\n");
            push_ranges(&mut out, &d.target_ranges());
        }
    }
    Ok(out)
}

fn push_classes(out: &mut String, classes: &[gesture_classifiers::data::ClassTracker]) {
    out.push_str(&format!("Classes: {}\n", classes.len()));
    for t in classes {
        out.push_str(&format!("  {}\t{}\t{} samples\n", t.class_label, t.class_name, t.counter));
    }
}

fn push_ranges(out: &mut String, ranges: &[MinMax]) {
    for (i, r) in ranges.iter().enumerate() {
        out.push_str(&format!("  dim {}: [{}, {}]\n", i, r.min, r.max));
    }
}
