//! Loading any of the three dataset file kinds by their header line.
use std::path::Path;

use anyhow::{Context, Result};

use gesture_classifiers::data::{ClassificationData, RegressionData, TimeSeriesClassificationData};

const CLASSIFICATION_HEADER: &str = "LABELLED_CLASSIFICATION_DATA_FILE_V1.0";
const TIME_SERIES_HEADER: &str = "LABELLED_TIME_SERIES_CLASSIFICATION_DATA_FILE_V1.0";
const REGRESSION_HEADER: &str = "LABELLED_REGRESSION_DATA_FILE_V1.0";

#[derive(Debug, Clone)]
pub enum Dataset {
    Static(ClassificationData),
    TimeSeries(TimeSeriesClassificationData),
    Regression(RegressionData),
}

impl Dataset {
    pub fn kind(&self) -> &'static str {
        match self {
            Dataset::Static(_) => "classification",
            Dataset::TimeSeries(_) => "time-series classification",
            Dataset::Regression(_) => "regression",
        }
    }

    pub fn num_samples(&self) -> usize {
        match self {
            Dataset::Static(d) => d.num_samples(),
            Dataset::TimeSeries(d) => d.num_samples(),
            Dataset::Regression(d) => d.num_samples(),
        }
    }
}

pub fn load_dataset<P: AsRef<Path>>(path: P) -> Result<Dataset> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read dataset: {}", path.display()))?;
    let header = text.split_whitespace().next().unwrap_or_default();
    let dataset = match header {
        CLASSIFICATION_HEADER => Dataset::Static(ClassificationData::from_text(&text)?),
        TIME_SERIES_HEADER => Dataset::TimeSeries(TimeSeriesClassificationData::from_text(&text)?),
        REGRESSION_HEADER => Dataset::Regression(RegressionData::from_text(&text)?),
        other => anyhow::bail!("{} is not a dataset file (header '{}')", path.display(), other),
    };
    log::debug!("Loaded {} dataset with {} samples", dataset.kind(), dataset.num_samples());
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_selects_the_dataset_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reg.txt");
        let mut data = RegressionData::new(1, 1);
        data.add_sample(vec![0.5], vec![1.0]).unwrap();
        data.save_to_file(&path).unwrap();
        assert!(matches!(load_dataset(&path).unwrap(), Dataset::Regression(_)));

        std::fs::write(&path, "SOMETHING_ELSE 1 2").unwrap();
        assert!(load_dataset(&path).is_err());
    }
}
