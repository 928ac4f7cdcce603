use std::path::Path;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};

use crate::data::class_tracker::UNNAMED_CLASS;
use crate::error::GestureError;
use crate::io::tokens::{read_text_file, write_text_file, FieldWriter, TokenReader};
use crate::stats::MinMax;

const FILE_HEADER: &str = "LABELLED_REGRESSION_DATA_FILE_V1.0";

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionSample {
    pub input: Vec<f64>,
    pub target: Vec<f64>,
}

/// Input/target vector pairs for training regressors.
#[derive(Debug, Clone)]
pub struct RegressionData {
    dataset_name: String,
    info_text: String,
    num_input_dimensions: usize,
    num_target_dimensions: usize,
    data: Vec<RegressionSample>,
    cross_validation_indexes: Option<Vec<Vec<usize>>>,
}

impl RegressionData {
    pub fn new(num_input_dimensions: usize, num_target_dimensions: usize) -> Self {
        Self {
            dataset_name: UNNAMED_CLASS.to_string(),
            info_text: String::new(),
            num_input_dimensions,
            num_target_dimensions,
            data: Vec::new(),
            cross_validation_indexes: None,
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.cross_validation_indexes = None;
    }

    pub fn add_sample(&mut self, input: Vec<f64>, target: Vec<f64>) -> Result<()> {
        if input.len() != self.num_input_dimensions || target.len() != self.num_target_dimensions {
            return Err(GestureError::Data(format!(
                "sample has {} inputs and {} targets, dataset expects {} and {}",
                input.len(),
                target.len(),
                self.num_input_dimensions,
                self.num_target_dimensions
            ))
            .into());
        }
        self.cross_validation_indexes = None;
        self.data.push(RegressionSample { input, target });
        Ok(())
    }

    fn subset(&self, indices: &[usize]) -> Self {
        Self {
            dataset_name: self.dataset_name.clone(),
            info_text: self.info_text.clone(),
            num_input_dimensions: self.num_input_dimensions,
            num_target_dimensions: self.num_target_dimensions,
            data: indices.iter().map(|&i| self.data[i].clone()).collect(),
            cross_validation_indexes: None,
        }
    }

    /// Keeps a random `train_percent` of the samples and returns the rest.
    pub fn partition(&mut self, train_percent: u32) -> Result<Self> {
        self.partition_with_rng(train_percent, &mut thread_rng())
    }

    pub fn partition_with_rng<R: Rng + ?Sized>(&mut self, train_percent: u32, rng: &mut R) -> Result<Self> {
        if train_percent > 100 {
            return Err(GestureError::Configuration(format!(
                "training percentage {} must be between 0 and 100",
                train_percent
            ))
            .into());
        }
        let mut indices: Vec<usize> = (0..self.data.len()).collect();
        indices.shuffle(rng);
        let num_train = indices.len() * train_percent as usize / 100;
        let test = self.subset(&indices[num_train..]);
        *self = self.subset(&indices[..num_train]);
        Ok(test)
    }

    pub fn split_into_k_folds(&mut self, k: usize) -> Result<()> {
        self.split_into_k_folds_with_rng(k, &mut thread_rng())
    }

    pub fn split_into_k_folds_with_rng<R: Rng + ?Sized>(&mut self, k: usize, rng: &mut R) -> Result<()> {
        if k < 2 {
            return Err(GestureError::Configuration(format!("K must be at least 2, got {}", k)).into());
        }
        if k > self.data.len() {
            return Err(GestureError::Precondition(format!(
                "K ({}) exceeds the number of samples ({})",
                k,
                self.data.len()
            ))
            .into());
        }
        self.cross_validation_indexes = Some(super::contiguous_folds(self.data.len(), k, rng));
        Ok(())
    }

    fn folds(&self, fold: usize) -> Result<&Vec<Vec<usize>>> {
        match self.cross_validation_indexes.as_ref() {
            Some(folds) if fold < folds.len() => Ok(folds),
            Some(folds) => Err(GestureError::Precondition(format!(
                "fold index {} is out of range for {} folds",
                fold,
                folds.len()
            ))
            .into()),
            None => Err(GestureError::Precondition(
                "split_into_k_folds must be called before requesting fold data".to_string(),
            )
            .into()),
        }
    }

    pub fn training_fold_data(&self, fold: usize) -> Result<Self> {
        let folds = self.folds(fold)?;
        let indices: Vec<usize> = folds
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != fold)
            .flat_map(|(_, f)| f.iter().copied())
            .collect();
        Ok(self.subset(&indices))
    }

    pub fn test_fold_data(&self, fold: usize) -> Result<Self> {
        let folds = self.folds(fold)?;
        Ok(self.subset(&folds[fold]))
    }

    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if other.num_input_dimensions != self.num_input_dimensions
            || other.num_target_dimensions != self.num_target_dimensions
        {
            return Err(GestureError::Data(
                "cannot merge regression datasets with different dimensionality".to_string(),
            )
            .into());
        }
        self.data.extend(other.data.iter().cloned());
        self.cross_validation_indexes = None;
        Ok(())
    }

    pub fn input_ranges(&self) -> Vec<MinMax> {
        let mut ranges = vec![MinMax::empty(); self.num_input_dimensions];
        for s in &self.data {
            for (r, &v) in ranges.iter_mut().zip(&s.input) {
                r.update(v);
            }
        }
        ranges
    }

    pub fn target_ranges(&self) -> Vec<MinMax> {
        let mut ranges = vec![MinMax::empty(); self.num_target_dimensions];
        for s in &self.data {
            for (r, &v) in ranges.iter_mut().zip(&s.target) {
                r.update(v);
            }
        }
        ranges
    }

    pub fn num_input_dimensions(&self) -> usize {
        self.num_input_dimensions
    }

    pub fn num_target_dimensions(&self) -> usize {
        self.num_target_dimensions
    }

    pub fn num_samples(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn samples(&self) -> &[RegressionSample] {
        &self.data
    }

    pub fn to_text(&self) -> String {
        let mut w = FieldWriter::new();
        w.line(FILE_HEADER)
            .field("DatasetName:", &self.dataset_name)
            .field("InfoText:", &self.info_text)
            .field("NumInputDimensions:", self.num_input_dimensions)
            .field("NumTargetDimensions:", self.num_target_dimensions)
            .field("TotalNumTrainingExamples:", self.data.len())
            .line("RegressionData:");
        for s in &self.data {
            let row: Vec<f64> = s.input.iter().chain(&s.target).copied().collect();
            w.vector(&row);
        }
        w.finish()
    }

    pub fn from_text(text: &str) -> Result<Self> {
        let mut r = TokenReader::new(text);
        r.expect(FILE_HEADER)?;
        let dataset_name = r.field::<String>("DatasetName:")?;
        r.expect("InfoText:")?;
        let info_text = r.text_until("NumInputDimensions:")?;
        let num_inputs = r.value::<usize>()?;
        let num_targets = r.field::<usize>("NumTargetDimensions:")?;
        let total = r.field::<usize>("TotalNumTrainingExamples:")?;
        r.expect("RegressionData:")?;

        let mut out = Self::new(num_inputs, num_targets);
        out.dataset_name = dataset_name;
        out.info_text = info_text;
        for i in 0..total {
            let input = r.vector::<f64>(num_inputs)?;
            let target = r
                .vector::<f64>(num_targets)
                .with_context(|| format!("Failed to read targets of sample {}", i))?;
            out.add_sample(input, target)?;
        }
        Ok(out)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_text_file(path, &self.to_text())
    }

    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        match read_text_file(path).and_then(|text| Self::from_text(&text)) {
            Ok(loaded) => {
                *self = loaded;
                Ok(())
            }
            Err(err) => {
                self.clear();
                Err(err.context(format!("Failed to load regression data from {}", path.display())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> RegressionData {
        let mut d = RegressionData::new(1, 1);
        for i in 0..n {
            let x = i as f64;
            d.add_sample(vec![x], vec![2.0 * x + 1.0]).unwrap();
        }
        d
    }

    #[test]
    fn partition_conserves_samples() {
        let mut d = line(10);
        let test = d.partition(70).unwrap();
        assert_eq!(d.num_samples(), 7);
        assert_eq!(test.num_samples(), 3);
    }

    #[test]
    fn folds_cover_every_sample_once() {
        let mut d = line(9);
        d.split_into_k_folds(4).unwrap();
        let mut seen: Vec<f64> = (0..4)
            .flat_map(|k| d.test_fold_data(k).unwrap().samples().iter().map(|s| s.input[0]).collect::<Vec<_>>())
            .collect();
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(seen, (0..9).map(|i| i as f64).collect::<Vec<_>>());
    }

    #[test]
    fn text_round_trip() {
        let d = line(3);
        let loaded = RegressionData::from_text(&d.to_text()).unwrap();
        assert_eq!(loaded.samples(), d.samples());
    }
}
