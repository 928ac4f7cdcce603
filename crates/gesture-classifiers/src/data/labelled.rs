//! Labelled datasets of static vectors or variable-length time series.
//!
//! `LabelledDataset` is generic over its payload so the partition, k-fold,
//! range and persistence logic is written once for both sample kinds.
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};

use crate::data::class_tracker::{self, ClassTracker, UNNAMED_CLASS};
use crate::data::NULL_CLASS_LABEL;
use crate::error::GestureError;
use crate::io::tokens::{read_text_file, write_text_file, FieldWriter, TokenReader};
use crate::math::Array2;
use crate::stats::{self, MinMax};

/// Payload carried by a labelled sample.
///
/// Values are stored row-major with one column per dimension, which lets
/// ranges and scaling walk `values()` without knowing the sample kind.
pub trait SamplePayload: Clone + fmt::Debug + Send + Sync {
    const FILE_HEADER: &'static str;
    const SAMPLES_KEY: &'static str;

    fn num_dimensions(&self) -> usize;
    fn values(&self) -> &[f64];
    fn values_mut(&mut self) -> &mut [f64];
    fn write_sample(&self, class_label: u32, w: &mut FieldWriter);
    fn read_sample(r: &mut TokenReader<'_>, num_dimensions: usize) -> Result<(u32, Self)>;
}

impl SamplePayload for Vec<f64> {
    const FILE_HEADER: &'static str = "LABELLED_CLASSIFICATION_DATA_FILE_V1.0";
    const SAMPLES_KEY: &'static str = "LabelledTrainingData:";

    fn num_dimensions(&self) -> usize {
        self.len()
    }

    fn values(&self) -> &[f64] {
        self
    }

    fn values_mut(&mut self) -> &mut [f64] {
        self
    }

    fn write_sample(&self, class_label: u32, w: &mut FieldWriter) {
        let mut row = Vec::with_capacity(self.len() + 1);
        row.push(class_label.to_string());
        row.extend(self.iter().map(|v| v.to_string()));
        w.vector(&row);
    }

    fn read_sample(r: &mut TokenReader<'_>, num_dimensions: usize) -> Result<(u32, Self)> {
        let label = r.value::<u32>()?;
        let values = r.vector::<f64>(num_dimensions)?;
        Ok((label, values))
    }
}

impl SamplePayload for Array2<f64> {
    const FILE_HEADER: &'static str = "LABELLED_TIME_SERIES_CLASSIFICATION_DATA_FILE_V1.0";
    const SAMPLES_KEY: &'static str = "LabelledTimeSeriesTrainingData:";

    fn num_dimensions(&self) -> usize {
        self.ncols()
    }

    fn values(&self) -> &[f64] {
        self.as_slice()
    }

    fn values_mut(&mut self) -> &mut [f64] {
        self.as_mut_slice()
    }

    fn write_sample(&self, class_label: u32, w: &mut FieldWriter) {
        w.line("************TIME_SERIES************")
            .field("ClassID:", class_label)
            .field("TimeSeriesLength:", self.nrows())
            .line("TimeSeriesData:")
            .matrix(self);
    }

    fn read_sample(r: &mut TokenReader<'_>, num_dimensions: usize) -> Result<(u32, Self)> {
        r.expect("************TIME_SERIES************")?;
        let label = r.field::<u32>("ClassID:")?;
        let length = r.field::<usize>("TimeSeriesLength:")?;
        r.expect("TimeSeriesData:")?;
        let series = r.matrix(length, num_dimensions)?;
        Ok((label, series))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelledSample<P> {
    pub class_label: u32,
    pub data: P,
}

#[derive(Debug, Clone)]
pub struct LabelledDataset<P> {
    dataset_name: String,
    info_text: String,
    num_dimensions: usize,
    allow_null_gesture_class: bool,
    use_external_ranges: bool,
    external_ranges: Vec<MinMax>,
    class_tracker: Vec<ClassTracker>,
    data: Vec<LabelledSample<P>>,
    cross_validation_indexes: Option<Vec<Vec<usize>>>,
}

impl<P: SamplePayload> LabelledDataset<P> {
    pub fn new(num_dimensions: usize) -> Self {
        Self {
            dataset_name: UNNAMED_CLASS.to_string(),
            info_text: String::new(),
            num_dimensions,
            allow_null_gesture_class: false,
            use_external_ranges: false,
            external_ranges: Vec::new(),
            class_tracker: Vec::new(),
            data: Vec::new(),
            cross_validation_indexes: None,
        }
    }

    /// Drops every sample and class entry; dimensionality and metadata are kept.
    pub fn clear(&mut self) {
        self.data.clear();
        self.class_tracker.clear();
        self.cross_validation_indexes = None;
    }

    /// Changes the dimensionality, which also clears every sample.
    pub fn set_num_dimensions(&mut self, num_dimensions: usize) {
        self.clear();
        self.num_dimensions = num_dimensions;
        self.use_external_ranges = false;
        self.external_ranges.clear();
    }

    pub fn set_dataset_name(&mut self, name: &str) -> Result<()> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(GestureError::Configuration(format!(
                "dataset name '{}' must be non-empty and contain no whitespace",
                name
            ))
            .into());
        }
        self.dataset_name = name.to_string();
        Ok(())
    }

    pub fn set_info_text(&mut self, text: &str) {
        self.info_text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    }

    pub fn set_allow_null_gesture_class(&mut self, allow: bool) {
        self.allow_null_gesture_class = allow;
    }

    pub fn set_class_name_for_label(&mut self, class_label: u32, name: &str) -> Result<()> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(GestureError::Configuration(format!(
                "class name '{}' must be non-empty and contain no whitespace",
                name
            ))
            .into());
        }
        match self.class_tracker.iter_mut().find(|t| t.class_label == class_label) {
            Some(entry) => {
                entry.class_name = name.to_string();
                Ok(())
            }
            None => Err(GestureError::Precondition(format!(
                "class label {} does not exist in the dataset",
                class_label
            ))
            .into()),
        }
    }

    /// Appends a sample.
    ///
    /// # Errors
    ///
    /// Fails when the payload dimensionality differs from the dataset's, when
    /// the payload is empty, or when `class_label` is the null label and
    /// null samples have not been enabled with
    /// [`set_allow_null_gesture_class`](Self::set_allow_null_gesture_class).
    pub fn add_sample(&mut self, class_label: u32, sample: P) -> Result<()> {
        if sample.num_dimensions() != self.num_dimensions {
            return Err(GestureError::Data(format!(
                "sample has {} dimensions but the dataset has {}",
                sample.num_dimensions(),
                self.num_dimensions
            ))
            .into());
        }
        if sample.values().is_empty() {
            return Err(GestureError::Data("cannot add an empty sample".to_string()).into());
        }
        if class_label == NULL_CLASS_LABEL && !self.allow_null_gesture_class {
            return Err(GestureError::Data(format!(
                "class label {} is reserved for the null gesture class",
                NULL_CLASS_LABEL
            ))
            .into());
        }

        self.cross_validation_indexes = None;
        class_tracker::increment(&mut self.class_tracker, class_label, None);
        self.data.push(LabelledSample {
            class_label,
            data: sample,
        });
        Ok(())
    }

    pub fn remove_last_sample(&mut self) -> Result<()> {
        let Some(last) = self.data.pop() else {
            return Err(GestureError::Precondition("dataset is empty".to_string()).into());
        };
        class_tracker::decrement(&mut self.class_tracker, last.class_label);
        self.cross_validation_indexes = None;
        Ok(())
    }

    /// Removes every sample with `class_label` and returns how many were removed.
    pub fn erase_all_samples_with_class_label(&mut self, class_label: u32) -> usize {
        let before = self.data.len();
        self.data.retain(|s| s.class_label != class_label);
        self.class_tracker.retain(|t| t.class_label != class_label);
        let removed = before - self.data.len();
        if removed > 0 {
            self.cross_validation_indexes = None;
        }
        removed
    }

    pub fn relabel_all_samples_with_class_label(&mut self, old_label: u32, new_label: u32) -> Result<()> {
        if new_label == NULL_CLASS_LABEL && !self.allow_null_gesture_class {
            return Err(GestureError::Data(format!(
                "cannot relabel to the reserved null label {}",
                NULL_CLASS_LABEL
            ))
            .into());
        }
        let Some(pos) = self.class_tracker.iter().position(|t| t.class_label == old_label) else {
            return Err(GestureError::Precondition(format!(
                "class label {} does not exist in the dataset",
                old_label
            ))
            .into());
        };
        if old_label == new_label {
            return Ok(());
        }

        let old = self.class_tracker.remove(pos);
        for sample in self.data.iter_mut().filter(|s| s.class_label == old_label) {
            sample.class_label = new_label;
        }
        match self
            .class_tracker
            .binary_search_by_key(&new_label, |t| t.class_label)
        {
            Ok(idx) => self.class_tracker[idx].counter += old.counter,
            Err(idx) => self
                .class_tracker
                .insert(idx, ClassTracker::new(new_label, old.counter, old.class_name)),
        }
        self.cross_validation_indexes = None;
        Ok(())
    }

    /// Uses fixed ranges instead of the data's own ranges for scaling.
    pub fn set_external_ranges(&mut self, ranges: Vec<MinMax>, use_external_ranges: bool) -> Result<()> {
        if ranges.len() != self.num_dimensions {
            return Err(GestureError::Configuration(format!(
                "expected {} external ranges but got {}",
                self.num_dimensions,
                ranges.len()
            ))
            .into());
        }
        self.external_ranges = ranges;
        self.use_external_ranges = use_external_ranges;
        Ok(())
    }

    pub fn enable_external_range_scaling(&mut self, enable: bool) -> Result<()> {
        if enable && self.external_ranges.len() != self.num_dimensions {
            return Err(GestureError::Precondition("external ranges have not been set".to_string()).into());
        }
        self.use_external_ranges = enable;
        Ok(())
    }

    /// Appends every sample of `other`. Class names missing here are taken from `other`.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if other.num_dimensions != self.num_dimensions {
            return Err(GestureError::Data(format!(
                "cannot merge a dataset with {} dimensions into one with {}",
                other.num_dimensions, self.num_dimensions
            ))
            .into());
        }
        if other.allow_null_gesture_class {
            self.allow_null_gesture_class = true;
        }
        for sample in &other.data {
            class_tracker::increment(&mut self.class_tracker, sample.class_label, None);
            self.data.push(sample.clone());
        }
        for entry in &other.class_tracker {
            if let Some(mine) = self
                .class_tracker
                .iter_mut()
                .find(|t| t.class_label == entry.class_label)
            {
                if mine.class_name == UNNAMED_CLASS {
                    mine.class_name = entry.class_name.clone();
                }
            }
        }
        self.cross_validation_indexes = None;
        Ok(())
    }

    /// Copy of the dataset holding only the samples at `indices`, in that order.
    fn subset(&self, indices: &[usize]) -> Self {
        let mut out = Self {
            dataset_name: self.dataset_name.clone(),
            info_text: self.info_text.clone(),
            num_dimensions: self.num_dimensions,
            allow_null_gesture_class: self.allow_null_gesture_class,
            use_external_ranges: self.use_external_ranges,
            external_ranges: self.external_ranges.clone(),
            class_tracker: Vec::new(),
            data: Vec::with_capacity(indices.len()),
            cross_validation_indexes: None,
        };
        for &i in indices {
            let sample = &self.data[i];
            let name = class_tracker::name_of(&self.class_tracker, sample.class_label);
            class_tracker::increment(&mut out.class_tracker, sample.class_label, name);
            out.data.push(sample.clone());
        }
        out
    }

    /// Indices of the samples of each class, in class-tracker order.
    fn indices_by_class(&self) -> Vec<Vec<usize>> {
        self.class_tracker
            .iter()
            .map(|t| {
                self.data
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.class_label == t.class_label)
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect()
    }

    /// Keeps a random `train_percent` of the samples and returns the rest.
    ///
    /// # Arguments
    ///
    /// * `train_percent` - Share of samples (0-100) retained in `self`.
    /// * `stratified` - Partition each class independently so the class
    ///   proportions are preserved on both sides.
    ///
    /// # Returns
    ///
    /// The held-out dataset. `self` is left holding the training part.
    pub fn partition(&mut self, train_percent: u32, stratified: bool) -> Result<Self> {
        self.partition_with_rng(train_percent, stratified, &mut thread_rng())
    }

    pub fn partition_with_rng<R: Rng + ?Sized>(
        &mut self,
        train_percent: u32,
        stratified: bool,
        rng: &mut R,
    ) -> Result<Self> {
        if train_percent > 100 {
            return Err(GestureError::Configuration(format!(
                "training percentage {} must be between 0 and 100",
                train_percent
            ))
            .into());
        }

        let groups = if stratified {
            self.indices_by_class()
        } else {
            vec![(0..self.data.len()).collect()]
        };

        let mut train_idx = Vec::new();
        let mut test_idx = Vec::new();
        for mut group in groups {
            group.shuffle(rng);
            let num_train = group.len() * train_percent as usize / 100;
            test_idx.extend_from_slice(&group[num_train..]);
            train_idx.extend_from_slice(&group[..num_train]);
        }

        log::debug!(
            "Partitioned {} samples into {} training and {} test samples (stratified: {})",
            self.data.len(),
            train_idx.len(),
            test_idx.len(),
            stratified
        );

        let test = self.subset(&test_idx);
        *self = self.subset(&train_idx);
        Ok(test)
    }

    /// Splits the sample indices into `k` folds for cross-validation.
    ///
    /// Stratified splits deal each class's shuffled samples round-robin over
    /// the folds; plain splits shuffle everything and cut contiguous folds,
    /// the last fold taking the remainder. On error the dataset is untouched.
    pub fn split_into_k_folds(&mut self, k: usize, stratified: bool) -> Result<()> {
        self.split_into_k_folds_with_rng(k, stratified, &mut thread_rng())
    }

    pub fn split_into_k_folds_with_rng<R: Rng + ?Sized>(
        &mut self,
        k: usize,
        stratified: bool,
        rng: &mut R,
    ) -> Result<()> {
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

        let folds = if stratified {
            let smallest = self.class_tracker.iter().map(|t| t.counter).min().unwrap_or(0);
            if k > smallest {
                return Err(GestureError::Precondition(format!(
                    "K ({}) exceeds the sample count of the smallest class ({})",
                    k, smallest
                ))
                .into());
            }
            let mut folds = vec![Vec::new(); k];
            let mut fold = 0;
            for mut group in self.indices_by_class() {
                group.shuffle(rng);
                for idx in group {
                    folds[fold].push(idx);
                    fold = (fold + 1) % k;
                }
            }
            folds
        } else {
            super::contiguous_folds(self.data.len(), k, rng)
        };

        self.cross_validation_indexes = Some(folds);
        Ok(())
    }

    pub fn num_folds(&self) -> Option<usize> {
        self.cross_validation_indexes.as_ref().map(|f| f.len())
    }

    fn fold_indices(&self, fold: usize) -> Result<&Vec<Vec<usize>>> {
        let Some(folds) = self.cross_validation_indexes.as_ref() else {
            return Err(GestureError::Precondition(
                "split_into_k_folds must be called before requesting fold data".to_string(),
            )
            .into());
        };
        if fold >= folds.len() {
            return Err(GestureError::Precondition(format!(
                "fold index {} is out of range for {} folds",
                fold,
                folds.len()
            ))
            .into());
        }
        Ok(folds)
    }

    /// Every fold except `fold`.
    pub fn training_fold_data(&self, fold: usize) -> Result<Self> {
        let folds = self.fold_indices(fold)?;
        let indices: Vec<usize> = folds
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != fold)
            .flat_map(|(_, f)| f.iter().copied())
            .collect();
        Ok(self.subset(&indices))
    }

    pub fn test_fold_data(&self, fold: usize) -> Result<Self> {
        let folds = self.fold_indices(fold)?;
        Ok(self.subset(&folds[fold]))
    }

    /// All samples carrying `class_label`.
    pub fn class_data(&self, class_label: u32) -> Self {
        let indices: Vec<usize> = self
            .data
            .iter()
            .enumerate()
            .filter(|(_, s)| s.class_label == class_label)
            .map(|(i, _)| i)
            .collect();
        self.subset(&indices)
    }

    /// Per-dimension value ranges, or the external ranges when enabled.
    pub fn ranges(&self) -> Vec<MinMax> {
        if self.use_external_ranges {
            return self.external_ranges.clone();
        }
        let dims = self.num_dimensions;
        let mut ranges = vec![MinMax::empty(); dims];
        for sample in &self.data {
            for (i, &v) in sample.data.values().iter().enumerate() {
                ranges[i % dims].update(v);
            }
        }
        ranges
    }

    /// Scales every dimension from its current range into `[min, max]`.
    pub fn scale(&mut self, min: f64, max: f64) -> Result<()> {
        let source = self.ranges();
        let target = vec![MinMax::new(min, max); self.num_dimensions];
        self.rescale(&source, &target)
    }

    /// Maps every dimension `d` from `source[d]` to `target[d]`.
    pub fn rescale(&mut self, source: &[MinMax], target: &[MinMax]) -> Result<()> {
        let dims = self.num_dimensions;
        if source.len() != dims || target.len() != dims {
            return Err(GestureError::Configuration(format!(
                "expected {} ranges, got {} source and {} target ranges",
                dims,
                source.len(),
                target.len()
            ))
            .into());
        }
        for sample in self.data.iter_mut() {
            for (i, v) in sample.data.values_mut().iter_mut().enumerate() {
                let (s, t) = (source[i % dims], target[i % dims]);
                *v = stats::scale(*v, s.min, s.max, t.min, t.max, false);
            }
        }
        Ok(())
    }

    /// Every row of every sample stacked into one matrix.
    pub fn all_rows(&self) -> Array2<f64> {
        let total: usize = self.data.iter().map(|s| s.data.values().len()).sum();
        let mut values = Vec::with_capacity(total);
        for sample in &self.data {
            values.extend_from_slice(sample.data.values());
        }
        let rows = if self.num_dimensions == 0 {
            0
        } else {
            total / self.num_dimensions
        };
        Array2::from_shape_vec((rows, self.num_dimensions), values).unwrap_or_else(|_| Array2::with_cols(self.num_dimensions))
    }

    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    pub fn info_text(&self) -> &str {
        &self.info_text
    }

    pub fn num_dimensions(&self) -> usize {
        self.num_dimensions
    }

    pub fn num_samples(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.class_tracker.len()
    }

    pub fn allow_null_gesture_class(&self) -> bool {
        self.allow_null_gesture_class
    }

    pub fn class_tracker(&self) -> &[ClassTracker] {
        &self.class_tracker
    }

    /// Class labels in ascending order.
    pub fn class_labels(&self) -> Vec<u32> {
        self.class_tracker.iter().map(|t| t.class_label).collect()
    }

    pub fn class_label_index(&self, class_label: u32) -> Option<usize> {
        self.class_tracker.iter().position(|t| t.class_label == class_label)
    }

    pub fn min_class_label(&self) -> Option<u32> {
        self.class_tracker.first().map(|t| t.class_label)
    }

    pub fn max_class_label(&self) -> Option<u32> {
        self.class_tracker.last().map(|t| t.class_label)
    }

    pub fn samples(&self) -> &[LabelledSample<P>] {
        &self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelledSample<P>> + '_ {
        self.data.iter()
    }

    pub fn log_summary(&self) {
        log::info!("----- Dataset Summary: {} -----", self.dataset_name);
        log::info!(
            "{} samples, {} dimensions, {} classes",
            self.data.len(),
            self.num_dimensions,
            self.class_tracker.len()
        );
        for t in &self.class_tracker {
            log::info!("class {} ({}): {} samples", t.class_label, t.class_name, t.counter);
        }
    }

    pub fn to_text(&self) -> String {
        let mut w = FieldWriter::new();
        w.line(P::FILE_HEADER)
            .field("DatasetName:", &self.dataset_name)
            .field("InfoText:", &self.info_text)
            .field("NumDimensions:", self.num_dimensions)
            .field("TotalNumTrainingExamples:", self.data.len())
            .field("NumberOfClasses:", self.class_tracker.len())
            .line("ClassIDsAndCounters:");
        for t in &self.class_tracker {
            w.vector(&[t.class_label.to_string(), t.counter.to_string(), t.class_name.clone()]);
        }
        w.flag("UseExternalRanges:", self.use_external_ranges);
        if self.use_external_ranges {
            w.line("ExternalRanges:");
            for r in &self.external_ranges {
                w.vector(&[r.min, r.max]);
            }
        }
        w.line(P::SAMPLES_KEY);
        for sample in &self.data {
            sample.data.write_sample(sample.class_label, &mut w);
        }
        w.finish()
    }

    pub fn from_text(text: &str) -> Result<Self> {
        let mut r = TokenReader::new(text);
        r.expect(P::FILE_HEADER)?;
        let dataset_name = r.field::<String>("DatasetName:")?;
        r.expect("InfoText:")?;
        let info_text = r.text_until("NumDimensions:")?;
        let num_dimensions = r.value::<usize>()?;
        let total = r.field::<usize>("TotalNumTrainingExamples:")?;
        let num_classes = r.field::<usize>("NumberOfClasses:")?;
        r.expect("ClassIDsAndCounters:")?;
        let mut declared = Vec::new();
        for _ in 0..num_classes {
            let label = r.value::<u32>()?;
            let counter = r.value::<usize>()?;
            let name = r.value::<String>()?;
            declared.push(ClassTracker::new(label, counter, name));
        }

        let mut out = Self::new(num_dimensions);
        out.dataset_name = dataset_name;
        out.info_text = info_text;
        out.allow_null_gesture_class = declared.iter().any(|t| t.class_label == NULL_CLASS_LABEL);

        if r.flag("UseExternalRanges:")? {
            r.expect("ExternalRanges:")?;
            let mut ranges = Vec::new();
            for _ in 0..num_dimensions {
                let min = r.value::<f64>()?;
                let max = r.value::<f64>()?;
                ranges.push(MinMax::new(min, max));
            }
            out.set_external_ranges(ranges, true)?;
        }

        r.expect(P::SAMPLES_KEY)?;
        for i in 0..total {
            let (label, sample) = P::read_sample(&mut r, num_dimensions)
                .with_context(|| format!("Failed to read sample {}", i))?;
            out.add_sample(label, sample)
                .with_context(|| format!("Failed to add sample {} (class {})", i, label))?;
        }

        let mut declared_sorted = declared.clone();
        declared_sorted.sort_by_key(|t| t.class_label);
        let counts: Vec<(u32, usize)> = out.class_tracker.iter().map(|t| (t.class_label, t.counter)).collect();
        let expected: Vec<(u32, usize)> = declared_sorted.iter().map(|t| (t.class_label, t.counter)).collect();
        if counts != expected {
            return Err(GestureError::Data(format!(
                "class counters {:?} do not match the samples read {:?}",
                expected, counts
            ))
            .into());
        }
        for t in declared_sorted {
            if let Some(entry) = out.class_tracker.iter_mut().find(|e| e.class_label == t.class_label) {
                entry.class_name = t.class_name;
            }
        }
        Ok(out)
    }

    pub fn save_to_file<Q: AsRef<Path>>(&self, path: Q) -> Result<()> {
        write_text_file(&path, &self.to_text())
            .with_context(|| format!("Failed to save dataset {}", self.dataset_name))
    }

    /// Replaces the contents with the dataset stored at `path`. On failure
    /// the dataset is left empty.
    pub fn load_from_file<Q: AsRef<Path>>(&mut self, path: Q) -> Result<()> {
        let path = path.as_ref();
        let parsed = read_text_file(path).and_then(|text| Self::from_text(&text));
        match parsed {
            Ok(loaded) => {
                *self = loaded;
                Ok(())
            }
            Err(err) => {
                self.clear();
                Err(err.context(format!("Failed to load dataset from {}", path.display())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ClassificationData, TimeSeriesClassificationData};
    use crate::error::error_kind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn labelled(counts: &[(u32, usize)]) -> ClassificationData {
        let mut d = ClassificationData::new(2);
        let mut id = 0.0;
        for &(label, n) in counts {
            for _ in 0..n {
                d.add_sample(label, vec![id, label as f64]).unwrap();
                id += 1.0;
            }
        }
        d
    }

    #[test]
    fn tracker_counts_follow_mutations() {
        let mut d = labelled(&[(1, 3), (2, 2)]);
        d.remove_last_sample().unwrap();
        assert_eq!(d.class_tracker()[1].counter, 1);
        d.relabel_all_samples_with_class_label(2, 1).unwrap();
        assert_eq!(d.class_labels(), vec![1]);
        assert_eq!(d.class_tracker()[0].counter, 4);
        assert_eq!(d.erase_all_samples_with_class_label(1), 4);
        assert!(d.is_empty());
        assert_eq!(d.num_classes(), 0);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut d = ClassificationData::new(2);
        let err = d.add_sample(1, vec![1.0]).unwrap_err();
        assert!(matches!(error_kind(&err), Some(GestureError::Data(_))));
        assert!(d.is_empty());
    }

    #[test]
    fn k_fold_rejects_k_below_two() {
        let mut d = labelled(&[(1, 4)]);
        assert!(d.split_into_k_folds(1, false).is_err());
        assert!(d.split_into_k_folds(0, false).is_err());
        assert!(d.training_fold_data(0).is_err());
    }

    #[test]
    fn non_stratified_last_fold_takes_remainder() {
        let mut d = labelled(&[(1, 7)]);
        let mut rng = StdRng::seed_from_u64(3);
        d.split_into_k_folds_with_rng(3, false, &mut rng).unwrap();
        let sizes: Vec<usize> = (0..3).map(|k| d.test_fold_data(k).unwrap().num_samples()).collect();
        assert_eq!(sizes, vec![2, 2, 3]);
    }

    #[test]
    fn info_text_and_names_survive_text_round_trip() {
        let mut d = labelled(&[(1, 2), (3, 1)]);
        d.set_dataset_name("waves").unwrap();
        d.set_info_text("two hand   gestures");
        d.set_class_name_for_label(3, "circle").unwrap();
        let loaded = ClassificationData::from_text(&d.to_text()).unwrap();
        assert_eq!(loaded.dataset_name(), "waves");
        assert_eq!(loaded.info_text(), "two hand gestures");
        assert_eq!(loaded.class_tracker(), d.class_tracker());
        assert_eq!(loaded.samples(), d.samples());
    }

    #[test]
    fn time_series_counter_mismatch_fails_to_load() {
        let mut d = TimeSeriesClassificationData::new(1);
        d.add_sample(1, Array2::from_shape_vec((2, 1), vec![0.0, 1.0]).unwrap()).unwrap();
        let text = d.to_text().replacen("1\t1\tNOT_SET", "1\t2\tNOT_SET", 1);
        assert!(TimeSeriesClassificationData::from_text(&text).is_err());
    }
}
