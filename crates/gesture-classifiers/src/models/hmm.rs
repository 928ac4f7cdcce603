use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::data::TimeSeriesClassificationData;
use crate::error::GestureError;
use crate::io::tokens::{FieldWriter, TokenReader};
use crate::math::Array2;
use crate::models::classifier_trait::{Classifier, ClassifierCore};
use crate::models::hidden_markov_model::{validate_topology, HiddenMarkovModel, HmmModelType};
use crate::stats::ScoreDirection;

const FILE_HEADER: &str = "HMM_MODEL_FILE_V2.0";

/// Sequence classifier holding one discrete HMM per class.
///
/// Inputs are one-dimensional series of integer symbols, typically the
/// output of a `KMeansQuantizer`. The winning class is the one whose model
/// gives the highest log-likelihood; `class_distances` holds those
/// log-likelihoods.
#[derive(Debug, Clone)]
pub struct Hmm {
    core: ClassifierCore,
    num_states: usize,
    num_symbols: usize,
    model_type: HmmModelType,
    delta: usize,
    max_num_epochs: usize,
    min_change: f64,
    seed: Option<u64>,
    models: Vec<HiddenMarkovModel>,
}

impl Default for Hmm {
    fn default() -> Self {
        Self {
            core: ClassifierCore::new(ScoreDirection::HigherIsBetter, 0.0),
            num_states: 5,
            num_symbols: 10,
            model_type: HmmModelType::LeftRight,
            delta: 1,
            max_num_epochs: 100,
            min_change: 1.0e-5,
            seed: None,
            models: Vec::new(),
        }
    }
}

impl Hmm {
    pub fn new(num_states: usize, num_symbols: usize, model_type: HmmModelType, delta: usize) -> Result<Self> {
        let mut hmm = Self::default();
        hmm.set_topology(num_states, num_symbols, model_type, delta)?;
        Ok(hmm)
    }

    /// Changes the per-class model topology. Rejected values leave the
    /// classifier unchanged; accepted values clear any trained models.
    pub fn set_topology(
        &mut self,
        num_states: usize,
        num_symbols: usize,
        model_type: HmmModelType,
        delta: usize,
    ) -> Result<()> {
        validate_topology(num_states, num_symbols, model_type, delta)?;
        self.num_states = num_states;
        self.num_symbols = num_symbols;
        self.model_type = model_type;
        self.delta = delta;
        self.clear();
        Ok(())
    }

    pub fn set_training_limits(&mut self, max_num_epochs: usize, min_change: f64) -> Result<()> {
        if max_num_epochs == 0 || !(min_change >= 0.0) {
            return Err(GestureError::Configuration(format!(
                "invalid training limits: {} epochs, minimum change {}",
                max_num_epochs, min_change
            ))
            .into());
        }
        self.max_num_epochs = max_num_epochs;
        self.min_change = min_change;
        Ok(())
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    pub fn num_symbols(&self) -> usize {
        self.num_symbols
    }

    pub fn model_type(&self) -> HmmModelType {
        self.model_type
    }

    pub fn delta(&self) -> usize {
        self.delta
    }

    /// Trained per-class models, in class-label order.
    pub fn models(&self) -> &[HiddenMarkovModel] {
        &self.models
    }

    fn to_symbol(&self, value: f64) -> Result<usize> {
        if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value >= self.num_symbols as f64 {
            return Err(GestureError::Data(format!(
                "value {} is not a symbol in [0, {})",
                value, self.num_symbols
            ))
            .into());
        }
        Ok(value as usize)
    }

    fn to_symbols(&self, series: &Array2<f64>) -> Result<Vec<usize>> {
        series
            .as_slice()
            .iter()
            .enumerate()
            .map(|(t, &v)| self.to_symbol(v).with_context(|| format!("at time step {}", t)))
            .collect()
    }

    /// Log-likelihood of `sequence` under every class model.
    pub fn log_likelihoods(&self, sequence: &[usize]) -> Result<Vec<f64>> {
        self.core.ensure_trained()?;
        self.models.iter().map(|m| m.predict_sequence(sequence)).collect()
    }
}

impl Classifier for Hmm {
    fn type_name(&self) -> &'static str {
        "HMM"
    }

    fn core(&self) -> &ClassifierCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ClassifierCore {
        &mut self.core
    }

    fn is_timeseries_classifier(&self) -> bool {
        true
    }

    fn train_timeseries(&mut self, data: &TimeSeriesClassificationData) -> Result<()> {
        self.clear();
        if data.is_empty() {
            return Err(GestureError::Data("training data is empty".to_string()).into());
        }
        if data.num_dimensions() != 1 {
            return Err(GestureError::Data(format!(
                "discrete HMMs need one symbol per time step but the data has {} dimensions",
                data.num_dimensions()
            ))
            .into());
        }

        let labels = data.class_labels();
        let mut sequences: Vec<Vec<Vec<usize>>> = vec![Vec::new(); labels.len()];
        for (i, sample) in data.iter().enumerate() {
            let seq = self.to_symbols(&sample.data).with_context(|| {
                format!("Sample {} of class {} is not a valid symbol sequence", i, sample.class_label)
            })?;
            if let Some(idx) = data.class_label_index(sample.class_label) {
                sequences[idx].push(seq);
            }
        }

        let mut template = HiddenMarkovModel::new(self.num_states, self.num_symbols, self.model_type, self.delta)?;
        template.max_num_epochs = self.max_num_epochs;
        template.min_change = self.min_change;
        let seed = self.seed;

        let models = sequences
            .par_iter()
            .enumerate()
            .map(|(k, seqs)| {
                let mut model = template.clone();
                model.seed = seed.map(|s| s.wrapping_add(k as u64));
                model
                    .train(seqs)
                    .with_context(|| format!("Failed to train the HMM of class {}", labels[k]))?;
                Ok(model)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut scores = Vec::with_capacity(models.len());
        for (model, seqs) in models.iter().zip(&sequences) {
            let ll = seqs
                .iter()
                .map(|s| model.predict_sequence(s))
                .collect::<Result<Vec<f64>>>()?;
            scores.push(ll);
        }

        self.core.num_input_dimensions = 1;
        self.core.class_labels = labels;
        self.core.set_training_scores(&scores);
        self.core.trained = true;
        self.models = models;
        log::info!(
            "Trained {} HMMs ({} states, {} symbols, {})",
            self.models.len(),
            self.num_states,
            self.num_symbols,
            self.model_type
        );
        Ok(())
    }

    /// Treats `input` as the next symbol of a stream and scores the last
    /// `N` symbols, `N` being the average training sequence length.
    fn predict(&mut self, input: &[f64]) -> Result<()> {
        self.core.ensure_ready(input.len())?;
        let symbol = self.to_symbol(input[0])?;
        let scores = self
            .models
            .iter_mut()
            .map(|m| m.predict(symbol))
            .collect::<Result<Vec<f64>>>()?;
        self.core.decide_from_scores(scores);
        Ok(())
    }

    fn predict_timeseries(&mut self, input: &Array2<f64>) -> Result<()> {
        self.core.ensure_ready(input.ncols())?;
        let seq = self.to_symbols(input)?;
        let scores = self.log_likelihoods(&seq)?;
        self.core.decide_from_scores(scores);
        Ok(())
    }

    fn reset(&mut self) {
        self.models.iter_mut().for_each(HiddenMarkovModel::reset_buffer);
    }

    fn clear(&mut self) {
        self.core.clear();
        self.models.clear();
    }

    fn save_model(&self, w: &mut FieldWriter) -> Result<()> {
        w.line(FILE_HEADER);
        self.core.save(w);
        w.field("NumStates:", self.num_states)
            .field("NumSymbols:", self.num_symbols)
            .field("ModelType:", self.model_type)
            .field("Delta:", self.delta)
            .field("MaxNumEpochs:", self.max_num_epochs)
            .field("MinChange:", self.min_change);
        for (k, model) in self.models.iter().enumerate() {
            w.field("Model_ID:", k + 1);
            model.save(w);
        }
        Ok(())
    }

    fn load_model(&mut self, r: &mut TokenReader<'_>) -> Result<()> {
        r.expect(FILE_HEADER)?;
        let core = self.core.load(r)?;
        let num_states = r.field::<usize>("NumStates:")?;
        let num_symbols = r.field::<usize>("NumSymbols:")?;
        let model_type = r
            .field::<String>("ModelType:")?
            .parse::<HmmModelType>()
            .map_err(GestureError::Configuration)?;
        let delta = r.field::<usize>("Delta:")?;
        let max_num_epochs = r.field::<usize>("MaxNumEpochs:")?;
        let min_change = r.field::<f64>("MinChange:")?;
        validate_topology(num_states, num_symbols, model_type, delta)?;

        let mut models = Vec::new();
        if core.trained {
            for k in 0..core.num_classes() {
                let id = r.field::<usize>("Model_ID:")?;
                if id != k + 1 {
                    return Err(GestureError::Data(format!("expected model {} but found model {}", k + 1, id)).into());
                }
                let model = HiddenMarkovModel::load(r).with_context(|| format!("Failed to load HMM {}", id))?;
                if model.num_symbols() != num_symbols || model.num_states() != num_states {
                    return Err(GestureError::Data(format!("HMM {} does not match the classifier topology", id)).into());
                }
                models.push(model);
            }
        }

        *self = Self {
            core,
            num_states,
            num_symbols,
            model_type,
            delta,
            max_num_epochs,
            min_change,
            seed: self.seed,
            models,
        };
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Classifier> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(symbols: &[usize]) -> Array2<f64> {
        Array2::from_shape_vec((symbols.len(), 1), symbols.iter().map(|&s| s as f64).collect()).unwrap()
    }

    fn two_class_data() -> TimeSeriesClassificationData {
        let mut data = TimeSeriesClassificationData::new(1);
        for shift in 0..4 {
            let mut up: Vec<usize> = (0..5).flat_map(|s| [s, s]).collect();
            up.rotate_left(shift % 2);
            let down: Vec<usize> = up.iter().map(|s| 4 - s + 5).collect();
            data.add_sample(1, series(&up)).unwrap();
            data.add_sample(2, series(&down)).unwrap();
        }
        data
    }

    #[test]
    fn rejects_invalid_topology_without_changing_state() {
        let mut hmm = Hmm::default();
        assert!(hmm.set_topology(0, 10, HmmModelType::Ergodic, 1).is_err());
        assert!(hmm.set_topology(4, 10, HmmModelType::LeftRight, 0).is_err());
        assert_eq!(hmm.num_states(), 5);
        assert!(hmm.set_training_limits(0, 0.1).is_err());
    }

    #[test]
    fn separates_two_symbol_ranges() {
        let mut hmm = Hmm::new(3, 10, HmmModelType::LeftRight, 1).unwrap().with_seed(Some(7));
        hmm.train_timeseries(&two_class_data()).unwrap();
        assert!(hmm.models().iter().all(HiddenMarkovModel::is_stochastic));

        hmm.predict_timeseries(&series(&[0, 1, 1, 2, 3, 4])).unwrap();
        assert_eq!(hmm.predicted_class_label(), 1);
        hmm.predict_timeseries(&series(&[9, 8, 8, 7, 6, 5])).unwrap();
        assert_eq!(hmm.predicted_class_label(), 2);
    }

    #[test]
    fn non_symbol_input_is_a_data_error() {
        let mut hmm = Hmm::default().with_seed(Some(1));
        hmm.train_timeseries(&two_class_data()).unwrap();
        let err = hmm.predict_timeseries(&series(&[1, 2, 42])).unwrap_err();
        assert!(matches!(crate::error::error_kind(&err), Some(GestureError::Data(_))));
    }

    #[test]
    fn corrupted_keyword_fails_the_load() {
        let mut hmm = Hmm::default().with_seed(Some(3));
        hmm.train_timeseries(&two_class_data()).unwrap();
        let mut w = FieldWriter::new();
        hmm.save_model(&mut w).unwrap();
        let text = w.finish().replacen("NumStates:", "NumState:", 1);

        let mut reloaded = hmm.clone();
        assert!(reloaded.load_model(&mut TokenReader::new(&text)).is_err());
    }

    #[test]
    fn model_survives_a_save_load_cycle() {
        let mut hmm = Hmm::default().with_seed(Some(11));
        hmm.train_timeseries(&two_class_data()).unwrap();
        let mut w = FieldWriter::new();
        hmm.save_model(&mut w).unwrap();
        let text = w.finish();

        let mut reloaded = Hmm::default();
        reloaded.load_model(&mut TokenReader::new(&text)).unwrap();
        let probe = series(&[0, 0, 1, 2, 3, 4, 4]);
        hmm.predict_timeseries(&probe).unwrap();
        reloaded.predict_timeseries(&probe).unwrap();
        assert_eq!(hmm.predicted_class_label(), reloaded.predicted_class_label());
        assert_eq!(reloaded.models().len(), 2);
    }
}
