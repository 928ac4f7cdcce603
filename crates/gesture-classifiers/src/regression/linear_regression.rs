use anyhow::Result;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;

use crate::data::RegressionData;
use crate::error::GestureError;
use crate::io::tokens::{FieldWriter, TokenReader};
use crate::math::{rng_from_seed, Array2};
use crate::regression::Regressor;
use crate::stats::{self, MinMax};

const FILE_HEADER: &str = "LINEAR_REGRESSION_MODEL_FILE_V1.0";

/// Multi-output linear regression fitted with stochastic gradient descent.
///
/// Each output has its own weight row; column 0 is the bias. Training runs
/// `num_restarts` independent descents from random weights and keeps the one
/// with the lowest training RMS error.
#[derive(Debug, Clone)]
pub struct LinearRegression {
    learning_rate: f64,
    max_num_epochs: usize,
    min_change: f64,
    num_restarts: usize,
    seed: Option<u64>,
    use_scaling: bool,
    trained: bool,
    input_ranges: Vec<MinMax>,
    target_ranges: Vec<MinMax>,
    weights: Array2<f64>,
    rms_training_error: f64,
    output: Vec<f64>,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            max_num_epochs: 500,
            min_change: 1.0e-5,
            num_restarts: 1,
            seed: None,
            use_scaling: true,
            trained: false,
            input_ranges: Vec::new(),
            target_ranges: Vec::new(),
            weights: Array2::default(),
            rms_training_error: 0.0,
            output: Vec::new(),
        }
    }
}

struct Fit {
    weights: Array2<f64>,
    rms: f64,
    epochs: usize,
}

impl LinearRegression {
    pub fn new(learning_rate: f64, max_num_epochs: usize, min_change: f64, num_restarts: usize) -> Result<Self> {
        if !(learning_rate > 0.0) || max_num_epochs == 0 || !(min_change >= 0.0) || num_restarts == 0 {
            return Err(GestureError::Configuration(format!(
                "invalid linear regression settings: rate {}, {} epochs, minimum change {}, {} restarts",
                learning_rate, max_num_epochs, min_change, num_restarts
            ))
            .into());
        }
        Ok(Self {
            learning_rate,
            max_num_epochs,
            min_change,
            num_restarts,
            ..Self::default()
        })
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Weight matrix, one row per output, bias in column 0.
    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    fn scale_input(&self, x: &[f64]) -> Vec<f64> {
        if !self.use_scaling {
            return x.to_vec();
        }
        x.iter()
            .zip(&self.input_ranges)
            .map(|(&v, r)| stats::scale(v, r.min, r.max, 0.0, 1.0, false))
            .collect()
    }

    fn scale_target(&self, y: &[f64]) -> Vec<f64> {
        if !self.use_scaling {
            return y.to_vec();
        }
        y.iter()
            .zip(&self.target_ranges)
            .map(|(&v, r)| stats::scale(v, r.min, r.max, 0.0, 1.0, false))
            .collect()
    }

    fn unscale_target(&self, y: &mut [f64]) {
        if !self.use_scaling {
            return;
        }
        for (v, r) in y.iter_mut().zip(&self.target_ranges) {
            *v = stats::scale(*v, 0.0, 1.0, r.min, r.max, false);
        }
    }

    fn evaluate(weights: &Array2<f64>, x: &[f64]) -> Vec<f64> {
        weights
            .rows()
            .map(|w| w[0] + w[1..].iter().zip(x).map(|(a, b)| a * b).sum::<f64>())
            .collect()
    }

    fn rms(weights: &Array2<f64>, inputs: &[Vec<f64>], targets: &[Vec<f64>]) -> f64 {
        let sse: f64 = inputs
            .iter()
            .zip(targets)
            .map(|(x, y)| {
                Self::evaluate(weights, x)
                    .iter()
                    .zip(y)
                    .map(|(p, t)| (p - t) * (p - t))
                    .sum::<f64>()
            })
            .sum();
        (sse / inputs.len() as f64).sqrt()
    }

    fn descend(&self, inputs: &[Vec<f64>], targets: &[Vec<f64>], seed: Option<u64>) -> Result<Fit> {
        let mut rng = rng_from_seed(seed);
        let (outputs, cols) = (targets[0].len(), inputs[0].len() + 1);
        let init: Vec<f64> = (0..outputs * cols).map(|_| rng.gen_range(-0.1..0.1)).collect();
        let mut weights = Array2::from_shape_vec((outputs, cols), init)?;
        let mut order: Vec<usize> = (0..inputs.len()).collect();
        let mut last = f64::INFINITY;
        let mut rms = last;

        for epoch in 0..self.max_num_epochs {
            order.shuffle(&mut rng);
            for &i in &order {
                let prediction = Self::evaluate(&weights, &inputs[i]);
                for (o, (p, t)) in prediction.iter().zip(&targets[i]).enumerate() {
                    let step = self.learning_rate * (t - p);
                    let row = weights.row_mut(o);
                    row[0] += step;
                    for (w, x) in row[1..].iter_mut().zip(&inputs[i]) {
                        *w += step * x;
                    }
                }
            }
            rms = Self::rms(&weights, inputs, targets);
            if !rms.is_finite() {
                return Err(GestureError::Numerical(format!("training error diverged at epoch {}", epoch)).into());
            }
            log::trace!("linear regression epoch {}: rms {:.6}", epoch, rms);
            if (last - rms).abs() < self.min_change {
                return Ok(Fit { weights, rms, epochs: epoch + 1 });
            }
            last = rms;
        }
        Ok(Fit {
            weights,
            rms,
            epochs: self.max_num_epochs,
        })
    }
}

impl Regressor for LinearRegression {
    fn type_name(&self) -> &'static str {
        "LinearRegression"
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn num_input_dimensions(&self) -> usize {
        self.input_ranges.len()
    }

    fn num_output_dimensions(&self) -> usize {
        self.target_ranges.len()
    }

    fn train(&mut self, data: &RegressionData) -> Result<()> {
        self.clear();
        if data.is_empty() {
            return Err(GestureError::Data("training data is empty".to_string()).into());
        }
        self.input_ranges = data.input_ranges();
        self.target_ranges = data.target_ranges();
        let inputs: Vec<Vec<f64>> = data.samples().iter().map(|s| self.scale_input(&s.input)).collect();
        let targets: Vec<Vec<f64>> = data.samples().iter().map(|s| self.scale_target(&s.target)).collect();

        let fits = (0..self.num_restarts)
            .into_par_iter()
            .map(|r| self.descend(&inputs, &targets, self.seed.map(|s| s.wrapping_add(r as u64))))
            .collect::<Result<Vec<_>>>();
        let fits = match fits {
            Ok(fits) => fits,
            Err(err) => {
                self.clear();
                return Err(err);
            }
        };
        let errors: Vec<f64> = fits.iter().map(|f| f.rms).collect();
        let best = stats::arg_min(&errors)
            .ok_or_else(|| GestureError::Numerical("no restart produced a finite error".to_string()))?;
        let fit = fits.into_iter().nth(best).ok_or_else(|| GestureError::Numerical("missing restart".to_string()))?;

        log::info!(
            "Trained linear regression: {} restarts, best rms {:.6} after {} epochs",
            self.num_restarts,
            fit.rms,
            fit.epochs
        );
        self.weights = fit.weights;
        self.rms_training_error = fit.rms;
        self.trained = true;
        Ok(())
    }

    fn predict(&mut self, input: &[f64]) -> Result<()> {
        if !self.trained {
            return Err(GestureError::Precondition("model has not been trained".to_string()).into());
        }
        if input.len() != self.num_input_dimensions() {
            return Err(GestureError::Precondition(format!(
                "input has {} dimensions but the model was trained with {}",
                input.len(),
                self.num_input_dimensions()
            ))
            .into());
        }
        let mut y = Self::evaluate(&self.weights, &self.scale_input(input));
        self.unscale_target(&mut y);
        self.output = y;
        Ok(())
    }

    fn regression_data(&self) -> &[f64] {
        &self.output
    }

    fn root_mean_squared_training_error(&self) -> f64 {
        self.rms_training_error
    }

    fn enable_scaling(&mut self, enable: bool) {
        self.use_scaling = enable;
    }

    fn clear(&mut self) {
        self.trained = false;
        self.input_ranges.clear();
        self.target_ranges.clear();
        self.weights = Array2::default();
        self.rms_training_error = 0.0;
        self.output.clear();
    }

    fn save_model(&self, w: &mut FieldWriter) -> Result<()> {
        w.line(FILE_HEADER)
            .flag("Trained:", self.trained)
            .flag("UseScaling:", self.use_scaling)
            .field("LearningRate:", self.learning_rate)
            .field("MaxNumEpochs:", self.max_num_epochs)
            .field("MinChange:", self.min_change)
            .field("NumRestarts:", self.num_restarts);
        if self.trained {
            w.field("NumInputDimensions:", self.num_input_dimensions())
                .field("NumOutputDimensions:", self.num_output_dimensions())
                .field("RMSTrainingError:", self.rms_training_error)
                .line("InputRanges:");
            for r in &self.input_ranges {
                w.vector(&[r.min, r.max]);
            }
            w.line("TargetRanges:");
            for r in &self.target_ranges {
                w.vector(&[r.min, r.max]);
            }
            w.line("Weights:").matrix(&self.weights);
        }
        Ok(())
    }

    fn load_model(&mut self, r: &mut TokenReader<'_>) -> Result<()> {
        r.expect(FILE_HEADER)?;
        let trained = r.flag("Trained:")?;
        let use_scaling = r.flag("UseScaling:")?;
        let mut loaded = Self::new(
            r.field("LearningRate:")?,
            r.field("MaxNumEpochs:")?,
            r.field("MinChange:")?,
            r.field("NumRestarts:")?,
        )?;
        loaded.use_scaling = use_scaling;
        loaded.seed = self.seed;
        if trained {
            let inputs = r.field::<usize>("NumInputDimensions:")?;
            let outputs = r.field::<usize>("NumOutputDimensions:")?;
            loaded.rms_training_error = r.field("RMSTrainingError:")?;
            r.expect("InputRanges:")?;
            for _ in 0..inputs {
                loaded.input_ranges.push(MinMax::new(r.value()?, r.value()?));
            }
            r.expect("TargetRanges:")?;
            for _ in 0..outputs {
                loaded.target_ranges.push(MinMax::new(r.value()?, r.value()?));
            }
            r.expect("Weights:")?;
            loaded.weights = r.matrix(outputs, inputs + 1)?;
            loaded.trained = true;
        }
        *self = loaded;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Regressor> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_data() -> RegressionData {
        let mut data = RegressionData::new(2, 1);
        for i in 0..50 {
            let (a, b) = ((i % 10) as f64, (i / 10) as f64);
            data.add_sample(vec![a, b], vec![2.0 * a - b + 3.0]).unwrap();
        }
        data
    }

    #[test]
    fn recovers_a_plane() {
        let mut lr = LinearRegression::new(0.05, 2000, 1e-10, 3).unwrap().with_seed(Some(17));
        lr.train(&line_data()).unwrap();
        assert!(lr.root_mean_squared_training_error() < 0.05);
        lr.predict(&[4.0, 2.0]).unwrap();
        assert!((lr.regression_data()[0] - 9.0).abs() < 0.5);
    }

    #[test]
    fn untrained_predict_fails() {
        let mut lr = LinearRegression::default();
        assert!(lr.predict(&[1.0]).is_err());
    }

    #[test]
    fn rejects_non_positive_rate() {
        assert!(LinearRegression::new(0.0, 10, 0.0, 1).is_err());
    }
}
