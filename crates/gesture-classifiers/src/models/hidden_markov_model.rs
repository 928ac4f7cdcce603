//! Discrete hidden Markov model with scaled Baum-Welch training.
//!
//! Observations are integer symbols in `[0, num_symbols)`. Forward and
//! backward variables are rescaled at every time step, so sequences of any
//! length can be scored without underflow; the log-likelihood is the sum of
//! the logarithms of the scaling coefficients.
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::GestureError;
use crate::io::tokens::{FieldWriter, TokenReader};
use crate::math::{rng_from_seed, Array2};

/// Floor applied to re-estimated emission probabilities so symbols unseen
/// during training do not make a sequence impossible.
const MIN_EMISSION_PROBABILITY: f64 = 1.0e-6;

const STOCHASTIC_TOLERANCE: f64 = 1.0e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HmmModelType {
    /// Any state may follow any state.
    Ergodic,
    /// State `i` may only move to states `i..=i + delta`.
    LeftRight,
}

impl fmt::Display for HmmModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HmmModelType::Ergodic => write!(f, "ERGODIC"),
            HmmModelType::LeftRight => write!(f, "LEFTRIGHT"),
        }
    }
}

impl FromStr for HmmModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "ergodic" | "0" => Ok(HmmModelType::Ergodic),
            "leftright" | "1" => Ok(HmmModelType::LeftRight),
            _ => Err(format!("Unknown HMM model type: {}", s)),
        }
    }
}

/// Expected counts accumulated over all sequences in one E-step.
struct Expectations {
    log_likelihood: f64,
    pi: Vec<f64>,
    a_num: Array2<f64>,
    a_den: Vec<f64>,
    b_num: Array2<f64>,
    b_den: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct HiddenMarkovModel {
    num_states: usize,
    num_symbols: usize,
    model_type: HmmModelType,
    delta: usize,
    pub max_num_epochs: usize,
    pub min_change: f64,
    pub seed: Option<u64>,
    a: Array2<f64>,
    b: Array2<f64>,
    pi: Vec<f64>,
    trained: bool,
    training_log: Vec<f64>,
    observation_buffer: VecDeque<usize>,
    buffer_length: usize,
}

impl HiddenMarkovModel {
    /// Creates a model with random row-stochastic parameters.
    pub fn new(num_states: usize, num_symbols: usize, model_type: HmmModelType, delta: usize) -> Result<Self> {
        let mut model = Self {
            num_states: 0,
            num_symbols: 0,
            model_type,
            delta,
            max_num_epochs: 100,
            min_change: 1.0e-5,
            seed: None,
            a: Array2::default(),
            b: Array2::default(),
            pi: Vec::new(),
            trained: false,
            training_log: Vec::new(),
            observation_buffer: VecDeque::new(),
            buffer_length: 0,
        };
        model.reset_model(num_states, num_symbols, model_type, delta)?;
        Ok(model)
    }

    /// Validates the topology and re-randomises A, B and pi. The model
    /// becomes untrained. Invalid arguments leave the model unchanged.
    pub fn reset_model(
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
        let mut rng = rng_from_seed(self.seed);
        self.randomize(&mut rng);
        self.trained = false;
        self.training_log.clear();
        self.observation_buffer.clear();
        Ok(())
    }

    fn transition_allowed(&self, from: usize, to: usize) -> bool {
        match self.model_type {
            HmmModelType::Ergodic => true,
            HmmModelType::LeftRight => to >= from && to - from <= self.delta,
        }
    }

    fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let n = self.num_states;
        let mut a = Array2::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                if self.transition_allowed(i, j) {
                    a[(i, j)] = rng.gen_range(0.1..1.0);
                }
            }
        }
        a.normalize_rows(None);

        let mut b = Array2::zeros(n, self.num_symbols);
        for v in b.as_mut_slice() {
            *v = rng.gen_range(0.1..1.0);
        }
        b.normalize_rows(None);

        let pi = match self.model_type {
            HmmModelType::LeftRight => {
                let mut pi = vec![0.0; n];
                pi[0] = 1.0;
                pi
            }
            HmmModelType::Ergodic => {
                let raw: Vec<f64> = (0..n).map(|_| rng.gen_range(0.1..1.0)).collect();
                let sum: f64 = raw.iter().sum();
                raw.iter().map(|v| v / sum).collect()
            }
        };

        self.a = a;
        self.b = b;
        self.pi = pi;
    }

    fn validate_sequence(&self, seq: &[usize]) -> Result<()> {
        if seq.is_empty() {
            return Err(GestureError::Data("observation sequence is empty".to_string()).into());
        }
        if let Some(t) = seq.iter().position(|&s| s >= self.num_symbols) {
            return Err(GestureError::Data(format!(
                "symbol {} at time step {} is outside [0, {})",
                seq[t], t, self.num_symbols
            ))
            .into());
        }
        Ok(())
    }

    /// Scaled forward pass. Returns the scaled alphas, the scaling
    /// coefficients and the log-likelihood (`-inf` if the sequence is impossible).
    fn forward(&self, seq: &[usize]) -> (Array2<f64>, Vec<f64>, f64) {
        let n = self.num_states;
        let t_len = seq.len();
        let mut alpha = Array2::zeros(t_len, n);
        let mut c = vec![0.0; t_len];

        for i in 0..n {
            alpha[(0, i)] = self.pi[i] * self.b[(i, seq[0])];
        }
        for t in 0..t_len {
            if t > 0 {
                for j in 0..n {
                    let mut sum = 0.0;
                    for i in 0..n {
                        sum += alpha[(t - 1, i)] * self.a[(i, j)];
                    }
                    alpha[(t, j)] = sum * self.b[(j, seq[t])];
                }
            }
            c[t] = alpha.row(t).iter().sum();
            if c[t] <= 0.0 {
                return (alpha, c, f64::NEG_INFINITY);
            }
            let ct = c[t];
            alpha.row_mut(t).iter_mut().for_each(|v| *v /= ct);
        }

        let log_likelihood = c.iter().map(|v| v.ln()).sum();
        (alpha, c, log_likelihood)
    }

    fn backward(&self, seq: &[usize], c: &[f64]) -> Array2<f64> {
        let n = self.num_states;
        let t_len = seq.len();
        let mut beta = Array2::zeros(t_len, n);
        for i in 0..n {
            beta[(t_len - 1, i)] = 1.0;
        }
        for t in (0..t_len.saturating_sub(1)).rev() {
            for i in 0..n {
                let mut sum = 0.0;
                for j in 0..n {
                    sum += self.a[(i, j)] * self.b[(j, seq[t + 1])] * beta[(t + 1, j)];
                }
                beta[(t, i)] = sum / c[t + 1];
            }
        }
        beta
    }

    fn expectation(&self, sequences: &[Vec<usize>]) -> Expectations {
        let n = self.num_states;
        let mut e = Expectations {
            log_likelihood: 0.0,
            pi: vec![0.0; n],
            a_num: Array2::zeros(n, n),
            a_den: vec![0.0; n],
            b_num: Array2::zeros(n, self.num_symbols),
            b_den: vec![0.0; n],
        };

        for seq in sequences {
            let (alpha, c, ll) = self.forward(seq);
            e.log_likelihood += ll;
            if !ll.is_finite() {
                continue;
            }
            let beta = self.backward(seq, &c);
            let t_len = seq.len();

            for t in 0..t_len {
                let norm: f64 = (0..n).map(|i| alpha[(t, i)] * beta[(t, i)]).sum();
                if norm <= 0.0 {
                    continue;
                }
                for i in 0..n {
                    let gamma = alpha[(t, i)] * beta[(t, i)] / norm;
                    if t == 0 {
                        e.pi[i] += gamma;
                    }
                    if t + 1 < t_len {
                        e.a_den[i] += gamma;
                    }
                    e.b_num[(i, seq[t])] += gamma;
                    e.b_den[i] += gamma;
                }
            }

            for t in 0..t_len.saturating_sub(1) {
                let o = seq[t + 1];
                let mut xi = Array2::zeros(n, n);
                let mut total = 0.0;
                for i in 0..n {
                    for j in 0..n {
                        let v = alpha[(t, i)] * self.a[(i, j)] * self.b[(j, o)] * beta[(t + 1, j)];
                        xi[(i, j)] = v;
                        total += v;
                    }
                }
                if total <= 0.0 {
                    continue;
                }
                for i in 0..n {
                    for j in 0..n {
                        e.a_num[(i, j)] += xi[(i, j)] / total;
                    }
                }
            }
        }
        e
    }

    fn maximization(&mut self, e: &Expectations, num_sequences: usize) {
        let n = self.num_states;
        for i in 0..n {
            if e.a_den[i] > 0.0 {
                for j in 0..n {
                    self.a[(i, j)] = e.a_num[(i, j)] / e.a_den[i];
                }
            }
            if e.b_den[i] > 0.0 {
                for k in 0..self.num_symbols {
                    self.b[(i, k)] = (e.b_num[(i, k)] / e.b_den[i]).max(MIN_EMISSION_PROBABILITY);
                }
            }
        }
        let delta = self.delta;
        let model_type = self.model_type;
        let mask = move |i: usize, j: usize| match model_type {
            HmmModelType::Ergodic => true,
            HmmModelType::LeftRight => j >= i && j - i <= delta,
        };
        self.a.normalize_rows(Some(&mask));
        self.b.normalize_rows(None);

        let total: f64 = e.pi.iter().sum();
        if total > 0.0 {
            self.pi = e.pi.iter().map(|p| p / num_sequences.max(1) as f64).collect();
            let sum: f64 = self.pi.iter().sum();
            self.pi.iter_mut().for_each(|p| *p /= sum);
        }
    }

    fn parameters_finite(&self) -> bool {
        self.a.all_finite() && self.b.all_finite() && self.pi.iter().all(|v| v.is_finite())
    }

    /// Runs Baum-Welch until the mean log-likelihood changes by less than
    /// `min_change` or `max_num_epochs` iterations elapse.
    ///
    /// # Errors
    ///
    /// * `Data` - no sequences, an empty sequence, or a symbol outside `[0, num_symbols)`.
    /// * `Numerical` - the likelihood or the re-estimated parameters became non-finite.
    ///
    /// On error the model keeps its previous parameters and is left untrained.
    pub fn train(&mut self, sequences: &[Vec<usize>]) -> Result<()> {
        self.trained = false;
        if sequences.is_empty() {
            return Err(GestureError::Data("no observation sequences to train on".to_string()).into());
        }
        for (i, seq) in sequences.iter().enumerate() {
            self.validate_sequence(seq)
                .with_context(|| format!("Invalid observation sequence {}", i))?;
        }

        let mut candidate = self.clone();
        let mut rng = rng_from_seed(self.seed);
        candidate.randomize(&mut rng);
        candidate.training_log.clear();

        let num_sequences = sequences.len() as f64;
        let mut previous = f64::NEG_INFINITY;
        for epoch in 0..self.max_num_epochs {
            let e = candidate.expectation(sequences);
            let mean_ll = e.log_likelihood / num_sequences;
            if !mean_ll.is_finite() {
                return Err(GestureError::Numerical(format!(
                    "log-likelihood became {} at epoch {}",
                    mean_ll, epoch
                ))
                .into());
            }
            candidate.training_log.push(mean_ll);
            log::trace!("HMM epoch {}: mean log-likelihood {:.6}", epoch, mean_ll);

            candidate.maximization(&e, sequences.len());
            if !candidate.parameters_finite() {
                return Err(GestureError::Numerical(format!(
                    "re-estimated parameters are not finite at epoch {}",
                    epoch
                ))
                .into());
            }

            if (mean_ll - previous).abs() < self.min_change {
                break;
            }
            previous = mean_ll;
        }

        let total: usize = sequences.iter().map(|s| s.len()).sum();
        candidate.buffer_length = (total as f64 / num_sequences).round().max(1.0) as usize;
        candidate.observation_buffer.clear();
        candidate.trained = true;
        log::debug!(
            "HMM trained on {} sequences in {} epochs (final mean log-likelihood {:.4})",
            sequences.len(),
            candidate.training_log.len(),
            candidate.training_log.last().copied().unwrap_or(f64::NAN)
        );
        *self = candidate;
        Ok(())
    }

    /// Log-likelihood of a whole sequence under the model (forward algorithm only).
    pub fn predict_sequence(&self, seq: &[usize]) -> Result<f64> {
        if !self.trained {
            return Err(GestureError::Precondition("HMM has not been trained".to_string()).into());
        }
        self.validate_sequence(seq)?;
        Ok(self.forward(seq).2)
    }

    /// Appends one symbol to the streaming buffer and scores the buffer.
    pub fn predict(&mut self, symbol: usize) -> Result<f64> {
        if !self.trained {
            return Err(GestureError::Precondition("HMM has not been trained".to_string()).into());
        }
        self.validate_sequence(&[symbol])?;
        if self.observation_buffer.len() == self.buffer_length {
            self.observation_buffer.pop_front();
        }
        self.observation_buffer.push_back(symbol);
        let seq: Vec<usize> = self.observation_buffer.iter().copied().collect();
        Ok(self.forward(&seq).2)
    }

    /// Most likely state path and its log-probability.
    pub fn viterbi(&self, seq: &[usize]) -> Result<(Vec<usize>, f64)> {
        if !self.trained {
            return Err(GestureError::Precondition("HMM has not been trained".to_string()).into());
        }
        self.validate_sequence(seq)?;
        let n = self.num_states;
        let t_len = seq.len();
        let mut delta = Array2::zeros(t_len, n);
        let mut psi = Array2::<usize>::zeros(t_len, n);

        for i in 0..n {
            delta[(0, i)] = self.pi[i].ln() + self.b[(i, seq[0])].ln();
        }
        for t in 1..t_len {
            for j in 0..n {
                let (best_i, best) = (0..n)
                    .map(|i| (i, delta[(t - 1, i)] + self.a[(i, j)].ln()))
                    .fold((0, f64::NEG_INFINITY), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
                delta[(t, j)] = best + self.b[(j, seq[t])].ln();
                psi[(t, j)] = best_i;
            }
        }

        let (mut state, log_prob) = (0..n)
            .map(|i| (i, delta[(t_len - 1, i)]))
            .fold((0, f64::NEG_INFINITY), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
        let mut path = vec![0; t_len];
        for t in (0..t_len).rev() {
            path[t] = state;
            if t > 0 {
                state = psi[(t, state)];
            }
        }
        Ok((path, log_prob))
    }

    /// Checks that A, B and pi are stochastic within tolerance.
    pub fn is_stochastic(&self) -> bool {
        let pi_sum: f64 = self.pi.iter().sum();
        self.a.is_row_stochastic(STOCHASTIC_TOLERANCE)
            && self.b.is_row_stochastic(STOCHASTIC_TOLERANCE)
            && (pi_sum - 1.0).abs() <= STOCHASTIC_TOLERANCE
    }

    pub fn reset_buffer(&mut self) {
        self.observation_buffer.clear();
    }

    pub fn is_trained(&self) -> bool {
        self.trained
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

    pub fn transition_matrix(&self) -> &Array2<f64> {
        &self.a
    }

    pub fn emission_matrix(&self) -> &Array2<f64> {
        &self.b
    }

    pub fn initial_distribution(&self) -> &[f64] {
        &self.pi
    }

    /// Mean log-likelihood after each training epoch.
    pub fn training_log(&self) -> &[f64] {
        &self.training_log
    }

    pub fn save(&self, w: &mut FieldWriter) {
        w.field("NumStates:", self.num_states)
            .field("NumSymbols:", self.num_symbols)
            .field("ModelType:", self.model_type)
            .field("Delta:", self.delta)
            .field("BufferLength:", self.buffer_length)
            .line("A:")
            .matrix(&self.a)
            .line("B:")
            .matrix(&self.b)
            .line("Pi:")
            .vector(&self.pi);
    }

    /// Reads a trained model written by [`save`](Self::save).
    pub fn load(r: &mut TokenReader<'_>) -> Result<Self> {
        let num_states = r.field::<usize>("NumStates:")?;
        let num_symbols = r.field::<usize>("NumSymbols:")?;
        let model_type_token = r.field::<String>("ModelType:")?;
        let model_type = HmmModelType::from_str(&model_type_token).map_err(GestureError::Configuration)?;
        let delta = r.field::<usize>("Delta:")?;
        let buffer_length = r.field::<usize>("BufferLength:")?;
        validate_topology(num_states, num_symbols, model_type, delta)?;

        r.expect("A:")?;
        let a = r.matrix(num_states, num_states)?;
        r.expect("B:")?;
        let b = r.matrix(num_states, num_symbols)?;
        r.expect("Pi:")?;
        let pi = r.vector::<f64>(num_states)?;

        let model = Self {
            num_states,
            num_symbols,
            model_type,
            delta,
            max_num_epochs: 100,
            min_change: 1.0e-5,
            seed: None,
            a,
            b,
            pi,
            trained: true,
            training_log: Vec::new(),
            observation_buffer: VecDeque::new(),
            buffer_length: buffer_length.max(1),
        };
        if !model.parameters_finite() || !model.is_stochastic() {
            return Err(GestureError::Numerical("stored HMM parameters are not stochastic".to_string()).into());
        }
        Ok(model)
    }
}

/// Checks a topology without allocating any of its matrices.
pub(crate) fn validate_topology(num_states: usize, num_symbols: usize, model_type: HmmModelType, delta: usize) -> Result<()> {
    if num_states == 0 {
        return Err(GestureError::Configuration("number of states must be greater than zero".to_string()).into());
    }
    if num_symbols == 0 {
        return Err(GestureError::Configuration("number of symbols must be greater than zero".to_string()).into());
    }
    if model_type == HmmModelType::LeftRight && delta == 0 {
        return Err(GestureError::Configuration("left-right models need delta >= 1".to_string()).into());
    }
    if Array2::<f64>::checked_len(num_states, num_states.max(num_symbols)).is_none() {
        return Err(GestureError::Configuration(format!(
            "{} states and {} symbols are too many to store",
            num_states, num_symbols
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::error_kind;

    fn alternating(n: usize) -> Vec<Vec<usize>> {
        (0..n).map(|k| (0..10).map(|t| (t + k) % 2).collect()).collect()
    }

    #[test]
    fn left_right_transitions_stay_banded() {
        let mut hmm = HiddenMarkovModel::new(4, 3, HmmModelType::LeftRight, 1).unwrap();
        hmm.seed = Some(5);
        hmm.train(&alternating(6)).unwrap();
        let a = hmm.transition_matrix();
        for i in 0..4 {
            for j in 0..4 {
                if j < i || j > i + 1 {
                    assert_eq!(a[(i, j)], 0.0, "a[{}][{}] should be zero", i, j);
                }
            }
        }
        assert_eq!(hmm.initial_distribution()[0], 1.0);
        assert!(hmm.is_stochastic());
    }

    #[test]
    fn training_improves_likelihood() {
        let mut hmm = HiddenMarkovModel::new(2, 2, HmmModelType::Ergodic, 1).unwrap();
        hmm.seed = Some(9);
        hmm.train(&alternating(4)).unwrap();
        let log = hmm.training_log();
        assert!(log.len() >= 2);
        assert!(log.last().unwrap() >= log.first().unwrap());
    }

    #[test]
    fn symbol_out_of_range_is_data_error() {
        let mut hmm = HiddenMarkovModel::new(2, 2, HmmModelType::Ergodic, 1).unwrap();
        let err = hmm.train(&[vec![0, 1, 2]]).unwrap_err();
        assert!(matches!(error_kind(&err), Some(GestureError::Data(_))));
        assert!(!hmm.is_trained());
    }

    #[test]
    fn predict_requires_training() {
        let hmm = HiddenMarkovModel::new(2, 2, HmmModelType::Ergodic, 1).unwrap();
        let err = hmm.predict_sequence(&[0, 1]).unwrap_err();
        assert!(matches!(error_kind(&err), Some(GestureError::Precondition(_))));
    }

    #[test]
    fn invalid_topology_leaves_model_unchanged() {
        let mut hmm = HiddenMarkovModel::new(3, 2, HmmModelType::Ergodic, 1).unwrap();
        assert!(hmm.reset_model(0, 2, HmmModelType::Ergodic, 1).is_err());
        assert!(hmm.reset_model(3, 2, HmmModelType::LeftRight, 0).is_err());
        assert_eq!(hmm.num_states(), 3);
    }

    #[test]
    fn viterbi_path_respects_topology() {
        let mut hmm = HiddenMarkovModel::new(3, 2, HmmModelType::LeftRight, 1).unwrap();
        hmm.seed = Some(1);
        hmm.train(&[vec![0, 0, 0, 1, 1, 1], vec![0, 0, 1, 1, 1, 1]]).unwrap();
        let (path, log_prob) = hmm.viterbi(&[0, 0, 1, 1]).unwrap();
        assert_eq!(path[0], 0);
        assert!(path.windows(2).all(|w| w[1] >= w[0] && w[1] - w[0] <= 1));
        assert!(log_prob.is_finite());
    }

    #[test]
    fn streaming_buffer_is_bounded() {
        let mut hmm = HiddenMarkovModel::new(2, 2, HmmModelType::Ergodic, 1).unwrap();
        hmm.train(&alternating(3)).unwrap();
        let mut last = 0.0;
        for t in 0..25 {
            last = hmm.predict(t % 2).unwrap();
        }
        assert!(last.is_finite());
        assert!(hmm.observation_buffer.len() <= 10);
    }
}
