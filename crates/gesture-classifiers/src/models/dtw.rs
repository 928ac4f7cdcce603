//! Dynamic time warping template matcher.
//!
//! Training picks, for every class, the sample whose summed warping
//! distance to the other samples of that class is smallest and keeps it as
//! the class template. Prediction warps the input against every template;
//! the nearest template wins.
use std::collections::VecDeque;

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::data::{TimeSeriesClassificationData, NULL_CLASS_LABEL};
use crate::error::GestureError;
use crate::io::tokens::{FieldWriter, TokenReader};
use crate::math::Array2;
use crate::models::classifier_trait::{Classifier, ClassifierCore, Prediction};
use crate::stats::{self, arg_min, euclidean_distance, ScoreDirection};

const FILE_HEADER: &str = "DTW_MODEL_FILE_V1.0";

#[derive(Debug, Clone, PartialEq)]
pub struct DtwTemplate {
    pub class_label: u32,
    pub series: Array2<f64>,
    pub average_length: usize,
}

#[derive(Debug, Clone)]
pub struct Dtw {
    core: ClassifierCore,
    /// Standardise every dimension of a series over time before warping.
    pub z_normalise: bool,
    /// Subtract the first time step from every step of a series.
    pub offset_using_first_sample: bool,
    /// Restrict warping to a band around the diagonal.
    pub constrain_warping_path: bool,
    /// Band half-width as a fraction of the longer series.
    pub radius: f64,
    templates: Vec<DtwTemplate>,
    buffer: VecDeque<Vec<f64>>,
    buffer_length: usize,
}

impl Default for Dtw {
    fn default() -> Self {
        Self {
            core: ClassifierCore::new(ScoreDirection::LowerIsBetter, -2.0),
            z_normalise: false,
            offset_using_first_sample: false,
            constrain_warping_path: true,
            radius: 0.2,
            templates: Vec::new(),
            buffer: VecDeque::new(),
            buffer_length: 0,
        }
    }
}

impl Dtw {
    pub fn new(z_normalise: bool, offset_using_first_sample: bool, constrain_warping_path: bool, radius: f64) -> Result<Self> {
        if !(radius > 0.0 && radius <= 1.0) {
            return Err(GestureError::Configuration(format!("warping radius {} must be in (0, 1]", radius)).into());
        }
        Ok(Self {
            z_normalise,
            offset_using_first_sample,
            constrain_warping_path,
            radius,
            ..Self::default()
        })
    }

    pub fn templates(&self) -> &[DtwTemplate] {
        &self.templates
    }

    fn prepare(&self, series: &Array2<f64>) -> Array2<f64> {
        let mut out = self.core.scale_series(series);
        if out.is_empty() {
            return out;
        }
        if self.offset_using_first_sample {
            let first = out.row(0).to_vec();
            for r in 0..out.nrows() {
                for (v, f) in out.row_mut(r).iter_mut().zip(&first) {
                    *v -= f;
                }
            }
        }
        if self.z_normalise {
            for c in 0..out.ncols() {
                let column = out.column(c);
                let mu = stats::mean(&column);
                let sigma = stats::std_dev(&column);
                for r in 0..out.nrows() {
                    let v = out[(r, c)] - mu;
                    out[(r, c)] = if sigma > 0.0 { v / sigma } else { v };
                }
            }
        }
        out
    }

    /// Warping distance between two prepared series, normalised by the
    /// combined length. `f64::INFINITY` when no path fits the band.
    pub fn distance(&self, a: &Array2<f64>, b: &Array2<f64>) -> f64 {
        let (n, m) = (a.nrows(), b.nrows());
        if n == 0 || m == 0 {
            return f64::INFINITY;
        }

        let band = if self.constrain_warping_path {
            let width = (self.radius * n.max(m) as f64).ceil() as usize;
            let slope = if n > 1 { ((m - 1) as f64 / (n - 1) as f64).ceil() as usize } else { m };
            Some(width.max(slope).max(1))
        } else {
            None
        };
        let centre = |i: usize| -> f64 {
            if n > 1 {
                i as f64 * (m - 1) as f64 / (n - 1) as f64
            } else {
                0.0
            }
        };

        let mut prev = vec![f64::INFINITY; m];
        let mut curr = vec![f64::INFINITY; m];
        for i in 0..n {
            let (lo, hi) = match band {
                Some(r) => {
                    let c = centre(i);
                    let lo = (c - r as f64).floor().max(0.0) as usize;
                    let hi = ((c + r as f64).ceil() as usize).min(m - 1);
                    (lo, hi)
                }
                None => (0, m - 1),
            };
            curr.iter_mut().for_each(|v| *v = f64::INFINITY);
            for j in lo..=hi {
                let cost = euclidean_distance(a.row(i), b.row(j));
                let best_prev = if i == 0 && j == 0 {
                    0.0
                } else {
                    let up = if i > 0 { prev[j] } else { f64::INFINITY };
                    let left = if j > 0 { curr[j - 1] } else { f64::INFINITY };
                    let diag = if i > 0 && j > 0 { prev[j - 1] } else { f64::INFINITY };
                    up.min(left).min(diag)
                };
                curr[j] = cost + best_prev;
            }
            std::mem::swap(&mut prev, &mut curr);
        }
        prev[m - 1] / (n + m) as f64
    }

    fn classify(&mut self, prepared: &Array2<f64>) {
        let scores: Vec<f64> = self
            .templates
            .par_iter()
            .map(|t| self.distance(prepared, &t.series))
            .collect();
        self.core.decide_from_scores(scores);
    }
}

impl Classifier for Dtw {
    fn type_name(&self) -> &'static str {
        "DTW"
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
        if self.core.use_scaling {
            self.core.ranges = data.ranges();
        }

        let labels = data.class_labels();
        let mut templates = Vec::with_capacity(labels.len());
        let mut scores = Vec::with_capacity(labels.len());
        for &label in &labels {
            let class_data = data.class_data(label);
            let prepared: Vec<Array2<f64>> = class_data.iter().map(|s| self.prepare(&s.data)).collect();
            let k = prepared.len();

            let distances: Vec<Vec<f64>> = (0..k)
                .into_par_iter()
                .map(|i| (0..k).map(|j| if i == j { 0.0 } else { self.distance(&prepared[i], &prepared[j]) }).collect())
                .collect();
            let totals: Vec<f64> = distances.iter().map(|row| row.iter().sum()).collect();
            let best = arg_min(&totals).ok_or_else(|| {
                GestureError::Numerical(format!("no finite template distance for class {}", label))
            })?;
            if !totals[best].is_finite() {
                return Err(GestureError::Numerical(format!(
                    "template distances of class {} are not finite",
                    label
                ))
                .into());
            }

            let in_class: Vec<f64> = if k == 1 {
                vec![0.0]
            } else {
                (0..k).filter(|&j| j != best).map(|j| distances[best][j]).collect()
            };
            let average_length = class_data.iter().map(|s| s.data.nrows()).sum::<usize>() / k;
            log::debug!(
                "DTW class {}: template {} of {} samples, mean in-class distance {:.4}",
                label,
                best,
                k,
                stats::mean(&in_class)
            );

            templates.push(DtwTemplate {
                class_label: label,
                series: prepared[best].clone(),
                average_length,
            });
            scores.push(in_class);
        }

        self.buffer_length = templates.iter().map(|t| t.average_length).max().unwrap_or(1).max(1);
        self.templates = templates;
        self.core.num_input_dimensions = data.num_dimensions();
        self.core.class_labels = labels;
        self.core.set_training_scores(&scores);
        self.core.trained = true;
        log::info!("Trained DTW with {} templates", self.templates.len());
        Ok(())
    }

    /// Buffers `input` as the next time step. Until the buffer holds as many
    /// steps as the longest average template the prediction is the null label.
    fn predict(&mut self, input: &[f64]) -> Result<()> {
        self.core.ensure_ready(input.len())?;
        if self.buffer.len() == self.buffer_length {
            self.buffer.pop_front();
        }
        self.buffer.push_back(input.to_vec());
        if self.buffer.len() < self.buffer_length {
            self.core.prediction = Prediction {
                predicted_class_label: NULL_CLASS_LABEL,
                ..Prediction::default()
            };
            return Ok(());
        }
        let rows: Vec<Vec<f64>> = self.buffer.iter().cloned().collect();
        let series = Array2::from_rows(&rows)?;
        let prepared = self.prepare(&series);
        self.classify(&prepared);
        Ok(())
    }

    fn predict_timeseries(&mut self, input: &Array2<f64>) -> Result<()> {
        self.core.ensure_ready(input.ncols())?;
        if input.is_empty() {
            return Err(GestureError::Data("cannot classify an empty time series".to_string()).into());
        }
        let prepared = self.prepare(input);
        self.classify(&prepared);
        Ok(())
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }

    fn clear(&mut self) {
        self.core.clear();
        self.templates.clear();
        self.buffer.clear();
        self.buffer_length = 0;
    }

    fn save_model(&self, w: &mut FieldWriter) -> Result<()> {
        w.line(FILE_HEADER);
        self.core.save(w);
        w.flag("ZNormalise:", self.z_normalise)
            .flag("OffsetUsingFirstSample:", self.offset_using_first_sample)
            .flag("ConstrainWarpingPath:", self.constrain_warping_path)
            .field("Radius:", self.radius);
        for (k, t) in self.templates.iter().enumerate() {
            w.field("Template_ID:", k + 1)
                .field("ClassLabel:", t.class_label)
                .field("TimeSeriesLength:", t.series.nrows())
                .field("AverageLength:", t.average_length)
                .line("TemplateData:")
                .matrix(&t.series);
        }
        Ok(())
    }

    fn load_model(&mut self, r: &mut TokenReader<'_>) -> Result<()> {
        r.expect(FILE_HEADER)?;
        let core = self.core.load(r)?;
        let mut loaded = Dtw::new(
            r.flag("ZNormalise:")?,
            r.flag("OffsetUsingFirstSample:")?,
            r.flag("ConstrainWarpingPath:")?,
            r.field("Radius:")?,
        )?;
        if core.trained {
            for k in 0..core.num_classes() {
                r.field::<usize>("Template_ID:")
                    .with_context(|| format!("Failed to read template {}", k + 1))?;
                let class_label = r.field::<u32>("ClassLabel:")?;
                let length = r.field::<usize>("TimeSeriesLength:")?;
                let average_length = r.field::<usize>("AverageLength:")?;
                r.expect("TemplateData:")?;
                let series = r.matrix(length, core.num_input_dimensions)?;
                loaded.templates.push(DtwTemplate {
                    class_label,
                    series,
                    average_length,
                });
            }
            loaded.buffer_length = loaded.templates.iter().map(|t| t.average_length).max().unwrap_or(1).max(1);
        }
        loaded.core = core;
        *self = loaded;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Classifier> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize, slope: f64) -> Array2<f64> {
        Array2::from_shape_vec((len, 1), (0..len).map(|t| slope * t as f64).collect()).unwrap()
    }

    #[test]
    fn warping_absorbs_time_stretch() {
        let dtw = Dtw::default();
        let short = ramp(10, 1.0);
        let stretched = Array2::from_shape_vec((20, 1), (0..20).map(|t| (t / 2) as f64).collect()).unwrap();
        let other = ramp(10, -1.0);
        assert!(dtw.distance(&short, &stretched) < dtw.distance(&short, &other));
        assert_eq!(dtw.distance(&short, &short), 0.0);
    }

    #[test]
    fn band_still_reaches_the_corner_for_unequal_lengths() {
        let dtw = Dtw::default();
        assert!(dtw.distance(&ramp(3, 1.0), &ramp(40, 1.0)).is_finite());
    }

    #[test]
    fn offset_makes_distance_shift_invariant() {
        let dtw = Dtw::new(false, true, true, 0.2).unwrap();
        let a = dtw.prepare(&ramp(8, 1.0));
        let b = dtw.prepare(&ramp(8, 1.0).mapv(|v| v + 100.0));
        assert_eq!(dtw.distance(&a, &b), 0.0);
    }

    #[test]
    fn rejects_bad_radius() {
        assert!(Dtw::new(false, false, true, 0.0).is_err());
        assert!(Dtw::new(false, false, true, 1.5).is_err());
    }

    #[test]
    fn streaming_waits_for_a_full_buffer() {
        let mut data = TimeSeriesClassificationData::new(1);
        for _ in 0..3 {
            data.add_sample(1, ramp(4, 1.0)).unwrap();
            data.add_sample(2, ramp(4, -1.0)).unwrap();
        }
        let mut dtw = Dtw::default();
        dtw.train_timeseries(&data).unwrap();
        for t in 0..3 {
            dtw.predict(&[t as f64]).unwrap();
            assert_eq!(dtw.predicted_class_label(), NULL_CLASS_LABEL);
        }
        dtw.predict(&[3.0]).unwrap();
        assert_eq!(dtw.predicted_class_label(), 1);
    }
}
