use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::data::NULL_CLASS_LABEL;
use crate::error::GestureError;
use crate::io::tokens::{FieldWriter, TokenReader};
use crate::postprocessing::PostProcessing;

const FILE_HEADER: &str = "CLASS_LABEL_TIMEOUT_FILTER_FILE_V1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutFilterMode {
    /// Any label is ignored until the running timeout elapses.
    AllClassLabels,
    /// A label different from the one that started the timeout restarts it.
    IndependentClassLabels,
}

impl fmt::Display for TimeoutFilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutFilterMode::AllClassLabels => write!(f, "ALL_CLASS_LABELS"),
            TimeoutFilterMode::IndependentClassLabels => write!(f, "INDEPENDENT_CLASS_LABELS"),
        }
    }
}

impl FromStr for TimeoutFilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all_class_labels" | "0" => Ok(TimeoutFilterMode::AllClassLabels),
            "independent_class_labels" | "1" => Ok(TimeoutFilterMode::IndependentClassLabels),
            _ => Err(format!("unknown timeout filter mode: {}", s)),
        }
    }
}

/// Debounces a label stream: after a non-null label is emitted, further
/// labels are suppressed until `timeout` has elapsed.
#[derive(Debug, Clone)]
pub struct ClassLabelTimeoutFilter {
    timeout: Duration,
    mode: TimeoutFilterMode,
    active: Option<(u32, Instant)>,
    filtered_class_label: u32,
}

impl Default for ClassLabelTimeoutFilter {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            mode: TimeoutFilterMode::AllClassLabels,
            active: None,
            filtered_class_label: NULL_CLASS_LABEL,
        }
    }
}

impl ClassLabelTimeoutFilter {
    pub fn new(timeout_ms: u64, mode: TimeoutFilterMode) -> Result<Self> {
        if timeout_ms == 0 {
            return Err(GestureError::Configuration("timeout must be greater than zero".to_string()).into());
        }
        Ok(Self {
            timeout: Duration::from_millis(timeout_ms),
            mode,
            ..Self::default()
        })
    }

    pub fn is_timeout_active(&self) -> bool {
        self.active.is_some_and(|(_, started)| started.elapsed() < self.timeout)
    }

    pub fn filtered_class_label(&self) -> u32 {
        self.filtered_class_label
    }

    /// Filters `label` as if it arrived at `now`.
    pub fn process_at(&mut self, label: u32, now: Instant) -> u32 {
        if let Some((active_label, started)) = self.active {
            let running = now.duration_since(started) < self.timeout;
            let restart = self.mode == TimeoutFilterMode::IndependentClassLabels
                && label != NULL_CLASS_LABEL
                && label != active_label;
            if running && !restart {
                self.filtered_class_label = NULL_CLASS_LABEL;
                return NULL_CLASS_LABEL;
            }
            self.active = None;
        }
        if label != NULL_CLASS_LABEL {
            self.active = Some((label, now));
        }
        self.filtered_class_label = label;
        label
    }
}

impl PostProcessing for ClassLabelTimeoutFilter {
    fn type_name(&self) -> &'static str {
        "ClassLabelTimeoutFilter"
    }

    fn process(&mut self, predicted_class_label: u32) -> Result<u32> {
        Ok(self.process_at(predicted_class_label, Instant::now()))
    }

    fn reset(&mut self) {
        self.active = None;
        self.filtered_class_label = NULL_CLASS_LABEL;
    }

    fn save_settings(&self, w: &mut FieldWriter) -> Result<()> {
        w.line(FILE_HEADER)
            .field("TimeoutDuration:", self.timeout.as_millis())
            .field("FilterMode:", self.mode);
        Ok(())
    }

    fn load_settings(&mut self, r: &mut TokenReader<'_>) -> Result<()> {
        r.expect(FILE_HEADER)?;
        let timeout = r.field::<u64>("TimeoutDuration:")?;
        let mode = r
            .field::<String>("FilterMode:")?
            .parse::<TimeoutFilterMode>()
            .map_err(GestureError::Configuration)?;
        *self = Self::new(timeout, mode)?;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn PostProcessing> {
        Box::new(self.clone())
    }
}
