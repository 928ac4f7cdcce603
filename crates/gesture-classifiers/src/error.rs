use std::error::Error;
use std::fmt;

/// Failure categories surfaced by datasets, stages, models and the pipeline.
///
/// Public functions return `anyhow::Result`; the concrete category stays
/// reachable through `anyhow::Error::downcast_ref::<GestureError>()` even
/// after callers have wrapped it with their own context.
#[derive(Debug, Clone, PartialEq)]
pub enum GestureError {
    /// Invalid hyperparameter, rejected before any state changes.
    Configuration(String),
    /// Operation called in the wrong state (untrained, wrong dimensionality, bad fold index).
    Precondition(String),
    /// Malformed training or test data.
    Data(String),
    /// Non-finite values produced while estimating a model.
    Numerical(String),
    /// File could not be opened, read or written.
    Io(String),
    /// Unexpected token while parsing a structured file.
    Format { expected: String, found: String },
}

impl fmt::Display for GestureError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GestureError::Configuration(msg) => write!(f, "Invalid configuration: {}", msg),
            GestureError::Precondition(msg) => write!(f, "Precondition failed: {}", msg),
            GestureError::Data(msg) => write!(f, "Invalid data: {}", msg),
            GestureError::Numerical(msg) => write!(f, "Numerical failure: {}", msg),
            GestureError::Io(msg) => write!(f, "I/O failure: {}", msg),
            GestureError::Format { expected, found } => {
                write!(f, "Unexpected token: expected '{}' but found '{}'", expected, found)
            }
        }
    }
}

impl Error for GestureError {}

/// Returns the category of the innermost `GestureError` in an error chain, if any.
pub fn error_kind(err: &anyhow::Error) -> Option<&GestureError> {
    err.chain().find_map(|cause| cause.downcast_ref::<GestureError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn kind_survives_context_layers() {
        let err: anyhow::Result<()> = Err(GestureError::Precondition("model not trained".into()).into());
        let err = err
            .context("classifier failed to predict")
            .context("pipeline failed to predict")
            .unwrap_err();

        assert!(matches!(error_kind(&err), Some(GestureError::Precondition(_))));
        let rendered = format!("{:#}", err);
        assert!(rendered.starts_with("pipeline failed to predict"));
        assert!(rendered.contains("model not trained"));
    }

    #[test]
    fn format_error_names_both_tokens() {
        let err = GestureError::Format {
            expected: "NumStates:".into(),
            found: "NumState:".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unexpected token: expected 'NumStates:' but found 'NumState:'"
        );
    }
}
