use thiserror::Error;

/// Failures raised by the analysis core.
///
/// Data-quality anomalies (NaN correlations, unmapped labels, empty groups)
/// are never represented here; they travel as values in the results.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("input '{input}' row {row} is missing required field '{field}'")]
    MissingField {
        input: String,
        field: String,
        row: usize,
    },

    #[error("required artifact '{artifact}' is missing; run `assetcheck {producer}` first")]
    MissingArtifact {
        artifact: String,
        producer: String,
    },

    #[error("input '{input}' is malformed: {reason}")]
    MalformedInput { input: String, reason: String },

    #[error("{what} has shape {actual}, expected {expected}")]
    ShapeMismatch {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("similarity matrix self-similarity at index {index} is {value}, expected 0")]
    DiagonalIntegrity { index: usize, value: f64 },

    #[error("{service} failed: {reason}")]
    ExternalService { service: String, reason: String },

    #[error("invalid threshold {name}={value}: {reason}")]
    InvalidThreshold {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
}

impl AnalysisError {
    pub fn shape(what: impl Into<String>, expected: impl ToString, actual: impl ToString) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn external(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            reason: reason.into(),
        }
    }
}
