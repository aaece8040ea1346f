use std::fmt;
use thiserror::Error;

/// Sub-reason for output-validator rejections. The validator is fail-closed:
/// the first gate that fails wins and no repair is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    SchemaViolation,
    UnknownTicker,
    WeightsUnnormalized,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaViolation => "SchemaViolation",
            Self::UnknownTicker => "UnknownTicker",
            Self::WeightsUnnormalized => "WeightsUnnormalized",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline failure taxonomy. Display output doubles as the persisted
/// `error_detail`, so every message starts with the stable kind code.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("InvalidConstraints: {0}")]
    InvalidConstraints(String),

    #[error("RequestTooLarge: prompt is {size} bytes (max {max})")]
    RequestTooLarge { size: usize, max: usize },

    #[error("UpstreamUnavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("NoStructuredOutput: model response contains no JSON object; head: {snippet}")]
    NoStructuredOutput { snippet: String },

    #[error("InvalidModelOutput/{reason}: {detail}")]
    InvalidModelOutput { reason: RejectReason, detail: String },

    #[error("PersistenceFailure: {0}")]
    PersistenceFailure(String),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConstraints(_) => "InvalidConstraints",
            Self::RequestTooLarge { .. } => "RequestTooLarge",
            Self::UpstreamUnavailable(_) => "UpstreamUnavailable",
            Self::Timeout(_) => "Timeout",
            Self::NoStructuredOutput { .. } => "NoStructuredOutput",
            Self::InvalidModelOutput { .. } => "InvalidModelOutput",
            Self::PersistenceFailure(_) => "PersistenceFailure",
        }
    }

    /// Transient failures are worth a whole new pipeline run under a fresh
    /// correlation id; content and caller errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable(_) | Self::Timeout(_) | Self::PersistenceFailure(_)
        )
    }
}
