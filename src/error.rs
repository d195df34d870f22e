//! Error types for target-stitch.

use thiserror::Error;

/// Top-level error for the batch-dispatch and state-acknowledgement engine.
///
/// The first of these ever observed is latched into the runtime's
/// `first_failure` cell (see [`crate::runtime::Runtime`]); everything after
/// it is dropped on the floor, per §7/§9 of the design.
#[derive(Debug, Clone, Error)]
pub enum TargetStitchError {
    #[error("A single record is larger than the Stitch API limit of {max_mb} Mb")]
    BatchTooLarge { max_mb: u64 },

    #[error("Error persisting data to Stitch: {status}: {body}")]
    ResponseError { status: u16, body: String },

    #[error("Error connecting to Stitch: {summary}")]
    ConnectError { summary: String },

    #[error("Timeout sending to Stitch")]
    Timeout,

    #[error("Record does not pass schema validation: message {index}: {detail}")]
    ValidationError { index: usize, detail: String },

    #[error("{0}")]
    ConfigError(String),

    #[error("line {line}: {detail}")]
    ParseError { line: usize, detail: String },
}

impl TargetStitchError {
    /// Classify a completed HTTP response as a fatal [`TargetStitchError`].
    ///
    /// `body` is the stringified response body (best-effort; a `message`
    /// field is preferred per §6, falling back to the raw body text).
    pub fn from_response(status: u16, body: String) -> Self {
        TargetStitchError::ResponseError { status, body }
    }

    /// Whether this error is a 4xx response - these are never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(self, TargetStitchError::ResponseError { status, .. } if (400..500).contains(status))
    }
}

impl From<reqwest::Error> for TargetStitchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TargetStitchError::Timeout
        } else {
            TargetStitchError::ConnectError {
                summary: err.to_string(),
            }
        }
    }
}
