use thiserror::Error;

/// Errors surfaced by the engine. Most are non-fatal and only ever show up
/// in statistics; see [`EngineError::is_fatal`] for which stop a stream.
#[derive(Error, Debug)]
pub enum EngineError {
    /// `transient` distinguishes a one-off hiccup (caller retries after
    /// skipping one tick, escalating to terminal only if the failure
    /// persists for 2 s) from an unrecoverable source failure (caller
    /// drains immediately).
    #[error("frame source error: {message}")]
    SourceError { message: String, transient: bool },

    #[error("frame sink error: {0}")]
    SinkError(String),

    #[error("batch collector backpressure: in_flight >= max_in_flight")]
    BackpressureDrop,

    #[error("detector request timed out after {0:?}")]
    DetectorTimeout(std::time::Duration),

    #[error("detector transport error: {0}")]
    DetectorTransport(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl EngineError {
    /// Whether this error is fatal for the owning stream. Per spec, only
    /// invariant violations stop a stream; everything else is counted and
    /// the pipeline degrades gracefully.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::InvariantViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
