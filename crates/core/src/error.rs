/// Result alias that carries the custom [`PresenterError`] type.
pub type Result<T> = std::result::Result<T, PresenterError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum PresenterError {
    /// Free-form failure reported by a collaborator (decoder, surface, audio
    /// backend) that has no richer error of its own.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// A timeline row could not be turned into a stimulus.
    #[error("timeline line {line}: {reason}")]
    Timeline { line: usize, reason: String },
    /// The trigger box did not complete a command or the handshake.
    #[error("trigger device: {0}")]
    Trigger(String),
    /// Reading the timeline or writing the event log as CSV failed.
    #[error("{0}")]
    Csv(#[from] csv::Error),
    /// Preset files are JSON.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl PresenterError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn timeline(line: usize, reason: impl Into<String>) -> Self {
        Self::Timeline {
            line,
            reason: reason.into(),
        }
    }
}

impl From<&str> for PresenterError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for PresenterError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<serialport::Error> for PresenterError {
    fn from(value: serialport::Error) -> Self {
        Self::Trigger(value.to_string())
    }
}
