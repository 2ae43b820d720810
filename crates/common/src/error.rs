//! Error types shared across Blinkcap crates.

/// Top-level error type for Blinkcap operations.
///
/// The variants split into two families with different propagation
/// rules: session-fatal conditions (`SourceUnavailable`,
/// `Configuration`, `Session`) reject `start` and leave the session
/// idle with resources released, while contained conditions
/// (`CaptureTick`, `FlushWarning`, `Decode`) are logged at the point
/// of failure and never abort the surrounding loop.
#[derive(Debug, thiserror::Error)]
pub enum BlinkcapError {
    #[error("Capture source unavailable: {message}")]
    SourceUnavailable { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Session error: {message}")]
    Session { message: String },

    #[error("Capture tick failed: {message}")]
    CaptureTick { message: String },

    #[error("Encoder flush warning: {message}")]
    FlushWarning { message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Platform error: {message}")]
    Platform { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using BlinkcapError.
pub type BlinkcapResult<T> = Result<T, BlinkcapError>;

impl BlinkcapError {
    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            message: msg.into(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session {
            message: msg.into(),
        }
    }

    pub fn capture_tick(msg: impl Into<String>) -> Self {
        Self::CaptureTick {
            message: msg.into(),
        }
    }

    pub fn flush_warning(msg: impl Into<String>) -> Self {
        Self::FlushWarning {
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform {
            message: msg.into(),
        }
    }

    /// Whether this error is fatal to session start (as opposed to a
    /// contained per-tick or per-unit condition).
    pub fn is_session_fatal(&self) -> bool {
        !matches!(
            self,
            Self::CaptureTick { .. } | Self::FlushWarning { .. } | Self::Decode { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contained_errors_are_not_session_fatal() {
        assert!(!BlinkcapError::capture_tick("camera hiccup").is_session_fatal());
        assert!(!BlinkcapError::flush_warning("late flush").is_session_fatal());
        assert!(!BlinkcapError::decode("truncated unit").is_session_fatal());

        assert!(BlinkcapError::source_unavailable("no device").is_session_fatal());
        assert!(BlinkcapError::configuration("zero width").is_session_fatal());
        assert!(BlinkcapError::session("already capturing").is_session_fatal());
    }
}
