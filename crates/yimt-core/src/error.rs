//! Error and warning types shared by the yimt crates.

use std::fmt;
use thiserror::Error;

/// Errors that can occur while building vocabularies, decoding or computing losses.
#[derive(Debug, Error)]
pub enum YimtError {
    /// Unknown vocabulary file format, or a line that does not follow it.
    #[error("Invalid vocabulary format: {0}")]
    InvalidFormat(String),

    /// An inputter does not have the type a feature requires.
    #[error("{0}")]
    TypeConstraint(String),

    /// A requested optional feature has no supporting data.
    #[error("{0}")]
    Capability(String),

    /// Invalid or inconsistent configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed alignment string.
    #[error("Invalid alignment: {0}")]
    InvalidAlignment(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Unexpected tensor shape: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Failure raised by an encoder, decoder or inputter implementation.
    #[error("Model failure: {0}")]
    Model(#[from] anyhow::Error),
}

/// Result type for yimt operations.
pub type YimtResult<T> = Result<T, YimtError>;

/// Warning emitted for recoverable situations, such as a duplicate vocabulary
/// entry or a guided alignment that cannot be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct YimtWarning {
    pub message: String,
    pub suggestion: Option<String>,
}

impl YimtWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Logs the warning and hands it back so callers can also collect it.
    pub fn emit(self) -> Self {
        log::warn!("{}", self);
        self
    }
}

impl fmt::Display for YimtWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Warning: {}", self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " {}", suggestion)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_display() {
        let warning = YimtWarning::new("guided alignment skipped")
            .with_suggestion("Use a decoder that returns attention.");
        assert_eq!(
            warning.to_string(),
            "Warning: guided alignment skipped Use a decoder that returns attention."
        );
        assert_eq!(YimtWarning::new("plain").to_string(), "Warning: plain");
    }

    #[test]
    fn test_error_display() {
        let err = YimtError::InvalidConfig("n_best cannot be greater than beam_width".into());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: n_best cannot be greater than beam_width"
        );
        let err = YimtError::Capability("no alignment".into());
        assert_eq!(err.to_string(), "no alignment");
    }

    #[test]
    fn test_io_error_converts() {
        fn open() -> YimtResult<std::fs::File> {
            Ok(std::fs::File::open("/definitely/not/here.vocab")?)
        }
        assert!(matches!(open(), Err(YimtError::Io(_))));
    }
}
