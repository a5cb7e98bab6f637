//! Custom error types for the application.
//!
//! This module defines the primary error type, `EngineError`, used across the
//! whole crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures a session can run
//! into, from I/O and configuration issues to adapter-specific problems.
//!
//! Trial interruption (pause or abort) is deliberately NOT an error: the
//! protocol reports it through [`crate::experiment::TrialOutcome`], and only
//! genuine hardware or I/O failures travel through `EngineError`.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Display error: {0}")]
    Display(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Log write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Engine is busy: {0}")]
    Busy(String),

    #[error("Engine has not been set up")]
    NotSetUp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert_via_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn config_errors_carry_their_message() {
        let err = EngineError::Config("repetitions must be >= 1".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: repetitions must be >= 1"
        );
    }
}
