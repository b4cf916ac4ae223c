//! Error types for the file tailing engine.

use thiserror::Error;

/// The main error type for tailing operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors when reading files or writing offsets.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory watching errors from the notify crate.
    #[error("File watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// Invalid or inconsistent configuration.
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// An include or exclude pattern that is not a valid glob.
    #[error("Invalid glob pattern '{pattern}': {message}")]
    InvalidGlob { pattern: String, message: String },

    /// A multiline pattern that does not compile.
    #[error("Invalid multiline pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The configured charset name could not be resolved.
    #[error("Unsupported encoding '{name}'")]
    UnsupportedEncoding { name: String },

    /// Offset persistence failures.
    #[error("Persistence error: {0}")]
    Persistence(#[from] serde_json::Error),

    /// The record sink has been closed or dropped.
    #[error("Stream closed")]
    StreamClosed,

    /// Failures collected while shutting the operator down.
    #[error("Shutdown completed with {} error(s): {}", errors.len(), errors.join("; "))]
    Shutdown { errors: Vec<String> },
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }
}

/// A convenient Result type for tailing operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_error = IoError::new(ErrorKind::NotFound, "File not found");
        let error: Error = io_error.into();

        match error {
            Error::Io(_) => {}
            _ => panic!("Expected Error::Io variant"),
        }

        assert!(error.to_string().contains("I/O error"));
        assert!(error.to_string().contains("File not found"));
    }

    #[test]
    fn test_watcher_error_conversion() {
        let notify_error = notify::Error::generic("Test watcher error");
        let error: Error = notify_error.into();

        match error {
            Error::Watcher(_) => {}
            _ => panic!("Expected Error::Watcher variant"),
        }

        assert!(error.to_string().contains("File watcher error"));
        assert!(error.to_string().contains("Test watcher error"));
    }

    #[test]
    fn test_regex_error_conversion() {
        let regex_error = regex::Regex::new("(unclosed").unwrap_err();
        let error: Error = regex_error.into();

        match error {
            Error::InvalidPattern(_) => {}
            _ => panic!("Expected Error::InvalidPattern variant"),
        }

        assert!(error.to_string().starts_with("Invalid multiline pattern"));
    }

    #[test]
    fn test_config_error() {
        let error = Error::config("`include` must not be empty");
        assert_eq!(
            error.to_string(),
            "Invalid configuration: `include` must not be empty"
        );
    }

    #[test]
    fn test_invalid_glob_error() {
        let error = Error::InvalidGlob {
            pattern: "/var/log/[".to_string(),
            message: "invalid range pattern".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "Invalid glob pattern '/var/log/[': invalid range pattern"
        );
    }

    #[test]
    fn test_shutdown_error_lists_all_failures() {
        let error = Error::Shutdown {
            errors: vec!["first".to_string(), "second".to_string()],
        };

        assert_eq!(
            error.to_string(),
            "Shutdown completed with 2 error(s): first; second"
        );
    }

    #[test]
    fn test_persistence_error_conversion() {
        let json_error = serde_json::from_str::<u64>("not json").unwrap_err();
        let error: Error = json_error.into();

        assert!(matches!(error, Error::Persistence(_)));
        assert!(error.to_string().starts_with("Persistence error"));
    }

    #[test]
    fn test_stream_closed_error() {
        let error = Error::StreamClosed;
        assert_eq!(error.to_string(), "Stream closed");
        assert_eq!(format!("{:?}", error), "StreamClosed");
    }

    #[test]
    fn test_error_send_sync_traits() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
