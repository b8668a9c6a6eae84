//! Error types for shelfstore

use std::io;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error talking to a networked store
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed RESP frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error reply sent by a remote store
    #[error("Remote error: {0}")]
    Remote(String),

    /// Store cannot currently serve requests
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Connect or request deadline exceeded
    #[error("Operation timed out")]
    Timeout,

    /// INCR on a value that is not a decimal integer
    #[error("Value at '{0}' is not an integer")]
    NotAnInteger(String),

    /// Invalid glob pattern
    #[error("Invalid pattern: {0}")]
    Pattern(String),
}

impl Error {
    /// True for failures of the connection itself (as opposed to a
    /// well-formed error reply from the remote side).
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Protocol(_) | Error::Unavailable(_) | Error::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_classification() {
        assert!(Error::Timeout.is_connection());
        assert!(Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).is_connection());
        assert!(!Error::Remote("ERR wrong type".into()).is_connection());
        assert!(!Error::NotAnInteger("k".into()).is_connection());
    }
}
