use thiserror::Error;

/// Main error type for graphrefine
#[derive(Error, Debug)]
pub enum GraphRefineError {
    /// Snapshot store errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// No usable response: network failure, timeout or non-2xx status
    #[error("Transport error: {0}")]
    Transport(String),

    /// A response arrived but its envelope could not be used
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Completion output that is not JSON or violates the expected payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// Embedding API errors
    #[error("Embedding API error: {0}")]
    Embedding(String),

    /// Errors reported by the graph write service
    #[error("Graph service error: {0}")]
    GraphService(String),

    /// Snapshot not found
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl GraphRefineError {
    /// True for failures where the remote side never produced a usable reply.
    pub fn is_transport(&self) -> bool {
        matches!(self, GraphRefineError::Transport(_))
    }

    /// True for failures that only affect the payload of one call.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GraphRefineError::Parse(_) | GraphRefineError::MalformedResponse(_)
        )
    }
}

/// Convenient Result type using GraphRefineError
pub type Result<T> = std::result::Result<T, GraphRefineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphRefineError::Config("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let err: GraphRefineError = rusqlite_err.into();
        assert!(matches!(err, GraphRefineError::Database(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GraphRefineError = io_err.into();
        assert!(matches!(err, GraphRefineError::Io(_)));
    }

    #[test]
    fn test_transport_vs_parse_labels() {
        let transport = GraphRefineError::Transport("timeout".to_string());
        let parse = GraphRefineError::Parse("no JSON object".to_string());
        assert!(transport.is_transport());
        assert!(!transport.is_recoverable());
        assert!(parse.is_recoverable());
        assert!(!parse.is_transport());
    }
}
