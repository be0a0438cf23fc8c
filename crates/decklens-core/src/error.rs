//! Error types for the DeckLens processing layer.

use thiserror::Error;

/// Result type alias using DeckLens's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for DeckLens operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Processing task not found
    #[error("Task not found: {0}")]
    TaskNotFound(uuid::Uuid),

    /// Vision model call failed
    #[error("Vision error: {0}")]
    Vision(String),

    /// Text generation / scoring model call failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Page rendering failed (document to images)
    #[error("Render error: {0}")]
    Render(String),

    /// Task queue / lease error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("template".to_string());
        assert_eq!(err.to_string(), "Not found: template");
    }

    #[test]
    fn test_error_display_task_not_found() {
        let id = Uuid::nil();
        let err = Error::TaskNotFound(id);
        assert_eq!(err.to_string(), format!("Task not found: {}", id));
    }

    #[test]
    fn test_error_display_vision() {
        let err = Error::Vision("model timeout".to_string());
        assert_eq!(err.to_string(), "Vision error: model timeout");
    }

    #[test]
    fn test_error_display_inference() {
        let err = Error::Inference("empty response".to_string());
        assert_eq!(err.to_string(), "Inference error: empty response");
    }

    #[test]
    fn test_error_display_render() {
        let err = Error::Render("pdftoppm exited 1".to_string());
        assert_eq!(err.to_string(), "Render error: pdftoppm exited 1");
    }

    #[test]
    fn test_error_display_queue() {
        let err = Error::Queue("lease conflict".to_string());
        assert_eq!(err.to_string(), "Queue error: lease conflict");
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing DATABASE_URL".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing DATABASE_URL");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("I/O error:"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
