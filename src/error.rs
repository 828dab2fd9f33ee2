//! Error types for array streaming.
//!
//! All errors implement `std::error::Error` and carry enough context to decide
//! whether the failure is confined to one message or ends the connection.
//!
//! ## Error Categories
//!
//! - **Message Errors**: a single header/payload pair could not be decoded
//! - **State Errors**: an operation ran before `bind`/`connect`, or twice
//! - **Connection Errors**: the socket was torn down or a receive timed out
//! - **Configuration Errors**: bad endpoints or unreadable config files
//! - **Render Errors**: a renderer rejected a frame
//! - **Type Errors**: typed access that does not match an array's dtype or shape
//! - **Worker Errors**: an acquisition task or display thread panicked
//!
//! ## Recovery
//!
//! ```rust
//! use posewire::StreamError;
//!
//! let error = StreamError::connection_closed("publisher went away");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias for streaming operations.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Main error type for streaming operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("Cannot {operation}: endpoint is not connected")]
    NotConnected { operation: &'static str },

    #[error("Connection closed: {reason}")]
    ConnectionClosed {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Receive timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Endpoint already bound to {endpoint}")]
    AlreadyBound { endpoint: String },

    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("I/O error during {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {details}")]
    Config { details: String },

    #[error("Render error: {details}")]
    Render { details: String },

    #[error("Type mismatch: {details}")]
    TypeMismatch { details: String },

    #[error("Worker failed: {details}")]
    Worker { details: String },
}

impl StreamError {
    /// Returns whether this error is potentially recoverable through retry.
    ///
    /// Retrying here always means recreating the endpoint; nothing in the crate
    /// retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::ConnectionClosed { .. } => true,
            StreamError::Timeout { .. } => true,
            StreamError::Io { .. } => true,
            StreamError::MalformedMessage { .. } => false,
            StreamError::NotConnected { .. } => false,
            StreamError::AlreadyBound { .. } => false,
            StreamError::InvalidEndpoint { .. } => false,
            StreamError::Config { .. } => false,
            StreamError::Render { .. } => false,
            StreamError::TypeMismatch { .. } => false,
            StreamError::Worker { .. } => false,
        }
    }

    /// Returns whether the error ends the stream it occurred on.
    ///
    /// A malformed message or a failed render only costs one frame.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            StreamError::MalformedMessage { .. }
                | StreamError::Render { .. }
                | StreamError::TypeMismatch { .. }
        )
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StreamError::MalformedMessage { .. } => vec![
                "Check that publisher and subscriber use the same metadata schema",
                "Verify both ends share the same native byte order",
                "Inspect the publisher for truncated payloads",
            ],
            StreamError::NotConnected { .. } => vec![
                "Call connect() before receiving",
                "Call bind() before sending",
            ],
            StreamError::ConnectionClosed { .. } => vec![
                "Ensure the publisher is running",
                "Recreate the subscriber and frame feed to reconnect",
            ],
            StreamError::Timeout { .. } => vec![
                "Increase the receive timeout",
                "Check that the publisher is still producing frames",
                "Verify the subscription filter matches the published messages",
            ],
            StreamError::AlreadyBound { .. } => vec![
                "Create a new publisher for each endpoint",
            ],
            StreamError::InvalidEndpoint { .. } => vec![
                "Use the form tcp://<host>:<port>",
                "Use '*' as the host when binding on all interfaces",
            ],
            StreamError::Io { .. } => vec![
                "Check that the port is not already in use",
                "Verify the host is reachable",
                "Check firewall rules for the endpoint port",
            ],
            StreamError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare field names against the documented defaults",
            ],
            StreamError::Render { .. } => vec![
                "Check overlay coordinates against the frame size",
                "Verify the renderer accepts the frame's dtype and shape",
            ],
            StreamError::TypeMismatch { .. } => vec![
                "Check the array dtype before extracting typed values",
                "Check the index rank against the array shape",
            ],
            StreamError::Worker { .. } => vec![
                "Check the logs for a panic in the renderer or frame source",
                "Rebuild the pipeline with a fresh feed",
            ],
        }
    }

    /// Helper constructor for malformed message errors.
    pub fn malformed(reason: impl Into<String>) -> Self {
        StreamError::MalformedMessage { reason: reason.into() }
    }

    /// Helper constructor for connection-closed errors.
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        StreamError::ConnectionClosed { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection-closed errors with source.
    pub fn connection_closed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        StreamError::ConnectionClosed { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for I/O errors with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StreamError::Io { context: context.into(), source }
    }

    /// Helper constructor for endpoint parse errors.
    pub fn invalid_endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        StreamError::InvalidEndpoint { endpoint: endpoint.into(), reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(details: impl Into<String>) -> Self {
        StreamError::Config { details: details.into() }
    }

    /// Helper constructor for render errors.
    pub fn render(details: impl Into<String>) -> Self {
        StreamError::Render { details: details.into() }
    }

    /// Helper constructor for worker failures.
    pub fn worker(details: impl Into<String>) -> Self {
        StreamError::Worker { details: details.into() }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => {
                StreamError::connection_closed_with_source("socket closed by peer", Box::new(err))
            }
            _ => StreamError::Io { context: "socket operation".to_string(), source: err },
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::MalformedMessage { reason: format!("invalid JSON header: {err}") }
    }
}

impl From<serde_yaml_ng::Error> for StreamError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        StreamError::Config { details: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            reason in "[a-z ]{1,40}",
            millis in 1u64..60_000u64,
          ) {
            let malformed = StreamError::malformed(reason.clone());
            let closed = StreamError::connection_closed(reason.clone());
            let timeout = StreamError::Timeout { duration: Duration::from_millis(millis) };

            prop_assert!(malformed.to_string().contains(&reason));
            prop_assert!(closed.to_string().contains(&reason));
            prop_assert!(!timeout.to_string().is_empty());
          }

          #[test]
          fn io_conversion_separates_closed_sockets_from_other_failures(message in ".*") {
            let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, message.clone());
            let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, message);

            let is_closed = matches!(StreamError::from(eof), StreamError::ConnectionClosed { .. });
            let is_io = matches!(StreamError::from(refused), StreamError::Io { .. });
            prop_assert!(is_closed);
            prop_assert!(is_io);
          }
        }
    }

    #[test]
    fn terminal_classification() {
        assert!(!StreamError::malformed("short payload").is_terminal());
        assert!(!StreamError::render("bad overlay").is_terminal());
        assert!(StreamError::connection_closed("eof").is_terminal());
        assert!(StreamError::Timeout { duration: Duration::from_secs(1) }.is_terminal());
        assert!(StreamError::NotConnected { operation: "receive" }.is_terminal());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<StreamError>();

        let error = StreamError::connection_closed("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn recovery_methods_work() {
        let closed = StreamError::connection_closed("test");
        let malformed = StreamError::malformed("test");

        assert!(closed.is_retryable());
        assert!(!malformed.is_retryable());

        for suggestion in closed.recovery_suggestions() {
            assert!(suggestion.len() > 5);
        }
        assert!(!malformed.recovery_suggestions().is_empty());
    }

    #[test]
    fn source_chain_is_preserved() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = StreamError::from(io_err);

        let source = std::error::Error::source(&err).expect("closed error keeps its source");
        assert_eq!(source.to_string(), "reset by peer");
    }
}
