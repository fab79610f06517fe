//! Error types for the stream engine.
//!
//! The same type plays two roles: it is the `Err` side of composition and
//! protocol calls (connecting stages, emitting without demand), and it is the
//! opaque failure payload carried from a source to its sink through
//! `Outlet::fail` / `SinkLogic::on_upstream_failure`.

use std::sync::Arc;

use thiserror::Error;

/// The main error type for the stream engine.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// `emit` was called while the connection had no outstanding demand
    #[error("no outstanding demand on the connection")]
    NoDemand,

    /// A signal was sent over a connection that already reached its terminal state
    #[error("connection is closed")]
    Closed,

    /// A single-use stage was connected more than once
    #[error("stage can only be connected once")]
    AlreadyConnected,

    /// A configuration value was rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A stage failed while producing or transforming elements
    #[error("stage failed: {0}")]
    Stage(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Create a stage failure from any error type
    pub fn stage<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Stage(Arc::new(error))
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// Create a configuration error with a message
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Error::InvalidConfig(message.into())
    }

    /// Whether this error is a protocol rejection rather than a payload failure.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::NoDemand | Error::Closed)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for converting foreign errors into a stage failure
pub trait IntoError<T> {
    fn into_stage_error(self) -> Result<T>;
}

impl<T, E> IntoError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_stage_error(self) -> Result<T> {
        self.map_err(Error::stage)
    }
}
