//! Error handling for the serving framework
//!
//! One error type covers the whole pipeline, with a mapping onto HTTP status
//! codes for the binary endpoint: client-side faults (undecodable requests,
//! shape mismatches, adapter failures) become 400, lifecycle refusals become
//! 503, everything else is a 500.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

/// Main error type for the serving framework
#[derive(Error, Debug)]
pub enum Error {
    /// The request body could not be decoded into the wire format
    #[error("failed to decode request: {0}")]
    Decode(String),

    /// A tensor shape disagrees with a declared or inferred shape
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// An element-type tag outside the supported enumeration
    #[error("unknown element type {0}")]
    UnknownType(u8),

    /// A reconstructed output would exceed the 2 GiB wire limit
    #[error("output is larger than 2 GiB")]
    TooLarge,

    /// The adapter returned an error or panicked
    #[error("apply failed: {0}")]
    ApplyFailed(String),

    /// Lifecycle: the server is not accepting work
    #[error("not ready")]
    NotReady,

    /// Lifecycle: the server is shutting down
    #[error("not alive")]
    NotAlive,

    /// A remote server answered with a non-200 status
    #[error("remote failed with {status}: {body}")]
    RemoteFailed { status: u16, body: String },

    /// The single-output convenience wrapper got a different output count
    #[error("{actual} outputs were returned - {expected} expected")]
    UnexpectedOutputCount { expected: usize, actual: usize },

    /// Socket or shared-memory transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The cache database could not be opened at startup
    #[error("could not open cache at '{path}': {reason}")]
    CacheOpenFailed { path: String, reason: String },

    /// A cache store operation failed mid-request (logged and swallowed
    /// by the pipeline, never surfaced to clients)
    #[error("cache error: {0}")]
    Cache(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a decode error
    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode(message.into())
    }

    /// Create a shape-mismatch error
    pub fn shape_mismatch<S: Into<String>>(message: S) -> Self {
        Self::ShapeMismatch(message.into())
    }

    /// Create an apply-failed error
    pub fn apply_failed<S: Into<String>>(message: S) -> Self {
        Self::ApplyFailed(message.into())
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache(message.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::Decode(_)
            | Error::ShapeMismatch(_)
            | Error::UnknownType(_)
            | Error::TooLarge
            | Error::ApplyFailed(_)
            | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::NotReady | Error::NotAlive => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}
