//! Common error types for solopool.
//!
//! This module provides a centralized Error enum using thiserror, with
//! conversions from underlying error types used throughout the crate.

use thiserror::Error;

/// Main error type for solopool operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Node RPC transport or application errors
    #[error("RPC error: {0}")]
    Rpc(String),

    /// ZMQ subscription errors
    #[error("ZMQ error: {0}")]
    Zmq(String),

    /// Stratum protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Payout address errors
    #[error("Address error: {0}")]
    Address(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Rpc(e.to_string())
    }
}

impl From<zeromq::ZmqError> for Error {
    fn from(e: zeromq::ZmqError) -> Self {
        Error::Zmq(e.to_string())
    }
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
