//! Error types for configuration and transport lifecycle.
//!
//! Protocol-level failures are [`RpcError`](crate::core::jsonrpc::RpcError)
//! values; tool failures are [`ToolError`](crate::core::registry::ToolError).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("HOST must be a loopback address, got {0:?}")]
    NonLoopbackHost(String),

    #[error("failed to read tool config {path}: {source}")]
    ToolConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse tool config {path}: {source}")]
    ToolConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport is already running")]
    AlreadyRunning,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = TransportError> = std::result::Result<T, E>;
