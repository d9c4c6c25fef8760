//! Error types for the MCP broker

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("MCP port range exhausted")]
    PortExhausted,

    #[error("Failed to bind MCP listener on port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },

    #[error("Proxy already running for sandbox {0}")]
    AlreadyRunning(String),

    #[error("Capability server '{0}' failed to spawn: {1}")]
    SpawnFailed(String, String),

    #[error("Capability server '{0}' is not available")]
    ServerGone(String),

    #[error("Forwarded request failed: {0}")]
    Forward(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
