//! Error types for runtime drivers

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Failed to connect to container runtime: {0}")]
    Connection(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Build failed: {0}")]
    Build(String),

    #[error("Exec failed: {0}")]
    Exec(String),

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Invalid runtime configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout waiting for runtime operation")]
    Timeout,
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(e: bollard::errors::Error) -> Self {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => RuntimeError::ContainerNotFound(message),
            other => RuntimeError::Runtime(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
