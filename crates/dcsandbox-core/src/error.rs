//! Error types for the lifecycle engine
//!
//! Every variant maps to a stable, externally observable code; messages are
//! free to change. Variants carry the sandbox id where one is relevant.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid memory limit '{0}'")]
    InvalidMemory(String),

    #[error("Invalid CPU limit {0} (must be between 1 and {1})")]
    InvalidCpu(f64, f64),

    #[error("Invalid timeout {0} minutes (must be between 30 and 3600)")]
    InvalidTimeout(u64),

    #[error("Invalid sandbox name '{0}'")]
    InvalidName(String),

    #[error("Sandbox name '{0}' is already in use")]
    DuplicateName(String),

    #[error("Malformed sandbox record at {0}")]
    MalformedRecord(String),

    #[error("Sandbox not found: {0}")]
    NotFound(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Sandbox {id}: cannot {op} while {status}")]
    InvalidState {
        id: String,
        op: &'static str,
        status: String,
    },

    #[error("Clone of {url} failed: {message}")]
    CloneFailed { url: String, message: String },

    #[error("Image build failed for sandbox {id}: {message}")]
    BuildFailed { id: String, message: String },

    #[error("MCP port range exhausted")]
    PortExhausted,

    #[error("Workspace setup failed for sandbox {id}: {message}")]
    WorkspaceSetup { id: String, message: String },

    #[error("Sandbox {0} has no container")]
    NoContainer(String),

    #[error("Container runtime error: {0}")]
    Runtime(#[from] dcsandbox_runtime::RuntimeError),

    #[error("Record I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] dcsandbox_config::ConfigError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMemory(_) => "VALIDATION_MEMORY",
            Self::InvalidCpu(_, _) => "VALIDATION_CPU",
            Self::InvalidTimeout(_) => "VALIDATION_TIMEOUT",
            Self::InvalidName(_) => "VALIDATION_NAME",
            Self::DuplicateName(_) => "DUPLICATE_NAME",
            Self::MalformedRecord(_) => "VALIDATION_RECORD",
            Self::NotFound(_) => "NOT_FOUND",
            Self::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::CloneFailed { .. } => "CLONE_FAILED",
            Self::BuildFailed { .. } => "BUILD_FAILED",
            Self::PortExhausted => "PORT_EXHAUSTED",
            Self::WorkspaceSetup { .. } => "WORKSPACE_SETUP_FAILED",
            Self::NoContainer(_) => "NO_CONTAINER",
            Self::Runtime(_) => "RUNTIME_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Config(_) => "VALIDATION_CONFIG",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl From<dcsandbox_mcp::BrokerError> for EngineError {
    fn from(e: dcsandbox_mcp::BrokerError) -> Self {
        match e {
            dcsandbox_mcp::BrokerError::PortExhausted => EngineError::PortExhausted,
            other => EngineError::Runtime(dcsandbox_runtime::RuntimeError::Runtime(
                other.to_string(),
            )),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(EngineError::PortExhausted.code(), "PORT_EXHAUSTED");
        assert_eq!(
            EngineError::DuplicateName("x".into()).code(),
            "DUPLICATE_NAME"
        );
        assert_eq!(
            EngineError::CloneFailed {
                url: "u".into(),
                message: "m".into()
            }
            .code(),
            "CLONE_FAILED"
        );
        assert_eq!(EngineError::NotFound("id".into()).code(), "NOT_FOUND");
    }
}
