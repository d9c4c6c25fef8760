//! Common types for runtime drivers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Container ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        if self.0.len() > 12 {
            &self.0[..12]
        } else {
            &self.0
        }
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Image ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(pub String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supported container runtimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Docker,
    Podman,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Podman => write!(f, "podman"),
        }
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            _ => Err(format!("Unknown container runtime: {}", s)),
        }
    }
}

/// Runtime-side container state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Restarting => write!(f, "restarting"),
            Self::Removing => write!(f, "removing"),
            Self::Exited => write!(f, "exited"),
            Self::Dead => write!(f, "dead"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<&str> for ContainerState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

/// Image build configuration
#[derive(Debug, Clone, Default)]
pub struct BuildConfig {
    /// Path to the build context
    pub context: PathBuf,
    /// Dockerfile path relative to the context
    pub dockerfile: String,
    /// Image tag
    pub tag: String,
    /// Build arguments
    pub build_args: HashMap<String, String>,
    /// Labels to apply
    pub labels: HashMap<String, String>,
    /// Skip the build cache
    pub no_cache: bool,
}

/// Bind mount
#[derive(Debug, Clone)]
pub struct BindMount {
    /// Host path
    pub source: PathBuf,
    /// Path inside the container
    pub target: String,
    pub read_only: bool,
}

/// Container creation spec
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Image to run
    pub image: String,
    /// Container name
    pub name: Option<String>,
    /// Command override; None keeps the image default
    pub cmd: Option<Vec<String>>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// Bind mounts
    pub mounts: Vec<BindMount>,
    /// Ports exposed by the container (tcp)
    pub exposed_ports: Vec<u16>,
    /// Labels
    pub labels: HashMap<String, String>,
    /// Memory limit in bytes; 0 = unlimited
    pub memory_bytes: i64,
    /// CPU limit in units of 10^-9 CPUs; 0 = unlimited
    pub nano_cpus: i64,
    /// Network mode
    pub network_mode: Option<String>,
    /// Remove the container automatically on exit
    pub auto_remove: bool,
}

/// Exec configuration
#[derive(Debug, Clone, Default)]
pub struct ExecConfig {
    /// Command to execute
    pub cmd: Vec<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// User to run as
    pub user: Option<String>,
    /// Data written to the process's stdin before closing it
    pub stdin: Option<String>,
}

/// Result of an exec
#[derive(Debug)]
pub struct ExecResult {
    /// Exit code
    pub exit_code: i64,
    /// Combined stdout/stderr output
    pub output: String,
}

/// Summary entry from a container listing
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub created: i64,
    pub labels: HashMap<String, String>,
}

impl ContainerSummary {
    /// Owning sandbox id, when the container was created by dcsandbox
    pub fn sandbox_id(&self) -> Option<&str> {
        self.labels.get(crate::SANDBOX_ID_LABEL).map(|s| s.as_str())
    }
}

/// Detailed container information
#[derive(Debug, Clone)]
pub struct ContainerDetails {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub created: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub exit_code: Option<i64>,
    pub labels: HashMap<String, String>,
    pub env: Vec<String>,
}

/// Log stream configuration
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Follow the log output
    pub follow: bool,
    /// Number of lines from the end; None = all
    pub tail: Option<u64>,
}

/// Decoded log stream
pub struct LogStream {
    pub stream: Pin<Box<dyn AsyncRead + Send>>,
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream").finish_non_exhaustive()
    }
}

/// Driver information
#[derive(Debug, Clone)]
pub struct DriverInfo {
    pub runtime: RuntimeKind,
    pub api_version: String,
}
