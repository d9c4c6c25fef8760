//! Sandbox records
//!
//! The single persisted entity. One record per sandbox, serialized camelCase
//! into `<sandboxes>/<id>/config.json`. After the initial write only
//! `status`, `containerId` and `mcp.port` change, always through the
//! lifecycle engine while it holds the record's lock.

use chrono::{DateTime, Utc};
use dcsandbox_mcp::CapabilityServerSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Lifecycle state of a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Creating,
    Running,
    Stopped,
    Error,
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl SandboxStatus {
    /// The transition table, checked before every status mutation.
    pub fn can_transition(self, to: SandboxStatus) -> bool {
        use SandboxStatus::*;
        matches!(
            (self, to),
            (Creating, Stopped)
                | (Creating, Running)
                | (Creating, Error)
                | (Stopped, Running)
                | (Stopped, Error)
                | (Running, Stopped)
                | (Running, Error)
        )
    }
}

/// Git source recorded at create time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub url: String,
    pub branch: String,
    /// Shallow clone location inside the git cache
    pub clone_path: PathBuf,
}

/// MCP settings embedded in the record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpSettings {
    pub enabled: bool,
    #[serde(default)]
    pub servers: Vec<CapabilityServerSpec>,
    /// Bound proxy port while the sandbox is running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Resource limits resolved at create time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    pub memory_bytes: u64,
    pub cpu_millicores: u64,
    pub disk_bytes: u64,
    /// Sandbox lifetime; 0 means no deadline (`--persist`)
    pub timeout_seconds: u64,
}

/// The persisted sandbox entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxRecord {
    pub id: String,
    pub name: String,
    pub status: SandboxStatus,
    pub created_at: DateTime<Utc>,
    pub template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,
    pub mcp: McpSettings,
    pub resources: ResourceLimits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    /// True when the user chose the name explicitly (cleanup.preserveNamed)
    #[serde(default)]
    pub named_explicitly: bool,
}

impl SandboxRecord {
    /// Generate a fresh sandbox id: 12 hex chars from a v4 UUID
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
    }

    /// Runtime-side container name for this sandbox
    pub fn container_name(&self) -> String {
        format!("dcsandbox-{}", self.id)
    }

    /// Image tag built for this sandbox
    pub fn image_tag(&self) -> String {
        format!("dcsandbox:{}", self.id)
    }

    /// Labels stamped on the sandbox container
    pub fn container_labels(&self) -> HashMap<String, String> {
        HashMap::from([
            (dcsandbox_runtime::MANAGED_LABEL.to_string(), "true".to_string()),
            (dcsandbox_runtime::SANDBOX_ID_LABEL.to_string(), self.id.clone()),
        ])
    }

    /// Deadline after which the reaper stops this sandbox, if any
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        if self.resources.timeout_seconds == 0 {
            return None;
        }
        Some(self.created_at + chrono::Duration::seconds(self.resources.timeout_seconds as i64))
    }

    /// Check the record invariants at a quiescent point.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        match self.status {
            SandboxStatus::Running => {
                if self.container_id.is_none() {
                    return Err(format!("running sandbox {} has no containerId", self.id));
                }
                if self.mcp.enabled && self.mcp.port.is_none() {
                    return Err(format!("running sandbox {} has no mcpPort", self.id));
                }
            }
            SandboxStatus::Stopped => {
                if self.mcp.port.is_some() {
                    return Err(format!("stopped sandbox {} still holds an mcpPort", self.id));
                }
            }
            _ => {}
        }
        Ok(())
    }
}
