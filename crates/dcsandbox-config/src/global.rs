//! Global configuration for dcsandbox
//!
//! Located at `~/.config/dcsandbox/config.yaml`

use crate::{ConfigError, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global dcsandbox configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GlobalConfig {
    pub defaults: DefaultsConfig,
    pub container: ContainerConfig,
    pub mcp: McpConfig,
    pub cleanup: CleanupConfig,
    pub templates: TemplatesConfig,
}

/// Default resource settings for new sandboxes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DefaultsConfig {
    /// Memory limit string (`^\d+[KMGT]?$`, case-insensitive)
    pub memory: String,
    /// CPU cores (fractional allowed, 1..=cpu upper bound)
    pub cpu: f64,
    /// Disk limit string, same grammar as memory
    pub disk: String,
    /// Sandbox lifetime in minutes
    pub timeout: u64,
    /// Remove stopped/errored sandboxes automatically on exit
    pub auto_cleanup: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            memory: "2G".to_string(),
            cpu: 2.0,
            disk: "10G".to_string(),
            timeout: 120,
            auto_cleanup: false,
        }
    }
}

/// Container runtime selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerConfig {
    /// Runtime name ("docker" or "podman")
    pub runtime: String,
    /// Network mode passed to the runtime
    pub network: String,
    /// Runtime API socket; empty means the platform default / DOCKER_HOST
    pub socket: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            network: "bridge".to_string(),
            socket: String::new(),
        }
    }
}

/// MCP proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct McpConfig {
    /// Host the per-sandbox WebSocket listeners bind to
    pub proxy_host: String,
    /// Inclusive port range reserved for sandbox proxies
    pub port_range: [u16; 2],
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            proxy_host: "127.0.0.1".to_string(),
            port_range: [50_000, 60_000],
        }
    }
}

/// Cleanup policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CleanupConfig {
    /// How long a stopped sandbox may sit idle before cleanup considers it,
    /// `<number>{s,m,h,d}`
    pub inactive_timeout: String,
    /// Run cleanup when the host process exits
    pub on_exit: bool,
    /// Skip sandboxes whose name was chosen explicitly by the user
    pub preserve_named: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            inactive_timeout: "24h".to_string(),
            on_exit: false,
            preserve_named: true,
        }
    }
}

/// Template lookup settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TemplatesConfig {
    /// Override for the custom templates directory
    pub custom_path: Option<PathBuf>,
    /// Refresh built-in templates on upgrade
    pub auto_update: bool,
}

impl GlobalConfig {
    /// Load global configuration from the default path
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load global configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParseError {
                path: path.clone(),
                source: e,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.clone(),
                source: e,
            })?;
        }

        let content =
            serde_yaml::to_string(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.clone(),
            source: e,
        })
    }

    fn validate(&self) -> Result<()> {
        let [lo, hi] = self.mcp.port_range;
        if lo == 0 || lo > hi {
            return Err(ConfigError::Invalid(format!(
                "mcp.portRange [{}, {}] is not a valid range",
                lo, hi
            )));
        }
        crate::parse_duration(&self.cleanup.inactive_timeout)?;
        Ok(())
    }

    /// `~/.config/dcsandbox/config.yaml`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.yaml"))
    }

    /// `~/.config/dcsandbox`
    pub fn config_dir() -> Result<PathBuf> {
        let base = BaseDirs::new().ok_or(ConfigError::NoHomeDir)?;
        Ok(base.home_dir().join(".config").join("dcsandbox"))
    }

    /// Custom templates directory, `~/.config/dcsandbox/templates` unless
    /// overridden by `templates.customPath`
    pub fn templates_dir(&self) -> Result<PathBuf> {
        if let Some(ref custom) = self.templates.custom_path {
            return Ok(custom.clone());
        }
        Ok(Self::config_dir()?.join("templates"))
    }

    /// `~/.dcsandbox` — sandbox records, workspaces and the git cache
    pub fn data_dir() -> Result<PathBuf> {
        let base = BaseDirs::new().ok_or(ConfigError::NoHomeDir)?;
        Ok(base.home_dir().join(".dcsandbox"))
    }

    /// `~/.dcsandbox/sandboxes`
    pub fn sandboxes_dir() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("sandboxes"))
    }

    /// `~/.dcsandbox/git-cache`
    pub fn git_cache_dir() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("git-cache"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GlobalConfig::default();
        assert_eq!(config.defaults.memory, "2G");
        assert_eq!(config.defaults.timeout, 120);
        assert_eq!(config.container.runtime, "docker");
        assert_eq!(config.mcp.port_range, [50_000, 60_000]);
        assert!(config.cleanup.preserve_named);
    }

    #[test]
    fn test_parse_config() {
        let yaml = r#"
defaults:
  memory: 4G
  cpu: 4
  timeout: 60
container:
  runtime: podman
  network: bridge
mcp:
  proxyHost: 127.0.0.1
  portRange: [51000, 52000]
cleanup:
  inactiveTimeout: 2h
  preserveNamed: false
"#;

        let config: GlobalConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.defaults.memory, "4G");
        assert_eq!(config.defaults.cpu, 4.0);
        assert_eq!(config.container.runtime, "podman");
        assert_eq!(config.mcp.port_range, [51_000, 52_000]);
        assert_eq!(config.cleanup.inactive_timeout, "2h");
        assert!(!config.cleanup.preserve_named);
        // Omitted sections keep their defaults
        assert_eq!(config.defaults.disk, "10G");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        let config = GlobalConfig::load_from(&path).unwrap();
        assert_eq!(config.defaults.memory, "2G");
    }

    #[test]
    fn test_load_rejects_invalid_port_range() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "mcp:\n  portRange: [60000, 50000]\n").unwrap();
        assert!(GlobalConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_inactive_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "cleanup:\n  inactiveTimeout: never\n").unwrap();
        assert!(GlobalConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_save_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.yaml");

        let mut config = GlobalConfig::default();
        config.defaults.memory = "8G".to_string();
        config.save_to(&path).unwrap();

        let loaded = GlobalConfig::load_from(&path).unwrap();
        assert_eq!(loaded.defaults.memory, "8G");
    }
}
