//! Container runtime driver for dcsandbox
//!
//! This crate provides an abstraction over local OCI runtimes (Docker,
//! Podman via the Docker-compatible API) with the narrow surface the
//! lifecycle engine needs. All runtime calls in the engine pass through the
//! [`RuntimeDriver`] trait so the engine can be tested against a fake.

mod docker;
mod error;
mod types;

pub use docker::DockerDriver;
pub use error::*;
pub use types::*;

use async_trait::async_trait;

/// Trait for container runtime drivers (Docker, Podman)
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Build an image from a Dockerfile in `config.context`
    async fn build_image(&self, config: &BuildConfig) -> Result<ImageId>;

    /// Remove an image by tag or id
    async fn remove_image(&self, image: &str, force: bool) -> Result<()>;

    /// Create a container
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId>;

    /// Start a created container
    async fn start_container(&self, id: &ContainerId) -> Result<()>;

    /// Stop a container, giving it `grace_seconds` before SIGKILL
    async fn stop_container(&self, id: &ContainerId, grace_seconds: Option<u32>) -> Result<()>;

    /// Remove a container
    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<()>;

    /// Inspect a container
    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerDetails>;

    /// Execute a command in a running container, optionally feeding stdin
    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecResult>;

    /// Container log stream
    async fn logs(&self, id: &ContainerId, config: &LogConfig) -> Result<LogStream>;

    /// List containers carrying the dcsandbox label
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>>;

    /// Check that the runtime is reachable
    async fn ping(&self) -> Result<()>;

    /// Static driver information
    fn info(&self) -> DriverInfo;
}

/// Label applied to every container dcsandbox creates
pub const MANAGED_LABEL: &str = "dcsandbox.managed";

/// Label carrying the owning sandbox id
pub const SANDBOX_ID_LABEL: &str = "dcsandbox.id";

/// Create a driver for the configured runtime
pub async fn create_driver(
    config: &dcsandbox_config::GlobalConfig,
) -> Result<Box<dyn RuntimeDriver>> {
    let runtime: RuntimeKind = config.container.runtime.parse().map_err(RuntimeError::Config)?;
    let socket = resolve_socket(runtime, &config.container.socket);

    let driver = match runtime {
        RuntimeKind::Docker => DockerDriver::new(&socket).await?,
        RuntimeKind::Podman => DockerDriver::new_podman(&socket).await?,
    };
    Ok(Box::new(driver))
}

/// Resolve the API socket: explicit config wins, then DOCKER_HOST, then the
/// platform default for the runtime.
fn resolve_socket(runtime: RuntimeKind, configured: &str) -> String {
    if !configured.is_empty() {
        return configured.to_string();
    }
    if let Ok(host) = std::env::var("DOCKER_HOST") {
        if !host.is_empty() {
            return host;
        }
    }
    match runtime {
        RuntimeKind::Docker => default_docker_socket(),
        RuntimeKind::Podman => default_podman_socket(),
    }
}

#[cfg(windows)]
fn default_docker_socket() -> String {
    "//./pipe/docker_engine".to_string()
}

#[cfg(not(windows))]
fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

#[cfg(target_os = "linux")]
fn default_podman_socket() -> String {
    std::env::var("XDG_RUNTIME_DIR")
        .map(|dir| format!("{}/podman/podman.sock", dir))
        .unwrap_or_else(|_| "/run/user/1000/podman/podman.sock".to_string())
}

#[cfg(not(target_os = "linux"))]
fn default_podman_socket() -> String {
    "/var/run/podman.sock".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_socket_prefers_config() {
        let socket = resolve_socket(RuntimeKind::Docker, "/tmp/custom.sock");
        assert_eq!(socket, "/tmp/custom.sock");
    }

    #[test]
    fn test_runtime_kind_parse() {
        assert_eq!("docker".parse::<RuntimeKind>().unwrap(), RuntimeKind::Docker);
        assert_eq!("Podman".parse::<RuntimeKind>().unwrap(), RuntimeKind::Podman);
        assert!("lxc".parse::<RuntimeKind>().is_err());
    }
}
