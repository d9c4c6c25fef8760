//! Docker driver implementation using bollard
//!
//! Podman is served by the same driver through its Docker-compatible API
//! socket.

use crate::{
    BuildConfig, ContainerDetails, ContainerId, ContainerSpec, ContainerState, ContainerSummary,
    DriverInfo, ExecConfig, ExecResult, ImageId, LogConfig, LogStream, Result, RuntimeDriver,
    RuntimeError, RuntimeKind,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, RemoveImageOptions};
use bollard::service::{HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWriteExt};

/// Runtime driver backed by the bollard Docker client
pub struct DockerDriver {
    client: Docker,
    runtime: RuntimeKind,
}

impl DockerDriver {
    /// Connect to a Docker API socket
    pub async fn new(socket: &str) -> Result<Self> {
        let client = if socket.starts_with("http://")
            || socket.starts_with("https://")
            || socket.starts_with("tcp://")
        {
            Docker::connect_with_http(socket, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| RuntimeError::Connection(e.to_string()))?
        } else {
            let path = socket.trim_start_matches("unix://");
            Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| RuntimeError::Connection(e.to_string()))?
        };

        client
            .ping()
            .await
            .map_err(|e| RuntimeError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            runtime: RuntimeKind::Docker,
        })
    }

    /// Connect to a Podman socket through the Docker-compatible API
    pub async fn new_podman(socket: &str) -> Result<Self> {
        let mut driver = Self::new(socket).await?;
        driver.runtime = RuntimeKind::Podman;
        Ok(driver)
    }
}

#[async_trait]
impl RuntimeDriver for DockerDriver {
    async fn build_image(&self, config: &BuildConfig) -> Result<ImageId> {
        let tar_data = create_build_context(&config.context)?;

        let options = BuildImageOptions {
            dockerfile: config.dockerfile.clone(),
            t: config.tag.clone(),
            buildargs: config.build_args.clone(),
            nocache: config.no_cache,
            labels: config.labels.clone(),
            ..Default::default()
        };

        let mut stream = self.client.build_image(options, None, Some(tar_data.into()));

        let mut image_id = None;
        while let Some(result) = stream.next().await {
            match result {
                Ok(output) => {
                    if let Some(error) = output.error {
                        return Err(RuntimeError::Build(error));
                    }
                    if let Some(aux) = output.aux {
                        if let Some(id) = aux.id {
                            image_id = Some(id);
                        }
                    }
                    if let Some(line) = output.stream {
                        tracing::debug!("{}", line.trim());
                    }
                }
                Err(e) => return Err(RuntimeError::Build(e.to_string())),
            }
        }

        // Podman's compat API does not always emit the aux record; fall back
        // to the tag we just built.
        Ok(image_id.map(ImageId::new).unwrap_or_else(|| ImageId::new(&config.tag)))
    }

    async fn remove_image(&self, image: &str, force: bool) -> Result<()> {
        let options = RemoveImageOptions {
            force,
            ..Default::default()
        };
        self.client.remove_image(image, Some(options), None).await?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        });

        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        for port in &spec.exposed_ports {
            exposed_ports.insert(format!("{}/tcp", port), HashMap::new());
        }

        let mounts: Vec<Mount> = spec
            .mounts
            .iter()
            .map(|m| Mount {
                target: Some(m.target.clone()),
                source: Some(m.source.to_string_lossy().to_string()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let host_config = HostConfig {
            mounts: if mounts.is_empty() { None } else { Some(mounts) },
            memory: (spec.memory_bytes > 0).then_some(spec.memory_bytes),
            nano_cpus: (spec.nano_cpus > 0).then_some(spec.nano_cpus),
            network_mode: spec.network_mode.clone(),
            auto_remove: Some(spec.auto_remove),
            ..Default::default()
        };

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let container_config = Config {
            image: Some(spec.image.clone()),
            cmd: spec.cmd.clone(),
            env: if env.is_empty() { None } else { Some(env) },
            working_dir: spec.working_dir.clone(),
            labels: if spec.labels.is_empty() {
                None
            } else {
                Some(spec.labels.clone())
            },
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(options, container_config)
            .await?;

        Ok(ContainerId::new(response.id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<()> {
        self.client
            .start_container(&id.0, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, id: &ContainerId, grace_seconds: Option<u32>) -> Result<()> {
        let options = StopContainerOptions {
            t: grace_seconds.unwrap_or(10) as i64,
        };
        self.client.stop_container(&id.0, Some(options)).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.client.remove_container(&id.0, Some(options)).await?;
        Ok(())
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerDetails> {
        let info = self.client.inspect_container(&id.0, None).await?;

        let state = info.state.as_ref();
        let status = state
            .and_then(|s| s.status)
            .map(|s| ContainerState::from(format!("{:?}", s).to_lowercase().as_str()))
            .unwrap_or(ContainerState::Unknown);

        let config = info.config.as_ref();

        let started_at = state
            .and_then(|s| s.started_at.as_ref())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp());

        let finished_at = state
            .and_then(|s| s.finished_at.as_ref())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp());

        Ok(ContainerDetails {
            id: id.clone(),
            name: info
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image: config.and_then(|c| c.image.clone()).unwrap_or_default(),
            state: status,
            created: info
                .created
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.timestamp())
                .unwrap_or(0),
            started_at,
            finished_at,
            exit_code: state.and_then(|s| s.exit_code),
            labels: config.and_then(|c| c.labels.clone()).unwrap_or_default(),
            env: config.and_then(|c| c.env.clone()).unwrap_or_default(),
        })
    }

    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecResult> {
        let options = CreateExecOptions {
            cmd: Some(config.cmd.clone()),
            env: Some(
                config
                    .env
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect(),
            ),
            working_dir: config.working_dir.clone(),
            user: config.user.clone(),
            attach_stdin: Some(config.stdin.is_some()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self.client.create_exec(&id.0, options).await?;

        let start_options = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let result = self.client.start_exec(&exec.id, Some(start_options)).await?;

        let mut output_str = String::new();

        match result {
            StartExecResults::Attached { mut output, mut input } => {
                if let Some(ref payload) = config.stdin {
                    input
                        .write_all(payload.as_bytes())
                        .await
                        .map_err(|e| RuntimeError::Exec(e.to_string()))?;
                    input
                        .shutdown()
                        .await
                        .map_err(|e| RuntimeError::Exec(e.to_string()))?;
                }
                drop(input);

                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(bollard::container::LogOutput::StdOut { message })
                        | Ok(bollard::container::LogOutput::StdErr { message }) => {
                            output_str.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => return Err(RuntimeError::Exec(e.to_string())),
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(RuntimeError::Exec("exec started in detached mode".to_string()))
            }
        }

        let inspect = self.client.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(0);

        Ok(ExecResult {
            exit_code,
            output: output_str,
        })
    }

    async fn logs(&self, id: &ContainerId, config: &LogConfig) -> Result<LogStream> {
        let options = LogsOptions {
            follow: config.follow,
            stdout: true,
            stderr: true,
            tail: config
                .tail
                .map(|t| t.to_string())
                .unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let stream = self.client.logs(&id.0, Some(options));
        let reader = LogOutputReader::new(stream);

        Ok(LogStream {
            stream: Box::pin(reader),
        })
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let options = ListContainersOptions {
            all,
            filters: HashMap::from([(
                "label".to_string(),
                vec![format!("{}=true", crate::MANAGED_LABEL)],
            )]),
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: ContainerId::new(c.id.unwrap_or_default()),
                name: c
                    .names
                    .and_then(|n| n.first().cloned())
                    .unwrap_or_default()
                    .trim_start_matches('/')
                    .to_string(),
                image: c.image.unwrap_or_default(),
                state: c
                    .state
                    .as_deref()
                    .map(ContainerState::from)
                    .unwrap_or(ContainerState::Unknown),
                created: c.created.unwrap_or(0),
                labels: c.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| RuntimeError::Connection(e.to_string()))?;
        Ok(())
    }

    fn info(&self) -> DriverInfo {
        DriverInfo {
            runtime: self.runtime,
            api_version: bollard::API_DEFAULT_VERSION.to_string(),
        }
    }
}

/// Create a tar archive of the build context directory
fn create_build_context(context: &Path) -> Result<Vec<u8>> {
    use std::io::Cursor;
    use tar::Builder;

    let mut tar_data = Vec::new();
    {
        let cursor = Cursor::new(&mut tar_data);
        let mut builder = Builder::new(cursor);
        add_dir_to_tar(&mut builder, context, Path::new(""))?;
        builder.finish().map_err(RuntimeError::Io)?;
    }

    Ok(tar_data)
}

/// Recursively add directory contents to a tar builder
fn add_dir_to_tar<W: Write>(
    builder: &mut tar::Builder<W>,
    base: &Path,
    prefix: &Path,
) -> Result<()> {
    let entries = std::fs::read_dir(base).map_err(RuntimeError::Io)?;

    for entry in entries {
        let entry = entry.map_err(RuntimeError::Io)?;
        let path = entry.path();
        let name = prefix.join(entry.file_name());

        let file_name = entry.file_name();
        let file_name_str = file_name.to_string_lossy();
        if file_name_str == ".git" || file_name_str == "node_modules" {
            continue;
        }

        if path.is_dir() {
            add_dir_to_tar(builder, &path, &name)?;
        } else if path.is_file() {
            builder
                .append_path_with_name(&path, &name)
                .map_err(RuntimeError::Io)?;
        }
    }

    Ok(())
}

/// Adapts bollard's log output stream to AsyncRead
struct LogOutputReader<S> {
    stream: S,
    buffer: Vec<u8>,
    pos: usize,
}

impl<S> LogOutputReader<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            pos: 0,
        }
    }
}

impl<S> AsyncRead for LogOutputReader<S>
where
    S: futures::Stream<
            Item = std::result::Result<bollard::container::LogOutput, bollard::errors::Error>,
        > + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if self.pos < self.buffer.len() {
            let remaining = &self.buffer[self.pos..];
            let to_copy = std::cmp::min(remaining.len(), buf.remaining());
            buf.put_slice(&remaining[..to_copy]);
            self.pos += to_copy;
            return std::task::Poll::Ready(Ok(()));
        }

        self.buffer.clear();
        self.pos = 0;

        match Pin::new(&mut self.stream).poll_next(cx) {
            std::task::Poll::Ready(Some(Ok(output))) => {
                let data = match output {
                    bollard::container::LogOutput::StdOut { message } => message,
                    bollard::container::LogOutput::StdErr { message } => message,
                    bollard::container::LogOutput::StdIn { message } => message,
                    bollard::container::LogOutput::Console { message } => message,
                };
                self.buffer = data.to_vec();

                let to_copy = std::cmp::min(self.buffer.len(), buf.remaining());
                buf.put_slice(&self.buffer[..to_copy]);
                self.pos = to_copy;
                std::task::Poll::Ready(Ok(()))
            }
            std::task::Poll::Ready(Some(Err(e))) => std::task::Poll::Ready(Err(
                std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            )),
            std::task::Poll::Ready(None) => std::task::Poll::Ready(Ok(())),
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}
