//! Test support utilities for dcsandbox-core
//!
//! Provides FakeRuntime and helpers for unit testing the SandboxEngine
//! without a real Docker/Podman runtime.

use async_trait::async_trait;
use dcsandbox_runtime::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Records which methods were called on the fake
#[derive(Debug, Clone, PartialEq)]
pub enum FakeCall {
    BuildImage { tag: String },
    RemoveImage { image: String, force: bool },
    CreateContainer { image: String, name: Option<String> },
    StartContainer { id: String },
    StopContainer { id: String },
    RemoveContainer { id: String, force: bool },
    Inspect { id: String },
    Exec { id: String, cmd: Vec<String>, stdin: Option<String> },
    Logs { id: String },
    List { all: bool },
    Ping,
}

/// Configurable fake runtime driver for testing
pub struct FakeRuntime {
    pub calls: Arc<Mutex<Vec<FakeCall>>>,
    pub build_result: Arc<Mutex<Result<ImageId>>>,
    pub create_result: Arc<Mutex<Result<ContainerId>>>,
    pub start_result: Arc<Mutex<Result<()>>>,
    pub stop_result: Arc<Mutex<Result<()>>>,
    pub remove_result: Arc<Mutex<Result<()>>>,
    pub inspect_result: Arc<Mutex<Result<ContainerDetails>>>,
    pub exec_exit_code: Arc<Mutex<i64>>,
    pub exec_output: Arc<Mutex<String>>,
    pub log_lines: Arc<Mutex<String>>,
    pub list_result: Arc<Mutex<Result<Vec<ContainerSummary>>>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            build_result: Arc::new(Mutex::new(Ok(ImageId::new("sha256:fake_image")))),
            create_result: Arc::new(Mutex::new(Ok(ContainerId::new("fake_container_id")))),
            start_result: Arc::new(Mutex::new(Ok(()))),
            stop_result: Arc::new(Mutex::new(Ok(()))),
            remove_result: Arc::new(Mutex::new(Ok(()))),
            inspect_result: Arc::new(Mutex::new(Ok(fake_container_details(
                "fake_container_id",
                ContainerState::Running,
            )))),
            exec_exit_code: Arc::new(Mutex::new(0)),
            exec_output: Arc::new(Mutex::new(String::new())),
            log_lines: Arc::new(Mutex::new(String::new())),
            list_result: Arc::new(Mutex::new(Ok(Vec::new()))),
        }
    }

    fn record(&self, call: FakeCall) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn get_calls(&self) -> Vec<FakeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count<F: Fn(&FakeCall) -> bool>(&self, filter: F) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| filter(c)).count()
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Build ContainerDetails for tests
pub fn fake_container_details(id: &str, state: ContainerState) -> ContainerDetails {
    ContainerDetails {
        id: ContainerId::new(id),
        name: format!("dcsandbox-{}", id),
        image: "dcsandbox:test".to_string(),
        state,
        created: 0,
        started_at: None,
        finished_at: None,
        exit_code: None,
        labels: HashMap::new(),
        env: Vec::new(),
    }
}

fn clone_result<T: Clone>(result: &Mutex<Result<T>>) -> Result<T> {
    match &*result.lock().unwrap() {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(RuntimeError::Runtime(e.to_string())),
    }
}

#[async_trait]
impl RuntimeDriver for FakeRuntime {
    async fn build_image(&self, config: &BuildConfig) -> Result<ImageId> {
        self.record(FakeCall::BuildImage {
            tag: config.tag.clone(),
        });
        clone_result(&self.build_result)
    }

    async fn remove_image(&self, image: &str, force: bool) -> Result<()> {
        self.record(FakeCall::RemoveImage {
            image: image.to_string(),
            force,
        });
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        self.record(FakeCall::CreateContainer {
            image: spec.image.clone(),
            name: spec.name.clone(),
        });
        clone_result(&self.create_result)
    }

    async fn start_container(&self, id: &ContainerId) -> Result<()> {
        self.record(FakeCall::StartContainer { id: id.0.clone() });
        clone_result(&self.start_result)
    }

    async fn stop_container(&self, id: &ContainerId, _grace: Option<u32>) -> Result<()> {
        self.record(FakeCall::StopContainer { id: id.0.clone() });
        clone_result(&self.stop_result)
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<()> {
        self.record(FakeCall::RemoveContainer {
            id: id.0.clone(),
            force,
        });
        clone_result(&self.remove_result)
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerDetails> {
        self.record(FakeCall::Inspect { id: id.0.clone() });
        clone_result(&self.inspect_result)
    }

    async fn exec(&self, id: &ContainerId, config: &ExecConfig) -> Result<ExecResult> {
        self.record(FakeCall::Exec {
            id: id.0.clone(),
            cmd: config.cmd.clone(),
            stdin: config.stdin.clone(),
        });
        Ok(ExecResult {
            exit_code: *self.exec_exit_code.lock().unwrap(),
            output: self.exec_output.lock().unwrap().clone(),
        })
    }

    async fn logs(&self, id: &ContainerId, _config: &LogConfig) -> Result<LogStream> {
        self.record(FakeCall::Logs { id: id.0.clone() });
        let lines = self.log_lines.lock().unwrap().clone();
        Ok(LogStream {
            stream: Box::pin(std::io::Cursor::new(lines.into_bytes())),
        })
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        self.record(FakeCall::List { all });
        clone_result(&self.list_result)
    }

    async fn ping(&self) -> Result<()> {
        self.record(FakeCall::Ping);
        Ok(())
    }

    fn info(&self) -> DriverInfo {
        DriverInfo {
            runtime: RuntimeKind::Docker,
            api_version: "fake".to_string(),
        }
    }
}
