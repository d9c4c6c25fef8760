//! The create operation
//!
//! Persists the record at `creating` before any side effect outside the
//! sandbox directory, then: clone → detect → resolve template → materialize
//! build context → build → runtime create → start → attach proxy →
//! post-create. A failure before the build has started removes the record
//! entirely; from the build onward the record stays at `error` until an
//! explicit remove.

use super::SandboxEngine;
use crate::{
    clone_repository, copy_tree, cpu_millicores, detect, generate_containerfile,
    generate_devcontainer, parse_memory_bytes, repo_basename, shallow_listing, timeout_seconds,
    validate_name, EngineError, GitSource, McpSettings, ResourceLimits, Result, SandboxRecord,
    SandboxStatus, Template,
};
use chrono::Utc;
use dcsandbox_runtime::{BindMount, ContainerId, ContainerSpec, ExecConfig};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Inputs to `create`
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: Option<String>,
    pub template: Option<String>,
    pub git_url: Option<String>,
    pub git_branch: String,
    pub memory: Option<String>,
    pub cpu: Option<f64>,
    pub timeout_minutes: Option<u64>,
    pub persist: bool,
    pub auto_detect: bool,
    pub mcp_enabled: bool,
}

impl Default for CreateRequest {
    fn default() -> Self {
        Self {
            name: None,
            template: None,
            git_url: None,
            git_branch: "main".to_string(),
            memory: None,
            cpu: None,
            timeout_minutes: None,
            persist: false,
            auto_detect: false,
            mcp_enabled: true,
        }
    }
}

/// Result of a successful create
#[derive(Debug)]
pub struct CreateOutcome {
    pub record: SandboxRecord,
    /// Non-fatal problems, e.g. post-create command failures
    pub warnings: Vec<String>,
}

impl SandboxEngine {
    /// Create a sandbox and bring it to `running`.
    pub async fn create(
        &self,
        req: CreateRequest,
        cancel: CancellationToken,
    ) -> Result<CreateOutcome> {
        let resources = self.resolve_resources(&req)?;

        let id = SandboxRecord::generate_id();
        let (name, named_explicitly) = self.resolve_name(&req, &id)?;

        let lock = self.lock_for(&id);
        let _guard = lock.lock().await;

        // Step 1: claim the name and put the record on disk before anything
        // else happens
        let mut record = SandboxRecord {
            id: id.clone(),
            name,
            status: SandboxStatus::Creating,
            created_at: Utc::now(),
            template: req.template.clone().unwrap_or_else(|| "base".to_string()),
            git: None,
            mcp: McpSettings {
                enabled: req.mcp_enabled,
                servers: Vec::new(),
                port: None,
            },
            resources,
            container_id: None,
            named_explicitly,
        };
        if let Err(e) = self.claim(&record).await {
            self.drop_lock(&record.id);
            return Err(e);
        }
        if let Err(e) = self.store.save(&record) {
            self.records.write().await.remove(&record.id);
            self.drop_lock(&record.id);
            return Err(e);
        }

        // Steps 2-4 precede any runtime side effect: failure removes the
        // record so nothing is left on disk.
        let template = match self.prepare_workspace(&mut record, &req, &cancel).await {
            Ok(template) => template,
            Err(e) => {
                self.abort_create(&record).await;
                return Err(e);
            }
        };

        // Steps 5-7: image build, container create, start, proxy attach.
        // From here on a failure leaves the record at `error`.
        let warnings = match self.provision(&mut record, &template, &cancel).await {
            Ok(warnings) => warnings,
            Err(e) => {
                self.fail_create(&mut record).await;
                return Err(e);
            }
        };

        Ok(CreateOutcome { record, warnings })
    }

    fn resolve_resources(&self, req: &CreateRequest) -> Result<ResourceLimits> {
        let memory = req
            .memory
            .clone()
            .unwrap_or_else(|| self.config.defaults.memory.clone());
        let memory_bytes = parse_memory_bytes(&memory)?;

        let cpu = req.cpu.unwrap_or(self.config.defaults.cpu);
        let cpu_millis = cpu_millicores(cpu)?;

        let disk_bytes = parse_memory_bytes(&self.config.defaults.disk)?;

        let timeout = if req.persist {
            0
        } else {
            timeout_seconds(req.timeout_minutes.unwrap_or(self.config.defaults.timeout))?
        };

        Ok(ResourceLimits {
            memory_bytes,
            cpu_millicores: cpu_millis,
            disk_bytes,
            timeout_seconds: timeout,
        })
    }

    /// Resolve the sandbox name and whether the user chose it explicitly.
    /// Uniqueness is enforced later, atomically, when the record is
    /// claimed; name matching is case-sensitive.
    fn resolve_name(&self, req: &CreateRequest, id: &str) -> Result<(String, bool)> {
        match req.name {
            Some(ref name) => {
                validate_name(name)?;
                Ok((name.clone(), true))
            }
            None => {
                let derived = req
                    .git_url
                    .as_deref()
                    .and_then(repo_basename)
                    .unwrap_or_else(|| format!("sandbox-{}", &id[..6]));
                Ok((derived, false))
            }
        }
    }

    /// Steps 2-4: clone, detect, resolve the template, materialize the
    /// build context under the sandbox directory.
    async fn prepare_workspace(
        &self,
        record: &mut SandboxRecord,
        req: &CreateRequest,
        cancel: &CancellationToken,
    ) -> Result<Template> {
        // Step 2: shallow single-branch clone into the cache
        if let Some(ref url) = req.git_url {
            let clone_path = self.clone_dir(&record.id);
            clone_repository(url, &req.git_branch, &clone_path).await?;
            record.git = Some(GitSource {
                url: url.clone(),
                branch: req.git_branch.clone(),
                clone_path,
            });
        }

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        // Step 3: template resolution, auto-detecting over the clone root
        let template_name = match record.git {
            Some(ref git) if req.auto_detect || req.template.is_none() => {
                let listing = shallow_listing(&git.clone_path)?;
                let detection = detect(&listing);
                tracing::info!(
                    sandbox = %record.id,
                    language = %detection.language,
                    confidence = detection.confidence,
                    template = %detection.effective_template(),
                    "project detection"
                );
                detection.effective_template().to_string()
            }
            _ => req.template.clone().unwrap_or_else(|| "base".to_string()),
        };

        let template = self.registry.lookup(&template_name)?;
        record.template = template.name.clone();
        record.mcp.servers = template.capability_servers.clone();

        // Step 4: materialize the build context
        self.materialize(record, &template)
            .map_err(|e| EngineError::WorkspaceSetup {
                id: record.id.clone(),
                message: e.to_string(),
            })?;

        self.persist(record).await?;
        Ok(template)
    }

    fn materialize(&self, record: &SandboxRecord, template: &Template) -> std::io::Result<()> {
        let sandbox_dir = self.store.sandbox_dir(&record.id);
        let workspace = self.store.workspace_dir(&record.id);

        match record.git {
            Some(ref git) => copy_tree(&git.clone_path, &workspace)?,
            None => std::fs::create_dir_all(&workspace)?,
        }

        crate::atomic_write(
            &sandbox_dir.join("Dockerfile"),
            generate_containerfile(template).as_bytes(),
        )?;

        let devcontainer_dir = sandbox_dir.join(".devcontainer");
        std::fs::create_dir_all(&devcontainer_dir)?;
        crate::atomic_write(
            &devcontainer_dir.join("devcontainer.json"),
            generate_devcontainer(template, &record.name).as_bytes(),
        )?;

        Ok(())
    }

    /// Steps 5-8: build, create, start, attach the proxy, post-create.
    async fn provision(
        &self,
        record: &mut SandboxRecord,
        template: &Template,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        // Step 5: image build
        let build = dcsandbox_runtime::BuildConfig {
            context: self.store.sandbox_dir(&record.id),
            dockerfile: "Dockerfile".to_string(),
            tag: record.image_tag(),
            build_args: HashMap::new(),
            labels: record.container_labels(),
            no_cache: false,
        };
        self.runtime
            .build_image(&build)
            .await
            .map_err(|e| EngineError::BuildFailed {
                id: record.id.clone(),
                message: e.to_string(),
            })?;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        // Step 6: runtime create with resource limits and the workspace bind
        let mut env = template.env.clone();
        env.insert("SANDBOX_ID".to_string(), record.id.clone());
        env.insert("SANDBOX_NAME".to_string(), record.name.clone());

        let spec = ContainerSpec {
            image: record.image_tag(),
            name: Some(record.container_name()),
            cmd: None,
            env,
            working_dir: Some("/workspace".to_string()),
            mounts: vec![BindMount {
                source: self.store.workspace_dir(&record.id),
                target: "/workspace".to_string(),
                read_only: false,
            }],
            exposed_ports: template.ports.clone(),
            labels: record.container_labels(),
            memory_bytes: record.resources.memory_bytes as i64,
            nano_cpus: crate::millicores_to_nano_cpus(record.resources.cpu_millicores),
            network_mode: Some(self.config.container.network.clone()),
            auto_remove: false,
        };
        let container_id = self.runtime.create_container(&spec).await?;

        // Step 7: persist the container id, then start and attach the proxy
        record.container_id = Some(container_id.0.clone());
        Self::transition(record, SandboxStatus::Stopped, "create")?;
        self.persist(record).await?;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        self.runtime.start_container(&container_id).await?;

        if record.mcp.enabled {
            let port = self.broker.allocate_port().map_err(EngineError::from)?;
            if let Err(e) = self
                .broker
                .start(
                    &record.id,
                    port,
                    &record.mcp.servers,
                    self.runtime.clone(),
                    container_id.clone(),
                )
                .await
            {
                self.broker.release_port(port);
                return Err(e.into());
            }
            record.mcp.port = Some(port);
        }

        Self::transition(record, SandboxStatus::Running, "create")?;
        self.persist(record).await?;

        // Step 8: post-create commands; failures are warnings only
        let mut warnings = Vec::new();
        for command in &template.post_create {
            match self.run_post_create(&container_id, command).await {
                Ok(()) => {}
                Err(message) => {
                    tracing::warn!(sandbox = %record.id, command = %command, %message, "post-create command failed");
                    warnings.push(format!("post-create '{}' failed: {}", command, message));
                }
            }
        }

        Ok(warnings)
    }

    async fn run_post_create(
        &self,
        container_id: &ContainerId,
        command: &str,
    ) -> std::result::Result<(), String> {
        let config = ExecConfig {
            cmd: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                command.to_string(),
            ],
            env: HashMap::new(),
            working_dir: Some("/workspace".to_string()),
            user: None,
            stdin: None,
        };
        match self.runtime.exec(container_id, &config).await {
            Ok(result) if result.exit_code == 0 => Ok(()),
            Ok(result) => Err(format!("exit code {}: {}", result.exit_code, result.output)),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Failure before any runtime side effect: delete the record entirely.
    async fn abort_create(&self, record: &SandboxRecord) {
        tracing::debug!(sandbox = %record.id, "aborting create before any runtime side effect");
        self.records.write().await.remove(&record.id);
        if let Err(e) = self.store.remove(&record.id) {
            tracing::warn!(sandbox = %record.id, error = %e, "could not remove aborted sandbox directory");
        }
        let clone_dir = self.clone_dir(&record.id);
        if clone_dir.exists() {
            let _ = std::fs::remove_dir_all(&clone_dir);
        }
        self.drop_lock(&record.id);
    }

    /// Failure after the build started: release the port, stop the proxy,
    /// best-effort remove the partial container and image, keep the record
    /// at `error` until an explicit remove.
    async fn fail_create(&self, record: &mut SandboxRecord) {
        let released = self.broker.stop(&record.id).await;
        if let Some(port) = record.mcp.port.take() {
            if !released {
                self.broker.release_port(port);
            }
        }

        if let Some(ref cid) = record.container_id {
            if let Err(e) = self
                .runtime
                .remove_container(&ContainerId::new(cid), true)
                .await
            {
                tracing::warn!(sandbox = %record.id, error = %e, "could not remove partial container");
            }
        }
        if let Err(e) = self.runtime.remove_image(&record.image_tag(), true).await {
            tracing::debug!(sandbox = %record.id, error = %e, "could not remove partial image");
        }

        record.container_id = None;
        if record.status.can_transition(SandboxStatus::Error) {
            record.status = SandboxStatus::Error;
        }
        if let Err(e) = self.persist(record).await {
            tracing::warn!(sandbox = %record.id, error = %e, "could not persist error record");
        }
    }
}
