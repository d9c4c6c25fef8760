//! start, stop, remove and cleanup

use super::SandboxEngine;
use crate::{EngineError, Result, SandboxRecord, SandboxStatus};
use dcsandbox_runtime::ContainerId;
use tokio_util::sync::CancellationToken;

/// Which records `cleanup` considers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupSelector {
    /// Stopped and errored sandboxes
    Default,
    /// Every sandbox, stopping running ones first
    All,
}

/// Per-run cleanup summary
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl SandboxEngine {
    /// Start a stopped sandbox: allocate a port, start the container,
    /// attach the proxy.
    pub async fn start(&self, id: &str, cancel: CancellationToken) -> Result<SandboxRecord> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut record = self.snapshot(id).await?;
        if record.status != SandboxStatus::Stopped {
            return Err(EngineError::InvalidState {
                id: id.to_string(),
                op: "start",
                status: record.status.to_string(),
            });
        }

        let container_id = record
            .container_id
            .clone()
            .ok_or_else(|| EngineError::NoContainer(id.to_string()))?;
        let container_id = ContainerId::new(container_id);

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        self.runtime.start_container(&container_id).await?;

        if record.mcp.enabled {
            let port = match self.broker.allocate_port() {
                Ok(port) => port,
                Err(e) => {
                    let _ = self.runtime.stop_container(&container_id, Some(10)).await;
                    return Err(e.into());
                }
            };
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
                let _ = self.runtime.stop_container(&container_id, Some(10)).await;
                return Err(e.into());
            }
            record.mcp.port = Some(port);
        }

        Self::transition(&mut record, SandboxStatus::Running, "start")?;
        self.persist(&record).await?;
        Ok(record)
    }

    /// Stop a running sandbox. Stopping an already-stopped sandbox is a
    /// no-op that returns the record unchanged.
    pub async fn stop(&self, id: &str) -> Result<SandboxRecord> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut record = self.snapshot(id).await?;
        match record.status {
            SandboxStatus::Stopped => return Ok(record),
            SandboxStatus::Running => {}
            _ => {
                return Err(EngineError::InvalidState {
                    id: id.to_string(),
                    op: "stop",
                    status: record.status.to_string(),
                })
            }
        }

        if let Some(ref cid) = record.container_id {
            self.runtime
                .stop_container(&ContainerId::new(cid), Some(10))
                .await?;
        }

        let released = self.broker.stop(&record.id).await;
        if let Some(port) = record.mcp.port.take() {
            // Only when no proxy was live here (a reservation rehydrated
            // from the record) does the engine release the port itself.
            if !released {
                self.broker.release_port(port);
            }
        }

        Self::transition(&mut record, SandboxStatus::Stopped, "stop")?;
        self.persist(&record).await?;
        Ok(record)
    }

    /// Remove a sandbox entirely: container, image, workspace, clone cache,
    /// record. Subordinate failures are logged, not surfaced; a missing
    /// record only errors when `force` is false.
    pub async fn remove(&self, id: &str, force: bool) -> Result<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let record = match self.snapshot(id).await {
            Ok(record) => record,
            Err(_) if force => return Ok(()),
            Err(e) => return Err(e),
        };

        // A running sandbox is stopped first; its failure is tolerated
        if record.status == SandboxStatus::Running {
            if let Some(ref cid) = record.container_id {
                if let Err(e) = self
                    .runtime
                    .stop_container(&ContainerId::new(cid), Some(10))
                    .await
                {
                    tracing::warn!(sandbox = %id, error = %e, "stop before remove failed");
                }
            }
        }

        let released = self.broker.stop(&record.id).await;
        if !released {
            if let Some(port) = record.mcp.port {
                self.broker.release_port(port);
            }
        }

        if let Some(ref cid) = record.container_id {
            if let Err(e) = self
                .runtime
                .remove_container(&ContainerId::new(cid), true)
                .await
            {
                tracing::warn!(sandbox = %id, error = %e, "container removal failed");
            }
        }
        if let Err(e) = self.runtime.remove_image(&record.image_tag(), true).await {
            tracing::debug!(sandbox = %id, error = %e, "image removal failed");
        }

        let clone_dir = self.clone_dir(&record.id);
        if clone_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&clone_dir) {
                tracing::warn!(sandbox = %id, error = %e, "clone cache removal failed");
            }
        }

        self.records.write().await.remove(&record.id);
        match self.store.remove(&record.id) {
            Ok(()) => {}
            Err(e) if force => {
                tracing::warn!(sandbox = %id, error = %e, "sandbox directory removal failed");
            }
            Err(e) => return Err(e),
        }

        self.drop_lock(&record.id);
        Ok(())
    }

    /// Remove stopped/errored sandboxes (or everything with
    /// [`CleanupSelector::All`]). Explicitly named sandboxes are preserved
    /// when the config asks for it, unless `force`.
    pub async fn cleanup(&self, selector: CleanupSelector, force: bool) -> CleanupReport {
        let mut report = CleanupReport::default();

        for record in self.list().await {
            let selected = match record.status {
                SandboxStatus::Stopped | SandboxStatus::Error => true,
                _ => selector == CleanupSelector::All,
            };
            if !selected {
                continue;
            }

            if record.named_explicitly && self.config.cleanup.preserve_named && !force {
                tracing::debug!(sandbox = %record.id, name = %record.name, "preserving named sandbox");
                report.skipped += 1;
                continue;
            }

            match self.remove(&record.id, true).await {
                Ok(()) => {
                    tracing::info!(sandbox = %record.id, name = %record.name, "cleaned up");
                    report.removed += 1;
                }
                Err(e) => {
                    tracing::warn!(sandbox = %record.id, error = %e, "cleanup failed");
                    report.failed += 1;
                }
            }
        }

        report
    }
}
