//! Sandbox lifecycle engine
//!
//! Owns record semantics: every mutation happens under the record's own
//! mutex and ends with an atomic rewrite of its `config.json`. Operations
//! on different sandboxes proceed in parallel; there is no global lock.

mod create;
mod lifecycle;
mod reaper;

pub use create::*;
pub use lifecycle::*;

use crate::{
    EngineError, Result, SandboxRecord, SandboxStatus, Store, TemplateRegistry,
};
use dcsandbox_config::GlobalConfig;
use dcsandbox_mcp::McpBroker;
use dcsandbox_runtime::{ContainerId, ContainerState, LogConfig, LogStream, RuntimeDriver};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

/// Record plus live container details for `info`
#[derive(Debug)]
pub struct SandboxInfo {
    pub record: SandboxRecord,
    /// Present when the runtime can still see the container
    pub container: Option<dcsandbox_runtime::ContainerDetails>,
}

/// The lifecycle engine
pub struct SandboxEngine {
    pub(crate) store: Store,
    pub(crate) registry: TemplateRegistry,
    pub(crate) runtime: Arc<dyn RuntimeDriver>,
    pub(crate) broker: McpBroker,
    pub(crate) config: GlobalConfig,
    pub(crate) git_cache: PathBuf,
    pub(crate) records: RwLock<HashMap<String, SandboxRecord>>,
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SandboxEngine {
    /// Engine over the default on-disk layout
    pub async fn new(runtime: Arc<dyn RuntimeDriver>, config: GlobalConfig) -> Result<Self> {
        let store = Store::open_default()?;
        let git_cache = GlobalConfig::git_cache_dir()?;
        let registry = TemplateRegistry::new(Some(config.templates_dir()?));
        Self::with_parts(runtime, config, store, registry, git_cache).await
    }

    /// Engine with explicit collaborators; used by tests and the default
    /// constructor alike. Runs the crash-recovery scan before returning.
    pub async fn with_parts(
        runtime: Arc<dyn RuntimeDriver>,
        config: GlobalConfig,
        store: Store,
        registry: TemplateRegistry,
        git_cache: PathBuf,
    ) -> Result<Self> {
        let broker = McpBroker::new(config.mcp.proxy_host.clone(), config.mcp.port_range);
        let engine = Self {
            store,
            registry,
            runtime,
            broker,
            config,
            git_cache,
            records: RwLock::new(HashMap::new()),
            locks: StdMutex::new(HashMap::new()),
        };
        engine.recover().await?;
        Ok(engine)
    }

    /// The per-sandbox mutex for `id`
    pub(crate) fn lock_for(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub(crate) fn drop_lock(&self, id: &str) {
        self.locks.lock().unwrap().remove(id);
    }

    /// Persist a record and refresh the in-memory index
    pub(crate) async fn persist(&self, record: &SandboxRecord) -> Result<()> {
        self.store.save(record)?;
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    /// Register a brand-new record, enforcing name uniqueness across active
    /// records. Check and insert happen under one write lock, so two
    /// concurrent creates racing for the same name cannot both win.
    pub(crate) async fn claim(&self, record: &SandboxRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.values().any(|r| r.name == record.name) {
            return Err(EngineError::DuplicateName(record.name.clone()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    /// Transition a record's status, enforcing the state machine table
    pub(crate) fn transition(
        record: &mut SandboxRecord,
        to: SandboxStatus,
        op: &'static str,
    ) -> Result<()> {
        if !record.status.can_transition(to) {
            return Err(EngineError::InvalidState {
                id: record.id.clone(),
                op,
                status: record.status.to_string(),
            });
        }
        record.status = to;
        Ok(())
    }

    /// Snapshot one record
    pub(crate) async fn snapshot(&self, id: &str) -> Result<SandboxRecord> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    /// Persist an arbitrary record, bypassing the lifecycle. Test-only.
    #[cfg(any(test, feature = "test-support"))]
    pub async fn inject_record(&self, record: SandboxRecord) -> Result<()> {
        self.persist(&record).await
    }

    /// All records, newest first
    pub async fn list(&self) -> Vec<SandboxRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Find a sandbox by exact id, exact name, then unambiguous prefix
    pub async fn resolve(&self, name_or_id: &str) -> Result<SandboxRecord> {
        let records = self.records.read().await;
        if let Some(record) = records.get(name_or_id) {
            return Ok(record.clone());
        }
        if let Some(record) = records.values().find(|r| r.name == name_or_id) {
            return Ok(record.clone());
        }

        let matches: Vec<_> = records
            .values()
            .filter(|r| r.id.starts_with(name_or_id) || r.name.starts_with(name_or_id))
            .collect();
        match matches.len() {
            1 => Ok(matches[0].clone()),
            _ => Err(EngineError::NotFound(name_or_id.to_string())),
        }
    }

    /// Record plus live container info, reconciling against the runtime.
    ///
    /// A running record whose container the runtime no longer reports flips
    /// to `error`; the runtime is the source of truth for existence only.
    pub async fn info(&self, id: &str) -> Result<SandboxInfo> {
        let record = self.snapshot(id).await?;

        let container = match record.container_id {
            Some(ref cid) => self
                .runtime
                .inspect_container(&ContainerId::new(cid))
                .await
                .ok(),
            None => None,
        };

        if record.status == SandboxStatus::Running {
            let container_alive = container
                .as_ref()
                .is_some_and(|c| c.state == ContainerState::Running);
            if !container_alive {
                let lock = self.lock_for(id);
                let _guard = lock.lock().await;
                let mut record = self.snapshot(id).await?;
                if record.status == SandboxStatus::Running {
                    tracing::warn!(sandbox = %id, "container disappeared externally, marking error");
                    let released = self.broker.stop(&record.id).await;
                    if let Some(port) = record.mcp.port.take() {
                        if !released {
                            self.broker.release_port(port);
                        }
                    }
                    Self::transition(&mut record, SandboxStatus::Error, "reconcile")?;
                    self.persist(&record).await?;
                }
                let container = None;
                return Ok(SandboxInfo { record, container });
            }
        }

        Ok(SandboxInfo { record, container })
    }

    /// Decoded log stream for a sandbox's container
    pub async fn logs(&self, id: &str, follow: bool, tail: Option<u64>) -> Result<LogStream> {
        let record = self.snapshot(id).await?;
        let cid = record
            .container_id
            .as_ref()
            .ok_or_else(|| EngineError::NoContainer(id.to_string()))?;

        let stream = self
            .runtime
            .logs(&ContainerId::new(cid), &LogConfig { follow, tail })
            .await?;
        Ok(stream)
    }

    /// Path helpers
    pub(crate) fn clone_dir(&self, id: &str) -> PathBuf {
        self.git_cache.join(id)
    }

    /// Startup scan: rebuild the in-memory index and port set, flip records
    /// that crashed mid-create or lost their container to `error`, and
    /// restart proxies for sandboxes that are still running.
    async fn recover(&self) -> Result<()> {
        let records = self.store.load_all()?;

        for mut record in records {
            match record.status {
                SandboxStatus::Creating => {
                    tracing::warn!(sandbox = %record.id, "found interrupted create, marking error");
                    record.mcp.port = None;
                    Self::transition(&mut record, SandboxStatus::Error, "recover")?;
                    self.persist(&record).await?;
                }
                SandboxStatus::Running => {
                    let alive = match record.container_id {
                        Some(ref cid) => self
                            .runtime
                            .inspect_container(&ContainerId::new(cid))
                            .await
                            .map(|d| d.state == ContainerState::Running)
                            .unwrap_or(false),
                        None => false,
                    };

                    if !alive {
                        tracing::warn!(sandbox = %record.id, "running record has no live container, marking error");
                        record.mcp.port = None;
                        Self::transition(&mut record, SandboxStatus::Error, "recover")?;
                        self.persist(&record).await?;
                        continue;
                    }

                    if let Some(port) = record.mcp.port {
                        self.broker.reserve_port(port);
                        let container_id = ContainerId::new(
                            record.container_id.clone().unwrap_or_default(),
                        );
                        match self
                            .broker
                            .start(
                                &record.id,
                                port,
                                &record.mcp.servers,
                                self.runtime.clone(),
                                container_id,
                            )
                            .await
                        {
                            Ok(()) => {}
                            // Another dcsandbox process is already serving
                            // this proxy; the record stays running.
                            Err(dcsandbox_mcp::BrokerError::Bind { source, .. })
                                if source.kind() == std::io::ErrorKind::AddrInUse =>
                            {
                                tracing::debug!(sandbox = %record.id, port, "proxy port already served elsewhere");
                            }
                            Err(e) => {
                                tracing::warn!(sandbox = %record.id, error = %e, "could not restart mcp proxy, marking error");
                                self.broker.release_port(port);
                                record.mcp.port = None;
                                Self::transition(&mut record, SandboxStatus::Error, "recover")?;
                            }
                        }
                    }
                    self.persist(&record).await?;
                }
                SandboxStatus::Stopped | SandboxStatus::Error => {
                    // A lingering port on a non-running record violates the
                    // invariants; drop it.
                    if record.mcp.port.take().is_some() {
                        tracing::warn!(sandbox = %record.id, "clearing stale mcpPort");
                    }
                    self.persist(&record).await?;
                }
            }
        }

        Ok(())
    }
}
