//! MCP proxy and multiplexer for dcsandbox
//!
//! One WebSocket listener per sandbox. Each listener terminates JSON-RPC 2.0
//! client sessions, answers the built-in tool and resource methods against
//! the sandbox's container, and forwards everything else to capability
//! server child processes speaking newline-delimited JSON over stdio.

mod broker;
mod children;
mod error;
mod jsonrpc;
mod ports;
mod tools;

pub use children::CapabilityServerSpec;
pub use error::*;
pub use jsonrpc::*;
pub use ports::*;

use broker::SandboxProxy;
use dcsandbox_runtime::{ContainerId, RuntimeDriver};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// MCP protocol version spoken by the proxy
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Name advertised in serverInfo
pub const SERVER_NAME: &str = "dcsandbox-proxy";

/// Version advertised in serverInfo
pub const SERVER_VERSION: &str = "1.0.0";

/// Process-wide MCP broker: owns the port allocator and the set of running
/// per-sandbox listeners.
pub struct McpBroker {
    host: String,
    ports: PortAllocator,
    running: Mutex<HashMap<String, RunningProxy>>,
}

struct RunningProxy {
    port: u16,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl McpBroker {
    /// Create a broker allocating ports from `range` (inclusive) and binding
    /// listeners on `host`.
    pub fn new(host: impl Into<String>, range: [u16; 2]) -> Self {
        Self {
            host: host.into(),
            ports: PortAllocator::new(range[0], range[1]),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a free port from the configured range
    pub fn allocate_port(&self) -> Result<u16> {
        self.ports.allocate()
    }

    /// Return a port to the pool
    pub fn release_port(&self, port: u16) {
        self.ports.release(port);
    }

    /// Mark a port as in use, e.g. when rehydrating records on startup
    pub fn reserve_port(&self, port: u16) {
        self.ports.reserve(port);
    }

    /// Start the proxy for a sandbox on an already-allocated port.
    ///
    /// Spawns the enabled capability servers and begins accepting WebSocket
    /// connections. The port stays allocated until [`McpBroker::stop`].
    pub async fn start(
        &self,
        sandbox_id: &str,
        port: u16,
        specs: &[CapabilityServerSpec],
        runtime: Arc<dyn RuntimeDriver>,
        container_id: ContainerId,
    ) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.contains_key(sandbox_id) {
            return Err(BrokerError::AlreadyRunning(sandbox_id.to_string()));
        }

        let cancel = CancellationToken::new();
        let proxy = SandboxProxy::bind(
            &self.host,
            port,
            sandbox_id,
            specs,
            runtime,
            container_id,
            cancel.clone(),
        )
        .await?;
        let task = tokio::spawn(proxy.serve());

        running.insert(
            sandbox_id.to_string(),
            RunningProxy { port, cancel, task },
        );
        tracing::info!(sandbox = %sandbox_id, port, "mcp proxy started");
        Ok(())
    }

    /// Stop the proxy for a sandbox: close the listener, terminate the
    /// capability servers, release the port. Idempotent.
    ///
    /// Returns true when a live proxy was found and its port released here.
    /// False means no proxy runs in this process; the caller still owns any
    /// port reservation rehydrated from the record and must release it
    /// itself. The broker is the single point of release for live proxies,
    /// so a port can never be freed twice.
    pub async fn stop(&self, sandbox_id: &str) -> bool {
        let proxy = {
            let mut running = self.running.lock().await;
            running.remove(sandbox_id)
        };

        match proxy {
            Some(proxy) => {
                proxy.cancel.cancel();
                if let Err(e) = proxy.task.await {
                    tracing::warn!(sandbox = %sandbox_id, error = %e, "mcp proxy task panicked");
                }
                self.ports.release(proxy.port);
                tracing::info!(sandbox = %sandbox_id, port = proxy.port, "mcp proxy stopped");
                true
            }
            None => false,
        }
    }

    /// Whether a proxy is currently running for the sandbox
    pub async fn is_running(&self, sandbox_id: &str) -> bool {
        self.running.lock().await.contains_key(sandbox_id)
    }
}
