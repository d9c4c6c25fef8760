//! Capability server child processes
//!
//! Each enabled spec is spawned with piped stdio and spoken to in
//! newline-delimited JSON (one JSON-RPC object per line). Forwarded requests
//! are correlated by rewriting ids; client ids are restored by the broker.
//! A child that exits is logged and dropped from the table — no restart.

use crate::{BrokerError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// How long a forwarded request may wait for the child's reply
const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period between SIGTERM and SIGKILL on shutdown
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Declaration of one capability server, embedded in the sandbox record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityServerSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

struct ForwardRequest {
    method: String,
    params: Option<Value>,
    reply: oneshot::Sender<Result<Value>>,
}

/// Handle to a running capability server
pub(crate) struct CapabilityChild {
    pub name: String,
    request_tx: mpsc::Sender<ForwardRequest>,
}

impl CapabilityChild {
    /// Spawn the child and its supervision task
    pub fn spawn(spec: &CapabilityServerSpec, cancel: CancellationToken) -> Result<Self> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| BrokerError::SpawnFailed(spec.name.clone(), e.to_string()))?;

        let (request_tx, request_rx) = mpsc::channel(32);
        tokio::spawn(run_child(spec.name.clone(), child, request_rx, cancel));

        Ok(Self {
            name: spec.name.clone(),
            request_tx,
        })
    }

    /// Forward a request and wait for the child's JSON-RPC reply object
    pub async fn forward(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(ForwardRequest {
                method: method.to_string(),
                params,
                reply: reply_tx,
            })
            .await
            .map_err(|_| BrokerError::ServerGone(self.name.clone()))?;

        match tokio::time::timeout(FORWARD_TIMEOUT, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BrokerError::ServerGone(self.name.clone())),
            Err(_) => Err(BrokerError::Forward(format!(
                "capability server '{}' did not reply in time",
                self.name
            ))),
        }
    }
}

/// Supervision loop owning the child process and its stdio
async fn run_child(
    name: String,
    mut child: Child,
    mut request_rx: mpsc::Receiver<ForwardRequest>,
    cancel: CancellationToken,
) {
    let mut stdin = match child.stdin.take() {
        Some(s) => s,
        None => {
            tracing::warn!(server = %name, "capability server has no stdin pipe");
            return;
        }
    };
    let stdout = match child.stdout.take() {
        Some(s) => s,
        None => {
            tracing::warn!(server = %name, "capability server has no stdout pipe");
            return;
        }
    };

    if let Some(stderr) = child.stderr.take() {
        let name = name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(server = %name, line = %line, "capability server stderr");
            }
        });
    }

    let mut lines = BufReader::new(stdout).lines();
    let mut pending: HashMap<u64, oneshot::Sender<Result<Value>>> = HashMap::new();
    let mut next_id: u64 = 1;

    loop {
        tokio::select! {
            maybe_req = request_rx.recv() => {
                match maybe_req {
                    Some(req) => {
                        let id = next_id;
                        next_id += 1;

                        let frame = serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "method": req.method,
                            "params": req.params,
                        });
                        let mut line = frame.to_string();
                        line.push('\n');

                        if stdin.write_all(line.as_bytes()).await.is_err() {
                            let _ = req.reply.send(Err(BrokerError::ServerGone(name.clone())));
                            break;
                        }
                        pending.insert(id, req.reply);
                    }
                    None => break,
                }
            }
            line_result = lines.next_line() => {
                match line_result {
                    Ok(Some(line)) => {
                        // Non-JSON stdout lines are discarded silently
                        let Ok(value) = serde_json::from_str::<Value>(&line) else {
                            tracing::debug!(server = %name, line = %line, "discarding non-JSON stdout line");
                            continue;
                        };
                        let Some(id) = value.get("id").and_then(|v| v.as_u64()) else {
                            continue;
                        };
                        if let Some(reply) = pending.remove(&id) {
                            let _ = reply.send(Ok(value));
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            status = child.wait() => {
                match status {
                    Ok(status) => tracing::warn!(
                        server = %name,
                        code = status.code().unwrap_or(-1),
                        "capability server exited"
                    ),
                    Err(e) => tracing::warn!(server = %name, error = %e, "capability server wait failed"),
                }
                fail_pending(&mut pending, &name);
                return;
            }
            _ = cancel.cancelled() => {
                fail_pending(&mut pending, &name);
                terminate(&name, &mut child).await;
                return;
            }
        }
    }

    fail_pending(&mut pending, &name);
    terminate(&name, &mut child).await;
}

fn fail_pending(pending: &mut HashMap<u64, oneshot::Sender<Result<Value>>>, name: &str) {
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(BrokerError::ServerGone(name.to_string())));
    }
}

/// SIGTERM, wait for the grace period, then SIGKILL
async fn terminate(name: &str, child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
        tracing::warn!(server = %name, "capability server ignored SIGTERM, killing");
    }
    let _ = child.kill().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let spec: CapabilityServerSpec =
            serde_json::from_str(r#"{"name": "git", "command": "mcp-git"}"#).unwrap();
        assert!(spec.enabled);
        assert!(spec.args.is_empty());
        assert!(spec.env.is_empty());
    }

    #[test]
    fn test_spec_round_trip() {
        let spec = CapabilityServerSpec {
            name: "shell".to_string(),
            command: "mcp-shell".to_string(),
            args: vec!["--workspace".to_string(), "/workspace".to_string()],
            env: HashMap::from([("LANG".to_string(), "C.UTF-8".to_string())]),
            enabled: false,
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: CapabilityServerSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_spawn_bad_command_fails() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let spec = CapabilityServerSpec {
            name: "ghost".to_string(),
            command: "/does/not/exist-dcsandbox".to_string(),
            args: vec![],
            env: HashMap::new(),
            enabled: true,
        };
        let result = CapabilityChild::spawn(&spec, CancellationToken::new());
        assert!(matches!(result, Err(BrokerError::SpawnFailed(name, _)) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_forward_round_trip_through_cat() {
        // `cat` echoes each request line back; since the echoed object keeps
        // the rewritten id, it correlates as the reply.
        let spec = CapabilityServerSpec {
            name: "echo".to_string(),
            command: "cat".to_string(),
            args: vec![],
            env: HashMap::new(),
            enabled: true,
        };
        let cancel = CancellationToken::new();
        let child = CapabilityChild::spawn(&spec, cancel.clone()).unwrap();

        let reply = child
            .forward("git/status", Some(serde_json::json!({"a": 1})))
            .await
            .unwrap();
        assert_eq!(reply["method"], serde_json::json!("git/status"));
        assert_eq!(reply["params"]["a"], serde_json::json!(1));

        cancel.cancel();
    }
}
