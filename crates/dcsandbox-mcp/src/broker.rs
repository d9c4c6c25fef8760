//! Per-sandbox WebSocket proxy
//!
//! Accepts client connections on the sandbox's allocated port, announces the
//! proxy with an unsolicited `initialized` notification, then answers
//! JSON-RPC frames: built-in methods directly, everything else routed to a
//! capability server by method prefix or an explicit `server` param.

use crate::children::{CapabilityChild, CapabilityServerSpec};
use crate::jsonrpc::{self, Request, Response};
use crate::tools;
use crate::{BrokerError, Result, PROTOCOL_VERSION, SERVER_NAME, SERVER_VERSION};
use dcsandbox_runtime::{ContainerId, RuntimeDriver};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// One sandbox's WebSocket listener plus its capability server table
pub(crate) struct SandboxProxy {
    listener: TcpListener,
    shared: Arc<ProxyShared>,
    cancel: CancellationToken,
}

struct ProxyShared {
    sandbox_id: String,
    runtime: Arc<dyn RuntimeDriver>,
    container_id: ContainerId,
    children: HashMap<String, CapabilityChild>,
}

impl SandboxProxy {
    /// Bind the listener and spawn the enabled capability servers.
    ///
    /// A capability server that fails to spawn is logged and skipped; the
    /// built-in tools remain authoritative either way.
    pub(crate) async fn bind(
        host: &str,
        port: u16,
        sandbox_id: &str,
        specs: &[CapabilityServerSpec],
        runtime: Arc<dyn RuntimeDriver>,
        container_id: ContainerId,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| BrokerError::Bind { port, source: e })?;

        let mut children = HashMap::new();
        for spec in specs.iter().filter(|s| s.enabled) {
            match CapabilityChild::spawn(spec, cancel.clone()) {
                Ok(child) => {
                    tracing::debug!(sandbox = %sandbox_id, server = %spec.name, "capability server spawned");
                    children.insert(spec.name.clone(), child);
                }
                Err(e) => {
                    tracing::warn!(sandbox = %sandbox_id, server = %spec.name, error = %e, "capability server skipped");
                }
            }
        }

        Ok(Self {
            listener,
            shared: Arc::new(ProxyShared {
                sandbox_id: sandbox_id.to_string(),
                runtime,
                container_id,
                children,
            }),
            cancel,
        })
    }

    /// Accept loop; runs until the broker cancels it
    pub(crate) async fn serve(self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(sandbox = %self.shared.sandbox_id, %peer, "mcp client connected");
                            tokio::spawn(handle_connection(
                                stream,
                                self.shared.clone(),
                                self.cancel.clone(),
                            ));
                        }
                        Err(e) => {
                            tracing::warn!(sandbox = %self.shared.sandbox_id, error = %e, "accept failed");
                        }
                    }
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, shared: Arc<ProxyShared>, cancel: CancellationToken) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(sandbox = %shared.sandbox_id, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let (mut write, mut read) = ws.split();

    // Unsolicited handshake announcement
    let hello = jsonrpc::notification("initialized", initialize_payload());
    if write.send(Message::text(hello)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_frame(&shared, &text).await {
                            if write.send(Message::text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ping/Pong/Binary — ignore
                    Some(Err(e)) => {
                        tracing::debug!(sandbox = %shared.sandbox_id, error = %e, "mcp connection error");
                        break;
                    }
                }
            }
        }
    }
}

/// The payload mirrored by `initialize` and the post-accept notification
fn initialize_payload() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
        "serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
    })
}

/// Handle one text frame; None means no reply (notification)
async fn handle_frame(shared: &ProxyShared, text: &str) -> Option<String> {
    let req = match Request::parse(text) {
        Ok(req) => req,
        Err(resp) => return Some(resp.to_frame()),
    };

    if req.is_notification() {
        tracing::debug!(sandbox = %shared.sandbox_id, method = %req.method, "notification received");
        return None;
    }
    let id = req.id.clone().unwrap_or(Value::Null);

    let resp = match req.method.as_str() {
        "initialize" => Response::result(id, initialize_payload()),
        "tools/list" => Response::result(id, tools::tool_list()),
        "tools/call" => handle_tools_call(shared, id, req.params).await,
        "resources/list" => Response::result(id, tools::resource_list()),
        "resources/read" => handle_resources_read(shared, id, req.params).await,
        method => forward_to_capability(shared, id, method, req.params).await,
    };

    Some(resp.to_frame())
}

async fn handle_tools_call(shared: &ProxyShared, id: Value, params: Option<Value>) -> Response {
    let params = params.unwrap_or(Value::Null);
    let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
        return Response::error(id, jsonrpc::INVALID_REQUEST, "tools/call requires 'name'");
    };
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    let outcome = match name {
        "filesystem_read" => {
            let Some(path) = arguments.get("path").and_then(|v| v.as_str()) else {
                return tool_args_error(id, "filesystem_read requires 'path'");
            };
            tools::filesystem_read(shared.runtime.as_ref(), &shared.container_id, path).await
        }
        "filesystem_write" => {
            let Some(path) = arguments.get("path").and_then(|v| v.as_str()) else {
                return tool_args_error(id, "filesystem_write requires 'path'");
            };
            let Some(content) = arguments.get("content").and_then(|v| v.as_str()) else {
                return tool_args_error(id, "filesystem_write requires 'content'");
            };
            tools::filesystem_write(shared.runtime.as_ref(), &shared.container_id, path, content)
                .await
        }
        "shell_execute" => {
            let Some(command) = arguments.get("command").and_then(|v| v.as_str()) else {
                return tool_args_error(id, "shell_execute requires 'command'");
            };
            tools::shell_execute(shared.runtime.as_ref(), &shared.container_id, command).await
        }
        other => {
            // Capability-server tools are namespaced `<server>_<tool>`
            let prefix = other.split('_').next().unwrap_or(other);
            if let Some(child) = shared.children.get(prefix) {
                return relay_reply(
                    id,
                    child.forward("tools/call", Some(params.clone())).await,
                );
            }
            return Response::error(
                id,
                jsonrpc::METHOD_NOT_FOUND,
                &format!("unknown tool: {}", other),
            );
        }
    };

    Response::result(id, outcome.to_result())
}

fn tool_args_error(id: Value, message: &str) -> Response {
    Response::result(id, tools::ToolOutcome::err(message).to_result())
}

async fn handle_resources_read(shared: &ProxyShared, id: Value, params: Option<Value>) -> Response {
    let uri = params
        .as_ref()
        .and_then(|p| p.get("uri"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let Some(path) = uri.strip_prefix("file://") else {
        return Response::error(
            id,
            jsonrpc::INVALID_REQUEST,
            &format!("unsupported resource uri: {}", uri),
        );
    };

    let outcome = tools::filesystem_read(shared.runtime.as_ref(), &shared.container_id, path).await;
    if outcome.is_error {
        return Response::error(id, jsonrpc::INTERNAL_ERROR, &outcome.text);
    }

    Response::result(
        id,
        json!({
            "contents": [{"uri": uri, "mimeType": "text/plain", "text": outcome.text}],
        }),
    )
}

/// Route any other method to a capability server: explicit `server` param
/// first, then the method prefix before '/'.
async fn forward_to_capability(
    shared: &ProxyShared,
    id: Value,
    method: &str,
    params: Option<Value>,
) -> Response {
    let explicit = params
        .as_ref()
        .and_then(|p| p.get("server"))
        .and_then(|v| v.as_str());
    let route = explicit.or_else(|| method.split('/').next().filter(|p| *p != method));

    let child = route.and_then(|name| shared.children.get(name));
    let Some(child) = child else {
        return Response::error(id, jsonrpc::METHOD_NOT_FOUND, "Method not found");
    };

    relay_reply(id, child.forward(method, params).await)
}

/// Rebuild a child's JSON-RPC reply with the client's id
fn relay_reply(id: Value, reply: Result<Value>) -> Response {
    match reply {
        Ok(value) => {
            if let Some(result) = value.get("result") {
                Response::result(id, result.clone())
            } else if let Some(error) = value.get("error") {
                let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(jsonrpc::INTERNAL_ERROR);
                let message = error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("capability server error");
                Response::error(id, code, message)
            } else {
                Response::result(id, value)
            }
        }
        Err(BrokerError::ServerGone(_)) => {
            Response::error(id, jsonrpc::METHOD_NOT_FOUND, "Method not found")
        }
        Err(e) => Response::error(id, jsonrpc::INTERNAL_ERROR, &e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_without_children() -> Arc<ProxyShared> {
        struct NoRuntime;
        #[async_trait::async_trait]
        impl RuntimeDriver for NoRuntime {
            async fn build_image(
                &self,
                _: &dcsandbox_runtime::BuildConfig,
            ) -> dcsandbox_runtime::Result<dcsandbox_runtime::ImageId> {
                unimplemented!()
            }
            async fn remove_image(&self, _: &str, _: bool) -> dcsandbox_runtime::Result<()> {
                unimplemented!()
            }
            async fn create_container(
                &self,
                _: &dcsandbox_runtime::ContainerSpec,
            ) -> dcsandbox_runtime::Result<ContainerId> {
                unimplemented!()
            }
            async fn start_container(&self, _: &ContainerId) -> dcsandbox_runtime::Result<()> {
                unimplemented!()
            }
            async fn stop_container(
                &self,
                _: &ContainerId,
                _: Option<u32>,
            ) -> dcsandbox_runtime::Result<()> {
                unimplemented!()
            }
            async fn remove_container(
                &self,
                _: &ContainerId,
                _: bool,
            ) -> dcsandbox_runtime::Result<()> {
                unimplemented!()
            }
            async fn inspect_container(
                &self,
                _: &ContainerId,
            ) -> dcsandbox_runtime::Result<dcsandbox_runtime::ContainerDetails> {
                unimplemented!()
            }
            async fn exec(
                &self,
                _: &ContainerId,
                config: &dcsandbox_runtime::ExecConfig,
            ) -> dcsandbox_runtime::Result<dcsandbox_runtime::ExecResult> {
                // Echo the command back so dispatch tests can assert on it
                Ok(dcsandbox_runtime::ExecResult {
                    exit_code: 0,
                    output: config.cmd.join(" "),
                })
            }
            async fn logs(
                &self,
                _: &ContainerId,
                _: &dcsandbox_runtime::LogConfig,
            ) -> dcsandbox_runtime::Result<dcsandbox_runtime::LogStream> {
                unimplemented!()
            }
            async fn list_containers(
                &self,
                _: bool,
            ) -> dcsandbox_runtime::Result<Vec<dcsandbox_runtime::ContainerSummary>> {
                Ok(Vec::new())
            }
            async fn ping(&self) -> dcsandbox_runtime::Result<()> {
                Ok(())
            }
            fn info(&self) -> dcsandbox_runtime::DriverInfo {
                dcsandbox_runtime::DriverInfo {
                    runtime: dcsandbox_runtime::RuntimeKind::Docker,
                    api_version: "test".to_string(),
                }
            }
        }

        Arc::new(ProxyShared {
            sandbox_id: "test".to_string(),
            runtime: Arc::new(NoRuntime),
            container_id: ContainerId::new("c1"),
            children: HashMap::new(),
        })
    }

    #[tokio::test]
    async fn test_initialize_echoes_id() {
        let shared = shared_without_children();
        let reply = handle_frame(&shared, r#"{"jsonrpc":"2.0","id":7,"method":"initialize"}"#)
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["id"], json!(7));
        assert_eq!(value["result"]["protocolVersion"], json!(PROTOCOL_VERSION));
        assert_eq!(value["result"]["serverInfo"]["name"], json!(SERVER_NAME));
    }

    #[tokio::test]
    async fn test_parse_error_replies_null_id() {
        let shared = shared_without_children();
        let reply = handle_frame(&shared, "{broken").await.unwrap();
        let value: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], json!(jsonrpc::PARSE_ERROR));
    }

    #[tokio::test]
    async fn test_notification_gets_no_reply() {
        let shared = shared_without_children();
        let reply = handle_frame(
            &shared,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_tools_list() {
        let shared = shared_without_children();
        let reply = handle_frame(&shared, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["result"]["tools"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_method_not_found() {
        let shared = shared_without_children();
        let reply = handle_frame(
            &shared,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"bogus_tool"}}"#,
        )
        .await
        .unwrap();
        let value: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["error"]["code"], json!(jsonrpc::METHOD_NOT_FOUND));
        assert_eq!(value["id"], json!(2));
    }

    #[tokio::test]
    async fn test_unroutable_method_is_method_not_found() {
        let shared = shared_without_children();
        let reply = handle_frame(
            &shared,
            r#"{"jsonrpc":"2.0","id":3,"method":"git/status"}"#,
        )
        .await
        .unwrap();
        let value: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["error"]["code"], json!(jsonrpc::METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_shell_execute_runs_bash() {
        let shared = shared_without_children();
        let reply = handle_frame(
            &shared,
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"shell_execute","arguments":{"command":"echo hi"}}}"#,
        )
        .await
        .unwrap();
        let value: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["result"]["isError"], json!(false));
        let text = value["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("/bin/bash"));
        assert!(text.contains("echo hi"));
    }

    #[tokio::test]
    async fn test_filesystem_read_escape_is_tool_error() {
        let shared = shared_without_children();
        let reply = handle_frame(
            &shared,
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"filesystem_read","arguments":{"path":"../etc/passwd"}}}"#,
        )
        .await
        .unwrap();
        let value: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["result"]["isError"], json!(true));
    }

    #[tokio::test]
    async fn test_resources_list_has_workspace() {
        let shared = shared_without_children();
        let reply = handle_frame(
            &shared,
            r#"{"jsonrpc":"2.0","id":6,"method":"resources/list"}"#,
        )
        .await
        .unwrap();
        let value: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(
            value["result"]["resources"][0]["uri"],
            json!("file:///workspace")
        );
    }
}
