//! Built-in tool surface
//!
//! The filesystem and shell tools are authoritative and map directly onto
//! exec in the sandbox container. Paths are confined to `/workspace`.

use dcsandbox_runtime::{ContainerId, ExecConfig, RuntimeDriver};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Workspace root inside every sandbox container
pub const WORKSPACE_ROOT: &str = "/workspace";

/// Result of a built-in tool invocation
#[derive(Debug)]
pub struct ToolOutcome {
    pub is_error: bool,
    pub text: String,
}

impl ToolOutcome {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            text: text.into(),
        }
    }

    pub fn err(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            text: text.into(),
        }
    }

    /// The wire shape for tools/call results
    pub fn to_result(&self) -> Value {
        json!({
            "isError": self.is_error,
            "content": [{"type": "text", "text": self.text}],
        })
    }
}

/// Static tool listing for `tools/list`
pub fn tool_list() -> Value {
    json!({
        "tools": [
            {
                "name": "filesystem_read",
                "description": "Read a file from the sandbox workspace",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Path relative to /workspace"}
                    },
                    "required": ["path"]
                }
            },
            {
                "name": "filesystem_write",
                "description": "Write a file in the sandbox workspace",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Path relative to /workspace"},
                        "content": {"type": "string", "description": "File content"}
                    },
                    "required": ["path", "content"]
                }
            },
            {
                "name": "shell_execute",
                "description": "Run a shell command in the sandbox workspace",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "command": {"type": "string", "description": "Command passed to bash -c"}
                    },
                    "required": ["command"]
                }
            }
        ]
    })
}

/// Static resource listing for `resources/list`
pub fn resource_list() -> Value {
    json!({
        "resources": [
            {
                "uri": "file:///workspace",
                "name": "workspace",
                "description": "Sandbox workspace root",
            }
        ]
    })
}

/// Normalize a client-supplied path to an absolute path under `/workspace`.
///
/// Resolution is lexical: `.` segments drop, `..` pops, and any attempt to
/// pop past the workspace root (or an absolute path outside it) is rejected.
pub fn normalize_workspace_path(path: &str) -> Result<String, String> {
    let relative = if let Some(stripped) = path.strip_prefix(WORKSPACE_ROOT) {
        stripped.trim_start_matches('/')
    } else if path.starts_with('/') {
        return Err(format!("path '{}' is outside the workspace", path));
    } else {
        path
    };

    let mut parts: Vec<&str> = Vec::new();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(format!("path '{}' escapes the workspace", path));
                }
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        Ok(WORKSPACE_ROOT.to_string())
    } else {
        Ok(format!("{}/{}", WORKSPACE_ROOT, parts.join("/")))
    }
}

/// `filesystem_read`: cat the file inside the container
pub async fn filesystem_read(
    runtime: &dyn RuntimeDriver,
    container: &ContainerId,
    path: &str,
) -> ToolOutcome {
    let full = match normalize_workspace_path(path) {
        Ok(p) => p,
        Err(e) => return ToolOutcome::err(e),
    };

    let config = ExecConfig {
        cmd: vec!["cat".to_string(), full],
        env: HashMap::new(),
        working_dir: Some(WORKSPACE_ROOT.to_string()),
        user: None,
        stdin: None,
    };

    match runtime.exec(container, &config).await {
        Ok(result) if result.exit_code == 0 => ToolOutcome::ok(result.output),
        Ok(result) => ToolOutcome::err(result.output),
        Err(e) => ToolOutcome::err(e.to_string()),
    }
}

/// `filesystem_write`: stream content to tee, creating parent directories
pub async fn filesystem_write(
    runtime: &dyn RuntimeDriver,
    container: &ContainerId,
    path: &str,
    content: &str,
) -> ToolOutcome {
    let full = match normalize_workspace_path(path) {
        Ok(p) => p,
        Err(e) => return ToolOutcome::err(e),
    };

    let parent = full.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(WORKSPACE_ROOT);
    let script = format!(
        "mkdir -p {} && tee {} > /dev/null",
        shell_quote(parent),
        shell_quote(&full)
    );

    let config = ExecConfig {
        cmd: vec!["/bin/sh".to_string(), "-c".to_string(), script],
        env: HashMap::new(),
        working_dir: Some(WORKSPACE_ROOT.to_string()),
        user: None,
        stdin: Some(content.to_string()),
    };

    match runtime.exec(container, &config).await {
        Ok(result) if result.exit_code == 0 => {
            ToolOutcome::ok(format!("wrote {} bytes to {}", content.len(), full))
        }
        Ok(result) => ToolOutcome::err(result.output),
        Err(e) => ToolOutcome::err(e.to_string()),
    }
}

/// `shell_execute`: bash -c in the workspace, combined output
pub async fn shell_execute(
    runtime: &dyn RuntimeDriver,
    container: &ContainerId,
    command: &str,
) -> ToolOutcome {
    let config = ExecConfig {
        cmd: vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            command.to_string(),
        ],
        env: HashMap::new(),
        working_dir: Some(WORKSPACE_ROOT.to_string()),
        user: None,
        stdin: None,
    };

    match runtime.exec(container, &config).await {
        Ok(result) if result.exit_code == 0 => ToolOutcome::ok(result.output),
        Ok(result) => ToolOutcome::err(format!(
            "exit code {}\n{}",
            result.exit_code, result.output
        )),
        Err(e) => ToolOutcome::err(e.to_string()),
    }
}

/// Quote a path for use inside `sh -c`
fn shell_quote(value: &str) -> String {
    if value
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain_path() {
        assert_eq!(
            normalize_workspace_path("a.txt").unwrap(),
            "/workspace/a.txt"
        );
        assert_eq!(
            normalize_workspace_path("src/main.rs").unwrap(),
            "/workspace/src/main.rs"
        );
    }

    #[test]
    fn test_normalize_accepts_workspace_prefix() {
        assert_eq!(
            normalize_workspace_path("/workspace/a.txt").unwrap(),
            "/workspace/a.txt"
        );
        assert_eq!(normalize_workspace_path("/workspace").unwrap(), "/workspace");
    }

    #[test]
    fn test_normalize_collapses_dots() {
        assert_eq!(
            normalize_workspace_path("a/./b/../c.txt").unwrap(),
            "/workspace/a/c.txt"
        );
    }

    #[test]
    fn test_normalize_rejects_escape() {
        assert!(normalize_workspace_path("../etc/passwd").is_err());
        assert!(normalize_workspace_path("a/../../etc").is_err());
        assert!(normalize_workspace_path("/etc/passwd").is_err());
        assert!(normalize_workspace_path("/workspace/../etc").is_err());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/workspace/a.txt"), "/workspace/a.txt");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_tool_outcome_wire_shape() {
        let outcome = ToolOutcome::err("boom");
        let value = outcome.to_result();
        assert_eq!(value["isError"], serde_json::json!(true));
        assert_eq!(value["content"][0]["type"], serde_json::json!("text"));
        assert_eq!(value["content"][0]["text"], serde_json::json!("boom"));
    }

    #[test]
    fn test_tool_list_names() {
        let list = tool_list();
        let names: Vec<&str> = list["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["filesystem_read", "filesystem_write", "shell_execute"]
        );
    }
}
