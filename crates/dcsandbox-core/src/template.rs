//! Template records and the registry
//!
//! Templates are YAML data. Custom templates under
//! `~/.config/dcsandbox/templates/` shadow the built-ins, which ship
//! embedded in the binary. A file that fails shape validation is skipped
//! with a warning, never a listing failure.

use crate::{EngineError, Result};
use dcsandbox_mcp::CapabilityServerSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// A template record: how to build and configure a sandbox image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub name: String,
    pub base_image: String,
    /// Packages installed on top of the base image
    pub features: Vec<String>,
    pub capability_servers: Vec<CapabilityServerSpec>,
    #[serde(default)]
    pub post_create: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub ports: Vec<u16>,
}

impl Template {
    fn parse(source: &str, origin: &str) -> Option<Template> {
        match serde_yaml::from_str::<Template>(source) {
            Ok(t) if t.name.is_empty() || t.base_image.is_empty() => {
                tracing::warn!(template = %origin, "skipping template with empty name or baseImage");
                None
            }
            Ok(t) => Some(t),
            Err(e) => {
                tracing::warn!(template = %origin, error = %e, "skipping malformed template");
                None
            }
        }
    }
}

/// Built-in template data, shipped with the binary
const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("base", include_str!("../templates/base.yaml")),
    ("node", include_str!("../templates/node.yaml")),
    ("python", include_str!("../templates/python.yaml")),
    ("go", include_str!("../templates/go.yaml")),
    ("rust", include_str!("../templates/rust.yaml")),
    ("react", include_str!("../templates/react.yaml")),
    ("django", include_str!("../templates/django.yaml")),
    ("fullstack", include_str!("../templates/fullstack.yaml")),
];

/// Ordered template lookup: custom directory first, then built-ins
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    custom_dir: Option<PathBuf>,
}

impl TemplateRegistry {
    pub fn new(custom_dir: Option<PathBuf>) -> Self {
        Self { custom_dir }
    }

    /// Registry over the built-ins only
    pub fn builtin_only() -> Self {
        Self { custom_dir: None }
    }

    /// Look up a template by name
    pub fn lookup(&self, name: &str) -> Result<Template> {
        if let Some(template) = self.custom_templates().into_iter().find(|t| t.name == name) {
            return Ok(template);
        }

        BUILTIN_TEMPLATES
            .iter()
            .find(|(builtin_name, _)| *builtin_name == name)
            .and_then(|(origin, source)| Template::parse(source, origin))
            .ok_or_else(|| EngineError::TemplateNotFound(name.to_string()))
    }

    /// All templates, custom entries shadowing built-ins by name
    pub fn list(&self) -> Vec<Template> {
        let mut templates = self.custom_templates();

        for (origin, source) in BUILTIN_TEMPLATES {
            if templates.iter().any(|t| t.name == *origin) {
                continue;
            }
            if let Some(t) = Template::parse(source, origin) {
                templates.push(t);
            }
        }

        templates
    }

    fn custom_templates(&self) -> Vec<Template> {
        let Some(ref dir) = self.custom_dir else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };

        let mut templates = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .is_some_and(|e| e == "yaml" || e == "yml");
            if !is_yaml {
                continue;
            }
            let Ok(source) = std::fs::read_to_string(&path) else {
                tracing::warn!(path = %path.display(), "skipping unreadable template file");
                continue;
            };
            if let Some(t) = Template::parse(&source, &path.display().to_string()) {
                templates.push(t);
            }
        }
        templates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_builtins_parse() {
        let registry = TemplateRegistry::builtin_only();
        for name in ["base", "node", "python", "go", "rust", "react", "django", "fullstack"] {
            let t = registry.lookup(name).unwrap();
            assert_eq!(t.name, name);
            assert!(!t.base_image.is_empty());
        }
    }

    #[test]
    fn test_builtins_declare_standard_capability_servers() {
        let registry = TemplateRegistry::builtin_only();
        for name in ["base", "node", "python", "go", "rust", "react", "django", "fullstack"] {
            let t = registry.lookup(name).unwrap();
            for server in ["filesystem", "shell", "git"] {
                assert!(
                    t.capability_servers.iter().any(|s| s.name == server),
                    "{} is missing the {} server",
                    name,
                    server
                );
            }
        }
    }

    #[test]
    fn test_language_specific_servers() {
        let registry = TemplateRegistry::builtin_only();
        let node = registry.lookup("node").unwrap();
        assert!(node.capability_servers.iter().any(|s| s.name == "npm"));
        let python = registry.lookup("python").unwrap();
        assert!(python.capability_servers.iter().any(|s| s.name == "python"));
    }

    #[test]
    fn test_react_exposes_3000() {
        let registry = TemplateRegistry::builtin_only();
        let react = registry.lookup("react").unwrap();
        assert!(react.ports.contains(&3000));
    }

    #[test]
    fn test_unknown_template_fails() {
        let registry = TemplateRegistry::builtin_only();
        let err = registry.lookup("nosuch").unwrap_err();
        assert_eq!(err.code(), "TEMPLATE_NOT_FOUND");
    }

    #[test]
    fn test_custom_shadows_builtin() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("node.yaml"),
            r#"
name: node
baseImage: node:21-custom
features: [git]
capabilityServers:
  - name: filesystem
    command: mcp-filesystem
"#,
        )
        .unwrap();

        let registry = TemplateRegistry::new(Some(tmp.path().to_path_buf()));
        let node = registry.lookup("node").unwrap();
        assert_eq!(node.base_image, "node:21-custom");

        // list() carries the shadowed entry exactly once
        let names: Vec<_> = registry.list().into_iter().filter(|t| t.name == "node").collect();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].base_image, "node:21-custom");
    }

    #[test]
    fn test_invalid_custom_template_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("broken.yaml"), "name: [not a string").unwrap();
        std::fs::write(
            tmp.path().join("shapeless.yaml"),
            "name: shapeless\n", // missing required fields
        )
        .unwrap();

        let registry = TemplateRegistry::new(Some(tmp.path().to_path_buf()));
        // Listing still works and only contains the built-ins
        let list = registry.list();
        assert!(list.iter().all(|t| t.name != "shapeless"));
        assert!(registry.lookup("shapeless").is_err());
    }

    #[test]
    fn test_missing_custom_dir_is_fine() {
        let registry = TemplateRegistry::new(Some(PathBuf::from("/nonexistent/dcsandbox")));
        assert!(registry.lookup("base").is_ok());
    }
}
