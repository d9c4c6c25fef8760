//! Build context synthesis
//!
//! Generates the Dockerfile and the devcontainer descriptor for a sandbox
//! from its resolved template. The container must outlive its entrypoint,
//! so the synthesized image idles on `sleep infinity` and exposes bash via
//! `SHELL` for exec sessions.

use crate::Template;

/// Render the Dockerfile for a template
pub fn generate_containerfile(template: &Template) -> String {
    let mut out = String::new();
    out.push_str(&format!("FROM {}\n\n", template.base_image));

    if !template.features.is_empty() {
        out.push_str(&format!(
            "RUN apt-get update \\\n    && apt-get install -y --no-install-recommends {} \\\n    && rm -rf /var/lib/apt/lists/*\n\n",
            template.features.join(" ")
        ));
    }

    for (key, value) in sorted_env(template) {
        out.push_str(&format!("ENV {}=\"{}\"\n", key, value.replace('"', "\\\"")));
    }
    if !template.env.is_empty() {
        out.push('\n');
    }

    out.push_str("ENV SHELL=/bin/bash\n");
    out.push_str("WORKDIR /workspace\n");
    out.push_str("COPY workspace/ /workspace/\n");

    for port in &template.ports {
        out.push_str(&format!("EXPOSE {}\n", port));
    }

    out.push_str("\nCMD [\"sleep\", \"infinity\"]\n");
    out
}

/// Render the devcontainer descriptor written next to the Dockerfile
pub fn generate_devcontainer(template: &Template, sandbox_name: &str) -> String {
    let descriptor = serde_json::json!({
        "name": sandbox_name,
        "build": {
            "dockerfile": "../Dockerfile",
            "context": "..",
        },
        "workspaceFolder": "/workspace",
        "forwardPorts": template.ports,
        "containerEnv": template.env,
        "postCreateCommand": template.post_create.join(" && "),
    });
    // json! never produces unserializable values
    serde_json::to_string_pretty(&descriptor).unwrap_or_default()
}

/// Deterministic ENV ordering so rebuilds hit the layer cache
fn sorted_env(template: &Template) -> Vec<(&String, &String)> {
    let mut env: Vec<_> = template.env.iter().collect();
    env.sort_by_key(|(k, _)| k.as_str());
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn template() -> Template {
        Template {
            name: "node".to_string(),
            base_image: "node:20-bookworm".to_string(),
            features: vec!["git".to_string(), "curl".to_string()],
            capability_servers: Vec::new(),
            post_create: vec!["npm install".to_string()],
            env: HashMap::from([("NODE_ENV".to_string(), "development".to_string())]),
            ports: vec![3000],
        }
    }

    #[test]
    fn test_containerfile_shape() {
        let out = generate_containerfile(&template());
        assert!(out.starts_with("FROM node:20-bookworm\n"));
        assert!(out.contains("apt-get install -y --no-install-recommends git curl"));
        assert!(out.contains("ENV NODE_ENV=\"development\""));
        assert!(out.contains("WORKDIR /workspace"));
        assert!(out.contains("COPY workspace/ /workspace/"));
        assert!(out.contains("EXPOSE 3000"));
        assert!(out.ends_with("CMD [\"sleep\", \"infinity\"]\n"));
    }

    #[test]
    fn test_containerfile_without_features_has_no_apt_layer() {
        let mut t = template();
        t.features.clear();
        let out = generate_containerfile(&t);
        assert!(!out.contains("apt-get"));
    }

    #[test]
    fn test_env_order_is_deterministic() {
        let mut t = template();
        t.env.insert("AAA".to_string(), "1".to_string());
        t.env.insert("ZZZ".to_string(), "2".to_string());
        let out = generate_containerfile(&t);
        let aaa = out.find("ENV AAA").unwrap();
        let node = out.find("ENV NODE_ENV").unwrap();
        let zzz = out.find("ENV ZZZ").unwrap();
        assert!(aaa < node && node < zzz);
    }

    #[test]
    fn test_devcontainer_descriptor() {
        let out = generate_devcontainer(&template(), "s1");
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["name"], serde_json::json!("s1"));
        assert_eq!(value["workspaceFolder"], serde_json::json!("/workspace"));
        assert_eq!(value["forwardPorts"][0], serde_json::json!(3000));
        assert_eq!(value["postCreateCommand"], serde_json::json!("npm install"));
    }
}
