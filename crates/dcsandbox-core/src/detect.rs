//! Project auto-detection
//!
//! A scored classifier over a shallow directory listing (root plus one
//! level, dotfiles and node_modules excluded). Scoring is pure — all I/O
//! happens in [`shallow_listing`] — and the table is additive: the winner
//! is the detector with the highest total, tie-broken by detector order.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Confidence below which callers fall back to the `base` template
pub const CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Classification result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetection {
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
    pub template: String,
    pub confidence: f64,
}

impl ProjectDetection {
    /// Template to use, honoring the confidence threshold
    pub fn effective_template(&self) -> &str {
        if self.confidence >= CONFIDENCE_THRESHOLD {
            &self.template
        } else {
            "base"
        }
    }
}

/// Parsed state of a root package.json
#[derive(Debug, Clone, PartialEq)]
pub enum PackageJson {
    Absent,
    /// Present but unparseable
    Invalid,
    /// Dependency names from dependencies + devDependencies
    Deps(HashSet<String>),
}

/// Shallow view of a project tree
#[derive(Debug, Clone)]
pub struct Listing {
    /// File names at the root
    pub root_files: Vec<String>,
    /// File names one level down
    pub nested_files: Vec<String>,
    pub package_json: PackageJson,
}

impl Listing {
    fn has_root(&self, name: &str) -> bool {
        self.root_files.iter().any(|f| f == name)
    }

    fn has_extension(&self, ext: &str) -> bool {
        self.root_files
            .iter()
            .chain(self.nested_files.iter())
            .any(|f| f.ends_with(ext))
    }

    fn has_dep(&self, dep: &str) -> bool {
        matches!(&self.package_json, PackageJson::Deps(deps) if deps.contains(dep))
    }
}

/// Build a shallow listing of `root`: the root entries plus one directory
/// level, excluding dotfiles and node_modules.
pub fn shallow_listing(root: &Path) -> std::io::Result<Listing> {
    let mut root_files = Vec::new();
    let mut nested_files = Vec::new();

    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name == "node_modules" {
            continue;
        }

        if entry.path().is_dir() {
            let Ok(children) = std::fs::read_dir(entry.path()) else {
                continue;
            };
            for child in children.flatten() {
                let child_name = child.file_name().to_string_lossy().to_string();
                if child_name.starts_with('.') {
                    continue;
                }
                if child.path().is_file() {
                    nested_files.push(child_name);
                }
            }
        } else {
            root_files.push(name);
        }
    }

    let package_json = if root_files.iter().any(|f| f == "package.json") {
        match std::fs::read_to_string(root.join("package.json"))
            .ok()
            .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
        {
            Some(value) => {
                let mut deps = HashSet::new();
                for key in ["dependencies", "devDependencies"] {
                    if let Some(map) = value.get(key).and_then(|v| v.as_object()) {
                        deps.extend(map.keys().cloned());
                    }
                }
                PackageJson::Deps(deps)
            }
            None => PackageJson::Invalid,
        }
    } else {
        PackageJson::Absent
    };

    Ok(Listing {
        root_files,
        nested_files,
        package_json,
    })
}

/// Classify a listing. Pure; never reads the filesystem.
pub fn detect(listing: &Listing) -> ProjectDetection {
    // Detector order breaks score ties
    let detectors = [
        javascript, python, golang, rust, java, ruby, php, dotnet,
    ];

    let mut best: Option<ProjectDetection> = None;
    for detector in detectors {
        let candidate = detector(listing);
        let better = match &best {
            Some(current) => candidate.confidence > current.confidence,
            None => candidate.confidence > 0.0,
        };
        if better {
            best = Some(candidate);
        }
    }

    best.unwrap_or(ProjectDetection {
        language: "unknown".to_string(),
        framework: None,
        package_manager: None,
        template: "base".to_string(),
        confidence: 0.0,
    })
}

fn clamp(score: f64) -> f64 {
    score.clamp(0.0, 1.0)
}

fn javascript(listing: &Listing) -> ProjectDetection {
    let mut score = 0.0;
    let mut framework = None;
    let mut package_manager = None;
    let mut template = "node".to_string();

    if listing.has_root("package.json") {
        score += 0.8;
    }
    if listing.has_extension(".ts") || listing.has_extension(".tsx") {
        score += 0.1;
    }
    if listing.has_dep("react") {
        score += 0.1;
        framework = Some("react".to_string());
        template = "react".to_string();
    }
    if listing.has_dep("next") {
        score += 0.1;
        framework = Some("nextjs".to_string());
    }
    if listing.package_json == PackageJson::Invalid {
        score -= 0.2;
    }
    if listing.has_root("package-lock.json") {
        score += 0.05;
        package_manager = Some("npm".to_string());
    } else if listing.has_root("yarn.lock") {
        score += 0.05;
        package_manager = Some("yarn".to_string());
    } else if listing.has_root("pnpm-lock.yaml") {
        score += 0.05;
        package_manager = Some("pnpm".to_string());
    }

    ProjectDetection {
        language: "javascript".to_string(),
        framework,
        package_manager,
        template,
        confidence: clamp(score),
    }
}

fn python(listing: &Listing) -> ProjectDetection {
    let mut score = 0.0;
    let mut framework = None;
    let mut package_manager = None;
    let mut template = "python".to_string();

    if listing.has_extension(".py") {
        score += 0.6;
    }
    if listing.has_root("requirements.txt") {
        score += 0.2;
        package_manager = Some("pip".to_string());
    }
    if listing.has_root("manage.py") {
        score += 0.15;
        framework = Some("django".to_string());
        template = "django".to_string();
    }

    ProjectDetection {
        language: "python".to_string(),
        framework,
        package_manager,
        template,
        confidence: clamp(score),
    }
}

fn golang(listing: &Listing) -> ProjectDetection {
    let mut score = 0.0;
    let mut package_manager = None;

    if listing.has_extension(".go") {
        score += 0.7;
    }
    if listing.has_root("go.mod") {
        score += 0.2;
        package_manager = Some("go-modules".to_string());
    }

    ProjectDetection {
        language: "go".to_string(),
        framework: None,
        package_manager,
        template: "go".to_string(),
        confidence: clamp(score),
    }
}

fn rust(listing: &Listing) -> ProjectDetection {
    let mut score = 0.0;
    let mut package_manager = None;

    if listing.has_extension(".rs") {
        score += 0.7;
    }
    if listing.has_root("Cargo.toml") {
        score += 0.25;
        package_manager = Some("cargo".to_string());
    }

    ProjectDetection {
        language: "rust".to_string(),
        framework: None,
        package_manager,
        template: "rust".to_string(),
        confidence: clamp(score),
    }
}

fn java(listing: &Listing) -> ProjectDetection {
    let mut score = 0.0;
    if listing.has_root("pom.xml") || listing.has_root("build.gradle") {
        score += 0.2;
    }

    ProjectDetection {
        language: "java".to_string(),
        framework: None,
        package_manager: None,
        template: "base".to_string(),
        confidence: clamp(score),
    }
}

fn ruby(listing: &Listing) -> ProjectDetection {
    let mut score = 0.0;
    let mut package_manager = None;
    if listing.has_root("Gemfile") {
        score += 0.2;
        package_manager = Some("bundler".to_string());
    }

    ProjectDetection {
        language: "ruby".to_string(),
        framework: None,
        package_manager,
        template: "base".to_string(),
        confidence: clamp(score),
    }
}

fn php(listing: &Listing) -> ProjectDetection {
    let mut score = 0.0;
    let mut package_manager = None;
    if listing.has_root("composer.json") {
        score += 0.2;
        package_manager = Some("composer".to_string());
    }

    ProjectDetection {
        language: "php".to_string(),
        framework: None,
        package_manager,
        template: "base".to_string(),
        confidence: clamp(score),
    }
}

fn dotnet(listing: &Listing) -> ProjectDetection {
    let mut score = 0.0;
    if listing.has_extension(".csproj") || listing.has_extension(".sln") {
        score += 0.2;
    }

    ProjectDetection {
        language: "csharp".to_string(),
        framework: None,
        package_manager: None,
        template: "base".to_string(),
        confidence: clamp(score),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(root: &[&str], nested: &[&str], package_json: PackageJson) -> Listing {
        Listing {
            root_files: root.iter().map(|s| s.to_string()).collect(),
            nested_files: nested.iter().map(|s| s.to_string()).collect(),
            package_json,
        }
    }

    fn deps(names: &[&str]) -> PackageJson {
        PackageJson::Deps(names.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_react_project() {
        let l = listing(
            &["package.json", "package-lock.json"],
            &["App.tsx"],
            deps(&["react", "react-dom"]),
        );
        let d = detect(&l);
        assert_eq!(d.language, "javascript");
        assert_eq!(d.framework.as_deref(), Some("react"));
        assert_eq!(d.package_manager.as_deref(), Some("npm"));
        assert_eq!(d.template, "react");
        // 0.8 + 0.1 (tsx) + 0.1 (react) + 0.05 (lock)
        assert!(d.confidence >= 0.9);
        assert_eq!(d.effective_template(), "react");
    }

    #[test]
    fn test_plain_node_project() {
        let l = listing(&["package.json", "index.js"], &[], deps(&["express"]));
        let d = detect(&l);
        assert_eq!(d.language, "javascript");
        assert_eq!(d.template, "node");
        assert!(d.framework.is_none());
        assert!((d.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_package_json_parse_error_penalty() {
        let good = listing(&["package.json"], &[], deps(&[]));
        let bad = listing(&["package.json"], &[], PackageJson::Invalid);
        let good_score = detect(&good).confidence;
        let bad_score = detect(&bad).confidence;
        assert!((good_score - bad_score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_django_project() {
        let l = listing(
            &["manage.py", "requirements.txt", "app.py"],
            &["models.py"],
            PackageJson::Absent,
        );
        let d = detect(&l);
        assert_eq!(d.language, "python");
        assert_eq!(d.framework.as_deref(), Some("django"));
        assert_eq!(d.package_manager.as_deref(), Some("pip"));
        assert_eq!(d.template, "django");
        // 0.6 + 0.2 + 0.15
        assert!(d.confidence >= 0.9);
    }

    #[test]
    fn test_go_project() {
        let l = listing(&["go.mod", "main.go"], &[], PackageJson::Absent);
        let d = detect(&l);
        assert_eq!(d.language, "go");
        assert_eq!(d.package_manager.as_deref(), Some("go-modules"));
        assert!((d.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_rust_project() {
        let l = listing(&["Cargo.toml"], &["main.rs"], PackageJson::Absent);
        let d = detect(&l);
        assert_eq!(d.language, "rust");
        assert_eq!(d.template, "rust");
        assert_eq!(d.package_manager.as_deref(), Some("cargo"));
        assert!((d.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_low_confidence_falls_back_to_base() {
        let l = listing(&["Gemfile"], &[], PackageJson::Absent);
        let d = detect(&l);
        assert_eq!(d.language, "ruby");
        assert!(d.confidence < CONFIDENCE_THRESHOLD);
        assert_eq!(d.effective_template(), "base");
    }

    #[test]
    fn test_empty_listing_is_unknown() {
        let l = listing(&[], &[], PackageJson::Absent);
        let d = detect(&l);
        assert_eq!(d.language, "unknown");
        assert_eq!(d.confidence, 0.0);
        assert_eq!(d.effective_template(), "base");
    }

    #[test]
    fn test_tie_break_follows_detector_order() {
        // java and ruby both score 0.2; java wins by order
        let l = listing(&["pom.xml", "Gemfile"], &[], PackageJson::Absent);
        let d = detect(&l);
        assert_eq!(d.language, "java");
    }

    #[test]
    fn test_monotonicity_adding_files_never_lowers_correct_score() {
        let base = listing(&["main.go"], &[], PackageJson::Absent);
        let more = listing(&["main.go", "go.mod"], &[], PackageJson::Absent);
        assert!(detect(&more).confidence >= detect(&base).confidence);
    }

    #[test]
    fn test_confidence_clamped_to_one() {
        let l = listing(
            &[
                "package.json",
                "package-lock.json",
            ],
            &["a.ts"],
            deps(&["react", "next"]),
        );
        let d = detect(&l);
        assert!(d.confidence <= 1.0);
    }

    #[test]
    fn test_shallow_listing_excludes_dotfiles_and_node_modules() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("package.json"), "{}").unwrap();
        std::fs::write(tmp.path().join(".env"), "SECRET=1").unwrap();
        std::fs::create_dir_all(tmp.path().join("node_modules/react")).unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("src/index.ts"), "").unwrap();

        let l = shallow_listing(tmp.path()).unwrap();
        assert!(l.root_files.contains(&"package.json".to_string()));
        assert!(!l.root_files.contains(&".env".to_string()));
        assert!(l.nested_files.contains(&"index.ts".to_string()));
        assert_eq!(l.package_json, PackageJson::Deps(Default::default()));
    }

    #[test]
    fn test_shallow_listing_detects_invalid_package_json() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("package.json"), "{broken").unwrap();
        let l = shallow_listing(tmp.path()).unwrap();
        assert_eq!(l.package_json, PackageJson::Invalid);
    }
}
