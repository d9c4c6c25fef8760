//! On-disk sandbox store
//!
//! One directory per record under the sandboxes root:
//!
//! ```text
//! <sandboxes>/<id>/config.json   record
//! <sandboxes>/<id>/workspace/    bind-mounted into the container
//! <sandboxes>/<id>/Dockerfile    synthesized build context
//! ```
//!
//! The store exclusively owns the record files. `config.json` is always
//! written to a temp file in the same directory and renamed into place.
//! The store never writes into `workspace/` after materialization; that
//! tree belongs to the container through its bind mount.

use crate::{Result, SandboxRecord};
use std::path::{Path, PathBuf};

/// Durable index of sandbox records
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Store rooted at an explicit directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store at the default `~/.dcsandbox/sandboxes`
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(dcsandbox_config::GlobalConfig::sandboxes_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<sandboxes>/<id>`
    pub fn sandbox_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// `<sandboxes>/<id>/workspace`
    pub fn workspace_dir(&self, id: &str) -> PathBuf {
        self.sandbox_dir(id).join("workspace")
    }

    /// `<sandboxes>/<id>/config.json`
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.sandbox_dir(id).join("config.json")
    }

    /// Persist a record atomically
    pub fn save(&self, record: &SandboxRecord) -> Result<()> {
        let dir = self.sandbox_dir(&record.id);
        std::fs::create_dir_all(&dir)?;

        let content = serde_json::to_vec_pretty(record)
            .map_err(|e| crate::EngineError::MalformedRecord(e.to_string()))?;
        atomic_write(&self.record_path(&record.id), &content)?;
        Ok(())
    }

    /// Load one record; Ok(None) when the directory or file is absent
    pub fn load(&self, id: &str) -> Result<Option<SandboxRecord>> {
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let record = serde_json::from_str(&content)
            .map_err(|_| crate::EngineError::MalformedRecord(path.display().to_string()))?;
        Ok(Some(record))
    }

    /// Enumerate all records, newest first.
    ///
    /// Partial trees (a directory without a readable `config.json`) are
    /// skipped with a warning rather than failing the listing.
    pub fn load_all(&self) -> Result<Vec<SandboxRecord>> {
        let mut records = Vec::new();

        if !self.root.exists() {
            return Ok(records);
        }

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            match self.load(&id) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {
                    tracing::warn!(sandbox = %id, "skipping sandbox directory without config.json");
                }
                Err(e) => {
                    tracing::warn!(sandbox = %id, error = %e, "skipping unreadable sandbox record");
                }
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Delete a sandbox directory tree
    pub fn remove(&self, id: &str) -> Result<()> {
        let dir = self.sandbox_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Write-to-temp-then-rename in the target's directory
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "config".to_string())
    ));
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{McpSettings, ResourceLimits, SandboxStatus};
    use chrono::Utc;

    fn make_record(name: &str) -> SandboxRecord {
        SandboxRecord {
            id: SandboxRecord::generate_id(),
            name: name.to_string(),
            status: SandboxStatus::Creating,
            created_at: Utc::now(),
            template: "base".to_string(),
            git: None,
            mcp: McpSettings {
                enabled: true,
                servers: Vec::new(),
                port: None,
            },
            resources: ResourceLimits {
                memory_bytes: 1 << 30,
                cpu_millicores: 1000,
                disk_bytes: 10 << 30,
                timeout_seconds: 3600,
            },
            container_id: None,
            named_explicitly: false,
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path());

        let record = make_record("roundtrip");
        store.save(&record).unwrap();

        let loaded = store.load(&record.id).unwrap().unwrap();
        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.name, "roundtrip");
        assert_eq!(loaded.status, SandboxStatus::Creating);

        // Byte-identical after a second normalization pass
        let first = serde_json::to_string(&loaded).unwrap();
        store.save(&loaded).unwrap();
        let again = serde_json::to_string(&store.load(&record.id).unwrap().unwrap()).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_load_missing_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path());
        assert!(store.load("nosuchid").unwrap().is_none());
    }

    #[test]
    fn test_load_all_skips_partial_trees() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path());

        store.save(&make_record("good")).unwrap();

        // Directory without config.json
        std::fs::create_dir_all(tmp.path().join("orphandir")).unwrap();
        // Directory with corrupt config.json
        let bad = tmp.path().join("badrecord");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("config.json"), "{corrupt").unwrap();

        let records = store.load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "good");
    }

    #[test]
    fn test_load_all_sorted_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path());

        let mut older = make_record("older");
        older.created_at = Utc::now() - chrono::Duration::hours(1);
        let newer = make_record("newer");

        store.save(&older).unwrap();
        store.save(&newer).unwrap();

        let records = store.load_all().unwrap();
        assert_eq!(records[0].name, "newer");
        assert_eq!(records[1].name, "older");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path());

        let record = make_record("gone");
        store.save(&record).unwrap();
        store.remove(&record.id).unwrap();
        assert!(store.load(&record.id).unwrap().is_none());
        // Second remove of an absent tree succeeds
        store.remove(&record.id).unwrap();
    }

    #[test]
    fn test_atomic_write_leaves_no_temp() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        atomic_write(&path, b"{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
