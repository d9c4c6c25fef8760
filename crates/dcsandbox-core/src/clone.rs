//! Git clone into the sandbox cache
//!
//! Shallow, single-branch clones via the host `git` binary. A destination
//! left behind by a failed earlier attempt is wiped before cloning.

use crate::{EngineError, Result};
use std::path::Path;
use tokio::process::Command;

/// Clone `url` at `branch` into `dest`
pub async fn clone_repository(url: &str, branch: &str, dest: &Path) -> Result<()> {
    if dest.exists() {
        tracing::debug!(dest = %dest.display(), "wiping stale clone directory");
        std::fs::remove_dir_all(dest)?;
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let output = Command::new("git")
        .arg("clone")
        .arg("--depth")
        .arg("1")
        .arg("--single-branch")
        .arg("--branch")
        .arg(branch)
        .arg(url)
        .arg(dest)
        .output()
        .await
        .map_err(|e| EngineError::CloneFailed {
            url: url.to_string(),
            message: format!("failed to run git: {}", e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EngineError::CloneFailed {
            url: url.to_string(),
            message: stderr.trim().to_string(),
        });
    }

    Ok(())
}

/// Derive a sandbox name from a repository URL: the basename without `.git`
pub fn repo_basename(url: &str) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let base = trimmed.rsplit('/').next()?;
    let base = base.strip_suffix(".git").unwrap_or(base);
    if base.is_empty() {
        None
    } else {
        Some(base.to_string())
    }
}

/// Copy a directory tree, skipping `.git`
pub fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let target = dest.join(&name);
        if entry.path().is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_basename() {
        assert_eq!(
            repo_basename("https://github.com/acme/widget.git").as_deref(),
            Some("widget")
        );
        assert_eq!(
            repo_basename("https://github.com/acme/widget").as_deref(),
            Some("widget")
        );
        assert_eq!(
            repo_basename("git@host:acme/widget.git/").as_deref(),
            Some("widget")
        );
        assert_eq!(repo_basename(""), None);
    }

    #[tokio::test]
    async fn test_clone_unreachable_host_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("clone");
        let err = clone_repository("https://example.invalid/x.git", "main", &dest)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CLONE_FAILED");
    }

    #[tokio::test]
    async fn test_clone_wipes_stale_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("clone");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("stale.txt"), "old").unwrap();

        // Clone still fails (bad host) but the stale tree is gone first
        let _ = clone_repository("https://example.invalid/x.git", "main", &dest).await;
        assert!(!dest.join("stale.txt").exists());
    }

    #[test]
    fn test_copy_tree_skips_git_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join(".git")).unwrap();
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("a.txt"), "a").unwrap();
        std::fs::write(src.join("sub/b.txt"), "b").unwrap();
        std::fs::write(src.join(".git/HEAD"), "ref").unwrap();

        let dest = tmp.path().join("dest");
        copy_tree(&src, &dest).unwrap();

        assert!(dest.join("a.txt").exists());
        assert!(dest.join("sub/b.txt").exists());
        assert!(!dest.join(".git").exists());
    }
}
