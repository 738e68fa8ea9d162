/// Template retrieval
///
/// Fetches only the template subtree at a given ref from the remote
/// repository: depth-1 fetch, blob filter, sparse checkout of the subtree.
/// One attempt, no retry; failures surface immediately.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;

use crate::error::StackError;

/// A checked-out template subtree, pinned to a resolved revision. The
/// scratch directory lives as long as the snapshot.
#[derive(Debug)]
pub struct TemplateSnapshot {
    revision: String,
    subtree: PathBuf,
    _scratch: TempDir,
}

impl TemplateSnapshot {
    /// Resolved commit hash of the fetched ref.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Directory of one template inside the subtree.
    pub fn template_dir(&self, name: &str) -> PathBuf {
        self.subtree.join(name)
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.template_dir(name).is_dir()
    }

    /// Names of all templates present in the snapshot.
    pub fn template_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.subtree)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Fetch the template subtree at `git_ref` from `remote_url`.
pub async fn fetch_templates(
    remote_url: &str,
    git_ref: &str,
    subpath: &str,
) -> Result<TemplateSnapshot> {
    let scratch = TempDir::new().map_err(|e| {
        StackError::Fetch(format!("failed to create scratch directory: {}", e))
    })?;
    let dir = scratch.path();

    run_git(dir, &["init", "-q"]).await?;
    run_git(dir, &["remote", "add", "origin", remote_url]).await?;
    run_git(dir, &["sparse-checkout", "set", subpath]).await?;
    run_git(
        dir,
        &["fetch", "-q", "--depth", "1", "--filter=blob:none", "origin", git_ref],
    )
    .await?;
    run_git(dir, &["checkout", "-q", "FETCH_HEAD"]).await?;

    let revision = run_git(dir, &["rev-parse", "FETCH_HEAD"]).await?.trim().to_string();

    let subtree = dir.join(subpath);
    if !subtree.is_dir() {
        return Err(StackError::NotFound(format!(
            "subpath '{}' does not exist in {} at {}",
            subpath, remote_url, revision
        ))
        .into());
    }

    Ok(TemplateSnapshot {
        revision,
        subtree,
        _scratch: scratch,
    })
}

async fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| StackError::Fetch(format!("failed to run git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StackError::Fetch(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        ))
        .into());
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn git(dir: &Path, args: &[&str]) -> bool {
        StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@test")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@test")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_fetch_local_remote() {
        // Requires a git binary; skip quietly where it is missing
        if !git(Path::new("."), &["--version"]) {
            return;
        }

        let remote = tempfile::tempdir().unwrap();
        assert!(git(remote.path(), &["init", "-q", "-b", "main"]));
        std::fs::create_dir_all(remote.path().join("templates/redis")).unwrap();
        std::fs::write(
            remote.path().join("templates/redis/docker-compose.yml"),
            "services:\n  redis:\n    image: redis:7\n",
        )
        .unwrap();
        assert!(git(remote.path(), &["add", "."]));
        assert!(git(remote.path(), &["commit", "-q", "-m", "templates"]));

        let url = remote.path().to_string_lossy().to_string();
        let snapshot = fetch_templates(&url, "main", "templates").await.unwrap();

        assert_eq!(snapshot.revision().len(), 40);
        assert!(snapshot.has_template("redis"));
        assert_eq!(snapshot.template_names().unwrap(), vec!["redis"]);
    }

    #[tokio::test]
    async fn test_missing_subpath_is_not_found() {
        if !git(Path::new("."), &["--version"]) {
            return;
        }

        let remote = tempfile::tempdir().unwrap();
        assert!(git(remote.path(), &["init", "-q", "-b", "main"]));
        std::fs::write(remote.path().join("README.md"), "no templates here\n").unwrap();
        assert!(git(remote.path(), &["add", "."]));
        assert!(git(remote.path(), &["commit", "-q", "-m", "init"]));

        let url = remote.path().to_string_lossy().to_string();
        let err = fetch_templates(&url, "main", "templates").await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<StackError>(),
            Some(StackError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_ref_is_fetch_error() {
        if !git(Path::new("."), &["--version"]) {
            return;
        }

        let remote = tempfile::tempdir().unwrap();
        assert!(git(remote.path(), &["init", "-q", "-b", "main"]));

        let url = remote.path().to_string_lossy().to_string();
        let err = fetch_templates(&url, "no-such-ref", "templates")
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<StackError>(),
            Some(StackError::Fetch(_))
        ));
    }
}
