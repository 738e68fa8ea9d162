/// Restore driving
///
/// A restore replays the resolved chain against the restore directory:
/// decompress archived members, log-apply the full, apply each
/// incremental in ascending order, then wipe the live data directory and
/// copy the prepared base back. The restore directory being empty is a
/// deliberate no-op so a restore container starts cleanly on hosts where
/// no restore was requested.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use sysinfo::System;

use crate::core::artifact::{self, Artifact};
use crate::core::backup::BackupConfig;
use crate::core::chain::resolve_restore_chain;
use crate::core::engine::DbEngine;
use crate::core::lock::RunLock;
use crate::error::StackError;
use crate::utils::constants::RUN_LOCK;
use crate::utils::is_dir_writable;

#[derive(Debug, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Chain applied and copied back into the data directory.
    Completed { chain_len: usize },
    /// Chain prepared but the data directory was left untouched.
    DryRun { chain_len: usize },
    /// Restore directory holds no qualifying artifacts.
    NothingToRestore,
    /// Another restore holds the lock; this run did nothing.
    Skipped,
}

/// Both probes must come back negative before a restore may touch the
/// data directory; a reachable server always refuses the restore, dry-run
/// included.
pub fn ensure_stopped_database(ping_answered: bool, process_found: bool) -> Result<()> {
    if ping_answered {
        return Err(StackError::Precondition(
            "database answered the liveness probe; stop it before restoring".to_string(),
        )
        .into());
    }
    if process_found {
        return Err(StackError::Precondition(
            "a database server process is still running; stop it before restoring".to_string(),
        )
        .into());
    }
    Ok(())
}

pub fn ensure_writable_target(data_dir: &Path) -> Result<()> {
    if !is_dir_writable(data_dir) {
        return Err(StackError::Precondition(format!(
            "data directory {} is missing or not writable",
            data_dir.display()
        ))
        .into());
    }
    Ok(())
}

/// Scan the process table for a server process of this engine.
pub fn database_process_running(engine: DbEngine) -> bool {
    let sys = System::new_all();
    sys.processes().values().any(|process| {
        let name = process.name().to_lowercase();
        engine
            .process_names()
            .iter()
            .any(|candidate| name.contains(candidate))
    })
}

pub struct RestoreManager {
    config: BackupConfig,
}

impl RestoreManager {
    pub fn new(config: BackupConfig) -> Self {
        Self { config }
    }

    /// Run a restore against the configured restore directory.
    pub async fn run(&self, dry_run: bool) -> Result<RestoreOutcome> {
        let lock_path = self.config.restore_dir.join(RUN_LOCK);
        let _lock = match RunLock::acquire(&lock_path) {
            Ok(lock) => lock,
            Err(e) if matches!(e.downcast_ref::<StackError>(), Some(StackError::LockHeld(_))) => {
                eprintln!(
                    "{} restore lock at {} is held, skipping this run",
                    "⚠".yellow(),
                    lock_path.display()
                );
                return Ok(RestoreOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        let store = artifact::scan_backup_root(&self.config.restore_dir)?;
        let chain = resolve_restore_chain(&store)?;
        if chain.is_empty() {
            println!("Restore directory is empty, nothing to restore");
            return Ok(RestoreOutcome::NothingToRestore);
        }

        let ping_answered = self.ping_answers().await;
        let process_found = database_process_running(self.config.engine);
        ensure_stopped_database(ping_answered, process_found)?;
        ensure_writable_target(&self.config.data_dir)?;

        // Decompress archived members in place, keeping chain order
        let mut members = Vec::with_capacity(chain.len());
        for artifact in &chain {
            members.push(self.materialize(artifact).await?);
        }

        let (base_dir, incremental_dirs) = members.split_first().expect("chain is non-empty");
        self.prepare_chain(base_dir, incremental_dirs).await?;

        if dry_run {
            println!(
                "Dry run: prepared {} chain member(s), data directory untouched",
                members.len()
            );
            return Ok(RestoreOutcome::DryRun {
                chain_len: members.len(),
            });
        }

        self.copy_back(base_dir).await?;

        Ok(RestoreOutcome::Completed {
            chain_len: members.len(),
        })
    }

    async fn ping_answers(&self) -> bool {
        let mut cmd =
            tokio::process::Command::from(self.config.engine.ping_cmd(&self.config.credentials));
        cmd.stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Directory form of a chain member, extracting the single-archive
    /// variant through the external zstd/tar pair when needed.
    async fn materialize(&self, artifact: &Artifact) -> Result<PathBuf> {
        if !artifact.compressed {
            return Ok(artifact.path.clone());
        }

        let parent = artifact
            .path
            .parent()
            .context("artifact has no parent directory")?;

        let status = tokio::process::Command::new("tar")
            .arg("--zstd")
            .arg("-xf")
            .arg(&artifact.path)
            .arg("-C")
            .arg(parent)
            .status()
            .await
            .context("Failed to run tar")?;

        if !status.success() {
            return Err(
                StackError::tool_failure("tar", status.code(), "archive extraction failed").into(),
            );
        }

        let id = artifact.id.to_string();
        let name = id.rsplit('/').next().expect("id has a name component");
        let extracted = parent.join(name);
        if !extracted.is_dir() {
            return Err(StackError::tool_failure(
                "tar",
                Some(0),
                format!("archive did not contain {}", extracted.display()),
            )
            .into());
        }

        Ok(extracted)
    }

    /// Log-apply the base, then each incremental in ascending order, then
    /// the finishing prepare pass. Engines without a prepare step skip
    /// this entirely.
    async fn prepare_chain(&self, base_dir: &Path, incremental_dirs: &[PathBuf]) -> Result<()> {
        let engine = self.config.engine;

        if let Some(cmd) = engine.prepare_cmd(base_dir, None, true) {
            self.run_tool("prepare", cmd).await?;
        }
        for incremental in incremental_dirs {
            if let Some(cmd) = engine.prepare_cmd(base_dir, Some(incremental), true) {
                self.run_tool("prepare", cmd).await?;
            }
        }
        if let Some(cmd) = engine.prepare_cmd(base_dir, None, false) {
            self.run_tool("prepare", cmd).await?;
        }

        Ok(())
    }

    /// Wipe the live data directory, copy the prepared base back, fix
    /// ownership.
    async fn copy_back(&self, base_dir: &Path) -> Result<()> {
        let data_dir = &self.config.data_dir;

        for entry in std::fs::read_dir(data_dir)
            .with_context(|| format!("Failed to read {}", data_dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                std::fs::remove_dir_all(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            } else {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }

        match self.config.engine.copy_back_cmd(base_dir, data_dir) {
            Some(cmd) => self.run_tool("copy-back", cmd).await?,
            None => {
                copy_dir_contents(base_dir, data_dir)?;
            }
        }

        let owner = match self.config.engine {
            DbEngine::MariaDb => "mysql:mysql",
            DbEngine::Postgres => "postgres:postgres",
        };
        let chown = tokio::process::Command::new("chown")
            .arg("-R")
            .arg(owner)
            .arg(data_dir)
            .status()
            .await;
        match chown {
            Ok(status) if status.success() => {}
            _ => eprintln!(
                "{} could not fix ownership of {}",
                "⚠".yellow(),
                data_dir.display()
            ),
        }

        Ok(())
    }

    async fn run_tool(&self, label: &str, cmd: std::process::Command) -> Result<()> {
        let mut cmd = tokio::process::Command::from(cmd);
        let output = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to run {} tool", label))?;

        if !output.status.success() {
            return Err(StackError::tool_failure(
                label,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )
            .into());
        }

        Ok(())
    }
}

fn copy_dir_contents(src: &Path, dest: &Path) -> Result<()> {
    for entry in
        std::fs::read_dir(src).with_context(|| format!("Failed to read {}", src.display()))?
    {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            std::fs::create_dir_all(&target)?;
            copy_dir_contents(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", target.display()))?;
        }
    }
    Ok(())
}
