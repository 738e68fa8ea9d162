/// Failure taxonomy shared by the assembler and the backup chain manager
///
/// Call sites keep `anyhow::Result` and `?`; fatal conditions are constructed
/// from these variants so callers (and tests) can downcast to the concrete
/// failure kind.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StackError {
    /// Missing or empty required declarations in the project descriptor.
    #[error("config error: {0}")]
    Config(String),

    /// Remote template retrieval failed (network, auth, bad ref).
    #[error("template fetch failed: {0}")]
    Fetch(String),

    /// The requested template subtree does not exist at the resolved ref.
    #[error("not found: {0}")]
    NotFound(String),

    /// Gap in the incremental backup sequence.
    #[error("backup chain inconsistent: {0}")]
    ChainInconsistent(String),

    /// A check that must hold before running failed (database still up,
    /// insufficient disk space, non-writable target).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// An external backup/restore/dump command exited non-zero.
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailure {
        tool: String,
        status: i32,
        stderr: String,
    },

    /// Another run holds the lock file; the operation is skipped, not queued.
    #[error("lock file already held: {}", .0.display())]
    LockHeld(PathBuf),
}

impl StackError {
    pub fn tool_failure(tool: &str, status: Option<i32>, stderr: impl Into<String>) -> Self {
        StackError::ToolFailure {
            tool: tool.to_string(),
            status: status.unwrap_or(-1),
            stderr: stderr.into(),
        }
    }
}
