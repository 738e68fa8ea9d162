/// Helper utilities for the stackctl CLI

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::utils::constants::PROJECT_DESCRIPTOR;

/// Resolve the project directory for a command.
///
/// Explicit argument wins; otherwise the environment override, the saved app
/// config, and finally a walk up from the current directory looking for the
/// project descriptor.
pub fn resolve_project_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    use crate::utils::AppConfig;

    if let Some(dir) = explicit {
        let dir = dir.to_path_buf();
        if !dir.join(PROJECT_DESCRIPTOR).exists() {
            anyhow::bail!("{} not found in {}", PROJECT_DESCRIPTOR, dir.display());
        }
        return Ok(dir);
    }

    if let Ok(root) = std::env::var("STACKCTL_PROJECT_ROOT") {
        let path = PathBuf::from(root);
        if path.join(PROJECT_DESCRIPTOR).exists() {
            return Ok(path);
        }
    }

    if let Ok(config) = AppConfig::load() {
        if let Some(root) = config.project_root {
            let path = PathBuf::from(&root);
            if path.join(PROJECT_DESCRIPTOR).exists() {
                return Ok(path);
            }
        }
    }

    let current_dir = std::env::current_dir().context("Failed to get current directory")?;

    let mut dir = current_dir.as_path();
    loop {
        if dir.join(PROJECT_DESCRIPTOR).exists() {
            // Save for future invocations from elsewhere
            if let Ok(mut config) = AppConfig::load() {
                let _ = config.set_project_root(dir.to_path_buf());
            }
            return Ok(dir.to_path_buf());
        }

        match dir.parent() {
            Some(parent) => dir = parent,
            None => break,
        }
    }

    anyhow::bail!(
        "Could not find a stackctl project ({} not found)\n\n\
        Option 1 - Pass the project directory:\n\
          stackctl assemble /path/to/project\n\n\
        Option 2 - Set environment variable:\n\
          export STACKCTL_PROJECT_ROOT=/path/to/project\n\n\
        Option 3 - Run from inside the project directory",
        PROJECT_DESCRIPTOR
    )
}

/// Format bytes to human-readable size
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Mask sensitive data (show only first and last N characters)
pub fn mask_sensitive(value: &str, visible_chars: usize) -> String {
    if value.len() <= visible_chars * 2 {
        "*".repeat(value.len())
    } else {
        let start = &value[..visible_chars];
        let end = &value[value.len() - visible_chars..];
        format!("{}...{}", start, end)
    }
}

/// Keys whose values must never be printed in clear text.
pub fn is_sensitive_key(key: &str) -> bool {
    key.contains("PASSWORD") || key.contains("SECRET") || key.contains("KEY") || key.contains("TOKEN")
}

/// Generate a random hex string of specified length
pub fn generate_hex_string(length: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| format!("{:x}", rng.gen::<u8>() % 16))
        .collect()
}

/// Check if a directory exists and is writable
pub fn is_dir_writable<P: AsRef<Path>>(path: P) -> bool {
    if let Ok(metadata) = std::fs::metadata(&path) {
        metadata.is_dir() && !metadata.permissions().readonly()
    } else {
        false
    }
}

/// Copy a directory tree into `dest` without overwriting anything that
/// already exists there. Returns the number of files copied.
pub fn copy_tree_no_overwrite(src: &Path, dest: &Path) -> Result<usize> {
    let mut copied = 0;

    if !src.is_dir() {
        return Ok(0);
    }
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copied += copy_tree_no_overwrite(&entry.path(), &target)?;
        } else if !target.exists() {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", target.display()))?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }

    #[test]
    fn test_mask_sensitive() {
        let token = "5e7f294e4c92a9aa661fae8d347d832d";
        let masked = mask_sensitive(token, 4);
        assert_eq!(masked, "5e7f...832d");
    }

    #[test]
    fn test_is_sensitive_key() {
        assert!(is_sensitive_key("DB_PASSWORD"));
        assert!(is_sensitive_key("API_SECRET"));
        assert!(!is_sensitive_key("DB_HOST"));
    }

    #[test]
    fn test_generate_hex_string() {
        let s = generate_hex_string(32);
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_copy_tree_no_overwrite() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        std::fs::create_dir(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("a.txt"), "template").unwrap();
        std::fs::write(src.path().join("sub/b.txt"), "template").unwrap();
        std::fs::write(dest.path().join("a.txt"), "customized").unwrap();

        let copied = copy_tree_no_overwrite(src.path(), dest.path()).unwrap();

        assert_eq!(copied, 1);
        assert_eq!(
            std::fs::read_to_string(dest.path().join("a.txt")).unwrap(),
            "customized"
        );
        assert_eq!(
            std::fs::read_to_string(dest.path().join("sub/b.txt")).unwrap(),
            "template"
        );
    }
}
