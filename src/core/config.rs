/// Environment file handling
///
/// Parses .env-style files (key=value with comments) and merges several
/// sources into one consolidated file. Merge order is deterministic:
/// project-local overrides first, then one file per required template in
/// resolution order. The first source to define a key wins; later
/// definitions are dropped with a warning naming both sources.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigValue {
    pub key: String,
    pub value: String,
    pub comment: Option<String>,
}

/// One parsed env file, order-preserving.
pub struct EnvFile {
    path: PathBuf,
    entries: Vec<ConfigValue>,
    index: HashMap<String, usize>,
}

impl EnvFile {
    /// Load an env file from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(anyhow!("env file not found at {}", path.display()));
        }

        let content = std::fs::read_to_string(&path).context("Failed to read env file")?;

        let mut entries = Vec::new();
        let mut index = HashMap::new();
        let mut current_comment = None;

        for line in content.lines() {
            let line = line.trim();

            // Handle comments
            if line.starts_with('#') {
                current_comment = Some(line.trim_start_matches('#').trim().to_string());
                continue;
            }

            // Skip empty lines
            if line.is_empty() {
                current_comment = None;
                continue;
            }

            // Parse key=value
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().to_string();
                let value = value.trim().to_string();

                index.insert(key.clone(), entries.len());
                entries.push(ConfigValue {
                    key,
                    value,
                    comment: current_comment.take(),
                });
            }
        }

        Ok(Self { path, entries, index })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a configuration value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.index
            .get(key)
            .map(|&i| self.entries[i].value.as_str())
    }

    /// All keys, in file order
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }

    pub fn entries(&self) -> &[ConfigValue] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One input to the env merge: a display label (used in duplicate warnings)
/// plus the raw file content.
#[derive(Debug, Clone)]
pub struct EnvSource {
    pub label: String,
    pub content: String,
}

impl EnvSource {
    pub fn read(label: impl Into<String>, path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(Self {
            label: label.into(),
            content,
        }))
    }
}

/// Result of a merge. `seen` is the accumulator threaded through every
/// step: key -> label of the source that first defined it, in first-seen
/// order.
#[derive(Debug, Default)]
pub struct EnvMerge {
    pub lines: Vec<String>,
    pub seen: Vec<(String, String)>,
    pub warnings: Vec<String>,
}

impl EnvMerge {
    pub fn origin_of(&self, key: &str) -> Option<&str> {
        self.seen
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, label)| label.as_str())
    }

    pub fn rendered(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            let _ = writeln!(out, "{}", line);
        }
        out
    }
}

/// Merge env sources in priority order. Comments and blank lines pass
/// through unconditionally from whichever file is currently scanned;
/// duplicate keys are dropped with a warning; whitespace around `=` is
/// normalized away.
pub fn merge_env_sources(sources: &[EnvSource]) -> EnvMerge {
    let mut merge = EnvMerge::default();

    for source in sources {
        for raw_line in source.content.lines() {
            let line = raw_line.trim();

            if line.is_empty() || line.starts_with('#') {
                merge.lines.push(line.to_string());
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                merge.lines.push(line.to_string());
                continue;
            };

            let key = key.trim();
            let value = value.trim();

            if let Some(origin) = merge.origin_of(key) {
                merge.warnings.push(format!(
                    "duplicate variable {} in {} (already defined in {})",
                    key, source.label, origin
                ));
                continue;
            }

            merge.seen.push((key.to_string(), source.label.clone()));
            merge.lines.push(format!("{}={}", key, value));
        }
    }

    merge
}

/// Variables referenced as `${NAME}` in `text` but defined by none of the
/// merged sources.
pub fn undefined_variables(text: &str, merge: &EnvMerge) -> Vec<String> {
    let pattern = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();

    let mut missing = Vec::new();
    for capture in pattern.captures_iter(text) {
        let name = &capture[1];
        if merge.origin_of(name).is_none() && !missing.iter().any(|m| m == name) {
            missing.push(name.to_string());
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn source(label: &str, content: &str) -> EnvSource {
        EnvSource {
            label: label.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_env_file_parsing() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# Database settings").unwrap();
        writeln!(file, "DB_HOST=mariadb").unwrap();
        writeln!(file, "DB_PORT = 3306").unwrap();

        let env = EnvFile::load(file.path()).unwrap();

        assert_eq!(env.get("DB_HOST"), Some("mariadb"));
        assert_eq!(env.get("DB_PORT"), Some("3306"));
        assert_eq!(env.entries()[0].comment.as_deref(), Some("Database settings"));
    }

    #[test]
    fn test_first_writer_wins() {
        let merge = merge_env_sources(&[
            source("local.env", "DB_HOST=override\n"),
            source("services/mariadb.env", "DB_HOST=mariadb\nDB_PORT=3306\n"),
        ]);

        assert_eq!(merge.lines, vec!["DB_HOST=override", "DB_PORT=3306"]);
        assert_eq!(merge.origin_of("DB_HOST"), Some("local.env"));
        assert_eq!(merge.warnings.len(), 1);
        assert!(merge.warnings[0].contains("DB_HOST"));
        assert!(merge.warnings[0].contains("services/mariadb.env"));
        assert!(merge.warnings[0].contains("local.env"));
    }

    #[test]
    fn test_each_key_appears_exactly_once() {
        let merge = merge_env_sources(&[
            source("a.env", "X=1\nY=2\n"),
            source("b.env", "Y=3\nZ=4\n"),
            source("c.env", "X=5\nZ=6\n"),
        ]);

        let mut keys: Vec<&str> = merge
            .lines
            .iter()
            .filter_map(|l| l.split_once('=').map(|(k, _)| k))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 3);
        assert_eq!(merge.origin_of("Y"), Some("a.env"));
        assert_eq!(merge.origin_of("Z"), Some("b.env"));
    }

    #[test]
    fn test_comments_and_blanks_pass_through() {
        let merge = merge_env_sources(&[
            source("a.env", "# first\n\nX=1\n"),
            source("b.env", "# second\nX=2\n"),
        ]);

        assert_eq!(merge.lines, vec!["# first", "", "X=1", "# second"]);
    }

    #[test]
    fn test_whitespace_around_equals_normalized() {
        let merge = merge_env_sources(&[source("a.env", "KEY = some value \n")]);
        assert_eq!(merge.lines, vec!["KEY=some value"]);
    }

    #[test]
    fn test_undefined_variables() {
        let merge = merge_env_sources(&[source("a.env", "DB_HOST=x\n")]);
        let text = "services:\n  db:\n    image: mariadb:${MARIADB_TAG}\n    host: ${DB_HOST}\n";

        assert_eq!(undefined_variables(text, &merge), vec!["MARIADB_TAG"]);
    }
}
