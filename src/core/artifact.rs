/// Backup artifact identity and discovery
///
/// Artifact identity is typed (kind, date, sequence numbers); directory
/// names are parsed once, here, and every later decision (chain
/// resolution, pruning) operates on the typed values.
///
/// On-disk layout inside the backup root:
///   full/<YYYYMMDD>_<NN>/                     hot-backup directory
///   full/full_<YYYYMMDD>_<NN>.zst             single-archive variant
///   incremental/<YYYYMMDD>_<NN>_<MM>/         delta against a full
///   incremental/incremental_<YYYYMMDD>_<NN>_<MM>.zst
///   dumps/<name>_<YYYYMMDD>_<HHMMSS>.sql.gz   logical dump

use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::utils::constants::{DUMPS_DIR, FULL_DIR, INCREMENTAL_DIR};

/// Identity of a full backup: date stamp plus a two-digit sequence scoped
/// to that date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FullId {
    pub date: NaiveDate,
    pub seq: u32,
}

impl FullId {
    pub fn parse(s: &str) -> Option<Self> {
        let re = full_id_pattern();
        let caps = re.captures(s)?;
        let date = NaiveDate::parse_from_str(&caps[1], "%Y%m%d").ok()?;
        let seq: u32 = caps[2].parse().ok()?;
        Some(Self { date, seq })
    }
}

impl fmt::Display for FullId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:02}", self.date.format("%Y%m%d"), self.seq)
    }
}

/// Identity of an incremental backup: the base full plus the position in
/// its delta sequence (1-based, contiguous).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IncrementalId {
    pub base: FullId,
    pub seq: u32,
}

impl fmt::Display for IncrementalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:02}", self.base, self.seq)
    }
}

/// Identity of a logical dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpId {
    pub database: String,
    pub stamp: String, // YYYYMMDD_HHMMSS
}

impl fmt::Display for DumpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.database, self.stamp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactId {
    Full(FullId),
    Incremental(IncrementalId),
    Dump(DumpId),
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactId::Full(id) => write!(f, "full/{}", id),
            ArtifactId::Incremental(id) => write!(f, "incremental/{}", id),
            ArtifactId::Dump(id) => write!(f, "dumps/{}", id),
        }
    }
}

/// One artifact found on disk.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub id: ArtifactId,
    pub path: PathBuf,
    pub modified: SystemTime,
    /// True for the single-archive (.zst) variant.
    pub compressed: bool,
}

impl Artifact {
    pub fn full_id(&self) -> Option<FullId> {
        match &self.id {
            ArtifactId::Full(id) => Some(*id),
            _ => None,
        }
    }

    pub fn incremental_id(&self) -> Option<IncrementalId> {
        match &self.id {
            ArtifactId::Incremental(id) => Some(*id),
            _ => None,
        }
    }
}

/// Every artifact under a backup root, sorted by identity.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    pub fulls: Vec<Artifact>,
    pub incrementals: Vec<Artifact>,
    pub dumps: Vec<Artifact>,
}

impl ArtifactStore {
    pub fn is_empty(&self) -> bool {
        self.fulls.is_empty() && self.incrementals.is_empty() && self.dumps.is_empty()
    }

    /// Latest full by (date, sequence).
    pub fn latest_full(&self) -> Option<&Artifact> {
        self.fulls.last()
    }

    /// Incrementals referencing `base`, in ascending sequence order.
    pub fn incrementals_for(&self, base: FullId) -> Vec<&Artifact> {
        self.incrementals
            .iter()
            .filter(|a| matches!(&a.id, ArtifactId::Incremental(id) if id.base == base))
            .collect()
    }

    /// Next sequence number for a full backup taken on `date`.
    pub fn next_full_seq(&self, date: NaiveDate) -> u32 {
        self.fulls
            .iter()
            .filter_map(|a| a.full_id())
            .filter(|id| id.date == date)
            .map(|id| id.seq)
            .max()
            .map(|s| s + 1)
            .unwrap_or(1)
    }

    /// Next sequence number for an incremental on top of `base`.
    pub fn next_incremental_seq(&self, base: FullId) -> u32 {
        self.incrementals
            .iter()
            .filter_map(|a| a.incremental_id())
            .filter(|id| id.base == base)
            .map(|id| id.seq)
            .max()
            .map(|s| s + 1)
            .unwrap_or(1)
    }
}

fn full_id_pattern() -> Regex {
    Regex::new(r"^(\d{8})_(\d{2})$").unwrap()
}

fn parse_full_entry(name: &str) -> Option<(FullId, bool)> {
    if let Some(id) = FullId::parse(name) {
        return Some((id, false));
    }
    let archived = Regex::new(r"^full_(\d{8}_\d{2})\.zst$").unwrap();
    let caps = archived.captures(name)?;
    FullId::parse(&caps[1]).map(|id| (id, true))
}

fn parse_incremental_entry(name: &str) -> Option<(IncrementalId, bool)> {
    let plain = Regex::new(r"^(\d{8}_\d{2})_(\d{2})$").unwrap();
    if let Some(caps) = plain.captures(name) {
        let base = FullId::parse(&caps[1])?;
        let seq: u32 = caps[2].parse().ok()?;
        return Some((IncrementalId { base, seq }, false));
    }
    let archived = Regex::new(r"^incremental_(\d{8}_\d{2})_(\d{2})\.zst$").unwrap();
    let caps = archived.captures(name)?;
    let base = FullId::parse(&caps[1])?;
    let seq: u32 = caps[2].parse().ok()?;
    Some((IncrementalId { base, seq }, true))
}

fn parse_dump_entry(name: &str) -> Option<DumpId> {
    let re = Regex::new(r"^(.+)_(\d{8}_\d{6})\.sql\.gz$").unwrap();
    let caps = re.captures(name)?;
    Some(DumpId {
        database: caps[1].to_string(),
        stamp: caps[2].to_string(),
    })
}

/// Scan a backup root. Unrecognized entries are skipped; the subdirs may
/// be absent entirely (fresh root).
pub fn scan_backup_root(root: &Path) -> Result<ArtifactStore> {
    let mut store = ArtifactStore::default();

    for entry in read_dir_entries(&root.join(FULL_DIR))? {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some((id, compressed)) = parse_full_entry(&name) {
            store.fulls.push(Artifact {
                id: ArtifactId::Full(id),
                path: entry.path(),
                modified: modified_time(&entry.path())?,
                compressed,
            });
        }
    }

    for entry in read_dir_entries(&root.join(INCREMENTAL_DIR))? {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some((id, compressed)) = parse_incremental_entry(&name) {
            store.incrementals.push(Artifact {
                id: ArtifactId::Incremental(id),
                path: entry.path(),
                modified: modified_time(&entry.path())?,
                compressed,
            });
        }
    }

    for entry in read_dir_entries(&root.join(DUMPS_DIR))? {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(id) = parse_dump_entry(&name) {
            store.dumps.push(Artifact {
                id: ArtifactId::Dump(id),
                path: entry.path(),
                modified: modified_time(&entry.path())?,
                compressed: true,
            });
        }
    }

    store
        .fulls
        .sort_by_key(|a| a.full_id().expect("full artifact"));
    store
        .incrementals
        .sort_by_key(|a| a.incremental_id().expect("incremental artifact"));
    store.dumps.sort_by_key(|a| match &a.id {
        ArtifactId::Dump(d) => (d.database.clone(), d.stamp.clone()),
        _ => unreachable!(),
    });

    Ok(store)
}

fn read_dir_entries(dir: &Path) -> Result<Vec<std::fs::DirEntry>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
    {
        entries.push(entry?);
    }
    Ok(entries)
}

fn modified_time(path: &Path) -> Result<SystemTime> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    metadata
        .modified()
        .with_context(|| format!("No modification time for {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y%m%d").unwrap()
    }

    #[test]
    fn test_full_id_roundtrip() {
        let id = FullId::parse("20250101_01").unwrap();
        assert_eq!(id.date, date("20250101"));
        assert_eq!(id.seq, 1);
        assert_eq!(id.to_string(), "20250101_01");

        assert!(FullId::parse("2025_01").is_none());
        assert!(FullId::parse("20250101_1").is_none());
    }

    #[test]
    fn test_archived_names() {
        let (id, compressed) = parse_full_entry("full_20250101_02.zst").unwrap();
        assert_eq!(id.to_string(), "20250101_02");
        assert!(compressed);

        let (id, compressed) = parse_incremental_entry("incremental_20250101_02_03.zst").unwrap();
        assert_eq!(id.to_string(), "20250101_02_03");
        assert!(compressed);
    }

    #[test]
    fn test_dump_names() {
        let id = parse_dump_entry("shop_db_20250101_134500.sql.gz").unwrap();
        assert_eq!(id.database, "shop_db");
        assert_eq!(id.stamp, "20250101_134500");

        assert!(parse_dump_entry("shop_db.sql.gz").is_none());
    }

    #[test]
    fn test_scan_and_ordering() {
        let root = tempfile::tempdir().unwrap();
        for dir in ["full/20250102_01", "full/20250101_02", "full/20250101_01"] {
            std::fs::create_dir_all(root.path().join(dir)).unwrap();
        }
        std::fs::create_dir_all(root.path().join("incremental/20250102_01_02")).unwrap();
        std::fs::create_dir_all(root.path().join("incremental/20250102_01_01")).unwrap();
        std::fs::create_dir_all(root.path().join("full/not-a-backup")).unwrap();

        let store = scan_backup_root(root.path()).unwrap();

        let fulls: Vec<String> = store.fulls.iter().map(|a| a.id.to_string()).collect();
        assert_eq!(
            fulls,
            vec!["full/20250101_01", "full/20250101_02", "full/20250102_01"]
        );
        assert_eq!(
            store.latest_full().unwrap().full_id().unwrap().to_string(),
            "20250102_01"
        );

        let base = FullId::parse("20250102_01").unwrap();
        let incr: Vec<String> = store
            .incrementals_for(base)
            .iter()
            .map(|a| a.id.to_string())
            .collect();
        assert_eq!(
            incr,
            vec!["incremental/20250102_01_01", "incremental/20250102_01_02"]
        );
    }

    #[test]
    fn test_sequence_numbering() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("full/20250101_01")).unwrap();
        std::fs::create_dir_all(root.path().join("full/20250101_02")).unwrap();
        std::fs::create_dir_all(root.path().join("incremental/20250101_02_01")).unwrap();

        let store = scan_backup_root(root.path()).unwrap();

        assert_eq!(store.next_full_seq(date("20250101")), 3);
        assert_eq!(store.next_full_seq(date("20250102")), 1);

        let base = FullId::parse("20250101_02").unwrap();
        assert_eq!(store.next_incremental_seq(base), 2);
        let other = FullId::parse("20250101_01").unwrap();
        assert_eq!(store.next_incremental_seq(other), 1);
    }

    #[test]
    fn test_empty_root() {
        let root = tempfile::tempdir().unwrap();
        let store = scan_backup_root(root.path()).unwrap();
        assert!(store.is_empty());
    }
}
