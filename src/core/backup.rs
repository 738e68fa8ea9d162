/// Backup creation and retention
///
/// Creates full, incremental, and logical-dump artifacts on demand. Each
/// invocation is sequential: preflight checks, a fresh uniquely numbered
/// artifact, the engine tool, then verification. A failed tool run
/// removes its artifact directory before returning, so no partial
/// artifact is ever left looking valid.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use colored::Colorize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use crate::core::artifact::{self, ArtifactStore, FullId, IncrementalId};
use crate::core::chain::{plan_prune, PrunePlan};
use crate::core::engine::{DbCredentials, DbEngine};
use crate::core::lock::RunLock;
use crate::core::storage;
use crate::error::StackError;
use crate::utils::constants::*;
use crate::utils::format_bytes;

/// Sidecar configuration, read from the container environment.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub engine: DbEngine,
    pub credentials: DbCredentials,
    pub backup_dir: PathBuf,
    pub restore_dir: PathBuf,
    pub data_dir: PathBuf,
    pub retention_days: u64,
    pub min_free_bytes: u64,
}

impl BackupConfig {
    /// Read configuration from the environment, loading a .env file first
    /// when one is present (the sidecar container mounts one).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let engine = match std::env::var(ENV_ENGINE) {
            Ok(value) => DbEngine::parse(&value)?,
            Err(_) => DbEngine::MariaDb,
        };

        let password = match std::env::var(ENV_DB_PASSWORD_FILE) {
            Ok(file) => Some(
                std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read password file {}", file))?
                    .trim()
                    .to_string(),
            ),
            Err(_) => std::env::var(ENV_DB_PASSWORD).ok(),
        };

        let port = match std::env::var(ENV_DB_PORT) {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("{} is not a valid port: {}", ENV_DB_PORT, value))?,
            Err(_) => engine.default_port(),
        };

        let data_dir = std::env::var(ENV_DATA_DIR).unwrap_or_else(|_| {
            match engine {
                DbEngine::MariaDb => "/var/lib/mysql".to_string(),
                DbEngine::Postgres => "/var/lib/postgresql/data".to_string(),
            }
        });

        Ok(Self {
            engine,
            credentials: DbCredentials {
                host: std::env::var(ENV_DB_HOST).unwrap_or_else(|_| "localhost".to_string()),
                port,
                user: std::env::var(ENV_DB_USER).unwrap_or_else(|_| "root".to_string()),
                password,
            },
            backup_dir: std::env::var(ENV_BACKUP_DIR)
                .unwrap_or_else(|_| "/backup".to_string())
                .into(),
            restore_dir: std::env::var(ENV_RESTORE_DIR)
                .unwrap_or_else(|_| "/restore".to_string())
                .into(),
            data_dir: data_dir.into(),
            retention_days: env_u64(ENV_RETENTION_DAYS, DEFAULT_RETENTION_DAYS)?,
            min_free_bytes: env_u64(ENV_MIN_FREE_BYTES, DEFAULT_MIN_FREE_BYTES)?,
        })
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .with_context(|| format!("{} is not a number: {}", name, value)),
        Err(_) => Ok(default),
    }
}

/// What a backup invocation will actually produce. The incremental→full
/// fallback is an explicit branch here, decided before any tool runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupPlan {
    Full {
        id: FullId,
    },
    Incremental {
        id: IncrementalId,
        base_dir: PathBuf,
    },
}

/// Decide what to create. Requesting an incremental with zero existing
/// fulls (or on an engine without delta support) degrades to a full
/// backup; the caller logs the substitution as a warning.
pub fn plan_backup(
    store: &ArtifactStore,
    incremental_requested: bool,
    supports_incremental: bool,
    today: NaiveDate,
) -> BackupPlan {
    if incremental_requested && supports_incremental {
        if let Some(full) = store.latest_full().filter(|a| !a.compressed) {
            let base = full.full_id().expect("full artifact");
            let seq = store.next_incremental_seq(base);
            // Delta base: the newest incremental on this full, else the full
            let base_dir = store
                .incrementals_for(base)
                .into_iter()
                .filter(|a| !a.compressed)
                .last()
                .map(|a| a.path.clone())
                .unwrap_or_else(|| full.path.clone());

            return BackupPlan::Incremental {
                id: IncrementalId { base, seq },
                base_dir,
            };
        }
    }

    BackupPlan::Full {
        id: FullId {
            date: today,
            seq: store.next_full_seq(today),
        },
    }
}

/// Engine checkpoint metadata written beside a physical backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoints {
    pub backup_type: String,
    pub from_lsn: u64,
    pub to_lsn: u64,
}

/// Parse an xtrabackup_checkpoints file.
pub fn parse_checkpoints(content: &str) -> Option<Checkpoints> {
    let mut backup_type = None;
    let mut from_lsn = None;
    let mut to_lsn = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "backup_type" => backup_type = Some(value.trim().to_string()),
            "from_lsn" => from_lsn = value.trim().parse().ok(),
            "to_lsn" => to_lsn = value.trim().parse().ok(),
            _ => {}
        }
    }

    Some(Checkpoints {
        backup_type: backup_type?,
        from_lsn: from_lsn?,
        to_lsn: to_lsn?,
    })
}

pub struct BackupManager {
    config: BackupConfig,
}

impl BackupManager {
    pub fn new(config: BackupConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Create a full backup. Returns the artifact identity.
    pub async fn create_full(&self) -> Result<FullId> {
        let _lock = RunLock::acquire(self.config.backup_dir.join(RUN_LOCK))?;
        self.preflight().await?;

        let store = artifact::scan_backup_root(&self.config.backup_dir)?;
        let plan = plan_backup(&store, false, false, today());
        let BackupPlan::Full { id } = plan else {
            unreachable!("full request always plans a full backup");
        };

        self.run_full(id).await?;
        Ok(id)
    }

    /// Create an incremental backup, or a full one when no base exists.
    pub async fn create_incremental(&self) -> Result<BackupPlan> {
        let _lock = RunLock::acquire(self.config.backup_dir.join(RUN_LOCK))?;
        self.preflight().await?;

        let store = artifact::scan_backup_root(&self.config.backup_dir)?;
        let plan = plan_backup(
            &store,
            true,
            self.config.engine.supports_incremental(),
            today(),
        );

        match &plan {
            BackupPlan::Full { id } => {
                if !self.config.engine.supports_incremental() {
                    eprintln!(
                        "{} engine {} has no incremental support, taking a full backup",
                        "⚠".yellow(),
                        self.config.engine.as_str()
                    );
                } else {
                    eprintln!(
                        "{} no full backup found, taking a full backup instead",
                        "⚠".yellow()
                    );
                }
                self.run_full(*id).await?;
            }
            BackupPlan::Incremental { id, base_dir } => {
                self.run_incremental(*id, base_dir).await?;
            }
        }

        Ok(plan)
    }

    /// Create a compressed logical dump of one database.
    pub fn create_dump(&self, database: &str) -> Result<PathBuf> {
        let _lock = RunLock::acquire(self.config.backup_dir.join(RUN_LOCK))?;

        let dumps_dir = self.config.backup_dir.join(DUMPS_DIR);
        std::fs::create_dir_all(&dumps_dir)
            .with_context(|| format!("Failed to create {}", dumps_dir.display()))?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let dump_path = dumps_dir.join(format!("{}_{}.sql.gz", database, stamp));

        let result = self.write_dump(database, &dump_path);
        if result.is_err() {
            let _ = std::fs::remove_file(&dump_path);
        }
        result?;

        Ok(dump_path)
    }

    fn write_dump(&self, database: &str, dump_path: &Path) -> Result<()> {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let mut dump_process = self
            .config
            .engine
            .dump_cmd(&self.config.credentials, database)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to start dump tool")?;

        let stdout = dump_process.stdout.take().expect("stdout piped");
        let mut reader = BufReader::new(stdout);

        let dump_file = File::create(dump_path)
            .with_context(|| format!("Failed to create {}", dump_path.display()))?;
        let mut encoder = GzEncoder::new(dump_file, Compression::default());

        std::io::copy(&mut reader, &mut encoder).context("Failed to stream dump output")?;
        encoder.finish().context("Failed to finish gzip stream")?;

        let output = dump_process
            .wait_with_output()
            .context("Failed to wait for dump tool")?;
        if !output.status.success() {
            return Err(StackError::tool_failure(
                "dump",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Apply the retention window. Refuses to delete anything while no
    /// full backup remains inside the window.
    pub fn prune(&self, retention_days: u64) -> Result<PrunePlan> {
        let _lock = RunLock::acquire(self.config.backup_dir.join(RUN_LOCK))?;

        let store = artifact::scan_backup_root(&self.config.backup_dir)?;
        let retention = Duration::from_secs(retention_days * 86_400);
        let plan = plan_prune(&store, retention, SystemTime::now());

        if plan.safety_hold {
            eprintln!(
                "{} no full backup within the last {} days, refusing to prune",
                "⚠".yellow(),
                retention_days
            );
            return Ok(plan);
        }

        for old in plan.expired.iter().chain(plan.orphans.iter()) {
            if old.path.is_dir() {
                std::fs::remove_dir_all(&old.path)
                    .with_context(|| format!("Failed to remove {}", old.path.display()))?;
            } else {
                std::fs::remove_file(&old.path)
                    .with_context(|| format!("Failed to remove {}", old.path.display()))?;
            }
            println!("Removed {}", old.id);
        }

        Ok(plan)
    }

    async fn run_full(&self, id: FullId) -> Result<()> {
        let target_dir = self.config.backup_dir.join(FULL_DIR).join(id.to_string());
        std::fs::create_dir_all(&target_dir)
            .with_context(|| format!("Failed to create {}", target_dir.display()))?;

        let cmd = self
            .config
            .engine
            .full_backup_cmd(&self.config.credentials, &target_dir);

        if let Err(e) = self.run_tool("backup", cmd).await {
            let _ = std::fs::remove_dir_all(&target_dir);
            return Err(e);
        }
        if let Err(e) = self.verify_artifact(&target_dir, false) {
            let _ = std::fs::remove_dir_all(&target_dir);
            return Err(e);
        }

        Ok(())
    }

    async fn run_incremental(&self, id: IncrementalId, base_dir: &Path) -> Result<()> {
        let target_dir = self
            .config
            .backup_dir
            .join(INCREMENTAL_DIR)
            .join(id.to_string());
        std::fs::create_dir_all(&target_dir)
            .with_context(|| format!("Failed to create {}", target_dir.display()))?;

        let cmd = self
            .config
            .engine
            .incremental_backup_cmd(&self.config.credentials, &target_dir, base_dir)
            .expect("plan only chooses incremental on supporting engines");

        if let Err(e) = self.run_tool("backup", cmd).await {
            let _ = std::fs::remove_dir_all(&target_dir);
            return Err(e);
        }
        if let Err(e) = self.verify_artifact(&target_dir, true) {
            let _ = std::fs::remove_dir_all(&target_dir);
            return Err(e);
        }

        Ok(())
    }

    /// Free disk space and database reachability.
    async fn preflight(&self) -> Result<()> {
        match storage::available_space(&self.config.backup_dir)? {
            Some(free) if free < self.config.min_free_bytes => {
                return Err(StackError::Precondition(format!(
                    "only {} free on backup filesystem, {} required",
                    format_bytes(free),
                    format_bytes(self.config.min_free_bytes)
                ))
                .into());
            }
            Some(_) => {}
            None => {
                eprintln!(
                    "{} could not determine free space for {}",
                    "⚠".yellow(),
                    self.config.backup_dir.display()
                );
            }
        }

        let mut cmd = tokio::process::Command::from(
            self.config.engine.ping_cmd(&self.config.credentials),
        );
        let reachable = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);

        if !reachable {
            return Err(StackError::Precondition(format!(
                "database at {}:{} is not reachable",
                self.config.credentials.host, self.config.credentials.port
            ))
            .into());
        }

        Ok(())
    }

    /// Post-backup verification: the engine must have written parseable
    /// checkpoint metadata of the expected kind. Read-only.
    fn verify_artifact(&self, dir: &Path, incremental: bool) -> Result<()> {
        match self.config.engine {
            DbEngine::MariaDb => {
                let path = dir.join("xtrabackup_checkpoints");
                let content = std::fs::read_to_string(&path).map_err(|_| {
                    StackError::tool_failure(
                        "backup",
                        Some(0),
                        format!("no checkpoint metadata at {}", path.display()),
                    )
                })?;
                let checkpoints = parse_checkpoints(&content).ok_or_else(|| {
                    StackError::tool_failure("backup", Some(0), "unparseable checkpoint metadata")
                })?;

                let expected = if incremental { "incremental" } else { "full-backuped" };
                if checkpoints.backup_type != expected {
                    return Err(StackError::tool_failure(
                        "backup",
                        Some(0),
                        format!(
                            "checkpoint type '{}' does not match requested '{}'",
                            checkpoints.backup_type, expected
                        ),
                    )
                    .into());
                }
                Ok(())
            }
            DbEngine::Postgres => {
                if !dir.join("PG_VERSION").exists() {
                    return Err(StackError::tool_failure(
                        "backup",
                        Some(0),
                        "base backup is missing PG_VERSION",
                    )
                    .into());
                }
                Ok(())
            }
        }
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

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::artifact::{Artifact, ArtifactId};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y%m%d").unwrap()
    }

    fn full(name: &str) -> Artifact {
        Artifact {
            id: ArtifactId::Full(FullId::parse(name).unwrap()),
            path: PathBuf::from(format!("/backup/full/{}", name)),
            modified: SystemTime::now(),
            compressed: false,
        }
    }

    fn incremental(base: &str, seq: u32) -> Artifact {
        Artifact {
            id: ArtifactId::Incremental(IncrementalId {
                base: FullId::parse(base).unwrap(),
                seq,
            }),
            path: PathBuf::from(format!("/backup/incremental/{}_{:02}", base, seq)),
            modified: SystemTime::now(),
            compressed: false,
        }
    }

    #[test]
    fn test_incremental_with_no_fulls_plans_a_full() {
        let store = ArtifactStore::default();

        let plan = plan_backup(&store, true, true, date("20250101"));
        assert_eq!(
            plan,
            BackupPlan::Full {
                id: FullId {
                    date: date("20250101"),
                    seq: 1
                }
            }
        );
    }

    #[test]
    fn test_incremental_bases_on_latest_incremental() {
        let store = ArtifactStore {
            fulls: vec![full("20250101_01")],
            incrementals: vec![incremental("20250101_01", 1)],
            dumps: Vec::new(),
        };

        let plan = plan_backup(&store, true, true, date("20250102"));
        match plan {
            BackupPlan::Incremental { id, base_dir } => {
                assert_eq!(id.to_string(), "20250101_01_02");
                assert_eq!(
                    base_dir,
                    PathBuf::from("/backup/incremental/20250101_01_01")
                );
            }
            other => panic!("expected incremental plan, got {:?}", other),
        }
    }

    #[test]
    fn test_first_incremental_bases_on_the_full() {
        let store = ArtifactStore {
            fulls: vec![full("20250101_01")],
            incrementals: Vec::new(),
            dumps: Vec::new(),
        };

        let plan = plan_backup(&store, true, true, date("20250102"));
        match plan {
            BackupPlan::Incremental { id, base_dir } => {
                assert_eq!(id.to_string(), "20250101_01_01");
                assert_eq!(base_dir, PathBuf::from("/backup/full/20250101_01"));
            }
            other => panic!("expected incremental plan, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_engine_plans_a_full() {
        let store = ArtifactStore {
            fulls: vec![full("20250101_01")],
            incrementals: Vec::new(),
            dumps: Vec::new(),
        };

        let plan = plan_backup(&store, true, false, date("20250102"));
        assert!(matches!(plan, BackupPlan::Full { .. }));
    }

    #[test]
    fn test_full_sequence_increments_within_a_day() {
        let store = ArtifactStore {
            fulls: vec![full("20250101_01"), full("20250101_02")],
            incrementals: Vec::new(),
            dumps: Vec::new(),
        };

        let plan = plan_backup(&store, false, false, date("20250101"));
        assert_eq!(
            plan,
            BackupPlan::Full {
                id: FullId {
                    date: date("20250101"),
                    seq: 3
                }
            }
        );
    }

    #[test]
    fn test_parse_checkpoints() {
        let content = "backup_type = full-backuped\nfrom_lsn = 0\nto_lsn = 1625344\nlast_lsn = 1625344\n";
        let checkpoints = parse_checkpoints(content).unwrap();
        assert_eq!(checkpoints.backup_type, "full-backuped");
        assert_eq!(checkpoints.from_lsn, 0);
        assert_eq!(checkpoints.to_lsn, 1_625_344);

        assert!(parse_checkpoints("nothing useful").is_none());
    }
}
