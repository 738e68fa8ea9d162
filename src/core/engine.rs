/// Database engine abstraction
///
/// The chain manager never speaks a database protocol itself; each engine
/// maps the generic operations (hot backup, prepare, copy-back, dump,
/// liveness probe) onto its native tools. Passwords travel via the tools'
/// environment variables, never on the command line.

use anyhow::{anyhow, Result};
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbEngine {
    MariaDb,
    Postgres,
}

impl DbEngine {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mariadb" | "mysql" => Ok(DbEngine::MariaDb),
            "postgres" | "postgresql" => Ok(DbEngine::Postgres),
            other => Err(anyhow!("unknown database engine '{}'", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DbEngine::MariaDb => "mariadb",
            DbEngine::Postgres => "postgres",
        }
    }

    /// Whether the engine's tooling supports delta backups against a base
    /// directory. Engines without support fall back to full backups.
    pub fn supports_incremental(&self) -> bool {
        matches!(self, DbEngine::MariaDb)
    }

    /// Process names to look for when verifying the server is down.
    pub fn process_names(&self) -> &'static [&'static str] {
        match self {
            DbEngine::MariaDb => &["mariadbd", "mysqld"],
            DbEngine::Postgres => &["postgres"],
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            DbEngine::MariaDb => 3306,
            DbEngine::Postgres => 5432,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
}

impl DbEngine {
    /// Hot full backup into `target_dir`.
    pub fn full_backup_cmd(&self, creds: &DbCredentials, target_dir: &Path) -> Command {
        match self {
            DbEngine::MariaDb => {
                let mut cmd = Command::new("mariadb-backup");
                cmd.arg("--backup")
                    .arg(format!("--host={}", creds.host))
                    .arg(format!("--port={}", creds.port))
                    .arg(format!("--user={}", creds.user))
                    .arg(format!("--target-dir={}", target_dir.display()));
                self.apply_password(&mut cmd, creds);
                cmd
            }
            DbEngine::Postgres => {
                let mut cmd = Command::new("pg_basebackup");
                cmd.arg("-h")
                    .arg(&creds.host)
                    .arg("-p")
                    .arg(creds.port.to_string())
                    .arg("-U")
                    .arg(&creds.user)
                    .arg("-D")
                    .arg(target_dir)
                    .arg("-Fp")
                    .arg("-Xs");
                self.apply_password(&mut cmd, creds);
                cmd
            }
        }
    }

    /// Delta backup against `base_dir`. None for engines without support.
    pub fn incremental_backup_cmd(
        &self,
        creds: &DbCredentials,
        target_dir: &Path,
        base_dir: &Path,
    ) -> Option<Command> {
        match self {
            DbEngine::MariaDb => {
                let mut cmd = Command::new("mariadb-backup");
                cmd.arg("--backup")
                    .arg(format!("--host={}", creds.host))
                    .arg(format!("--port={}", creds.port))
                    .arg(format!("--user={}", creds.user))
                    .arg(format!("--target-dir={}", target_dir.display()))
                    .arg(format!("--incremental-basedir={}", base_dir.display()));
                self.apply_password(&mut cmd, creds);
                Some(cmd)
            }
            DbEngine::Postgres => None,
        }
    }

    /// Log-apply ("prepare") step against the restore base. With
    /// `incremental_dir` set, the delta is applied onto the base.
    /// `apply_log_only` keeps the base open for further deltas.
    pub fn prepare_cmd(
        &self,
        base_dir: &Path,
        incremental_dir: Option<&Path>,
        apply_log_only: bool,
    ) -> Option<Command> {
        match self {
            DbEngine::MariaDb => {
                let mut cmd = Command::new("mariadb-backup");
                cmd.arg("--prepare")
                    .arg(format!("--target-dir={}", base_dir.display()));
                if apply_log_only {
                    cmd.arg("--apply-log-only");
                }
                if let Some(incremental) = incremental_dir {
                    cmd.arg(format!("--incremental-dir={}", incremental.display()));
                }
                Some(cmd)
            }
            // A plain pg_basebackup directory needs no prepare pass
            DbEngine::Postgres => None,
        }
    }

    /// Copy the prepared base back into the live data directory. None
    /// means a plain recursive copy is sufficient.
    pub fn copy_back_cmd(&self, base_dir: &Path, data_dir: &Path) -> Option<Command> {
        match self {
            DbEngine::MariaDb => {
                let mut cmd = Command::new("mariadb-backup");
                cmd.arg("--copy-back")
                    .arg(format!("--target-dir={}", base_dir.display()))
                    .arg(format!("--datadir={}", data_dir.display()));
                Some(cmd)
            }
            DbEngine::Postgres => None,
        }
    }

    /// Logical schema+data export of one database, SQL on stdout.
    pub fn dump_cmd(&self, creds: &DbCredentials, database: &str) -> Command {
        match self {
            DbEngine::MariaDb => {
                let mut cmd = Command::new("mariadb-dump");
                cmd.arg("--opt")
                    .arg("--single-transaction")
                    .arg(format!("--host={}", creds.host))
                    .arg(format!("--port={}", creds.port))
                    .arg(format!("--user={}", creds.user))
                    .arg(database);
                self.apply_password(&mut cmd, creds);
                cmd
            }
            DbEngine::Postgres => {
                let mut cmd = Command::new("pg_dump");
                cmd.arg("-h")
                    .arg(&creds.host)
                    .arg("-p")
                    .arg(creds.port.to_string())
                    .arg("-U")
                    .arg(&creds.user)
                    .arg(database);
                self.apply_password(&mut cmd, creds);
                cmd
            }
        }
    }

    /// Liveness probe; exit 0 means the server answers.
    pub fn ping_cmd(&self, creds: &DbCredentials) -> Command {
        match self {
            DbEngine::MariaDb => {
                let mut cmd = Command::new("mariadb-admin");
                cmd.arg("ping")
                    .arg(format!("--host={}", creds.host))
                    .arg(format!("--port={}", creds.port))
                    .arg(format!("--user={}", creds.user));
                self.apply_password(&mut cmd, creds);
                cmd
            }
            DbEngine::Postgres => {
                let mut cmd = Command::new("pg_isready");
                cmd.arg("-h")
                    .arg(&creds.host)
                    .arg("-p")
                    .arg(creds.port.to_string());
                cmd
            }
        }
    }

    fn apply_password(&self, cmd: &mut Command, creds: &DbCredentials) {
        if let Some(password) = &creds.password {
            match self {
                DbEngine::MariaDb => cmd.env("MYSQL_PWD", password),
                DbEngine::Postgres => cmd.env("PGPASSWORD", password),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn creds() -> DbCredentials {
        DbCredentials {
            host: "db".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: Some("hunter2".to_string()),
        }
    }

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_engine_parsing() {
        assert_eq!(DbEngine::parse("mariadb").unwrap(), DbEngine::MariaDb);
        assert_eq!(DbEngine::parse("PostgreSQL").unwrap(), DbEngine::Postgres);
        assert!(DbEngine::parse("oracle").is_err());
    }

    #[test]
    fn test_mariadb_full_backup_cmd() {
        let cmd = DbEngine::MariaDb.full_backup_cmd(&creds(), &PathBuf::from("/backup/full/20250101_01"));

        assert_eq!(cmd.get_program(), "mariadb-backup");
        let args = args_of(&cmd);
        assert!(args.contains(&"--backup".to_string()));
        assert!(args.contains(&"--target-dir=/backup/full/20250101_01".to_string()));
        // password only via environment
        assert!(!args.iter().any(|a| a.contains("hunter2")));
        let envs: Vec<(String, String)> = cmd
            .get_envs()
            .filter_map(|(k, v)| {
                v.map(|v| {
                    (
                        k.to_string_lossy().to_string(),
                        v.to_string_lossy().to_string(),
                    )
                })
            })
            .collect();
        assert!(envs.contains(&("MYSQL_PWD".to_string(), "hunter2".to_string())));
    }

    #[test]
    fn test_incremental_support() {
        let target = PathBuf::from("/backup/incremental/20250101_01_01");
        let base = PathBuf::from("/backup/full/20250101_01");

        let cmd = DbEngine::MariaDb
            .incremental_backup_cmd(&creds(), &target, &base)
            .unwrap();
        let args = args_of(&cmd);
        assert!(args.contains(&"--incremental-basedir=/backup/full/20250101_01".to_string()));

        assert!(DbEngine::Postgres
            .incremental_backup_cmd(&creds(), &target, &base)
            .is_none());
        assert!(!DbEngine::Postgres.supports_incremental());
    }

    #[test]
    fn test_prepare_cmd_shapes() {
        let base = PathBuf::from("/restore/full/20250101_01");
        let incr = PathBuf::from("/restore/incremental/20250101_01_01");

        let cmd = DbEngine::MariaDb.prepare_cmd(&base, None, true).unwrap();
        let args = args_of(&cmd);
        assert!(args.contains(&"--prepare".to_string()));
        assert!(args.contains(&"--apply-log-only".to_string()));

        let cmd = DbEngine::MariaDb.prepare_cmd(&base, Some(&incr), true).unwrap();
        let args = args_of(&cmd);
        assert!(args.contains(&"--incremental-dir=/restore/incremental/20250101_01_01".to_string()));

        assert!(DbEngine::Postgres.prepare_cmd(&base, None, false).is_none());
    }

    #[test]
    fn test_dump_and_ping_cmds() {
        let cmd = DbEngine::Postgres.dump_cmd(&creds(), "shop_db");
        assert_eq!(cmd.get_program(), "pg_dump");
        assert!(args_of(&cmd).contains(&"shop_db".to_string()));

        let cmd = DbEngine::MariaDb.ping_cmd(&creds());
        assert_eq!(cmd.get_program(), "mariadb-admin");
        assert!(args_of(&cmd).contains(&"ping".to_string()));
    }
}
