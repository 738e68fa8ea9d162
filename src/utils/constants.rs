/// File names, reserved keys, and well-known template definitions
///
/// Based on the template repository layout and the sidecar container contract

/// Primary (user-owned) project descriptor.
pub const PROJECT_DESCRIPTOR: &str = "docker-compose.yml";

/// Generated merged descriptor; never hand-edited.
pub const MERGED_DESCRIPTOR: &str = "docker-compose.generated.yml";

/// Generated consolidated environment file.
pub const MERGED_ENV: &str = ".env";

/// Project-local environment overrides, merged before any template defaults.
pub const LOCAL_ENV: &str = "local.env";

/// Template revision lock, written beside the project descriptor.
pub const TEMPLATE_LOCK: &str = ".template-lock";

/// Directory (inside the project) holding the copied per-service fragments.
pub const SERVICES_DIR: &str = "services";

/// Directories merged from templates without overwriting.
pub const SECRETS_DIR: &str = "secrets";
pub const SCRIPTS_DIR: &str = "scripts";

/// Rotated copies of previously generated outputs.
pub const OUTPUT_BACKUPS_DIR: &str = ".backups";
pub const MAX_OUTPUT_BACKUPS: usize = 7;

/// Reserved declaration keys inside the project descriptor. Stripped from
/// every fragment before merging so they never leak into the output.
pub const REQUIRED_SERVICES_KEY: &str = "x-required-services";
pub const TEMPLATE_REPO_KEY: &str = "x-template-repo";
pub const TEMPLATE_REF_KEY: &str = "x-template-ref";

/// Defaults used when the project descriptor does not pin a template source.
pub const DEFAULT_TEMPLATE_REPO: &str = "https://github.com/ovdm/stack-templates";
pub const DEFAULT_TEMPLATE_REF: &str = "main";
pub const DEFAULT_TEMPLATE_SUBPATH: &str = "templates";

/// Top-level compose sections that participate in the descriptor merge.
pub const MERGE_SECTIONS: &[&str] = &["services", "volumes", "secrets", "networks"];

/// Marker file taken for the duration of a backup or restore run.
pub const RUN_LOCK: &str = ".stackctl.lock";

/// Sidecar environment variables.
pub const ENV_ENGINE: &str = "STACKCTL_ENGINE";
pub const ENV_DB_HOST: &str = "STACKCTL_DB_HOST";
pub const ENV_DB_PORT: &str = "STACKCTL_DB_PORT";
pub const ENV_DB_USER: &str = "STACKCTL_DB_USER";
pub const ENV_DB_PASSWORD: &str = "STACKCTL_DB_PASSWORD";
pub const ENV_DB_PASSWORD_FILE: &str = "STACKCTL_DB_PASSWORD_FILE";
pub const ENV_BACKUP_DIR: &str = "STACKCTL_BACKUP_DIR";
pub const ENV_RESTORE_DIR: &str = "STACKCTL_RESTORE_DIR";
pub const ENV_DATA_DIR: &str = "STACKCTL_DATA_DIR";
pub const ENV_RETENTION_DAYS: &str = "STACKCTL_RETENTION_DAYS";
pub const ENV_MIN_FREE_BYTES: &str = "STACKCTL_MIN_FREE_BYTES";

pub const DEFAULT_RETENTION_DAYS: u64 = 7;
pub const DEFAULT_MIN_FREE_BYTES: u64 = 2_000_000_000;

/// Artifact directory names inside the backup root.
pub const FULL_DIR: &str = "full";
pub const INCREMENTAL_DIR: &str = "incremental";
pub const DUMPS_DIR: &str = "dumps";

/// Well-known template definition
#[derive(Debug, Clone)]
pub struct TemplateInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
}

/// Templates shipped by the default template repository. Unknown names are
/// still assembled; this catalog only enriches CLI output.
pub const KNOWN_TEMPLATES: &[TemplateInfo] = &[
    TemplateInfo {
        name: "redis",
        display_name: "Redis",
        description: "In-memory cache and message broker",
    },
    TemplateInfo {
        name: "mariadb",
        display_name: "MariaDB",
        description: "MariaDB server with backup sidecar support",
    },
    TemplateInfo {
        name: "postgresql",
        display_name: "PostgreSQL",
        description: "PostgreSQL server with dump sidecar support",
    },
    TemplateInfo {
        name: "mariadb-backup",
        display_name: "MariaDB Backup Sidecar",
        description: "Scheduled full/incremental backup chains via mariadb-backup",
    },
    TemplateInfo {
        name: "postgresql-backup",
        display_name: "PostgreSQL Backup Sidecar",
        description: "Scheduled logical dumps via pg_dump",
    },
    TemplateInfo {
        name: "socket-proxy",
        display_name: "Docker Socket Proxy",
        description: "Restricted proxy in front of the Docker socket",
    },
    TemplateInfo {
        name: "traefik-certdumper",
        display_name: "Traefik Cert Dumper",
        description: "Extracts certificates from the Traefik ACME store",
    },
];

pub fn template_info(name: &str) -> Option<&'static TemplateInfo> {
    KNOWN_TEMPLATES.iter().find(|t| t.name == name)
}
