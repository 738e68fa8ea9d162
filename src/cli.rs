/// CLI argument parsing and command handling

use clap::{Parser, Subcommand};
use std::path::PathBuf;

// Build timestamp injected at compile time
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser)]
#[command(name = "stackctl")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Assemble the project from its declared service templates
    Assemble {
        /// Project directory (defaults to auto-detection)
        dir: Option<PathBuf>,

        /// Refresh local template copies even when customized
        #[arg(short, long)]
        force: bool,

        /// Report what would change without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Remove the project's docker volumes after assembly
        #[arg(long)]
        delete_volumes: bool,

        /// Template repository ref to fetch (overrides the descriptor pin)
        #[arg(long, value_name = "REF")]
        r#ref: Option<String>,
    },

    /// Create a database backup artifact
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// Restore the database from the restore directory
    Restore {
        /// Prepare the chain but leave the data directory untouched
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove backup artifacts outside the retention window
    Prune {
        /// Retention window in days (defaults to the configured value)
        #[arg(short, long)]
        days: Option<u64>,
    },

    /// Show project container status
    Status {
        /// Project directory (defaults to auto-detection)
        dir: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Secret management
    Secrets {
        #[command(subcommand)]
        command: SecretsCommands,
    },
}

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Full physical backup
    Full,

    /// Incremental backup on top of the latest full
    Incremental,

    /// Compressed logical dump of one database
    Dump {
        /// Database name
        database: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// View the consolidated environment
    View,

    /// Validate the generated descriptor and environment
    Validate,
}

#[derive(Subcommand)]
pub enum SecretsCommands {
    /// Create a project secret with random content
    Generate {
        /// Secret file name under secrets/
        name: String,

        /// Length in hex characters
        #[arg(short, long, default_value_t = 32)]
        length: usize,
    },
}
