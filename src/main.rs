use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;

use stackctl::cli::{BackupCommands, Cli, Commands, ConfigCommands, SecretsCommands};
use stackctl::core::assembler::{generate_secret, AssembleOptions, Assembler};
use stackctl::core::backup::BackupPlan;
use stackctl::core::compose;
use stackctl::core::config::{merge_env_sources, undefined_variables, EnvFile, EnvSource};
use stackctl::core::lock::{LockState, TemplateLock};
use stackctl::core::restore::RestoreOutcome;
use stackctl::core::{BackupConfig, BackupManager, DockerManager, RestoreManager};
use stackctl::utils::constants::*;
use stackctl::utils::{is_sensitive_key, mask_sensitive, resolve_project_dir};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Assemble {
            dir,
            force,
            dry_run,
            delete_volumes,
            r#ref,
        } => handle_assemble(dir, force, dry_run, delete_volumes, r#ref).await,
        Commands::Backup { command } => handle_backup(command).await,
        Commands::Restore { dry_run } => handle_restore(dry_run).await,
        Commands::Prune { days } => handle_prune(days).await,
        Commands::Status { dir } => handle_status(dir).await,
        Commands::Config { command } => handle_config(command).await,
        Commands::Secrets { command } => handle_secrets(command),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red(), e);
        std::process::exit(1);
    }
}

async fn handle_assemble(
    dir: Option<PathBuf>,
    force: bool,
    dry_run: bool,
    delete_volumes: bool,
    git_ref: Option<String>,
) -> Result<()> {
    let project_dir = resolve_project_dir(dir.as_deref())?;
    let assembler = Assembler::new(&project_dir);

    let options = AssembleOptions {
        force,
        dry_run,
        git_ref,
    };

    let report = assembler.run(&options).await?;

    println!(
        "Templates at revision {}",
        &report.revision[..12.min(report.revision.len())]
    );
    match report.lock_state {
        Some(LockState::Initial) => println!("First assembly for this project"),
        Some(LockState::Stale { .. }) if force => println!("Forced refresh applied"),
        _ => {}
    }

    for name in &report.services {
        let copied = report.copied_fragments.contains(name);
        let note = match (dry_run, copied) {
            (true, true) => "would copy",
            (false, true) => "copied",
            _ => "kept",
        };
        match template_info(name) {
            Some(info) => println!("  {:<20} {:<12} {}", name, note, info.display_name),
            None => println!("  {:<20} {}", name, note),
        }
    }
    if report.copied_assets > 0 {
        println!("Copied {} new secret/script file(s)", report.copied_assets);
    }

    if dry_run {
        println!(
            "Dry run: descriptor {}, environment {}",
            change_word(report.descriptor_changed),
            change_word(report.env_changed)
        );
        return Ok(());
    }

    println!(
        "{} wrote {} ({}) and {} ({})",
        "✓".green(),
        MERGED_DESCRIPTOR,
        change_word(report.descriptor_changed),
        MERGED_ENV,
        change_word(report.env_changed)
    );

    if delete_volumes {
        let docker = DockerManager::new(&project_dir)?;
        let removed = docker.remove_project_volumes().await?;
        println!("{} removed {} project volume(s)", "✓".green(), removed);
    }

    Ok(())
}

fn change_word(changed: bool) -> &'static str {
    if changed {
        "updated"
    } else {
        "unchanged"
    }
}

async fn handle_backup(command: BackupCommands) -> Result<()> {
    let config = BackupConfig::from_env()?;
    let manager = BackupManager::new(config);

    match command {
        BackupCommands::Full => {
            let id = interruptible(manager.create_full()).await?;
            println!("{} full backup {} complete", "✓".green(), id);
        }
        BackupCommands::Incremental => {
            let plan = interruptible(manager.create_incremental()).await?;
            match plan {
                BackupPlan::Full { id } => {
                    println!("{} full backup {} complete", "✓".green(), id)
                }
                BackupPlan::Incremental { id, .. } => {
                    println!("{} incremental backup {} complete", "✓".green(), id)
                }
            }
        }
        BackupCommands::Dump { database } => {
            let path = manager.create_dump(&database)?;
            println!("{} dump written to {}", "✓".green(), path.display());
        }
    }

    Ok(())
}

async fn handle_restore(dry_run: bool) -> Result<()> {
    let config = BackupConfig::from_env()?;
    let manager = RestoreManager::new(config);

    let outcome = interruptible(manager.run(dry_run)).await?;
    match outcome {
        RestoreOutcome::Completed { chain_len } => {
            println!(
                "{} restored a chain of {} artifact(s) into the data directory",
                "✓".green(),
                chain_len
            );
        }
        RestoreOutcome::DryRun { chain_len } => {
            println!(
                "{} dry run: chain of {} artifact(s) prepared",
                "✓".green(),
                chain_len
            );
        }
        RestoreOutcome::NothingToRestore | RestoreOutcome::Skipped => {}
    }

    Ok(())
}

async fn handle_prune(days: Option<u64>) -> Result<()> {
    let config = BackupConfig::from_env()?;
    let retention_days = days.unwrap_or(config.retention_days);
    let manager = BackupManager::new(config);

    let plan = manager.prune(retention_days)?;
    if plan.safety_hold {
        return Ok(());
    }
    if plan.is_noop() {
        let window = std::time::Duration::from_secs(retention_days * 86_400);
        println!(
            "Nothing older than {} to prune",
            humantime::format_duration(window)
        );
    } else {
        println!(
            "{} pruned {} artifact(s)",
            "✓".green(),
            plan.expired.len() + plan.orphans.len()
        );
    }

    Ok(())
}

async fn handle_status(dir: Option<PathBuf>) -> Result<()> {
    let project_dir = resolve_project_dir(dir.as_deref())?;
    let docker = DockerManager::new(&project_dir)?;

    if !docker.check_docker().await {
        anyhow::bail!("Docker daemon is not reachable");
    }

    let lock = TemplateLock::new(project_dir.join(TEMPLATE_LOCK));
    match lock.current()? {
        Some(revision) => println!(
            "Project {} (templates at {})\n",
            docker.project_name(),
            &revision[..12.min(revision.len())]
        ),
        None => println!("Project {} (never assembled)\n", docker.project_name()),
    }

    let containers = docker.list_containers().await?;
    if containers.is_empty() {
        println!("No containers found for this project");
        return Ok(());
    }

    println!("{:<25} {:<12} {:<15} {}", "Service", "State", "Health", "Image");
    println!("{}", "-".repeat(75));
    for container in containers {
        let health = container.health.as_deref().unwrap_or("N/A");
        println!(
            "{:<25} {:<12} {:<15} {}",
            container.name,
            container.state.as_str(),
            health,
            container.image
        );
    }

    Ok(())
}

async fn handle_config(command: ConfigCommands) -> Result<()> {
    let project_dir = resolve_project_dir(None)?;

    match command {
        ConfigCommands::View => {
            let env_path = project_dir.join(MERGED_ENV);
            if !env_path.exists() {
                anyhow::bail!(
                    "{} not found, run 'stackctl assemble' first",
                    env_path.display()
                );
            }

            let env = EnvFile::load(&env_path)?;
            println!("Consolidated environment ({}):\n", env_path.display());
            for entry in env.entries() {
                let display_value = if is_sensitive_key(&entry.key) {
                    mask_sensitive(&entry.value, 2)
                } else {
                    entry.value.clone()
                };
                println!("{}: {}", entry.key, display_value);
            }
        }
        ConfigCommands::Validate => {
            let descriptor_path = project_dir.join(MERGED_DESCRIPTOR);
            if !descriptor_path.exists() {
                anyhow::bail!(
                    "{} not found, run 'stackctl assemble' first",
                    descriptor_path.display()
                );
            }

            let services = compose::required_services(&project_dir.join(PROJECT_DESCRIPTOR))?;

            // Re-run the merge over the current sources and surface its warnings
            let mut sources = Vec::new();
            if let Some(local) = EnvSource::read(LOCAL_ENV, &project_dir.join(LOCAL_ENV))? {
                sources.push(local);
            }
            for name in &services {
                let path = project_dir.join(SERVICES_DIR).join(format!("{}.env", name));
                if let Some(source) =
                    EnvSource::read(format!("{}/{}.env", SERVICES_DIR, name), &path)?
                {
                    sources.push(source);
                }
            }
            let merge = merge_env_sources(&sources);

            let mut problems = 0;
            for warning in &merge.warnings {
                println!("{} {}", "⚠".yellow(), warning);
            }

            let descriptor_text = std::fs::read_to_string(&descriptor_path)?;
            for name in undefined_variables(&descriptor_text, &merge) {
                println!("{} ${{{}}} is referenced but never defined", "✗".red(), name);
                problems += 1;
            }

            // Let compose parse the generated descriptor when a daemon is around
            match DockerManager::new(&project_dir) {
                Ok(docker) if docker.check_docker().await => {
                    docker.validate_descriptor().await?;
                    println!("{} docker compose accepts the descriptor", "✓".green());
                }
                _ => println!("Docker not reachable, skipped compose validation"),
            }

            if problems == 0 {
                println!("{} configuration is valid", "✓".green());
            } else {
                anyhow::bail!("{} problem(s) found", problems);
            }
        }
    }

    Ok(())
}

fn handle_secrets(command: SecretsCommands) -> Result<()> {
    let project_dir = resolve_project_dir(None)?;

    match command {
        SecretsCommands::Generate { name, length } => {
            let path = generate_secret(&project_dir, &name, length)?;
            println!("{} wrote secret to {}", "✓".green(), path.display());
        }
    }

    Ok(())
}

/// Run an operation racing ctrl-c. Cancelling the future drops any held
/// run lock, so the marker file never outlives an interrupted run.
async fn interruptible<T>(operation: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        result = operation => result,
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("interrupted")
        }
    }
}
