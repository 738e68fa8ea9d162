/// Template assembly
///
/// Orchestrates one assembly run: resolve the required services, fetch
/// the template subtree, compare the revision lock, copy per-service
/// assets (never clobbering user customizations), merge the descriptor
/// and environment, and write the generated outputs. The lock is written
/// last; any copy failure aborts the run with nothing persisted.

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::compose;
use crate::core::config::{merge_env_sources, EnvMerge, EnvSource};
use crate::core::fetch::{self, TemplateSnapshot};
use crate::core::lock::{LockState, TemplateLock};
use crate::error::StackError;
use crate::utils::constants::*;
use crate::utils::{copy_tree_no_overwrite, generate_hex_string};

#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    pub force: bool,
    pub dry_run: bool,
    pub git_ref: Option<String>,
}

/// What an assembly run did (or, on dry run, would do).
#[derive(Debug, Default)]
pub struct AssembleReport {
    pub revision: String,
    pub lock_state: Option<LockState>,
    pub services: Vec<String>,
    pub copied_fragments: Vec<String>,
    pub copied_assets: usize,
    pub env_warnings: Vec<String>,
    pub descriptor_changed: bool,
    pub env_changed: bool,
}

pub struct Assembler {
    project_dir: PathBuf,
}

impl Assembler {
    pub fn new<P: AsRef<Path>>(project_dir: P) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Full run: fetch the template subtree, then assemble against it.
    pub async fn run(&self, options: &AssembleOptions) -> Result<AssembleReport> {
        let descriptor = self.project_dir.join(PROJECT_DESCRIPTOR);
        let source = compose::template_source(&descriptor)?;

        let repo = source
            .repo
            .unwrap_or_else(|| DEFAULT_TEMPLATE_REPO.to_string());
        let git_ref = options
            .git_ref
            .clone()
            .or(source.git_ref)
            .unwrap_or_else(|| DEFAULT_TEMPLATE_REF.to_string());

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
        spinner.set_message(format!("Fetching templates from {} at {}", repo, git_ref));
        spinner.enable_steady_tick(Duration::from_millis(120));

        let snapshot = fetch::fetch_templates(&repo, &git_ref, DEFAULT_TEMPLATE_SUBPATH).await;
        spinner.finish_and_clear();
        let snapshot = snapshot?;

        self.assemble(&snapshot, options)
    }

    /// Assemble against an already fetched snapshot.
    pub fn assemble(
        &self,
        snapshot: &TemplateSnapshot,
        options: &AssembleOptions,
    ) -> Result<AssembleReport> {
        let descriptor_path = self.project_dir.join(PROJECT_DESCRIPTOR);
        let services = compose::required_services(&descriptor_path)?;

        for name in &services {
            if !snapshot.has_template(name) {
                return Err(StackError::NotFound(format!(
                    "template '{}' does not exist at revision {}",
                    name,
                    snapshot.revision()
                ))
                .into());
            }
        }

        let lock = TemplateLock::new(self.project_dir.join(TEMPLATE_LOCK));
        let lock_state = lock.check(snapshot.revision())?;

        if let LockState::Stale { current } = &lock_state {
            if !options.force {
                eprintln!(
                    "{} templates moved from {} to {}; pass --force to refresh local copies",
                    "⚠".yellow(),
                    &current[..12.min(current.len())],
                    &snapshot.revision()[..12.min(snapshot.revision().len())]
                );
            }
        }

        let mut report = AssembleReport {
            revision: snapshot.revision().to_string(),
            lock_state: Some(lock_state.clone()),
            services: services.clone(),
            ..Default::default()
        };

        // Copy per-service assets. Fragments are overwritten only on
        // --force; secrets and scripts are merged without overwriting.
        for name in &services {
            let copied = self.copy_service_assets(snapshot, name, options, &mut report)?;
            if copied {
                report.copied_fragments.push(name.clone());
            }
        }

        // Merge descriptor from the project-local fragment copies
        let base = compose::load_document(&descriptor_path)?;
        let mut fragments = Vec::with_capacity(services.len());
        for name in &services {
            let fragment_path = self.fragment_path(name);
            // On dry run nothing was copied; fall back to the snapshot
            if !fragment_path.exists() && options.dry_run {
                fragments.push(compose::load_document(
                    &snapshot.template_dir(name).join(PROJECT_DESCRIPTOR),
                )?);
            } else {
                fragments.push(compose::load_document(&fragment_path)?);
            }
        }
        let merged = compose::merge_descriptor(base, fragments);
        let descriptor_text = compose::to_yaml_string(&merged)?;

        // Merge environment: project-local overrides first, then one
        // file per template in resolution order
        let merge = self.merge_environment(&services)?;
        report.env_warnings = merge.warnings.clone();
        for warning in &merge.warnings {
            eprintln!("{} {}", "⚠".yellow(), warning);
        }
        let env_text = merge.rendered();

        if options.dry_run {
            report.descriptor_changed =
                file_differs(&self.project_dir.join(MERGED_DESCRIPTOR), &descriptor_text);
            report.env_changed = file_differs(&self.project_dir.join(MERGED_ENV), &env_text);
            return Ok(report);
        }

        report.descriptor_changed =
            self.write_output(MERGED_DESCRIPTOR, &descriptor_text)?;
        report.env_changed = self.write_output(MERGED_ENV, &env_text)?;

        // Lock moves only on initial copy or forced refresh, and only
        // once everything above has succeeded
        match lock_state {
            LockState::Initial => lock.write(snapshot.revision())?,
            LockState::Stale { .. } if options.force => lock.write(snapshot.revision())?,
            _ => {}
        }

        Ok(report)
    }

    fn fragment_path(&self, name: &str) -> PathBuf {
        self.project_dir.join(SERVICES_DIR).join(format!("{}.yml", name))
    }

    fn service_env_path(&self, name: &str) -> PathBuf {
        self.project_dir.join(SERVICES_DIR).join(format!("{}.env", name))
    }

    /// Copy one template's fragment, env defaults, and nested asset
    /// directories into the project. Returns whether the fragment was
    /// (or would be) copied.
    fn copy_service_assets(
        &self,
        snapshot: &TemplateSnapshot,
        name: &str,
        options: &AssembleOptions,
        report: &mut AssembleReport,
    ) -> Result<bool> {
        let template_dir = snapshot.template_dir(name);
        let fragment_src = template_dir.join(PROJECT_DESCRIPTOR);
        let fragment_dest = self.fragment_path(name);

        let wants_copy = options.force || !fragment_dest.exists();
        if !wants_copy {
            return Ok(false);
        }
        if options.dry_run {
            return Ok(true);
        }

        std::fs::create_dir_all(self.project_dir.join(SERVICES_DIR))
            .with_context(|| format!("Failed to create {}", SERVICES_DIR))?;

        if fragment_src.exists() {
            std::fs::copy(&fragment_src, &fragment_dest)
                .with_context(|| format!("Failed to copy fragment for '{}'", name))?;
        }

        let env_src = template_dir.join(".env");
        let env_dest = self.service_env_path(name);
        if env_src.exists() && (options.force || !env_dest.exists()) {
            std::fs::copy(&env_src, &env_dest)
                .with_context(|| format!("Failed to copy env defaults for '{}'", name))?;
        }

        report.copied_assets += copy_tree_no_overwrite(
            &template_dir.join(SECRETS_DIR),
            &self.project_dir.join(SECRETS_DIR),
        )?;
        report.copied_assets += copy_tree_no_overwrite(
            &template_dir.join(SCRIPTS_DIR),
            &self.project_dir.join(SCRIPTS_DIR),
        )?;

        Ok(true)
    }

    fn merge_environment(&self, services: &[String]) -> Result<EnvMerge> {
        let mut sources = Vec::new();

        if let Some(local) = EnvSource::read(LOCAL_ENV, &self.project_dir.join(LOCAL_ENV))? {
            sources.push(local);
        }
        for name in services {
            let path = self.service_env_path(name);
            let label = format!("{}/{}.env", SERVICES_DIR, name);
            if let Some(source) = EnvSource::read(label, &path)? {
                sources.push(source);
            }
        }

        Ok(merge_env_sources(&sources))
    }

    /// Write a generated output, rotating the previous copy away first.
    /// Unchanged content is left untouched so repeated assemblies are
    /// byte-identical no-ops. Returns whether the file changed.
    fn write_output(&self, file_name: &str, content: &str) -> Result<bool> {
        let path = self.project_dir.join(file_name);

        if !file_differs(&path, content) {
            return Ok(false);
        }

        if path.exists() {
            self.rotate_output(&path, file_name)?;
        }

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(true)
    }

    fn rotate_output(&self, path: &Path, file_name: &str) -> Result<()> {
        let backups_dir = self.project_dir.join(OUTPUT_BACKUPS_DIR);
        std::fs::create_dir_all(&backups_dir)
            .with_context(|| format!("Failed to create {}", backups_dir.display()))?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let backup_path = backups_dir.join(format!("{}.{}", file_name, stamp));
        std::fs::copy(path, &backup_path)
            .with_context(|| format!("Failed to rotate {}", path.display()))?;

        // Cleanup old rotations for this file
        let prefix = format!("{}.", file_name);
        let mut backups: Vec<_> = std::fs::read_dir(&backups_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
            .collect();

        backups.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

        for old in backups.into_iter().skip(MAX_OUTPUT_BACKUPS) {
            let _ = std::fs::remove_file(old.path());
        }

        Ok(())
    }
}

/// Create a project secret with random content. Refuses to overwrite.
pub fn generate_secret(project_dir: &Path, name: &str, length: usize) -> Result<PathBuf> {
    let secrets_dir = project_dir.join(SECRETS_DIR);
    std::fs::create_dir_all(&secrets_dir)
        .with_context(|| format!("Failed to create {}", secrets_dir.display()))?;

    let path = secrets_dir.join(name);
    if path.exists() {
        anyhow::bail!("secret {} already exists, refusing to overwrite", path.display());
    }

    std::fs::write(&path, format!("{}\n", generate_hex_string(length)))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(path)
}

fn file_differs(path: &Path, content: &str) -> bool {
    match std::fs::read_to_string(path) {
        Ok(existing) => existing != content,
        Err(_) => true,
    }
}
