/// Docker and Docker Compose integration
///
/// Daemon queries (containers, volumes) go through the Docker API;
/// compose operations shell out to `docker compose` against the generated
/// descriptor.

use anyhow::{anyhow, Context, Result};
use bollard::container::ListContainersOptions;
use bollard::models::ContainerSummary;
use bollard::volume::ListVolumesOptions;
use bollard::Docker;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::utils::constants::MERGED_DESCRIPTOR;

/// Parse Docker container status to simplified state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    Paused,
    Restarting,
    Dead,
    Unknown,
}

impl From<&str> for ContainerState {
    fn from(status: &str) -> Self {
        let status_lower = status.to_lowercase();
        if status_lower.contains("up") || status_lower.contains("running") {
            ContainerState::Running
        } else if status_lower.contains("paused") {
            ContainerState::Paused
        } else if status_lower.contains("restarting") {
            ContainerState::Restarting
        } else if status_lower.contains("dead") || status_lower.contains("removing") {
            ContainerState::Dead
        } else if status_lower.contains("exited") || status_lower.contains("stopped") {
            ContainerState::Stopped
        } else {
            ContainerState::Unknown
        }
    }
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Running => "Running",
            ContainerState::Stopped => "Stopped",
            ContainerState::Paused => "Paused",
            ContainerState::Restarting => "Restarting",
            ContainerState::Dead => "Dead",
            ContainerState::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    pub status: String,
    pub state: ContainerState,
    pub health: Option<String>,
}

#[derive(Clone)]
pub struct DockerManager {
    docker: Docker,
    project_dir: PathBuf,
    project_name: String,
}

impl DockerManager {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon. Is Docker running?")?;

        // Compose labels resources with the project name, which defaults
        // to the directory name
        let project_name = project_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .ok_or_else(|| anyhow!("project directory has no name"))?;

        Ok(Self {
            docker,
            project_dir: project_dir.to_path_buf(),
            project_name,
        })
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    /// List the project's containers
    pub async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("com.docker.compose.project={}", self.project_name)],
        );

        let options = Some(ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        });

        let containers = self.docker.list_containers(options).await?;

        Ok(containers
            .into_iter()
            .map(Self::container_summary_to_info)
            .collect())
    }

    /// Names of the project's volumes
    pub async fn list_project_volumes(&self) -> Result<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("com.docker.compose.project={}", self.project_name)],
        );

        let response = self
            .docker
            .list_volumes(Some(ListVolumesOptions { filters }))
            .await?;

        let mut names: Vec<String> = response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Remove every volume belonging to the project. Returns how many
    /// were removed.
    pub async fn remove_project_volumes(&self) -> Result<usize> {
        let names = self.list_project_volumes().await?;

        for name in &names {
            self.docker
                .remove_volume(name, None)
                .await
                .with_context(|| format!("Failed to remove volume {}", name))?;
        }

        Ok(names.len())
    }

    /// Check if Docker daemon is accessible
    pub async fn check_docker(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    /// Execute a docker compose command against the generated descriptor
    pub async fn compose_command(&self, args: &[&str]) -> Result<String> {
        let mut cmd = tokio::process::Command::new("docker");
        cmd.arg("compose")
            .arg("-f")
            .arg(MERGED_DESCRIPTOR)
            .args(args)
            .current_dir(&self.project_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = cmd
            .output()
            .await
            .context("Failed to execute docker compose command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Docker compose command failed: {}", stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Ask compose to parse the generated descriptor without acting on it
    pub async fn validate_descriptor(&self) -> Result<()> {
        self.compose_command(&["config", "--quiet"]).await?;
        Ok(())
    }

    fn container_summary_to_info(summary: ContainerSummary) -> ContainerInfo {
        let name = summary
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let status = summary.status.clone().unwrap_or_else(|| "unknown".to_string());
        let state = summary
            .state
            .as_deref()
            .unwrap_or("unknown")
            .into();

        let health = summary.status.as_ref().and_then(|s| {
            // Check unhealthy BEFORE healthy (unhealthy contains "healthy" as substring)
            if s.contains("unhealthy") {
                Some("unhealthy".to_string())
            } else if s.contains("starting") {
                Some("starting".to_string())
            } else if s.contains("healthy") {
                Some("healthy".to_string())
            } else {
                None
            }
        });

        ContainerInfo {
            name,
            image: summary.image.unwrap_or_else(|| "unknown".to_string()),
            status,
            state,
            health,
        }
    }
}
