use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AgentFlowError, Result};

/// Top-level AgentFlow configuration, loaded from `agentflow.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Adapter to invoke: "codex", "claude", or "mock".
    #[serde(default = "default_adapter_name")]
    pub name: String,
    /// Override for the adapter's CLI executable.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Working directory for adapter subprocesses (default: current dir).
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            name: default_adapter_name(),
            command: None,
            timeout_secs: default_timeout_secs(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory receiving the per-plan YAML artifacts.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Number of adaptive cycles when none is given on the command line.
    #[serde(default = "default_cycles")]
    pub cycles: usize,
    /// Directory used to persist cross-cycle history.
    #[serde(default = "default_history_root")]
    pub history_root: PathBuf,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            cycles: default_cycles(),
            history_root: default_history_root(),
        }
    }
}

fn default_adapter_name() -> String {
    "codex".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("sandbox/plans")
}

fn default_cycles() -> usize {
    3
}

fn default_history_root() -> PathBuf {
    PathBuf::from("sandbox/workflows")
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AgentFlowError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&raw).map_err(|e| {
            AgentFlowError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
