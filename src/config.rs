//! Ambient per-project configuration (`.william/config.toml`).
//!
//! Optional; every field has a hardcoded default. Grounded in the
//! teacher's `ralph_loop::config::ConfigManager` (which reads
//! `.ralph-ui/config.yaml`), adapted to `toml` since this crate doesn't
//! carry `serde_yaml`. Precedence, narrowest to widest: hardcoded defaults
//! < this file < CLI flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_MAX_ITERATIONS: u32 = 20;
const DEFAULT_SLEEP_MS: u64 = 2000;
const DEFAULT_TOOL: &str = "claude";

/// The `[william]` table of `.william/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WilliamSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_sleep_ms")]
    pub sleep_ms: u64,
    #[serde(default = "default_tool")]
    pub tool: String,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_sleep_ms() -> u64 {
    DEFAULT_SLEEP_MS
}

fn default_tool() -> String {
    DEFAULT_TOOL.to_string()
}

impl Default for WilliamSection {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            sleep_ms: DEFAULT_SLEEP_MS,
            tool: DEFAULT_TOOL.to_string(),
        }
    }
}

/// The full file schema, namespaced under a `[william]` table so other
/// top-level keys remain available to future tooling.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub william: WilliamSection,
}

/// Resolved settings for one `run`, after merging file config with CLI
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub sleep_ms: u64,
    pub tool: String,
}

/// Reads and writes `.william/config.toml` for one project directory.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(project_path: &Path) -> Self {
        Self {
            config_path: project_path.join(".william").join("config.toml"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }

    /// Read the config, or defaults if the file is absent.
    pub fn read(&self) -> Result<ProjectConfig, String> {
        if !self.config_path.exists() {
            return Ok(ProjectConfig::default());
        }
        let content = std::fs::read_to_string(&self.config_path)
            .map_err(|e| format!("failed to read config file: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse config file: {}", e))
    }

    pub fn write(&self, config: &ProjectConfig) -> Result<(), String> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create config directory: {}", e))?;
        }
        let content =
            toml::to_string_pretty(config).map_err(|e| format!("failed to serialize config: {}", e))?;
        std::fs::write(&self.config_path, content).map_err(|e| format!("failed to write config file: {}", e))
    }
}

/// Merge file config with CLI overrides; `None` means "not passed on the
/// command line", so the file value (or its default) wins.
pub fn merge_config(
    file_config: &ProjectConfig,
    max_iterations: Option<u32>,
    sleep_ms: Option<u64>,
    tool: Option<&str>,
) -> LoopConfig {
    LoopConfig {
        max_iterations: max_iterations.unwrap_or(file_config.william.max_iterations),
        sleep_ms: sleep_ms.unwrap_or(file_config.william.sleep_ms),
        tool: tool
            .map(str::to_string)
            .unwrap_or_else(|| file_config.william.tool.clone()),
    }
}
