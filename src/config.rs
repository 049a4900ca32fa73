//! Run configuration: loaded from an optional TOML file, then overridden
//! by the environment variables named in §6 (`LLM_API_KEY`, `LLM_MODEL`,
//! `WORKSPACE_ROOT`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_progressive_rounds() -> u32 {
    3
}

fn default_cycle_retry_budget() -> u32 {
    3
}

/// Which strategy the Orchestrator selects at construction for resolving
/// the repair phase (§9: strategy records replacing the source's
/// partial-class inheritance split).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CompilationMode {
    /// Generate every atom, then finalize without a repair loop.
    AtomOnly,
    /// Generate every atom, then run the bounded progressive repair loop.
    #[default]
    Progressive,
}

/// Top-level run configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    /// Root directory the Workspace sandboxes all file operations under.
    pub workspace_root: PathBuf,

    /// API key for the LLM provider. Never logged or serialized back out.
    #[serde(skip_serializing)]
    pub llm_api_key: String,

    #[serde(default = "default_model")]
    pub llm_model: String,

    #[serde(default = "default_api_base")]
    pub llm_api_base: String,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_max_progressive_rounds")]
    pub max_progressive_rounds: u32,

    #[serde(default = "default_cycle_retry_budget")]
    pub cycle_retry_budget: u32,

    #[serde(default)]
    pub compilation_mode: CompilationMode,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            llm_api_key: String::new(),
            llm_model: default_model(),
            llm_api_base: default_api_base(),
            max_retries: default_max_retries(),
            max_progressive_rounds: default_max_progressive_rounds(),
            cycle_retry_budget: default_cycle_retry_budget(),
            compilation_mode: CompilationMode::default(),
        }
    }
}

impl RunConfig {
    /// Load from `path` if given (TOML), falling back to defaults, then
    /// apply environment-variable overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            Some(path) => {
                return Err(Error::Configuration(format!(
                    "config file `{}` does not exist",
                    path.display()
                )))
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            self.llm_api_key = key;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.llm_model = model;
        }
        if let Ok(root) = std::env::var("WORKSPACE_ROOT") {
            self.workspace_root = PathBuf::from(root);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.llm_api_key.trim().is_empty() {
            return Err(Error::Configuration(
                "missing LLM credential: set LLM_API_KEY or llm_api_key".to_string(),
            ));
        }
        if !self.workspace_root.exists() {
            return Err(Error::Configuration(format!(
                "workspace root `{}` does not exist",
                self.workspace_root.display()
            )));
        }
        if self.max_retries == 0 {
            return Err(Error::Configuration(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
