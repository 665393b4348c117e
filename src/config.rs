//! Config — TOML-backed settings loaded from the platform config directory,
//! merged over built-in defaults.
//!
//! Resolution: `directories::ProjectDirs` locates
//! `~/.config/<crate-name>/config.toml` (or the platform equivalent); `toml`
//! deserializes it over [`Config::default`]. CLI flags (`clap`, see
//! `src/bin/termagent.rs`) override the loaded values for the current
//! invocation only — they are never written back. `PermissionGate`'s
//! `approve_always` is the one thing that *does* write back, appending to
//! `always_approved` with the same atomic-rename discipline as SessionStore.

use crate::permission::ApprovalEntry;
use crate::provider::ApiProtocol;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("could not determine a config directory for this platform")]
    NoConfigDir,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LspServerSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Pass `-s <project_root>` (or similar) as an argv suffix for servers
    /// that need it to resolve their workspace.
    #[serde(default)]
    pub needs_project_root_arg: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_provider")]
    pub provider: ApiProtocol,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub tool_result_token_limit: Option<usize>,
    #[serde(default = "default_auto_compression_threshold")]
    pub auto_compression_threshold: f32,
    #[serde(default)]
    pub prompt_optimization_enabled: bool,
    #[serde(default)]
    pub editor_integration_enabled: bool,
    #[serde(default)]
    pub codebase_indexing_enabled: bool,
    #[serde(default)]
    pub always_approved: Vec<ApprovalEntry>,
    #[serde(default)]
    pub lsp_servers: HashMap<String, LspServerSpec>,
}

fn default_provider() -> ApiProtocol {
    ApiProtocol::AnthropicMessages
}

fn default_auto_compression_threshold() -> f32 {
    0.80
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: String::new(),
            api_key_env: String::new(),
            base_url: None,
            tool_result_token_limit: None,
            auto_compression_threshold: default_auto_compression_threshold(),
            prompt_optimization_enabled: false,
            editor_integration_enabled: false,
            codebase_indexing_enabled: false,
            always_approved: Vec::new(),
            lsp_servers: HashMap::new(),
        }
    }
}

impl Config {
    /// `~/.config/<crate-name>/config.toml` or the platform equivalent.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let dirs = directories::ProjectDirs::from("dev", "yolog", "termagent")
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Load from the platform config path, falling back to defaults if the
    /// file doesn't exist yet.
    pub async fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path).await {
            Ok(body) => Ok(toml::from_str(&body)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;
        self.save_to(&path).await
    }

    pub async fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = toml::to_string_pretty(self)?;
        let tmp_path = path.with_extension("toml.tmp");
        tokio::fs::write(&tmp_path, body).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    /// Append an `approve_always` decision and persist, atomically.
    pub async fn add_always_approved(&mut self, entry: ApprovalEntry) -> Result<(), ConfigError> {
        if !self.always_approved.contains(&entry) {
            self.always_approved.push(entry);
        }
        self.save().await
    }
}
