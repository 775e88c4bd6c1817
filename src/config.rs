//! Configuration loading (thin adapter). The core never touches the
//! filesystem or environment for its own settings — it consumes an
//! already-constructed [`Config`]. Layering mirrors `cto-config`: compiled
//! defaults, overlaid by an optional TOML file, overlaid by environment
//! variables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NightingaleError, Result};
use crate::secret::validate_credential_present;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sandbox_dir: String,
    pub cleanup_sandbox: bool,
    pub agents_marathon_model: String,
    pub gemini_rate_limit: u32,
    pub demo_repo_path: Option<String>,
    pub resolve_threshold: f64,
    pub max_attempts: u32,
    pub llm_api_key_env: String,
    pub replay_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sandbox_dir: ".sandbox".to_string(),
            cleanup_sandbox: true,
            agents_marathon_model: "gemini-1.5-pro".to_string(),
            gemini_rate_limit: 15,
            demo_repo_path: None,
            resolve_threshold: 0.85,
            max_attempts: 3,
            llm_api_key_env: "GEMINI_API_KEY".to_string(),
            replay_mode: false,
        }
    }
}

impl Config {
    /// Loads defaults, overlays a TOML file if present at `path`, then
    /// overlays a handful of environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = path {
            if path.exists() {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    NightingaleError::Configuration(format!("reading {}: {e}", path.display()))
                })?;
                config = toml::from_str(&text).map_err(|e| {
                    NightingaleError::Configuration(format!("parsing {}: {e}", path.display()))
                })?;
            }
        }

        if let Ok(model) = std::env::var("NIGHTINGALE_MODEL") {
            config.agents_marathon_model = model;
        }
        if let Ok(repo) = std::env::var("NIGHTINGALE_DEMO_REPO") {
            config.demo_repo_path = Some(repo);
        }
        if std::env::var("NIGHTINGALE_REPLAY").is_ok() {
            config.replay_mode = true;
        }

        Ok(config)
    }

    /// Fails unless the configured LLM credential variable is present,
    /// non-empty, and replay mode is off.
    pub fn require_credential(&self) -> Result<String> {
        if self.replay_mode {
            return Ok(String::new());
        }
        if !validate_credential_present(&self.llm_api_key_env) {
            return Err(NightingaleError::Configuration(format!(
                "missing credential: set {} or enable replay mode",
                self.llm_api_key_env
            )));
        }
        Ok(std::env::var(&self.llm_api_key_env).unwrap_or_default())
    }
}
