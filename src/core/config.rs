use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Applies to non-streaming calls only. Streams end through cancellation.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    #[serde(default = "default_progress_file")]
    pub progress_file: String,

    #[serde(default = "default_max_chapter_number")]
    pub max_chapter_number: u32,

    #[serde(default)]
    pub unattended: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_seconds: default_request_timeout(),
            progress_file: default_progress_file(),
            max_chapter_number: default_max_chapter_number(),
            unattended: false,
        }
    }
}

fn default_api_base_url() -> String {
    "http://localhost:8000/api/ai".to_string()
}
fn default_request_timeout() -> u64 {
    300
}
fn default_progress_file() -> String {
    "build/novel-creation-progress.json".to_string()
}
fn default_max_chapter_number() -> u32 {
    20
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: Config = serde_yaml_ng::from_str(content)?;
        config.api_base_url = config.api_base_url.trim_end_matches('/').to_string();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(CONFIG_FILE, content).context("Failed to write config.yml")?;
        Ok(())
    }
}
