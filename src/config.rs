//! User preferences for the ALCD CLI
//!
//! Stores default document paths, helper program names and the last run in
//! ~/.alcd/config.toml

use alcd_core::external::{HelperTools, ScikitSettings};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Keys accepted by `alcd config set/get`
pub const KEYS: [&str; 7] = [
    "global-parameters",
    "paths-parameters",
    "model-parameters",
    "composer",
    "helper",
    "python",
    "scikit-script",
];

/// Scene chosen by the last `alcd init`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRun {
    pub location: String,
    pub current_date: String,
    pub clear_date: String,
}

/// CLI Configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_parameters: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths_parameters: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_parameters: Option<PathBuf>,

    /// External helper programs
    #[serde(default)]
    pub tools: HelperTools,

    #[serde(default)]
    pub scikit: ScikitSettings,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<LastRun>,
}

impl Config {
    /// Get the config directory path (~/.alcd/)
    pub fn dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home.join(".alcd"))
    }

    /// Get the config file path (~/.alcd/config.toml)
    pub fn path() -> Result<PathBuf> {
        Ok(Self::dir()?.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    /// Load preferences from `path`; a missing file gives the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "global-parameters" => self.global_parameters = Some(PathBuf::from(value)),
            "paths-parameters" => self.paths_parameters = Some(PathBuf::from(value)),
            "model-parameters" => self.model_parameters = Some(PathBuf::from(value)),
            "composer" => self.tools.composer = value.to_string(),
            "helper" => self.tools.helper = value.to_string(),
            "python" => self.scikit.python = value.to_string(),
            "scikit-script" => self.scikit.script = Some(PathBuf::from(value)),
            _ => anyhow::bail!("Unknown config key: {}. Valid keys: {}", key, KEYS.join(", ")),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<String> {
        let path = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(not set)".to_string())
        };
        Ok(match key {
            "global-parameters" => path(&self.global_parameters),
            "paths-parameters" => path(&self.paths_parameters),
            "model-parameters" => path(&self.model_parameters),
            "composer" => self.tools.composer.clone(),
            "helper" => self.tools.helper.clone(),
            "python" => self.scikit.python.clone(),
            "scikit-script" => path(&self.scikit.script),
            _ => anyhow::bail!("Unknown config key: {}", key),
        })
    }
}
