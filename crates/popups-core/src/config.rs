use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub transition: TransitionConfig,
    #[serde(default)]
    pub popup: PopupConfig,
    #[serde(default)]
    pub group: GroupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionConfig {
    /// Transitions this short or shorter are not waited for.
    #[serde(default = "TransitionConfig::default_min_duration")]
    pub min_duration_ms: u64,
    /// Wait bound when the computed duration can't be parsed.
    #[serde(default = "TransitionConfig::default_fallback")]
    pub fallback_ms: u64,
    /// Class added to a popup's surface while it is open.
    #[serde(default = "TransitionConfig::default_open_class")]
    pub open_class: String,
}

impl TransitionConfig {
    fn default_min_duration() -> u64 { 10 }
    fn default_fallback() -> u64 { 250 }
    fn default_open_class() -> String { "open".into() }
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            min_duration_ms: 10,
            fallback_ms: 250,
            open_class: "open".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PopupConfig {
    #[serde(default = "PopupConfig::default_closable")]
    pub closable: bool,
    #[serde(default = "PopupConfig::default_background_closable")]
    pub background_closable: bool,
    #[serde(default = "PopupConfig::default_wait_for_transition")]
    pub wait_for_transition: bool,
}

impl PopupConfig {
    fn default_closable() -> bool { true }
    fn default_background_closable() -> bool { true }
    fn default_wait_for_transition() -> bool { true }
}

impl Default for PopupConfig {
    fn default() -> Self {
        Self {
            closable: true,
            background_closable: true,
            wait_for_transition: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupConfig {
    /// Class toggled on a group's surface while it holds live popups.
    #[serde(default = "GroupConfig::default_visible_class")]
    pub visible_class: String,
    /// Prefix for generated group ids.
    #[serde(default = "GroupConfig::default_id_prefix")]
    pub id_prefix: String,
}

impl GroupConfig {
    fn default_visible_class() -> String { "visible".into() }
    fn default_id_prefix() -> String { "popups-manager".into() }
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            visible_class: "visible".into(),
            id_prefix: "popups-manager".into(),
        }
    }
}

impl Config {
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("popups")
    }

    /// `POPUPS_CONFIG` overrides the per-user location.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("POPUPS_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            debug!(path = %path.display(), "loading config");
            Self::load_from(&path)
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&contents).with_context(|| "parsing config TOML")
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing config TOML")
    }
}
