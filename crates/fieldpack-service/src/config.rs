use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use fieldpack_resolver::AppFolderLookup;
use serde::Deserialize;

/// Server-side configuration: the storage root, the updater app name, and
/// the app-name to folder mapping.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    #[serde(default)]
    pub storage_root: Option<PathBuf>,
    #[serde(default)]
    pub updater_app: Option<String>,
    #[serde(default)]
    pub apps: BTreeMap<String, String>,
}

impl ServiceConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse service config")?;
        for (app, folder) in &config.apps {
            if app.trim().is_empty() {
                return Err(anyhow!("app name must not be empty"));
            }
            if folder.trim().is_empty() {
                return Err(anyhow!("folder mapping for app '{app}' must not be empty"));
            }
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw)
    }
}

/// Read-only `AppFolderLookup` backed by the configured mapping.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredFolders {
    apps: BTreeMap<String, String>,
}

impl ConfiguredFolders {
    pub fn new(apps: BTreeMap<String, String>) -> Self {
        Self { apps }
    }
}

impl From<&ServiceConfig> for ConfiguredFolders {
    fn from(config: &ServiceConfig) -> Self {
        Self::new(config.apps.clone())
    }
}

impl AppFolderLookup for ConfiguredFolders {
    fn folder_name(&self, app: &str) -> Option<String> {
        self.apps.get(app).cloned()
    }
}
