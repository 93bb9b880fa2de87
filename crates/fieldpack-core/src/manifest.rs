use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::version::AppVersion;

/// Reserved id of the synthetic manifest carrying the application update
/// archive itself.
pub const APP_UPDATE_ID: &str = "app-update";
/// Reserved id of the synthetic manifest replacing the on-device updater.
pub const SELF_UPDATE_ID: &str = "self-update";

/// Synthetic manifests sort after every ordinary upgrade; the self-update
/// outranks the app update.
pub const APP_UPDATE_PRIORITY: i32 = i32::MAX - 1;
pub const SELF_UPDATE_PRIORITY: i32 = i32::MAX;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ManifestKind {
    #[default]
    Standard,
    AppUpdate,
    SelfUpdate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionRange {
    #[serde(default)]
    pub min_version: Option<AppVersion>,
    #[serde(default)]
    pub max_version: Option<AppVersion>,
    #[serde(default)]
    pub exclude_versions: Vec<String>,
}

impl VersionRange {
    /// Min is inclusive, max is exclusive. Exclusions are literal version
    /// strings; parseable entries match by precedence, the rest by the
    /// canonical rendering of `version`.
    pub fn contains(&self, version: &AppVersion) -> bool {
        if let Some(min) = &self.min_version {
            if version.cmp_precedence(min) == std::cmp::Ordering::Less {
                return false;
            }
        }
        if let Some(max) = &self.max_version {
            if version.cmp_precedence(max) != std::cmp::Ordering::Less {
                return false;
            }
        }
        let rendered = version.to_string();
        for excluded in &self.exclude_versions {
            match excluded.parse::<AppVersion>() {
                Ok(parsed) => {
                    if version.cmp_precedence(&parsed) == std::cmp::Ordering::Equal {
                        return false;
                    }
                }
                Err(_) => {
                    if excluded == &rendered {
                        return false;
                    }
                }
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageLocator {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub path: String,
}

impl StorageLocator {
    pub fn source_dir(&self) -> PathBuf {
        PathBuf::from(&self.base_path).join(&self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileDirective {
    pub path: String,
    pub target: String,
    #[serde(default)]
    pub permissions: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub executable: bool,
    #[serde(default)]
    pub explode: bool,
    #[serde(default)]
    pub backup: bool,
    #[serde(default)]
    pub run_order: i32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumDescriptor {
    pub algorithm: String,
    pub value: String,
}

/// One optional upgrade unit as stored on the server: applicability,
/// ordering inputs, and file placement directives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: AppVersion,
    #[serde(rename = "type", default)]
    pub kind: ManifestKind,
    #[serde(default)]
    pub applies_to: VersionRange,
    pub target_version: AppVersion,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub storage: StorageLocator,
    #[serde(default)]
    pub files: Vec<FileDirective>,
    #[serde(default)]
    pub pre_install_script: Option<String>,
    #[serde(default)]
    pub post_install_script: Option<String>,
    #[serde(default)]
    pub rollback_script: Option<String>,
    #[serde(default)]
    pub checksum: Option<ChecksumDescriptor>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl UpgradeManifest {
    pub fn from_json_str(input: &str) -> anyhow::Result<Self> {
        let manifest: Self =
            serde_json::from_str(input).context("failed to parse upgrade manifest")?;
        if manifest.id.trim().is_empty() {
            return Err(anyhow!("manifest id must not be empty"));
        }
        if manifest.dependencies.iter().any(|dep| dep == &manifest.id) {
            return Err(anyhow!("manifest '{}' depends on itself", manifest.id));
        }
        if manifest.conflicts.iter().any(|other| other == &manifest.id) {
            return Err(anyhow!("manifest '{}' conflicts with itself", manifest.id));
        }
        Ok(manifest)
    }

    pub fn total_file_size(&self) -> u64 {
        self.files.iter().map(|directive| directive.size).sum()
    }
}

/// Package-level manifest written at the root of every staged archive so
/// the client knows what it is installing and in which order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub from_version: Option<AppVersion>,
    pub to_version: AppVersion,
    pub upgrades: Vec<String>,
}
