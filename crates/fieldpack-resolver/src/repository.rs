use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use fieldpack_core::UpgradeManifest;
use tracing::warn;

/// Loads every `*.json` manifest under `dir`. A missing directory is an
/// empty set, not an error. Files are parsed independently; a malformed
/// file is logged and skipped so one bad manifest never hides the rest.
pub fn load_manifests(dir: &Path) -> Result<Vec<UpgradeManifest>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("failed reading manifest directory {}", dir.display()))?
    {
        entries.push(entry?);
    }
    entries.sort_by_key(|entry| entry.file_name());

    let mut manifests = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    for entry in entries {
        let path = entry.path();
        if !entry.file_type()?.is_file()
            || path.extension().and_then(|ext| ext.to_str()) != Some("json")
        {
            continue;
        }

        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping unreadable upgrade manifest");
                continue;
            }
        };

        match UpgradeManifest::from_json_str(&raw) {
            Ok(manifest) => {
                if !seen_ids.insert(manifest.id.clone()) {
                    warn!(
                        path = %path.display(),
                        id = %manifest.id,
                        "skipping upgrade manifest with duplicate id"
                    );
                    continue;
                }
                manifests.push(manifest);
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping malformed upgrade manifest");
            }
        }
    }

    Ok(manifests)
}
