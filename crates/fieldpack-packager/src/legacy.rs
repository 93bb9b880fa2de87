use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use fieldpack_core::{sha256_hex, CancelToken, EngineError};
use fieldpack_resolver::UpdateFileRecord;
use tracing::info;

use crate::builder::{PackageBuilder, CACHE_SUBDIR};
use crate::scratch::{unique_suffix, ScratchDir};

/// Reserved subfolder embedded into a legacy combined archive.
pub const LEGACY_UPGRADE_SUBDIR: &str = "upgrade";
/// Fixed name the embedded updater archive is shipped under.
pub const LEGACY_UPDATER_FILE: &str = "updater.tar.gz";
/// Shell script the legacy client runs to install the embedded updater.
pub const LEGACY_INSTALL_SCRIPT: &str = "install-updater.sh";

impl PackageBuilder {
    /// Builds a combined archive for clients predating the manifest
    /// protocol: the plain app update with the newest updater embedded
    /// under `upgrade/`. When no self-update is due, or when the asset is
    /// an executable this codec cannot reopen, the original asset is served
    /// unmodified. The stored artifact itself is never touched.
    pub fn package_app_update_with_updater(
        &self,
        app: &str,
        app_update_path: &Path,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let file_name = app_update_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if file_name.ends_with(".exe") {
            return Ok(app_update_path.to_path_buf());
        }
        if !file_name.ends_with(".tar.gz") {
            return Err(EngineError::CorruptAsset(file_name).into());
        }

        let Some(updater) = self.resolver().newest_stable_updater()? else {
            return Ok(app_update_path.to_path_buf());
        };

        let folder = self
            .resolver()
            .locator()
            .folder_for_app(app)
            .ok_or_else(|| EngineError::NotFound(app.to_string()))?;

        let fingerprint = legacy_fingerprint(app_update_path, &updater)?;
        let archive_name = format!("legacy-{fingerprint}.tar.gz");

        // Same lock table as regular package builds: at most one combined
        // archive is assembled per fingerprint at a time.
        self.with_fingerprint_lock(&format!("legacy-{fingerprint}"), || {
            let preferred = folder.join(CACHE_SUBDIR).join(&archive_name);
            if preferred.is_file() {
                return Ok(preferred);
            }
            let cache_dir = self.writable_cache_dir(app, &folder)?;
            let cache_path = cache_dir.join(&archive_name);
            if cache_path.is_file() {
                return Ok(cache_path);
            }

            let scratch = ScratchDir::create(&cache_dir, "legacy")?;
            fieldpack_archive::decode_file(app_update_path, scratch.path(), cancel)?;

            let upgrade_dir = scratch.path().join(LEGACY_UPGRADE_SUBDIR);
            fs::create_dir_all(&upgrade_dir).with_context(|| {
                format!("failed creating upgrade subfolder {}", upgrade_dir.display())
            })?;
            fs::copy(&updater.path, upgrade_dir.join(LEGACY_UPDATER_FILE)).with_context(|| {
                format!("failed embedding updater {}", updater.path.display())
            })?;

            let bootstrap_scripts = bundle_bootstrap_scripts(&updater, &upgrade_dir)?;
            let script = install_script(&bootstrap_scripts);
            fs::write(upgrade_dir.join(LEGACY_INSTALL_SCRIPT), script)
                .context("failed writing legacy install script")?;

            let temp_path = cache_dir.join(format!("{archive_name}.tmp-{}", unique_suffix()));
            if let Err(error) =
                fieldpack_archive::encode_dir_to_file(scratch.path(), &temp_path, cancel)
            {
                let _ = fs::remove_file(&temp_path);
                return Err(error);
            }
            fs::rename(&temp_path, &cache_path).with_context(|| {
                format!("failed publishing legacy archive {}", cache_path.display())
            })?;

            info!(app, updater = %updater.file_name(), "built legacy combined archive");
            Ok(cache_path)
        })
    }
}

/// Copies any `bootstrap*.sh` next to the updater artifact into the
/// embedded upgrade folder; returns the bundled names.
fn bundle_bootstrap_scripts(updater: &UpdateFileRecord, upgrade_dir: &Path) -> Result<Vec<String>> {
    let Some(folder) = updater.path.parent() else {
        return Ok(Vec::new());
    };

    let mut bundled = Vec::new();
    for entry in fs::read_dir(folder)
        .with_context(|| format!("failed reading updater folder {}", folder.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_file()
            && name.starts_with("bootstrap")
            && name.ends_with(".sh")
        {
            fs::copy(entry.path(), upgrade_dir.join(&name))
                .with_context(|| format!("failed bundling bootstrap script {name}"))?;
            bundled.push(name);
        }
    }
    bundled.sort();
    Ok(bundled)
}

fn install_script(bootstrap_scripts: &[String]) -> String {
    let mut script = String::from(
        "#!/bin/sh\n\
         # Installs the updater bundled alongside this application update.\n\
         set -e\n\
         HERE=\"$(cd \"$(dirname \"$0\")\" && pwd)\"\n\
         INSTALL_DIR=\"${UPDATER_INSTALL_DIR:-/opt/updater}\"\n\
         mkdir -p \"$INSTALL_DIR\"\n\
         tar -xzf \"$HERE/updater.tar.gz\" -C \"$INSTALL_DIR\"\n",
    );
    for name in bootstrap_scripts {
        script.push_str(&format!("sh \"$HERE/{name}\" \"$INSTALL_DIR\"\n"));
    }
    script
}

/// Cache key over both input artifacts and their modification times, so a
/// republished update or updater invalidates the combined archive.
fn legacy_fingerprint(app_update_path: &Path, updater: &UpdateFileRecord) -> Result<String> {
    let update_mtime = fs::metadata(app_update_path)
        .and_then(|metadata| metadata.modified())
        .with_context(|| format!("failed to stat {}", app_update_path.display()))?;
    let update_nanos = update_mtime
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let updater_nanos = updater
        .modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    let payload = format!(
        "{}\n{update_nanos}\n{}\n{updater_nanos}",
        app_update_path.display(),
        updater.path.display()
    );
    Ok(sha256_hex(payload.as_bytes()))
}
