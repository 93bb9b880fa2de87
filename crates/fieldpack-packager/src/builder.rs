use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use fieldpack_core::{
    sha256_hex, AppVersion, CancelToken, EngineError, FileDirective, ManifestKind,
    PackageManifest, UpgradeManifest,
};
use fieldpack_resolver::{ApplicableUpgradesResult, UpdateFileRecord, UpgradeResolver};
use tracing::{info, warn};

use crate::scratch::{copy_dir_recursive, copy_file_verified, unique_suffix, ScratchDir};

/// Cache directory created inside each app's storage folder.
pub const CACHE_SUBDIR: &str = ".cache";
/// Where the client stages a replacement updater before handing over.
pub const INSTALLER_STAGING_TARGET: &str = "installer/staging";
/// Name of the serialized manifest placed in each per-upgrade subdirectory.
pub const UPGRADE_MANIFEST_FILE: &str = "manifest.json";
/// Name of the package-level manifest at the archive root.
pub const PACKAGE_MANIFEST_FILE: &str = "package.json";

pub struct PackageBuilder {
    resolver: UpgradeResolver,
    fallback_cache_root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PackageBuilder {
    pub fn new(resolver: UpgradeResolver) -> Self {
        Self {
            resolver,
            fallback_cache_root: std::env::temp_dir().join("fieldpack-cache"),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_fallback_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.fallback_cache_root = root.into();
        self
    }

    pub fn resolver(&self) -> &UpgradeResolver {
        &self.resolver
    }

    /// Resolves, stages, and compresses the upgrade package for one client.
    /// Returns the cache path of the finished archive, or `None` when there
    /// is nothing to build. At most one build runs per fingerprint; the
    /// archive is published with a temp-then-rename so concurrent readers
    /// never observe a partial file.
    pub fn build_upgrade_package(
        &self,
        app: &str,
        client_version: &AppVersion,
        include_prerelease: bool,
        installer_version: Option<&AppVersion>,
        cancel: &CancelToken,
    ) -> Result<Option<PathBuf>> {
        let Some(mut resolution) = self.resolver.applicable_upgrades(
            app,
            client_version,
            include_prerelease,
            installer_version,
        )?
        else {
            return Ok(None);
        };
        if resolution.is_up_to_date() {
            return Ok(None);
        }

        let folder = self
            .resolver
            .locator()
            .folder_for_app(app)
            .ok_or_else(|| EngineError::NotFound(app.to_string()))?;
        let fingerprint = build_fingerprint(client_version, resolution.upgrade_ids());
        let archive_name = format!("{fingerprint}.tar.gz");

        self.with_fingerprint_lock(&fingerprint, || {
            // An already-published archive is served from wherever it lives,
            // even when its cache directory is no longer writable.
            let preferred = folder.join(CACHE_SUBDIR).join(&archive_name);
            if preferred.is_file() {
                return Ok(Some(preferred));
            }
            let cache_dir = self.writable_cache_dir(app, &folder)?;
            let cache_path = cache_dir.join(&archive_name);
            if cache_path.is_file() {
                return Ok(Some(cache_path));
            }

            let scratch = ScratchDir::create(&cache_dir, "stage")?;
            stage_package(scratch.path(), client_version, &mut resolution, cancel)?;

            let temp_path = cache_dir.join(format!("{archive_name}.tmp-{}", unique_suffix()));
            if let Err(error) =
                fieldpack_archive::encode_dir_to_file(scratch.path(), &temp_path, cancel)
            {
                let _ = fs::remove_file(&temp_path);
                return Err(error);
            }
            fs::rename(&temp_path, &cache_path).with_context(|| {
                format!(
                    "failed publishing archive {} to {}",
                    temp_path.display(),
                    cache_path.display()
                )
            })?;

            info!(app, fingerprint = %fingerprint, "built upgrade package");
            Ok(Some(cache_path))
        })
    }

    /// Runs `body` holding the per-fingerprint build lock. Entries no other
    /// request is waiting on are dropped from the table afterwards, so the
    /// table stays bounded by the number of in-flight builds.
    pub(crate) fn with_fingerprint_lock<T>(
        &self,
        fingerprint: &str,
        body: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let lock = {
            let mut table = self
                .locks
                .lock()
                .map_err(|_| anyhow!("fingerprint lock table poisoned"))?;
            table
                .entry(fingerprint.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _build_guard = lock
                .lock()
                .map_err(|_| anyhow!("fingerprint lock poisoned: {fingerprint}"))?;
            body()
        };
        drop(lock);

        let mut table = self
            .locks
            .lock()
            .map_err(|_| anyhow!("fingerprint lock table poisoned"))?;
        if table
            .get(fingerprint)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            table.remove(fingerprint);
        }

        result
    }

    #[cfg(test)]
    pub(crate) fn lock_table_len(&self) -> usize {
        self.locks.lock().map(|table| table.len()).unwrap_or(0)
    }

    /// The preferred cache lives inside the app's own folder; a folder we
    /// cannot write falls back to a temp-rooted cache scoped by app name.
    pub(crate) fn writable_cache_dir(&self, app: &str, folder: &Path) -> Result<PathBuf> {
        let preferred = folder.join(CACHE_SUBDIR);
        match probe_writable(&preferred) {
            Ok(()) => Ok(preferred),
            Err(error) => {
                warn!(
                    app,
                    preferred = %preferred.display(),
                    %error,
                    "cache directory not writable, falling back to temp cache"
                );
                let fallback = self.fallback_cache_root.join(app);
                probe_writable(&fallback)
                    .map_err(|_| EngineError::PermissionDenied(app.to_string()))?;
                Ok(fallback)
            }
        }
    }
}

fn probe_writable(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let probe = dir.join(format!(".probe-{}", unique_suffix()));
    let mut file = fs::File::create(&probe)?;
    file.write_all(b"probe")?;
    drop(file);
    fs::remove_file(&probe)
}

/// Deterministic cache key over the client version and the sorted resolved
/// upgrade ids.
pub fn build_fingerprint(client_version: &AppVersion, mut upgrade_ids: Vec<String>) -> String {
    upgrade_ids.sort();
    let mut payload = client_version.to_string();
    for id in &upgrade_ids {
        payload.push('\n');
        payload.push_str(id);
    }
    sha256_hex(payload.as_bytes())
}

/// Lays out the scratch tree: a package-level manifest at the root and one
/// populated subdirectory per resolved upgrade.
fn stage_package(
    root: &Path,
    client_version: &AppVersion,
    resolution: &mut ApplicableUpgradesResult,
    cancel: &CancelToken,
) -> Result<()> {
    let update_file = resolution.update_file.clone();
    let updater_file = resolution.updater_file.clone();

    for manifest in &mut resolution.upgrades {
        cancel.checkpoint()?;
        let subdir = root.join(&manifest.id);
        fs::create_dir_all(&subdir)
            .with_context(|| format!("failed creating upgrade directory {}", subdir.display()))?;

        match manifest.kind {
            ManifestKind::Standard => stage_standard_upgrade(manifest, &subdir)?,
            ManifestKind::AppUpdate => {
                let record = update_file.as_ref().ok_or_else(|| {
                    anyhow!("app-update resolved without an update artifact")
                })?;
                stage_app_update(manifest, record, &subdir)?;
            }
            ManifestKind::SelfUpdate => {
                let record = updater_file.as_ref().ok_or_else(|| {
                    anyhow!("self-update resolved without an updater artifact")
                })?;
                stage_self_update(manifest, record, &subdir)?;
            }
        }

        let serialized = serde_json::to_string_pretty(manifest)
            .with_context(|| format!("failed serializing manifest '{}'", manifest.id))?;
        fs::write(subdir.join(UPGRADE_MANIFEST_FILE), serialized).with_context(|| {
            format!("failed writing manifest copy for upgrade '{}'", manifest.id)
        })?;
    }

    let package = PackageManifest {
        from_version: Some(client_version.clone()),
        to_version: resolution.target_version.clone(),
        upgrades: resolution.upgrade_ids(),
    };
    let serialized =
        serde_json::to_string_pretty(&package).context("failed serializing package manifest")?;
    fs::write(root.join(PACKAGE_MANIFEST_FILE), serialized)
        .context("failed writing package manifest")?;

    Ok(())
}

/// Standard upgrades ship their declared source tree verbatim. A missing
/// source aborts the whole build.
fn stage_standard_upgrade(manifest: &UpgradeManifest, subdir: &Path) -> Result<()> {
    let source = manifest.storage.source_dir();
    if !source.is_dir() {
        return Err(EngineError::SourceMissing(source.display().to_string()).into());
    }
    copy_dir_recursive(&source, subdir)
        .with_context(|| format!("failed staging upgrade '{}'", manifest.id))
}

fn stage_app_update(
    manifest: &mut UpgradeManifest,
    record: &UpdateFileRecord,
    subdir: &Path,
) -> Result<()> {
    let file_name = record.file_name();
    let destination = subdir.join(&file_name);
    let size = fs::copy(&record.path, &destination).with_context(|| {
        format!(
            "failed copying update archive {} to {}",
            record.path.display(),
            destination.display()
        )
    })?;
    manifest.files = vec![FileDirective {
        path: file_name,
        // Extracted over the app root on the client.
        target: ".".to_string(),
        permissions: String::new(),
        required: true,
        executable: false,
        explode: true,
        backup: false,
        run_order: 0,
        size,
        checksum: String::new(),
    }];
    Ok(())
}

fn stage_self_update(
    manifest: &mut UpgradeManifest,
    record: &UpdateFileRecord,
    subdir: &Path,
) -> Result<()> {
    let file_name = record.file_name();
    let size = copy_file_verified(&record.path, &subdir.join(&file_name))?;
    manifest.files = vec![FileDirective {
        path: file_name,
        target: INSTALLER_STAGING_TARGET.to_string(),
        permissions: String::new(),
        required: true,
        executable: false,
        explode: false,
        backup: false,
        run_order: 0,
        size,
        checksum: String::new(),
    }];
    Ok(())
}
