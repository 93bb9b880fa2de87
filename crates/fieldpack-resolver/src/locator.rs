use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use fieldpack_core::{sha256_file_hex, AppVersion};

/// Injected app-name to storage-folder mapping. Deliberately read-only so
/// resolution stays deterministic for a fixed configuration.
pub trait AppFolderLookup: Send + Sync {
    fn folder_name(&self, app: &str) -> Option<String>;
}

/// One update artifact found during a folder scan. Recomputed per scan,
/// never persisted.
#[derive(Debug, Clone)]
pub struct UpdateFileRecord {
    pub path: PathBuf,
    pub version: Option<AppVersion>,
    pub modified: SystemTime,
}

impl UpdateFileRecord {
    pub fn is_wildcard(&self) -> bool {
        self.version.is_none()
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// The best artifact on each track for one app folder. The two tracks are
/// independent reductions over the same file set.
#[derive(Debug, Clone, Default)]
pub struct AppUpdateInfo {
    pub stable: Option<UpdateFileRecord>,
    pub prerelease: Option<UpdateFileRecord>,
}

#[derive(Clone)]
pub struct UpdateLocator {
    storage_root: PathBuf,
    folders: Arc<dyn AppFolderLookup>,
}

impl UpdateLocator {
    pub fn new(storage_root: impl Into<PathBuf>, folders: Arc<dyn AppFolderLookup>) -> Self {
        Self {
            storage_root: storage_root.into(),
            folders,
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Configured mapping first; a same-named subdirectory is the fallback
    /// and must actually exist.
    pub fn folder_for_app(&self, app: &str) -> Option<PathBuf> {
        if let Some(name) = self.folders.folder_name(app) {
            return Some(self.storage_root.join(name));
        }
        let fallback = self.storage_root.join(app);
        fallback.is_dir().then_some(fallback)
    }

    /// Best update artifact in `folder`: wildcard files first, then version
    /// descending, then modification time descending. Pre-release files are
    /// excluded entirely when `include_prerelease` is false.
    pub fn scan_latest(
        &self,
        folder: &Path,
        include_prerelease: bool,
    ) -> Result<Option<UpdateFileRecord>> {
        if !folder.is_dir() {
            return Ok(None);
        }

        let mut best: Option<UpdateFileRecord> = None;
        for entry in fs::read_dir(folder)
            .with_context(|| format!("failed reading app folder {}", folder.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = update_file_stem(&file_name) else {
                continue;
            };

            let version = version_from_stem(stem);
            if !include_prerelease
                && version
                    .as_ref()
                    .is_some_and(|parsed| parsed.is_prerelease())
            {
                continue;
            }

            let modified = entry
                .metadata()?
                .modified()
                .with_context(|| format!("failed reading mtime of {}", file_name))?;
            let record = UpdateFileRecord {
                path: entry.path(),
                version,
                modified,
            };
            best = match best {
                None => Some(record),
                Some(current) => {
                    if rank_records(&record, &current) == Ordering::Greater {
                        Some(record)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        Ok(best)
    }

    pub fn latest_update_info(&self, folder: &Path) -> Result<AppUpdateInfo> {
        Ok(AppUpdateInfo {
            stable: self.scan_latest(folder, false)?,
            prerelease: self.scan_latest(folder, true)?,
        })
    }

    /// "Is the client up to date" check. A supplied checksum is the final
    /// authority and overrides the version and timestamp comparisons.
    pub fn check_version(
        &self,
        folder: &Path,
        client_version: Option<&AppVersion>,
        client_modified_since: Option<SystemTime>,
        client_checksum: Option<&str>,
        include_prerelease: bool,
    ) -> Result<bool> {
        let Some(server) = self.scan_latest(folder, include_prerelease)? else {
            // The server holds nothing to offer.
            return Ok(true);
        };

        if client_version.is_none() && client_modified_since.is_none() {
            return Ok(false);
        }

        if let Some(expected) = client_checksum {
            let actual = sha256_file_hex(&server.path)?;
            return Ok(actual.eq_ignore_ascii_case(expected.trim()));
        }

        if let (Some(client), Some(server_version)) = (client_version, &server.version) {
            if server_version.is_newer_than(client) {
                return Ok(false);
            }
        }

        if let Some(since) = client_modified_since {
            if server.modified > since {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// Total order over scan candidates: wildcard files outrank every versioned
/// file unconditionally; among versioned files precedence decides, with
/// modification time as the secondary key.
pub(crate) fn rank_records(left: &UpdateFileRecord, right: &UpdateFileRecord) -> Ordering {
    match (&left.version, &right.version) {
        (None, None) => left.modified.cmp(&right.modified),
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a
            .cmp_precedence(b)
            .then_with(|| left.modified.cmp(&right.modified)),
    }
}

/// Strips a recognized update extension; other files are not candidates.
pub fn update_file_stem(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(".tar.gz")
        .or_else(|| file_name.strip_suffix(".exe"))
}

/// Derives the version from a `<name>-<version>` stem. Each dash is tried
/// as the name/version boundary; a stem with no parseable suffix is a
/// wildcard "always latest" marker.
pub fn version_from_stem(stem: &str) -> Option<AppVersion> {
    for (index, _) in stem.match_indices('-') {
        if let Ok(version) = stem[index + 1..].parse::<AppVersion>() {
            return Some(version);
        }
    }
    None
}
