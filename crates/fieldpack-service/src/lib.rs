mod config;
mod detect;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Result;
use fieldpack_core::{AppVersion, CancelToken, EngineError};
use fieldpack_packager::PackageBuilder;
use fieldpack_resolver::{ApplicableUpgradesResult, UpdateLocator, UpgradeResolver};

pub use config::{ConfiguredFolders, ServiceConfig};
pub use detect::{is_legacy_client, MIN_PROTOCOL_VERSION};

/// How a failed operation should be answered at the boundary. Everything
/// that is not a client mistake maps to a generic server failure; no
/// response is ever partially successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NotFound,
    BadRequest,
    Internal,
}

pub fn classify_failure(error: &anyhow::Error) -> FailureKind {
    match error.downcast_ref::<EngineError>() {
        Some(engine) if engine.is_not_found() => FailureKind::NotFound,
        Some(engine) if engine.is_invalid_input() => FailureKind::BadRequest,
        _ => FailureKind::Internal,
    }
}

/// Facade over the resolution and packaging engine: the operations the
/// request routing layer calls, one logical execution per inbound request.
pub struct UpdateService {
    builder: PackageBuilder,
}

impl UpdateService {
    pub fn new(builder: PackageBuilder) -> Self {
        Self { builder }
    }

    /// Wires up locator, resolver, and builder from a loaded config.
    pub fn from_config(storage_root: impl Into<PathBuf>, config: &ServiceConfig) -> Self {
        let root = config
            .storage_root
            .clone()
            .unwrap_or_else(|| storage_root.into());
        let locator = UpdateLocator::new(root, Arc::new(ConfiguredFolders::from(config)));
        let mut resolver = UpgradeResolver::new(locator);
        if let Some(updater_app) = &config.updater_app {
            resolver = resolver.with_updater_app(updater_app.clone());
        }
        Self::new(PackageBuilder::new(resolver))
    }

    pub fn builder(&self) -> &PackageBuilder {
        &self.builder
    }

    fn locator(&self) -> &UpdateLocator {
        self.builder.resolver().locator()
    }

    fn app_folder(&self, app: &str) -> Result<PathBuf> {
        self.locator()
            .folder_for_app(app)
            .ok_or_else(|| EngineError::NotFound(app.to_string()).into())
    }

    /// True when the client holds the server's latest artifact.
    pub fn check_version(
        &self,
        app: &str,
        client_version: Option<&str>,
        modified_since: Option<SystemTime>,
        checksum: Option<&str>,
        include_prerelease: bool,
    ) -> Result<bool> {
        let folder = self.app_folder(app)?;
        let parsed = match client_version {
            Some(raw) => Some(AppVersion::parse(raw)?),
            None => None,
        };
        self.locator().check_version(
            &folder,
            parsed.as_ref(),
            modified_since,
            checksum,
            include_prerelease,
        )
    }

    /// The ordered upgrade set for one client. An empty upgrade list means
    /// "up to date".
    pub fn list_applicable_upgrades(
        &self,
        app: &str,
        client_version: &str,
        include_prerelease: bool,
    ) -> Result<ApplicableUpgradesResult> {
        let parsed = AppVersion::parse(client_version)?;
        self.builder
            .resolver()
            .applicable_upgrades(app, &parsed, include_prerelease, None)?
            .ok_or_else(|| EngineError::NotFound(app.to_string()).into())
    }

    /// Builds (or serves from cache) the upgrade package archive.
    pub fn fetch_upgrade_package(
        &self,
        app: &str,
        client_version: &str,
        include_prerelease: bool,
        installer_version: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Option<PathBuf>> {
        let parsed = AppVersion::parse(client_version)?;
        let installer = match installer_version {
            Some(raw) => Some(AppVersion::parse(raw)?),
            None => None,
        };
        self.builder.build_upgrade_package(
            app,
            &parsed,
            include_prerelease,
            installer.as_ref(),
            cancel,
        )
    }

    /// The latest plain update artifact; legacy clients get the combined
    /// archive with the updater embedded.
    pub fn fetch_plain_update(
        &self,
        app: &str,
        include_prerelease: bool,
        legacy: bool,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let folder = self.app_folder(app)?;
        let record = self
            .locator()
            .scan_latest(&folder, include_prerelease)?
            .ok_or_else(|| EngineError::NotFound(app.to_string()))?;

        if legacy {
            self.builder
                .package_app_update_with_updater(app, &record.path, cancel)
        } else {
            Ok(record.path)
        }
    }
}
