mod builder;
mod legacy;
mod scratch;

pub use builder::{
    build_fingerprint, PackageBuilder, CACHE_SUBDIR, INSTALLER_STAGING_TARGET,
    PACKAGE_MANIFEST_FILE, UPGRADE_MANIFEST_FILE,
};
pub use legacy::{LEGACY_INSTALL_SCRIPT, LEGACY_UPDATER_FILE, LEGACY_UPGRADE_SUBDIR};
