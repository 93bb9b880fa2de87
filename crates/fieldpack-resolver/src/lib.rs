mod locator;
mod repository;
mod resolve;

pub use locator::{
    update_file_stem, version_from_stem, AppFolderLookup, AppUpdateInfo, UpdateFileRecord,
    UpdateLocator,
};
pub use repository::load_manifests;
pub use resolve::{
    ApplicableUpgradesResult, UpgradeResolver, DEFAULT_MANIFESTS_SUBDIR, DEFAULT_UPDATER_APP,
};

#[cfg(test)]
mod tests;
