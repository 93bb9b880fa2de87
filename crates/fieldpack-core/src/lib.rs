mod cancel;
mod digest;
mod error;
mod manifest;
mod version;

pub use cancel::CancelToken;
pub use digest::{sha256_file_hex, sha256_hex};
pub use error::EngineError;
pub use manifest::{
    ChecksumDescriptor, FileDirective, ManifestKind, PackageManifest, StorageLocator,
    UpgradeManifest, VersionRange, APP_UPDATE_ID, APP_UPDATE_PRIORITY, SELF_UPDATE_ID,
    SELF_UPDATE_PRIORITY,
};
pub use version::{AppVersion, PreRelease, PreReleaseTag};
