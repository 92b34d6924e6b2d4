//! Update pipeline for the tillhost shell.
//!
//! Checks the release feed for a newer version, selects the installer asset
//! for the running platform, downloads it with progress reporting, and hands
//! it to the operating system's installer mechanism.

pub mod auto_update;
pub mod update;

pub use auto_update::{
    DownloadProgress, InstallError, InstallHandoff, download, download_and_install,
};
pub use update::{
    ReleaseAsset, ReleaseManifest, UpdateDecision, UpdateError, check_for_updates,
    compare_versions, evaluate_manifest, platform_asset_key,
};
