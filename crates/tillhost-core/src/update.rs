use std::cmp::Ordering;

use log::{debug, info};
use serde::Deserialize;
use thiserror::Error;

const GITHUB_REPO: &str = "tillhost/tillhost";

/// Fixed identifying header sent with every update check.
pub const USER_AGENT: &str = "tillhost";

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub digest: Option<String>,
}

/// One fetched release: immutable, discarded after the check completes.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseManifest {
    pub tag_name: String,
    pub body: Option<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone)]
pub struct UpdateDecision {
    pub available: bool,
    pub target_version: String,
    pub release_notes: Option<String>,
    pub chosen_asset: Option<ReleaseAsset>,
}

impl UpdateDecision {
    fn no_update(current_version: &str) -> Self {
        Self {
            available: false,
            target_version: current_version.to_string(),
            release_notes: None,
            chosen_asset: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("failed to check for app update: {0}")]
    Request(#[source] reqwest::Error),
    #[error("app update check failed with HTTP {status}{body_snippet}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body_snippet: String,
    },
    #[error("failed to parse app update response: {0}")]
    Parse(#[source] reqwest::Error),
}

/// Compare two dotted version strings on their first three numeric
/// components. Missing or non-numeric components count as zero, so `"1.2"`
/// and `"1.2.0"` are equal.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = numeric_components(a);
    let b = numeric_components(b);

    for position in 0..3 {
        match a[position].cmp(&b[position]) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
    }
    Ordering::Equal
}

fn numeric_components(version: &str) -> [u64; 3] {
    let mut components = [0_u64; 3];
    for (slot, part) in components.iter_mut().zip(version.split('.')) {
        *slot = part.trim().parse().unwrap_or(0);
    }
    components
}

/// Substring identifying the installer asset for the running platform.
#[must_use]
pub fn platform_asset_key() -> Option<&'static str> {
    if cfg!(target_os = "windows") {
        Some("Setup.exe")
    } else if cfg!(target_os = "macos") {
        Some(".dmg")
    } else if cfg!(target_os = "linux") {
        Some(".AppImage")
    } else {
        None
    }
}

/// Derive the update decision from a fetched manifest.
///
/// `available` holds only when the release is strictly newer than the
/// running version and an asset for this platform exists.
#[must_use]
pub fn evaluate_manifest(manifest: &ReleaseManifest, current_version: &str) -> UpdateDecision {
    let target = manifest.tag_name.strip_prefix('v').unwrap_or(&manifest.tag_name);
    let current = current_version.strip_prefix('v').unwrap_or(current_version);

    let newer = compare_versions(target, current) == Ordering::Greater;
    let chosen_asset = if newer {
        platform_asset_key().and_then(|key| {
            manifest
                .assets
                .iter()
                .find(|asset| asset.name.contains(key))
                .cloned()
        })
    } else {
        None
    };

    UpdateDecision {
        available: newer && chosen_asset.is_some(),
        target_version: target.to_string(),
        release_notes: manifest.body.clone(),
        chosen_asset,
    }
}

/// Check the release feed for a newer tillhost version.
///
/// Disabled in debug builds, where it always resolves "no update". The
/// caller's `reqwest::Client` carries the request timeout, so a dead feed
/// surfaces as a reportable error instead of a hang.
///
/// # Errors
/// Returns an error when the feed request fails or the manifest cannot be
/// parsed.
pub async fn check_for_updates(
    client: &reqwest::Client,
    current_version: &str,
) -> Result<UpdateDecision, UpdateError> {
    if cfg!(debug_assertions) {
        debug!("Update checking disabled in debug builds");
        return Ok(UpdateDecision::no_update(current_version));
    }

    let url = format!("https://api.github.com/repos/{GITHUB_REPO}/releases/latest");

    let response = client
        .get(&url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .map_err(UpdateError::Request)?;

    if !response.status().is_success() {
        let status = response.status();
        let body_snippet = response
            .text()
            .await
            .ok()
            .map(|body| response_snippet(&body, 160))
            .unwrap_or_default();
        return Err(UpdateError::HttpStatus {
            status,
            body_snippet,
        });
    }

    let manifest: ReleaseManifest = response.json().await.map_err(UpdateError::Parse)?;
    let decision = evaluate_manifest(&manifest, current_version);

    if decision.available {
        info!(
            "Update available: {current_version} -> {}",
            decision.target_version
        );
    } else {
        info!("No update available (current {current_version})");
    }
    Ok(decision)
}

fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}
