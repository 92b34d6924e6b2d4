use std::io::Read;
use std::path::Path;

use futures_util::{Stream, StreamExt};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::update::ReleaseAsset;

/// One step of a running download. Emitted repeatedly, never persisted.
#[derive(Debug, Clone, Copy)]
pub struct DownloadProgress {
    pub bytes_received: u64,
    pub bytes_total: Option<u64>,
    /// Whole percent when the total length is declared; `None` while the
    /// download is indeterminate.
    pub percent: Option<u8>,
}

#[derive(Debug, Clone, Copy)]
pub enum InstallHandoff {
    /// The installer was launched; the application must now exit so the
    /// installer is not blocked by our open file handles.
    ExitForInstaller,
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("{context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("download failed with HTTP {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("checksum mismatch for {asset}; refusing to run the installer")]
    ChecksumMismatch { asset: String },
    #[error("{0}")]
    Invalid(String),
}

impl InstallError {
    fn http(context: &'static str, source: reqwest::Error) -> Self {
        Self::Http { context, source }
    }

    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

/// Download `url` to `dest`, emitting progress per received chunk.
///
/// A failed transfer removes the partial file before surfacing the error;
/// there is no automatic retry.
///
/// # Errors
/// Returns an error when the request fails, the server answers with a
/// non-success status, or the file cannot be written.
pub async fn download(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    progress: &mpsc::Sender<DownloadProgress>,
) -> Result<(), InstallError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|error| InstallError::http("download request failed", error))?;

    if !response.status().is_success() {
        return Err(InstallError::HttpStatus(response.status()));
    }

    let total = response.content_length();
    let stream = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|error| InstallError::http("download stream error", error)));

    write_stream(stream, total, dest, progress).await
}

/// Stream chunks into `dest`; on any failure the partial file is removed.
async fn write_stream<S, B>(
    stream: S,
    total: Option<u64>,
    dest: &Path,
    progress: &mpsc::Sender<DownloadProgress>,
) -> Result<(), InstallError>
where
    S: Stream<Item = Result<B, InstallError>> + Unpin,
    B: AsRef<[u8]>,
{
    match stream_to_file(stream, total, dest, progress).await {
        Ok(received) => {
            info!("Download complete: {received} bytes");
            Ok(())
        }
        Err(error) => {
            let _ = tokio::fs::remove_file(dest).await;
            Err(error)
        }
    }
}

async fn stream_to_file<S, B>(
    mut stream: S,
    total: Option<u64>,
    dest: &Path,
    progress: &mpsc::Sender<DownloadProgress>,
) -> Result<u64, InstallError>
where
    S: Stream<Item = Result<B, InstallError>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|error| InstallError::io("failed to create download file", error))?;
    let mut received: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let bytes = chunk.as_ref();
        file.write_all(bytes)
            .await
            .map_err(|error| InstallError::io("failed to write download data", error))?;
        received += bytes.len() as u64;

        let percent = total
            .filter(|total| *total > 0)
            .map(|total| u8::try_from(received.min(total) * 100 / total).unwrap_or(100));
        let _ = progress
            .send(DownloadProgress {
                bytes_received: received,
                bytes_total: total,
                percent,
            })
            .await;
    }

    file.flush()
        .await
        .map_err(|error| InstallError::io("failed to flush download file", error))?;
    Ok(received)
}

/// Download the chosen installer asset and hand it to the platform's
/// installer mechanism.
///
/// The download lands in a temp directory under the application cache; the
/// directory is kept on success because the installer outlives this process.
/// The returned [`InstallHandoff`] tells the caller to exit.
///
/// # Errors
/// Returns an error when the download, checksum verification, or installer
/// launch fails.
pub async fn download_and_install(
    client: &reqwest::Client,
    asset: &ReleaseAsset,
    progress: mpsc::Sender<DownloadProgress>,
) -> Result<InstallHandoff, InstallError> {
    let cache_dir = tillhost_platform::AppPaths::new()
        .map_err(|error| InstallError::Invalid(format!("failed to resolve app paths: {error}")))?
        .cache_dir;
    std::fs::create_dir_all(&cache_dir)
        .map_err(|error| InstallError::io("failed to create cache directory", error))?;

    let temp_dir = tempfile::tempdir_in(&cache_dir)
        .map_err(|error| InstallError::io("failed to create temp directory", error))?;

    let file_name = Path::new(&asset.name)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty() && !name.contains(".."))
        .unwrap_or("tillhost-update");
    let download_path = temp_dir.path().join(file_name);

    info!(
        "Downloading update asset {} from {}",
        asset.name, asset.browser_download_url
    );
    download(client, &asset.browser_download_url, &download_path, &progress).await?;
    verify_digest(asset, &download_path)?;

    let _ = temp_dir.keep();
    hand_off_to_installer(&download_path)?;
    Ok(InstallHandoff::ExitForInstaller)
}

fn verify_digest(asset: &ReleaseAsset, path: &Path) -> Result<(), InstallError> {
    let Some(digest) = asset.digest.as_deref() else {
        debug!("No digest published for {}; skipping verification", asset.name);
        return Ok(());
    };
    let Some(expected) = parse_sha256_digest(digest) else {
        warn!("Unrecognized digest format for {}: {digest}", asset.name);
        return Ok(());
    };

    let actual = sha256_file(path)?;
    if actual.eq_ignore_ascii_case(&expected) {
        info!("Installer checksum verified for {}", asset.name);
        Ok(())
    } else {
        let _ = std::fs::remove_file(path);
        Err(InstallError::ChecksumMismatch {
            asset: asset.name.clone(),
        })
    }
}

fn parse_sha256_digest(digest: &str) -> Option<String> {
    let (algorithm, hash) = digest.split_once(':')?;
    if !algorithm.eq_ignore_ascii_case("sha256") {
        return None;
    }
    if hash.len() != 64 || !hash.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    Some(hash.to_ascii_lowercase())
}

fn sha256_file(path: &Path) -> Result<String, InstallError> {
    let mut file = std::fs::File::open(path)
        .map_err(|error| InstallError::io("failed to open file for checksum", error))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];

    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|error| InstallError::io("failed to read file for checksum", error))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(target_os = "windows")]
fn hand_off_to_installer(installer: &Path) -> Result<(), InstallError> {
    info!("Launching installer: {}", installer.display());
    std::process::Command::new(installer)
        .spawn()
        .map_err(|error| InstallError::io("failed to launch installer", error))?;
    Ok(())
}

#[cfg(target_os = "macos")]
fn hand_off_to_installer(installer: &Path) -> Result<(), InstallError> {
    info!("Opening installer image: {}", installer.display());
    open::that(installer).map_err(|error| InstallError::io("failed to open installer image", error))
}

#[cfg(all(unix, not(target_os = "macos")))]
fn hand_off_to_installer(installer: &Path) -> Result<(), InstallError> {
    use std::os::unix::fs::PermissionsExt;

    info!("Launching installer: {}", installer.display());
    std::fs::set_permissions(installer, std::fs::Permissions::from_mode(0o755))
        .map_err(|error| InstallError::io("failed to mark installer executable", error))?;
    std::process::Command::new(installer)
        .spawn()
        .map_err(|error| InstallError::io("failed to launch installer", error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use tokio::sync::mpsc;

    use super::{
        DownloadProgress, InstallError, parse_sha256_digest, sha256_file, verify_digest,
        write_stream,
    };
    use crate::update::ReleaseAsset;

    fn drain(rx: &mut mpsc::Receiver<DownloadProgress>) -> Vec<DownloadProgress> {
        let mut collected = Vec::new();
        while let Ok(step) = rx.try_recv() {
            collected.push(step);
        }
        collected
    }

    fn chunks(sizes: &[usize]) -> Vec<Result<Vec<u8>, InstallError>> {
        sizes.iter().map(|size| Ok(vec![0_u8; *size])).collect()
    }

    #[tokio::test]
    async fn known_length_download_emits_quartile_percents_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("installer.bin");
        let (tx, mut rx) = mpsc::channel(16);

        write_stream(
            stream::iter(chunks(&[250, 250, 250, 250])),
            Some(1000),
            &dest,
            &tx,
        )
        .await
        .expect("download should succeed");

        let steps = drain(&mut rx);
        let percents: Vec<_> = steps.iter().map(|step| step.percent).collect();
        assert_eq!(
            percents,
            vec![Some(25), Some(50), Some(75), Some(100)]
        );
        assert_eq!(steps.last().map(|step| step.bytes_received), Some(1000));
        assert_eq!(
            std::fs::metadata(&dest).expect("downloaded file exists").len(),
            1000
        );
    }

    #[tokio::test]
    async fn unknown_length_download_reports_indeterminate_progress() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("installer.bin");
        let (tx, mut rx) = mpsc::channel(16);

        write_stream(stream::iter(chunks(&[100, 100])), None, &dest, &tx)
            .await
            .expect("download should succeed");

        let steps = drain(&mut rx);
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|step| step.percent.is_none()));
        assert_eq!(steps[1].bytes_received, 200);
    }

    #[tokio::test]
    async fn failed_transfer_leaves_no_partial_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("installer.bin");
        let (tx, mut rx) = mpsc::channel(16);

        let interrupted: Vec<Result<Vec<u8>, InstallError>> = vec![
            Ok(vec![0_u8; 250]),
            Err(InstallError::Invalid("connection reset".to_string())),
        ];
        let result = write_stream(stream::iter(interrupted), Some(1000), &dest, &tx).await;

        assert!(matches!(result, Err(InstallError::Invalid(_))));
        assert!(!dest.exists(), "partial download must be removed");
        // The chunk received before the failure still reported progress.
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn uneven_chunks_round_down_until_the_final_chunk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("installer.bin");
        let (tx, mut rx) = mpsc::channel(16);

        write_stream(stream::iter(chunks(&[1, 1, 1])), Some(3), &dest, &tx)
            .await
            .expect("download should succeed");

        let percents: Vec<_> = drain(&mut rx).iter().map(|step| step.percent).collect();
        assert_eq!(percents, vec![Some(33), Some(66), Some(100)]);
    }

    #[test]
    fn parse_sha256_digest_accepts_valid_sha256() {
        let parsed = parse_sha256_digest(
            "sha256:25ccd363b2bbe82ac8ba93e330de8682668f763857e897a2f89417321385c2c1",
        );
        assert_eq!(
            parsed.as_deref(),
            Some("25ccd363b2bbe82ac8ba93e330de8682668f763857e897a2f89417321385c2c1")
        );
    }

    #[test]
    fn parse_sha256_digest_rejects_other_formats() {
        assert!(parse_sha256_digest("sha1:abc").is_none());
        assert!(parse_sha256_digest("sha256:not-hex").is_none());
        assert!(parse_sha256_digest("no-colon").is_none());
    }

    #[test]
    fn sha256_of_an_empty_file_matches_the_known_digest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("empty.bin");
        std::fs::write(&path, b"").expect("write empty file");

        let digest = sha256_file(&path).expect("checksum should be computed");
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_mismatch_removes_the_download_and_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("installer.bin");
        std::fs::write(&path, b"tampered").expect("write file");

        let asset = ReleaseAsset {
            name: "Tillhost.AppImage".to_string(),
            browser_download_url: "https://example.com/Tillhost.AppImage".to_string(),
            digest: Some(format!("sha256:{}", "a".repeat(64))),
        };

        let result = verify_digest(&asset, &path);

        assert!(matches!(
            result,
            Err(InstallError::ChecksumMismatch { ref asset }) if asset == "Tillhost.AppImage"
        ));
        assert!(!path.exists(), "unverified download must not linger");
    }

    #[test]
    fn missing_digest_skips_verification() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("installer.bin");
        std::fs::write(&path, b"payload").expect("write file");

        let asset = ReleaseAsset {
            name: "Tillhost.AppImage".to_string(),
            browser_download_url: "https://example.com/Tillhost.AppImage".to_string(),
            digest: None,
        };

        verify_digest(&asset, &path).expect("no digest means nothing to verify");
        assert!(path.exists());
    }
}
