//! Input resolution: normalise a user-supplied path or URL to upload bytes.
//!
//! The orchestrator works on an in-memory [`ImageUpload`], exactly what an
//! HTTP multipart handler would hand it. For the CLI we read local files or
//! download URLs into that same shape, carrying along whatever format hint
//! the source offers (file extension or `Content-Type`). The hint is only
//! used when the bytes themselves cannot be sniffed; see
//! [`crate::pipeline::decode::sniff_format`].

use crate::error::FillError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Raw uploaded image bytes plus the format the client claimed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    /// MIME type (`image/png`) or file extension (`png`), if known.
    pub declared_format: Option<String>,
}

impl ImageUpload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            declared_format: None,
        }
    }

    pub fn with_declared_format(mut self, format: impl Into<String>) -> Self {
        self.declared_format = Some(format.into());
        self
    }

    /// Reject uploads that can never be processed, before any decoding.
    pub fn validate(&self, max_bytes: usize) -> Result<(), FillError> {
        if self.bytes.is_empty() {
            return Err(FillError::MissingImage);
        }
        if self.bytes.len() > max_bytes {
            return Err(FillError::UploadTooLarge {
                size: self.bytes.len(),
                limit: max_bytes,
            });
        }
        Ok(())
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to upload bytes.
///
/// If the input is a URL, download it. If the input is a local file,
/// validate it exists and is readable.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ImageUpload, FillError> {
    if input.trim().is_empty() {
        return Err(FillError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(Path::new(input)).await
    }
}

/// Read a local file, mapping I/O failures to input errors.
async fn resolve_local(path: &Path) -> Result<ImageUpload, FillError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => FillError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => FillError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    debug!("Read local image: {} ({} bytes)", path.display(), bytes.len());

    Ok(ImageUpload {
        bytes,
        declared_format: extension_of(path),
    })
}

/// Download a URL and return its body as an upload.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ImageUpload, FillError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| FillError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            FillError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            FillError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(FillError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let declared_format = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .or_else(|| extension_from_url(url));

    let bytes = response
        .bytes()
        .await
        .map_err(|e| FillError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());

    Ok(ImageUpload {
        bytes: bytes.to_vec(),
        declared_format,
    })
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Take the extension of the last URL path segment, if any.
fn extension_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?.to_string();
    extension_of(&PathBuf::from(last))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/bin.jpg"));
        assert!(is_url("http://example.com/bin.jpg"));
        assert!(!is_url("/tmp/bin.jpg"));
        assert!(!is_url("bin.jpg"));
        assert!(!is_url(""));
    }

    #[test]
    fn empty_upload_is_missing_image() {
        let err = ImageUpload::new(vec![]).validate(10).unwrap_err();
        assert!(matches!(err, FillError::MissingImage));
    }

    #[test]
    fn oversized_upload_rejected() {
        let err = ImageUpload::new(vec![0; 11]).validate(10).unwrap_err();
        assert!(matches!(
            err,
            FillError::UploadTooLarge {
                size: 11,
                limit: 10
            }
        ));
    }

    #[test]
    fn url_extension_is_lowercased() {
        assert_eq!(
            extension_from_url("https://example.com/a/b/Photo.JPG?x=1"),
            Some("jpg".to_string())
        );
        assert_eq!(extension_from_url("https://example.com/"), None);
    }

    #[tokio::test]
    async fn missing_local_file() {
        let err = resolve_input("/definitely/not/here.png", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, FillError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn local_file_carries_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin.PNG");
        std::fs::write(&path, b"not really a png").unwrap();

        let upload = resolve_input(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(upload.declared_format.as_deref(), Some("png"));
        assert_eq!(upload.bytes, b"not really a png");
    }
}
