//! Error types for the container-fill library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FillError`] — **Fatal**: the estimate cannot be produced at all (bad
//!   upload, non-positive container volume, empty point set, both renderers
//!   failed). Returned as `Err(FillError)` from every `estimate*` entry point.
//!
//! * [`RenderFailure`] — **Non-fatal**: one renderer attempt failed (offscreen
//!   context could not be created, nothing landed in the frame, the attempt
//!   timed out). The render chain records it and moves on to the fallback;
//!   only when every attempt fails are the failures wrapped into
//!   [`FillError::RenderFailed`].
//!
//! Every [`FillError`] maps to exactly one [`ErrorKind`], and every kind to
//! one response status. Transport adapters should serialise
//! [`ErrorResponse::from`] rather than the raw error so that 500-class
//! diagnostics stay in the logs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Response-level category of a [`FillError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad or missing input fields, unsupported format, non-positive volume.
    Validation,
    /// Upload bytes are not a parseable image.
    Decode,
    /// The point set carried no usable data.
    EmptyData,
    /// Primary and fallback renderers both failed.
    Render,
    /// The render artifact could not be serialised.
    Encode,
    /// Anything else that went wrong inside the pipeline.
    Internal,
}

impl ErrorKind {
    /// HTTP-equivalent status code for this category.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Validation | ErrorKind::Decode => 400,
            ErrorKind::EmptyData | ErrorKind::Render | ErrorKind::Encode | ErrorKind::Internal => {
                500
            }
        }
    }

    /// `true` when the caller can fix the problem by changing the request.
    pub fn is_client_error(self) -> bool {
        self.status_code() < 500
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Decode => "decode",
            ErrorKind::EmptyData => "empty-data",
            ErrorKind::Render => "render",
            ErrorKind::Encode => "encode",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// All fatal errors returned by the container-fill library.
///
/// Single renderer failures use [`RenderFailure`] and only surface here once
/// the whole render chain is exhausted.
#[derive(Debug, Error)]
pub enum FillError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// No image bytes were supplied.
    #[error("No image was uploaded. Attach a JPEG, PNG or WEBP photograph of the container.")]
    MissingImage,

    /// Container volume is zero, negative or not a number.
    #[error("Container volume must be a positive number, got {value}")]
    InvalidContainerVolume { value: f64 },

    /// The upload is an image, but not one of the accepted formats.
    #[error("Unsupported image format '{format}'. Accepted formats: JPEG, PNG, WEBP.")]
    UnsupportedFormat { format: String },

    /// The upload exceeds the configured size limit.
    #[error("Image is {size} bytes; the limit is {limit} bytes")]
    UploadTooLarge { size: usize, limit: usize },

    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// A caller-supplied point-cloud file could not be read or parsed.
    #[error("Point cloud '{path}' could not be loaded: {detail}")]
    PointCloudLoad { path: PathBuf, detail: String },

    // ── Decode errors ─────────────────────────────────────────────────────
    /// Bytes are not a parseable image, or decode to a zero-area raster.
    #[error("Image could not be decoded: {detail}")]
    Decode { detail: String },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The point set had no measurable extent; rendering was not attempted.
    #[error("Point set of {points} points has no measurable volume")]
    EmptyPointSet { points: usize },

    /// Primary and fallback renderers both failed.
    #[error("Rendering failed: {primary}; fallback: {fallback}")]
    RenderFailed {
        primary: RenderFailure,
        fallback: RenderFailure,
    },

    /// The rendered raster could not be encoded into an artifact.
    #[error("Artifact encoding failed: {detail}")]
    Encode { detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FillError {
    /// Response-level category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FillError::MissingImage
            | FillError::InvalidContainerVolume { .. }
            | FillError::UnsupportedFormat { .. }
            | FillError::UploadTooLarge { .. }
            | FillError::FileNotFound { .. }
            | FillError::PermissionDenied { .. }
            | FillError::InvalidInput { .. }
            | FillError::DownloadFailed { .. }
            | FillError::DownloadTimeout { .. }
            | FillError::PointCloudLoad { .. }
            | FillError::InvalidConfig(_) => ErrorKind::Validation,
            FillError::Decode { .. } => ErrorKind::Decode,
            FillError::EmptyPointSet { .. } => ErrorKind::EmptyData,
            FillError::RenderFailed { .. } => ErrorKind::Render,
            FillError::Encode { .. } => ErrorKind::Encode,
            FillError::OutputWriteFailed { .. } | FillError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// Message safe to return to the caller.
    ///
    /// Client errors carry the full, actionable message. Server errors are
    /// reduced to a generic sentence per kind; the detail belongs in the log.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Decode => self.to_string(),
            ErrorKind::EmptyData => "No usable 3D data was produced for this image".to_string(),
            ErrorKind::Render => "The 3D visualization could not be rendered".to_string(),
            ErrorKind::Encode => "The 3D visualization could not be encoded".to_string(),
            ErrorKind::Internal => "Internal error while processing the image".to_string(),
        }
    }
}

/// A non-fatal error for a single renderer attempt.
///
/// Stored by the render chain; the pipeline continues with the fallback
/// renderer unless this was the last attempt.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum RenderFailure {
    /// The renderer could not set up its drawing surface.
    #[error("{renderer}: initialisation failed: {detail}")]
    InitFailed { renderer: String, detail: String },

    /// The renderer ran but captured nothing.
    #[error("{renderer}: captured frame is empty")]
    EmptyFrame { renderer: String },

    /// The renderer reported an error while drawing or capturing.
    #[error("{renderer}: capture failed: {detail}")]
    CaptureFailed { renderer: String, detail: String },

    /// The attempt did not finish within the render timeout.
    #[error("{renderer}: timed out after {millis}ms")]
    TimedOut { renderer: String, millis: u64 },

    /// The renderer panicked.
    #[error("{renderer}: panicked: {detail}")]
    Panicked { renderer: String, detail: String },
}

impl RenderFailure {
    /// Name of the renderer that failed.
    pub fn renderer(&self) -> &str {
        match self {
            RenderFailure::InitFailed { renderer, .. }
            | RenderFailure::EmptyFrame { renderer }
            | RenderFailure::CaptureFailed { renderer, .. }
            | RenderFailure::TimedOut { renderer, .. }
            | RenderFailure::Panicked { renderer, .. } => renderer,
        }
    }
}

/// JSON body returned to the client on failure: `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl From<&FillError> for ErrorResponse {
    fn from(e: &FillError) -> Self {
        Self {
            error: e.public_message(),
        }
    }
}
