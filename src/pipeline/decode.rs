//! Image decoding: upload bytes → `DynamicImage`, behind a format allow-list.
//!
//! ## Why sniff before decoding?
//!
//! Clients mislabel uploads constantly (`.jpg` files that are PNGs, a
//! generic `application/octet-stream` content type). Magic bytes are the
//! only reliable signal, so they win over the declared format. The
//! allow-list check happens on the sniffed format, before the decoder runs,
//! so a GIF or BMP is rejected as a client error without ever being parsed.
//!
//! The decoded raster keeps the channel order the `image` crate produces
//! (RGB/RGBA); nothing downstream reorders channels.

use crate::error::FillError;
use crate::pipeline::input::ImageUpload;
use image::{DynamicImage, ImageFormat};
use tracing::debug;

/// Formats accepted for upload.
pub const ALLOWED_FORMATS: [ImageFormat; 3] =
    [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

/// A decoded upload and the format it was decoded from.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub raster: DynamicImage,
    pub format: ImageFormat,
}

/// Human-readable, upper-case format name (`PNG`, `WEBP`, `GIF`).
pub fn format_name(format: ImageFormat) -> String {
    format!("{:?}", format).to_uppercase()
}

/// Determine the upload's format and check it against [`ALLOWED_FORMATS`].
///
/// Magic bytes take precedence; the declared MIME type or extension is used
/// only when the bytes match no known signature.
pub fn sniff_format(bytes: &[u8], declared: Option<&str>) -> Result<ImageFormat, FillError> {
    let sniffed = image::guess_format(bytes).ok();
    let declared_format = declared.and_then(parse_declared);

    let format = sniffed.or(declared_format).ok_or_else(|| FillError::Decode {
        detail: "data does not match any known image signature".into(),
    })?;

    if !ALLOWED_FORMATS.contains(&format) {
        return Err(FillError::UnsupportedFormat {
            format: format_name(format),
        });
    }

    if let (Some(s), Some(d)) = (sniffed, declared_format) {
        if s != d {
            debug!(
                "Declared format {} disagrees with content; using {}",
                format_name(d),
                format_name(s)
            );
        }
    }

    Ok(format)
}

/// Sniff, validate and decode an upload.
///
/// # Errors
/// - [`FillError::UnsupportedFormat`] — format outside the allow-list
/// - [`FillError::Decode`] — unrecognised or corrupt bytes, or zero-area image
pub fn decode_upload(upload: &ImageUpload) -> Result<DecodedImage, FillError> {
    let format = sniff_format(&upload.bytes, upload.declared_format.as_deref())?;

    let raster = image::load_from_memory_with_format(&upload.bytes, format).map_err(|e| {
        FillError::Decode {
            detail: format!("{} data is corrupt: {}", format_name(format), e),
        }
    })?;

    if raster.width() == 0 || raster.height() == 0 {
        return Err(FillError::Decode {
            detail: format!("image has zero area ({}x{})", raster.width(), raster.height()),
        });
    }

    debug!(
        "Decoded {} → {}x{} px, {:?}",
        format_name(format),
        raster.width(),
        raster.height(),
        raster.color()
    );

    Ok(DecodedImage { raster, format })
}

fn parse_declared(declared: &str) -> Option<ImageFormat> {
    let d = declared.trim().to_ascii_lowercase();
    if d.contains('/') {
        ImageFormat::from_mime_type(&d)
    } else {
        ImageFormat::from_extension(d.trim_start_matches('.'))
    }
}
