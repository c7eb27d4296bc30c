//! Artifact encoding: raster (or an existing base64 image) → PNG/JPEG bytes
//! → base64 text.
//!
//! ## Accepted inputs
//!
//! | Source | Accepted | Rejected |
//! |--------|----------|----------|
//! | [`ArtifactSource::Raster`] | 8-bit L, LA, RGB, RGBA | 16-bit, float |
//! | [`ArtifactSource::Base64`] | bare base64 or `data:image/*;base64,` URI of a decodable image | anything else |
//!
//! Every accepted input is normalised to 8-bit RGB before encoding: alpha is
//! dropped, grey is expanded. Rejected inputs fail with [`FillError::Encode`]
//! instead of being coerced.
//!
//! ## Settings
//!
//! PNG uses the `image` crate's default compression. JPEG uses the quality
//! carried by [`ArtifactFormat::Jpeg`]. Base64 is the standard alphabet with
//! padding, so identical bytes always produce identical text.

use crate::config::ArtifactFormat;
use crate::error::FillError;
use crate::output::RenderArtifact;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbImage};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Cursor;
use tracing::debug;

/// Shapes [`normalize_color`] accepts, for error messages.
pub const ACCEPTED_SHAPES: &str = "8-bit L, LA, RGB or RGBA raster";

static RE_DATA_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^data:(image/[A-Za-z0-9.+-]+);base64,(.*)$").unwrap());

/// What the encoder is given.
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    /// A raster straight from a renderer.
    Raster(DynamicImage),
    /// An image already serialised as base64 (optionally a data URI) that
    /// must be converted to the configured artifact format.
    Base64(String),
}

impl From<RgbImage> for ArtifactSource {
    fn from(img: RgbImage) -> Self {
        ArtifactSource::Raster(DynamicImage::ImageRgb8(img))
    }
}

/// Split a `data:image/<fmt>;base64,<payload>` URI into MIME type and payload.
pub fn parse_data_uri(uri: &str) -> Option<(&str, &str)> {
    let caps = RE_DATA_URI.captures(uri.trim())?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

/// Normalise an 8-bit raster to RGB, rejecting every other sample type.
pub fn normalize_color(img: &DynamicImage) -> Result<RgbImage, FillError> {
    match img {
        DynamicImage::ImageRgb8(rgb) => Ok(rgb.clone()),
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgba8(_) => Ok(img.to_rgb8()),
        other => Err(FillError::Encode {
            detail: format!(
                "unsupported raster type {:?}; expected an {}",
                other.color(),
                ACCEPTED_SHAPES
            ),
        }),
    }
}

/// Encode an RGB raster in `format` and wrap it as a [`RenderArtifact`].
pub fn encode_raster(rgb: &RgbImage, format: ArtifactFormat) -> Result<RenderArtifact, FillError> {
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(FillError::Encode {
            detail: "raster has zero area".into(),
        });
    }

    let mut buf = Vec::new();
    match format {
        ArtifactFormat::Png => rgb
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| FillError::Encode {
                detail: format!("PNG encoding failed: {e}"),
            })?,
        ArtifactFormat::Jpeg { quality } => JpegEncoder::new_with_quality(&mut buf, quality)
            .encode_image(rgb)
            .map_err(|e| FillError::Encode {
                detail: format!("JPEG encoding failed: {e}"),
            })?,
    }

    let base64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} artifact → {} bytes {}, {} chars base64",
        rgb.width(),
        rgb.height(),
        buf.len(),
        format.mime_type(),
        base64.len()
    );

    Ok(RenderArtifact {
        bytes: buf,
        mime_type: format.mime_type(),
        base64,
    })
}

/// Decode a base64 image (bare or data URI) and re-encode it in `format`.
pub fn reencode_base64(payload: &str, format: ArtifactFormat) -> Result<RenderArtifact, FillError> {
    let body = parse_data_uri(payload).map_or(payload, |(_, body)| body);
    let cleaned: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let bytes = STANDARD.decode(cleaned).map_err(|e| FillError::Encode {
        detail: format!("payload is not valid base64: {e}"),
    })?;
    let img = image::load_from_memory(&bytes).map_err(|e| FillError::Encode {
        detail: format!("base64 payload is not a decodable image: {e}"),
    })?;

    encode_raster(&normalize_color(&img)?, format)
}

/// Encode any [`ArtifactSource`].
pub fn encode_artifact(
    source: &ArtifactSource,
    format: ArtifactFormat,
) -> Result<RenderArtifact, FillError> {
    match source {
        ArtifactSource::Raster(img) => encode_raster(&normalize_color(img)?, format),
        ArtifactSource::Base64(payload) => reencode_base64(payload, format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgb, Rgba, RgbaImage};

    fn red(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([200, 10, 10]))
    }

    #[test]
    fn png_artifact_decodes_as_png() {
        let art = encode_raster(&red(12, 8), ArtifactFormat::Png).unwrap();
        assert_eq!(art.mime_type, "image/png");
        let bytes = STANDARD.decode(&art.base64).unwrap();
        assert_eq!(bytes, art.bytes);
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
        let back = image::load_from_memory(&bytes).unwrap();
        assert_eq!((back.width(), back.height()), (12, 8));
    }

    #[test]
    fn jpeg_artifact_decodes_as_jpeg() {
        let art = encode_raster(&red(16, 16), ArtifactFormat::Jpeg { quality: 85 }).unwrap();
        assert_eq!(art.mime_type, "image/jpeg");
        assert!(art.data_uri().starts_with("data:image/jpeg;base64,"));
        let bytes = STANDARD.decode(&art.base64).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = encode_raster(&red(9, 9), ArtifactFormat::Png).unwrap();
        let b = encode_raster(&red(9, 9), ArtifactFormat::Png).unwrap();
        assert_eq!(a.base64, b.base64);
    }

    #[test]
    fn alpha_is_dropped() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 0])));
        let rgb = normalize_color(&rgba).unwrap();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([1, 2, 3]));
    }

    #[test]
    fn grey_is_expanded() {
        let grey = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(1, 1, Luma([77])));
        assert_eq!(*normalize_color(&grey).unwrap().get_pixel(0, 0), Rgb([77, 77, 77]));
    }

    #[test]
    fn sixteen_bit_rejected_with_accepted_shapes() {
        let deep: ImageBuffer<Rgb<u16>, Vec<u16>> = ImageBuffer::new(2, 2);
        let err = normalize_color(&DynamicImage::ImageRgb16(deep)).unwrap_err();
        assert!(matches!(err, FillError::Encode { .. }));
        assert!(err.to_string().contains(ACCEPTED_SHAPES), "got: {err}");
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn data_uri_is_reencoded() {
        let png = encode_raster(&red(5, 5), ArtifactFormat::Png).unwrap();
        let source = ArtifactSource::Base64(png.data_uri());
        let jpeg = encode_artifact(&source, ArtifactFormat::Jpeg { quality: 90 }).unwrap();
        assert_eq!(jpeg.mime_type, "image/jpeg");
        assert_eq!(
            image::guess_format(&jpeg.bytes).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn bare_base64_with_line_breaks_accepted() {
        let png = encode_raster(&red(3, 3), ArtifactFormat::Png).unwrap();
        let wrapped: String = png
            .base64
            .as_bytes()
            .chunks(10)
            .map(|c| format!("{}\n", String::from_utf8_lossy(c)))
            .collect();
        assert!(reencode_base64(&wrapped, ArtifactFormat::Png).is_ok());
    }

    #[test]
    fn garbage_base64_rejected() {
        let err = reencode_base64("!!!not base64!!!", ArtifactFormat::Png).unwrap_err();
        assert!(matches!(err, FillError::Encode { .. }));

        let not_image = STANDARD.encode(b"plain text");
        let err = reencode_base64(&not_image, ArtifactFormat::Png).unwrap_err();
        assert!(err.to_string().contains("not a decodable image"));
    }

    #[test]
    fn parse_data_uri_parts() {
        assert_eq!(
            parse_data_uri("data:image/webp;base64,AAAA"),
            Some(("image/webp", "AAAA"))
        );
        assert_eq!(parse_data_uri("data:text/plain;base64,AAAA"), None);
        assert_eq!(parse_data_uri("AAAA"), None);
    }
}
