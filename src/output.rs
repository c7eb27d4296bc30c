//! Result types produced by the estimate pipeline.
//!
//! [`CalculationRecord`] is the only thing handed to a transport layer. Its
//! serialised field names (`3d_volume`, `3d_image`) and two-decimal rounding
//! are the wire contract existing clients read.

use serde::{Deserialize, Serialize, Serializer};

/// Fill level of the container and the volume it implies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FillResult {
    /// Share of pixels classified as filled, in `[0, 100]`.
    pub fill_percentage: f64,
    /// `fill_percentage / 100 × container_volume`.
    pub filled_volume: f64,
}

impl FillResult {
    /// Scale a fill percentage by the user-supplied container volume.
    ///
    /// The percentage is clamped to `[0, 100]`; the volume is assumed to
    /// have been validated as positive by the caller.
    pub fn new(fill_percentage: f64, container_volume: f64) -> Self {
        let fill_percentage = fill_percentage.clamp(0.0, 100.0);
        Self {
            fill_percentage,
            filled_volume: fill_percentage / 100.0 * container_volume,
        }
    }
}

/// An encoded visualization image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderArtifact {
    /// Encoded image bytes (PNG or JPEG).
    pub bytes: Vec<u8>,
    /// Declared MIME type, e.g. `image/png`.
    pub mime_type: &'static str,
    /// Standard base64 of `bytes`.
    pub base64: String,
}

impl RenderArtifact {
    /// `data:<mime>;base64,<payload>`
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

/// The aggregate response for one request.
///
/// Constructed once by the orchestrator and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRecord {
    #[serde(serialize_with = "two_decimals")]
    pub fill_percentage: f64,

    #[serde(serialize_with = "two_decimals")]
    pub filled_volume: f64,

    /// Bounding volume of the point set.
    #[serde(rename = "3d_volume", serialize_with = "two_decimals")]
    pub volume_3d: f64,

    /// Visualization as a data URI.
    #[serde(rename = "3d_image")]
    pub image_3d: String,

    /// Wall-clock seconds spent in the pipeline.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "two_decimals_opt"
    )]
    pub processing_time: Option<f64>,
}

/// Round half away from zero to two decimals.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn two_decimals<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(round2(*v))
}

fn two_decimals_opt<S: Serializer>(v: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(v) => s.serialize_f64(round2(*v)),
        None => s.serialize_none(),
    }
}
