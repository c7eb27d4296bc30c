//! Configuration types for container fill estimation.
//!
//! All pipeline behaviour is controlled through [`EstimatorConfig`], built
//! via its [`EstimatorConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share a config across concurrent requests, log it at the
//! start of a run, and diff two deployments to understand why their
//! fill percentages differ.
//!
//! # Thresholding policy
//! [`ThresholdPolicy`] materially changes `fill_percentage` for the same
//! photograph. It is a deployment setting, never detected at runtime, and
//! is logged with every run.

use crate::error::FillError;
use crate::observer::PipelineObserver;
use crate::pipeline::points::PointSource;
use crate::pipeline::render::{OffscreenContext, PointRenderer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for a fill estimate.
///
/// Built via [`EstimatorConfig::builder()`] or using
/// [`EstimatorConfig::default()`].
///
/// # Example
/// ```rust
/// use container_fill::{EstimatorConfig, ThresholdPolicy};
///
/// let config = EstimatorConfig::builder()
///     .threshold(ThresholdPolicy::OtsuInverted)
///     .point_count(500)
///     .seed(7)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct EstimatorConfig {
    /// Binarisation policy. Default: `Fixed { level: 127 }`.
    pub threshold: ThresholdPolicy,

    /// Gaussian smoothing sigma applied before thresholding. Default: 1.1.
    ///
    /// 1.1 is the sigma implied by a 5×5 kernel. It suppresses sensor noise
    /// so isolated speckles do not flip pixels across the threshold. `0.0`
    /// disables smoothing.
    pub blur_sigma: f32,

    /// Number of synthetic points generated per request. Default: 1000.
    pub point_count: usize,

    /// Seed for the synthetic point cloud. `None` draws from OS entropy.
    pub seed: Option<u64>,

    /// Width of the rendered visualization in pixels. Default: 640.
    pub render_width: u32,

    /// Height of the rendered visualization in pixels. Default: 480.
    pub render_height: u32,

    /// Per-renderer time budget in seconds. Default: 10.
    ///
    /// Expiry of the primary renderer triggers the fallback renderer.
    pub render_timeout_secs: u64,

    /// Encoding of the visualization artifact. Default: PNG.
    pub artifact_format: ArtifactFormat,

    /// Largest accepted upload in bytes. Default: 20 MiB.
    pub max_upload_bytes: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Report `processing_time` in the result. Default: true.
    pub include_processing_time: bool,

    /// Pre-constructed point source. `None` uses the synthetic generator.
    pub point_source: Option<Arc<dyn PointSource>>,

    /// Pre-constructed primary renderer. `None` uses the perspective renderer.
    pub primary_renderer: Option<Arc<dyn PointRenderer>>,

    /// Pre-constructed fallback renderer. `None` uses the scatter renderer.
    pub fallback_renderer: Option<Arc<dyn PointRenderer>>,

    /// Optional observer for real-time stage events.
    pub observer: Option<Arc<dyn PipelineObserver>>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            threshold: ThresholdPolicy::default(),
            blur_sigma: 1.1,
            point_count: 1000,
            seed: None,
            render_width: 640,
            render_height: 480,
            render_timeout_secs: 10,
            artifact_format: ArtifactFormat::default(),
            max_upload_bytes: 20 * 1024 * 1024,
            download_timeout_secs: 120,
            include_processing_time: true,
            point_source: None,
            primary_renderer: None,
            fallback_renderer: None,
            observer: None,
        }
    }
}

impl fmt::Debug for EstimatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EstimatorConfig")
            .field("threshold", &self.threshold)
            .field("blur_sigma", &self.blur_sigma)
            .field("point_count", &self.point_count)
            .field("seed", &self.seed)
            .field("render_width", &self.render_width)
            .field("render_height", &self.render_height)
            .field("render_timeout_secs", &self.render_timeout_secs)
            .field("artifact_format", &self.artifact_format)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field(
                "point_source",
                &self.point_source.as_ref().map(|s| s.name()),
            )
            .field(
                "primary_renderer",
                &self.primary_renderer.as_ref().map(|r| r.name()),
            )
            .field(
                "fallback_renderer",
                &self.fallback_renderer.as_ref().map(|r| r.name()),
            )
            .field(
                "observer",
                &self.observer.as_ref().map(|_| "<dyn PipelineObserver>"),
            )
            .finish()
    }
}

impl EstimatorConfig {
    /// Create a new builder for `EstimatorConfig`.
    pub fn builder() -> EstimatorConfigBuilder {
        EstimatorConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`EstimatorConfig`].
#[derive(Debug)]
pub struct EstimatorConfigBuilder {
    config: EstimatorConfig,
}

impl EstimatorConfigBuilder {
    pub fn threshold(mut self, policy: ThresholdPolicy) -> Self {
        self.config.threshold = policy;
        self
    }

    pub fn blur_sigma(mut self, sigma: f32) -> Self {
        self.config.blur_sigma = sigma;
        self
    }

    pub fn point_count(mut self, n: usize) -> Self {
        self.config.point_count = n;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn render_size(mut self, width: u32, height: u32) -> Self {
        self.config.render_width = width;
        self.config.render_height = height;
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = secs;
        self
    }

    pub fn artifact_format(mut self, format: ArtifactFormat) -> Self {
        self.config.artifact_format = format;
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn include_processing_time(mut self, v: bool) -> Self {
        self.config.include_processing_time = v;
        self
    }

    pub fn point_source(mut self, source: Arc<dyn PointSource>) -> Self {
        self.config.point_source = Some(source);
        self
    }

    pub fn primary_renderer(mut self, renderer: Arc<dyn PointRenderer>) -> Self {
        self.config.primary_renderer = Some(renderer);
        self
    }

    pub fn fallback_renderer(mut self, renderer: Arc<dyn PointRenderer>) -> Self {
        self.config.fallback_renderer = Some(renderer);
        self
    }

    /// Attach an observer that receives stage events as the pipeline runs.
    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EstimatorConfig, FillError> {
        let c = &self.config;
        if !c.blur_sigma.is_finite() || c.blur_sigma < 0.0 {
            return Err(FillError::InvalidConfig(format!(
                "Blur sigma must be a finite value ≥ 0, got {}",
                c.blur_sigma
            )));
        }
        if c.render_width == 0 || c.render_height == 0 {
            return Err(FillError::InvalidConfig(format!(
                "Render size must be non-zero, got {}x{}",
                c.render_width, c.render_height
            )));
        }
        let max = OffscreenContext::MAX_DIMENSION;
        if c.render_width > max || c.render_height > max {
            return Err(FillError::InvalidConfig(format!(
                "Render size must be at most {max}x{max}, got {}x{}",
                c.render_width, c.render_height
            )));
        }
        if c.render_timeout_secs == 0 {
            return Err(FillError::InvalidConfig(
                "Render timeout must be ≥ 1 second".into(),
            ));
        }
        if let ArtifactFormat::Jpeg { quality } = c.artifact_format {
            if !(1..=100).contains(&quality) {
                return Err(FillError::InvalidConfig(format!(
                    "JPEG quality must be 1–100, got {}",
                    quality
                )));
            }
        }
        if c.max_upload_bytes == 0 {
            return Err(FillError::InvalidConfig(
                "Upload limit must be ≥ 1 byte".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How a smoothed luminance image is split into "filled" and "empty".
///
/// | Policy | Level | Filled samples |
/// |--------|-------|----------------|
/// | `Fixed` | configured | strictly above the level (bright = filled) |
/// | `OtsuInverted` | Otsu's histogram split | at or below the level (dark = filled) |
///
/// The two policies disagree on polarity as well as on the level, so the
/// same photograph can read 30 % under one and 70 % under the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdPolicy {
    /// Fixed level, non-inverted binary. (default, level 127)
    Fixed { level: u8 },
    /// Automatic Otsu level, inverted binary.
    OtsuInverted,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        ThresholdPolicy::Fixed { level: 127 }
    }
}

impl fmt::Display for ThresholdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdPolicy::Fixed { level } => write!(f, "fixed({level})"),
            ThresholdPolicy::OtsuInverted => f.write_str("otsu-inverted"),
        }
    }
}

/// Image format of the encoded visualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ArtifactFormat {
    /// Lossless PNG, default compression. (default)
    #[default]
    Png,
    /// Baseline JPEG at the given quality (1–100).
    Jpeg { quality: u8 },
}

impl ArtifactFormat {
    /// MIME type declared for the artifact.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ArtifactFormat::Png => "image/png",
            ArtifactFormat::Jpeg { .. } => "image/jpeg",
        }
    }
}
