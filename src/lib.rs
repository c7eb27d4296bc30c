//! # container-fill
//!
//! Estimate how full a container is from a single photograph.
//!
//! ## What it does
//!
//! The photograph is segmented into "filled" and "empty" pixels, the filled
//! share is scaled by the caller's container volume, and a 3D visualization
//! of a point set is rendered and returned as a data URI alongside the
//! numbers.
//!
//! The point set is synthetic: one photograph carries no depth. It exists
//! to give the response a bounding volume and a picture. Swap in real depth
//! data through [`PointSource`]; [`PointCloudFileSource`] does exactly that
//! for ASCII PCD/XYZ scans.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload bytes + container volume
//!  │
//!  ├─ 1. Validate  volume > 0, upload present and within the size limit
//!  ├─ 2. Decode    sniff JPEG/PNG/WEBP, decode (spawn_blocking)
//!  ├─ 3. Fill      luminance → Gaussian → threshold → fill %
//!  ├─ 4. Points    synthetic cloud (or a loaded scan)
//!  ├─ 5. Volume    axis-aligned bounding box; zero aborts the run
//!  ├─ 6. Render    perspective renderer, scatter fallback, both timed out
//!  ├─ 7. Encode    PNG/JPEG → base64 data URI
//!  └─ 8. Record    CalculationRecord (two-decimal JSON)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use container_fill::{estimate_from_input, EstimatorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EstimatorConfig::default();
//!     let record = estimate_from_input("bin.jpg", 120.0, &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&record)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fillcalc` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! container-fill = { version = "0.1", default-features = false }
//! ```
//!
//! ## Thresholding
//!
//! The default [`ThresholdPolicy::Fixed`] at level 127 counts bright pixels
//! as filled. [`ThresholdPolicy::OtsuInverted`] picks the level from the
//! histogram and counts dark pixels as filled. The two can disagree by tens
//! of percentage points on the same photograph; pick one per deployment.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod estimate;
pub mod observer;
pub mod output;
pub mod pipeline;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ArtifactFormat, EstimatorConfig, EstimatorConfigBuilder, ThresholdPolicy};
pub use error::{ErrorKind, ErrorResponse, FillError, RenderFailure};
pub use estimate::{
    estimate, estimate_from_input, estimate_sync, estimate_to_file, measure_point_cloud,
    validate_container_volume,
};
pub use observer::{NoopObserver, PipelineObserver, PipelineStage, SharedObserver};
pub use output::{CalculationRecord, FillResult, RenderArtifact};
pub use pipeline::input::ImageUpload;
pub use pipeline::points::{PointCloudFileSource, PointSet, PointSource, SyntheticPointSource};
pub use pipeline::render::{
    PerspectiveRenderer, PointRenderer, RenderChain, RenderOutcome, RenderProvenance, RenderState,
};
pub use pipeline::scatter::ScatterRenderer;
pub use pipeline::volume::BoundingVolume;
