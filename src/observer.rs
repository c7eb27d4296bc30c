//! Observer trait for per-stage pipeline events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::EstimatorConfigBuilder::observer`] to receive events as
//! the pipeline moves through its stages.
//!
//! # Why an observer instead of a logger?
//!
//! The library never installs a logging backend. Callers that want metrics,
//! a progress bar or an audit record implement this trait and forward the
//! events wherever their host application needs them. The trait is
//! `Send + Sync` because independent requests may share one observer while
//! running concurrently.
//!
//! # Example
//!
//! ```rust
//! use container_fill::{EstimatorConfig, PipelineObserver, PipelineStage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FallbackCounter {
//!     fallbacks: AtomicUsize,
//! }
//!
//! impl PipelineObserver for FallbackCounter {
//!     fn on_render_fallback(&self, failed_renderer: &str, reason: &str) {
//!         self.fallbacks.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{failed_renderer} failed: {reason}");
//!     }
//! }
//!
//! let counter = Arc::new(FallbackCounter { fallbacks: AtomicUsize::new(0) });
//!
//! let config = EstimatorConfig::builder()
//!     .observer(counter as Arc<dyn PipelineObserver>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::FillError;
use crate::output::CalculationRecord;
use std::fmt;
use std::sync::Arc;

/// A named step of the estimate pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Validate,
    Decode,
    Fill,
    PointCloud,
    Volume,
    Render,
    Encode,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::Validate => "validate",
            PipelineStage::Decode => "decode",
            PipelineStage::Fill => "fill",
            PipelineStage::PointCloud => "point-cloud",
            PipelineStage::Volume => "volume",
            PipelineStage::Render => "render",
            PipelineStage::Encode => "encode",
        };
        f.write_str(s)
    }
}

/// Called by the pipeline as it processes a request.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait PipelineObserver: Send + Sync {
    /// Called once per request before validation.
    fn on_pipeline_start(&self) {}

    /// Called just before a stage begins.
    fn on_stage_start(&self, stage: PipelineStage) {
        let _ = stage;
    }

    /// Called when a stage finishes successfully.
    ///
    /// # Arguments
    /// * `stage`      — the stage that finished
    /// * `elapsed_ms` — wall-clock time spent in the stage
    fn on_stage_complete(&self, stage: PipelineStage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called when the primary renderer failed and the fallback takes over.
    fn on_render_fallback(&self, failed_renderer: &str, reason: &str) {
        let _ = (failed_renderer, reason);
    }

    /// Called once when a record has been assembled.
    fn on_pipeline_complete(&self, record: &CalculationRecord) {
        let _ = record;
    }

    /// Called once when the request fails, with the categorised error.
    fn on_pipeline_error(&self, stage: PipelineStage, error: &FillError) {
        let _ = (stage, error);
    }
}

/// A no-op implementation for callers that don't need events.
///
/// This is the default when no observer is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::EstimatorConfig`].
pub type SharedObserver = Arc<dyn PipelineObserver>;
