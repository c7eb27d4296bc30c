//! Estimate entry points: the pipeline orchestrator.
//!
//! [`estimate`] runs one request end to end and either returns a complete
//! [`CalculationRecord`] or a categorised [`FillError`]. Any stage failure
//! short-circuits the stages after it.
//!
//! ## Why validate the volume first?
//!
//! A non-positive container volume makes the result meaningless however good
//! the image is. Checking it before touching the upload means a bad form
//! field is reported as such, not masked by a decode error, and no CPU is
//! spent decoding a photograph whose answer would be discarded.
//!
//! ## Blocking work
//!
//! Decoding, thresholding, point generation and encoding are CPU-bound and
//! run on `spawn_blocking`. A panic inside one of them comes back as a
//! `JoinError` and is converted to [`FillError::Internal`], so no raw fault
//! reaches the caller.

use crate::config::EstimatorConfig;
use crate::error::FillError;
use crate::observer::{NoopObserver, PipelineObserver, PipelineStage};
use crate::output::{CalculationRecord, FillResult};
use crate::pipeline::decode::{self, format_name};
use crate::pipeline::encode::{self, ArtifactSource};
use crate::pipeline::fill;
use crate::pipeline::input::{self, ImageUpload};
use crate::pipeline::points::{PointCloudFileSource, PointSource, SyntheticPointSource};
use crate::pipeline::render::{PerspectiveRenderer, PointRenderer, RenderChain};
use crate::pipeline::scatter::ScatterRenderer;
use crate::pipeline::volume::BoundingVolume;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Estimate the fill level of the container in `upload`.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `upload` — Image bytes as received from the client
/// * `container_volume` — Total volume of the container; must be > 0
/// * `config` — Estimator configuration
///
/// # Errors
/// Every failure is a [`FillError`]; use [`FillError::status_code`] and
/// [`crate::ErrorResponse::from`] to answer the client.
pub async fn estimate(
    upload: ImageUpload,
    container_volume: f64,
    config: &EstimatorConfig,
) -> Result<CalculationRecord, FillError> {
    let observer: Arc<dyn PipelineObserver> = config
        .observer
        .clone()
        .unwrap_or_else(|| Arc::new(NoopObserver));
    observer.on_pipeline_start();

    let mut tracker = StageTracker::new(observer.as_ref());
    let result = run(upload, container_volume, config, &observer, &mut tracker).await;

    match &result {
        Ok(record) => observer.on_pipeline_complete(record),
        Err(e) => {
            if e.kind().is_client_error() {
                warn!("Estimate rejected at {} stage: {}", tracker.current, e);
            } else {
                error!("Estimate failed at {} stage: {}", tracker.current, e);
            }
            observer.on_pipeline_error(tracker.current, e);
        }
    }
    result
}

async fn run(
    upload: ImageUpload,
    container_volume: f64,
    config: &EstimatorConfig,
    observer: &Arc<dyn PipelineObserver>,
    tracker: &mut StageTracker<'_>,
) -> Result<CalculationRecord, FillError> {
    let total_start = Instant::now();

    // ── Step 1: Validate request fields ──────────────────────────────────
    tracker.begin(PipelineStage::Validate);
    validate_container_volume(container_volume)?;
    upload.validate(config.max_upload_bytes)?;
    info!(
        "Estimating fill: {} bytes, container volume {}, threshold {}",
        upload.bytes.len(),
        container_volume,
        config.threshold
    );
    tracker.end();

    // ── Step 2: Sniff + decode ───────────────────────────────────────────
    tracker.begin(PipelineStage::Decode);
    let decoded = blocking(PipelineStage::Decode, move || decode::decode_upload(&upload)).await?;
    debug!(
        "Decoded {} upload: {}x{}",
        format_name(decoded.format),
        decoded.raster.width(),
        decoded.raster.height()
    );
    let raster = Arc::new(decoded.raster);
    tracker.end();

    // ── Step 3: Fill percentage ──────────────────────────────────────────
    tracker.begin(PipelineStage::Fill);
    let (policy, sigma) = (config.threshold, config.blur_sigma);
    let img = Arc::clone(&raster);
    let measurement = blocking(PipelineStage::Fill, move || {
        Ok(fill::estimate_fill(&img, policy, sigma))
    })
    .await?;
    let fill_result = FillResult::new(measurement.fill_percentage, container_volume);
    info!(
        "Fill {:.2}% ({}/{} px, level {}) → {:.2} of {}",
        fill_result.fill_percentage,
        measurement.filled_pixels,
        measurement.total_pixels,
        measurement.threshold,
        fill_result.filled_volume,
        container_volume
    );
    tracker.end();

    // ── Step 4: Point set ────────────────────────────────────────────────
    tracker.begin(PipelineStage::PointCloud);
    let source = resolve_point_source(config);
    let source_name = source.name();
    let img = Arc::clone(&raster);
    let points = blocking(PipelineStage::PointCloud, move || source.build(&img)).await?;
    let points = Arc::new(points);
    debug!("Point source '{}' produced {} points", source_name, points.len());
    tracker.end();

    // ── Step 5: Bounding volume ──────────────────────────────────────────
    tracker.begin(PipelineStage::Volume);
    let bounds = BoundingVolume::from_points(&points);
    let volume_3d = bounds.volume();
    if volume_3d <= 0.0 {
        return Err(FillError::EmptyPointSet {
            points: points.len(),
        });
    }
    tracker.end();

    // ── Step 6: Render (primary → fallback) ──────────────────────────────
    tracker.begin(PipelineStage::Render);
    let (primary, fallback) = resolve_renderers(config);
    let chain = RenderChain::new(
        primary,
        fallback,
        Duration::from_secs(config.render_timeout_secs),
    )
    .with_observer(Arc::clone(observer));
    let outcome = chain.render(points).await?;
    info!(
        "Visualization from {:?} renderer '{}'",
        outcome.provenance, outcome.renderer
    );
    tracker.end();

    // ── Step 7: Encode artifact ──────────────────────────────────────────
    tracker.begin(PipelineStage::Encode);
    let format = config.artifact_format;
    let source = ArtifactSource::from(outcome.image);
    let artifact = blocking(PipelineStage::Encode, move || {
        encode::encode_artifact(&source, format)
    })
    .await?;
    tracker.end();

    // ── Step 8: Assemble record ──────────────────────────────────────────
    let processing_time = config
        .include_processing_time
        .then(|| total_start.elapsed().as_secs_f64());

    let record = CalculationRecord {
        fill_percentage: fill_result.fill_percentage,
        filled_volume: fill_result.filled_volume,
        volume_3d,
        image_3d: artifact.data_uri(),
        processing_time,
    };

    info!(
        "Estimate complete: {:.2}% fill, 3D volume {:.4}, {}ms",
        record.fill_percentage,
        record.volume_3d,
        total_start.elapsed().as_millis()
    );
    Ok(record)
}

/// Resolve a file path or URL, then run [`estimate`].
///
/// The container volume is checked before the input is read or downloaded.
pub async fn estimate_from_input(
    input: impl AsRef<str>,
    container_volume: f64,
    config: &EstimatorConfig,
) -> Result<CalculationRecord, FillError> {
    validate_container_volume(container_volume)?;
    let upload = input::resolve_input(input.as_ref(), config.download_timeout_secs).await?;
    estimate(upload, container_volume, config).await
}

/// Run [`estimate_from_input`] and write the record as pretty JSON.
///
/// Uses atomic write (temp file in the target directory + persist) so
/// readers never observe a partial file.
pub async fn estimate_to_file(
    input: impl AsRef<str>,
    container_volume: f64,
    output_path: impl AsRef<Path>,
    config: &EstimatorConfig,
) -> Result<CalculationRecord, FillError> {
    let record = estimate_from_input(input, container_volume, config).await?;
    let path = output_path.as_ref().to_path_buf();
    let to_write = record.clone();
    tokio::task::spawn_blocking(move || write_record_atomic(&path, &to_write))
        .await
        .map_err(|e| FillError::Internal(format!("output write task failed: {e}")))??;
    Ok(record)
}

/// Synchronous wrapper around [`estimate`].
///
/// Creates a temporary tokio runtime internally.
pub fn estimate_sync(
    upload: ImageUpload,
    container_volume: f64,
    config: &EstimatorConfig,
) -> Result<CalculationRecord, FillError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FillError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(estimate(upload, container_volume, config))
}

/// Bounding volume of a point-cloud file, with no image involved.
///
/// Unlike [`estimate`], an empty or degenerate cloud is not an error here:
/// the zero volume is returned for the caller to judge.
pub fn measure_point_cloud(path: impl AsRef<Path>) -> Result<BoundingVolume, FillError> {
    let source = PointCloudFileSource::open(path)?;
    let bounds = BoundingVolume::from_points(source.points());
    info!(
        "{}: {} points, bounding volume {:.6}",
        source.path().display(),
        bounds.point_count,
        bounds.volume()
    );
    Ok(bounds)
}

/// Reject zero, negative and non-finite container volumes.
pub fn validate_container_volume(value: f64) -> Result<(), FillError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FillError::InvalidContainerVolume { value })
    }
}

/// Serialise `record` to `path` via a temp file in the same directory.
pub fn write_record_atomic(path: &Path, record: &CalculationRecord) -> Result<(), FillError> {
    let write_err = |source: std::io::Error| FillError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(write_err)?;

    let json = serde_json::to_vec_pretty(record)
        .map_err(|e| FillError::Internal(format!("record serialisation failed: {e}")))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(&json).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    debug!("Wrote {} bytes to {}", json.len(), path.display());
    Ok(())
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Current stage plus its start time, reported to the observer.
struct StageTracker<'a> {
    observer: &'a dyn PipelineObserver,
    current: PipelineStage,
    started: Instant,
}

impl<'a> StageTracker<'a> {
    fn new(observer: &'a dyn PipelineObserver) -> Self {
        Self {
            observer,
            current: PipelineStage::Validate,
            started: Instant::now(),
        }
    }

    fn begin(&mut self, stage: PipelineStage) {
        self.current = stage;
        self.started = Instant::now();
        self.observer.on_stage_start(stage);
    }

    fn end(&self) {
        self.observer
            .on_stage_complete(self.current, self.started.elapsed().as_millis() as u64);
    }
}

/// Run `f` on the blocking pool, converting a panic into `Internal`.
async fn blocking<T, F>(stage: PipelineStage, f: F) -> Result<T, FillError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, FillError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FillError::Internal(format!("{stage} task failed: {e}")))?
}

/// Configured point source, or the synthetic generator.
fn resolve_point_source(config: &EstimatorConfig) -> Arc<dyn PointSource> {
    match config.point_source {
        Some(ref source) => Arc::clone(source),
        None => Arc::new(SyntheticPointSource::new(config.point_count, config.seed)),
    }
}

/// Configured renderers, or perspective → scatter at the configured size.
fn resolve_renderers(
    config: &EstimatorConfig,
) -> (Arc<dyn PointRenderer>, Arc<dyn PointRenderer>) {
    let (w, h) = (config.render_width, config.render_height);
    let primary = config
        .primary_renderer
        .clone()
        .unwrap_or_else(|| Arc::new(PerspectiveRenderer::new(w, h)));
    let fallback = config
        .fallback_renderer
        .clone()
        .unwrap_or_else(|| Arc::new(ScatterRenderer::new(w, h)));
    (primary, fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderFailure;
    use crate::pipeline::points::PointSet;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn png_upload(img: DynamicImage) -> ImageUpload {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        ImageUpload::new(buf).with_declared_format("image/png")
    }

    fn grey_upload(value: u8) -> ImageUpload {
        png_upload(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            20,
            20,
            Luma([value]),
        )))
    }

    fn small_config() -> EstimatorConfig {
        EstimatorConfig::builder()
            .point_count(50)
            .seed(11)
            .render_size(64, 48)
            .build()
            .unwrap()
    }

    #[derive(Default)]
    struct RecordingObserver {
        completed: Mutex<Vec<PipelineStage>>,
        failed_at: Mutex<Option<PipelineStage>>,
        finished: AtomicUsize,
    }

    impl PipelineObserver for RecordingObserver {
        fn on_stage_complete(&self, stage: PipelineStage, _elapsed_ms: u64) {
            self.completed.lock().unwrap().push(stage);
        }

        fn on_pipeline_complete(&self, _record: &CalculationRecord) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }

        fn on_pipeline_error(&self, stage: PipelineStage, _error: &FillError) {
            *self.failed_at.lock().unwrap() = Some(stage);
        }
    }

    struct CountingRenderer(AtomicUsize);

    impl PointRenderer for CountingRenderer {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn render(&self, _points: &PointSet) -> Result<RgbImage, RenderFailure> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(RgbImage::new(4, 4))
        }
    }

    #[test]
    fn container_volume_validation() {
        assert!(validate_container_volume(0.5).is_ok());
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = validate_container_volume(bad).unwrap_err();
            assert_eq!(err.status_code(), 400, "{bad}");
        }
    }

    #[tokio::test]
    async fn volume_checked_before_image() {
        // Garbage bytes would be a decode error; the volume must win.
        let upload = ImageUpload::new(b"not an image".to_vec());
        let err = estimate(upload, -5.0, &small_config()).await.unwrap_err();
        assert!(matches!(err, FillError::InvalidContainerVolume { .. }));
    }

    #[tokio::test]
    async fn empty_upload_is_missing_image() {
        let err = estimate(ImageUpload::default(), 1.0, &small_config())
            .await
            .unwrap_err();
        assert!(matches!(err, FillError::MissingImage));
    }

    #[tokio::test]
    async fn oversized_upload_rejected() {
        let config = EstimatorConfig::builder().max_upload_bytes(16).build().unwrap();
        let err = estimate(grey_upload(0), 1.0, &config).await.unwrap_err();
        assert!(matches!(err, FillError::UploadTooLarge { limit: 16, .. }));
    }

    #[tokio::test]
    async fn observer_sees_every_stage_in_order() {
        let observer = Arc::new(RecordingObserver::default());
        let config = EstimatorConfig::builder()
            .point_count(30)
            .seed(2)
            .render_size(32, 32)
            .observer(observer.clone())
            .build()
            .unwrap();

        estimate(grey_upload(255), 4.0, &config).await.unwrap();

        assert_eq!(
            *observer.completed.lock().unwrap(),
            vec![
                PipelineStage::Validate,
                PipelineStage::Decode,
                PipelineStage::Fill,
                PipelineStage::PointCloud,
                PipelineStage::Volume,
                PipelineStage::Render,
                PipelineStage::Encode,
            ]
        );
        assert_eq!(observer.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_point_set_never_reaches_renderer() {
        let observer = Arc::new(RecordingObserver::default());
        let renderer = Arc::new(CountingRenderer(AtomicUsize::new(0)));
        let config = EstimatorConfig::builder()
            .point_count(0)
            .primary_renderer(renderer.clone())
            .fallback_renderer(renderer.clone())
            .observer(observer.clone())
            .build()
            .unwrap();

        let err = estimate(grey_upload(255), 1.0, &config).await.unwrap_err();
        assert!(matches!(err, FillError::EmptyPointSet { points: 0 }));
        assert_eq!(err.status_code(), 500);
        assert_eq!(renderer.0.load(Ordering::SeqCst), 0);
        assert_eq!(
            *observer.failed_at.lock().unwrap(),
            Some(PipelineStage::Volume)
        );
    }

    #[tokio::test]
    async fn degenerate_point_set_is_empty_data() {
        struct OnePoint;
        impl PointSource for OnePoint {
            fn name(&self) -> &'static str {
                "one-point"
            }
            fn build(&self, _image: &DynamicImage) -> Result<PointSet, FillError> {
                Ok(vec![[0.5, 0.5, 0.5]].into())
            }
        }

        let config = EstimatorConfig::builder()
            .point_source(Arc::new(OnePoint))
            .build()
            .unwrap();
        let err = estimate(grey_upload(0), 1.0, &config).await.unwrap_err();
        assert!(matches!(err, FillError::EmptyPointSet { points: 1 }));
    }

    #[tokio::test]
    async fn processing_time_can_be_omitted() {
        let config = EstimatorConfig::builder()
            .point_count(20)
            .seed(5)
            .render_size(16, 16)
            .include_processing_time(false)
            .build()
            .unwrap();
        let record = estimate(grey_upload(0), 2.0, &config).await.unwrap();
        assert_eq!(record.fill_percentage, 0.0);
        assert_eq!(record.filled_volume, 0.0);
        assert!(record.processing_time.is_none());
    }

    #[test]
    fn sync_wrapper_runs_pipeline() {
        let record = estimate_sync(grey_upload(255), 3.0, &small_config()).unwrap();
        assert_eq!(record.fill_percentage, 100.0);
        assert_eq!(record.filled_volume, 3.0);
        assert!(record.processing_time.is_some());
    }

    #[test]
    fn measure_point_cloud_reads_xyz() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.xyz");
        std::fs::write(&path, "0 0 0\n1 2 3\n").unwrap();
        let bounds = measure_point_cloud(&path).unwrap();
        assert_eq!(bounds.volume(), 6.0);
    }

    #[test]
    fn atomic_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/result.json");
        let record = CalculationRecord {
            fill_percentage: 12.346,
            filled_volume: 1.0,
            volume_3d: 0.5,
            image_3d: "data:image/png;base64,AA==".into(),
            processing_time: None,
        };
        write_record_atomic(&path, &record).unwrap();
        let v: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["fill_percentage"], 12.35);
    }
}
