//! Point-set rendering: a primary 3D renderer with a 2D fallback.
//!
//! ## State machine
//!
//! ```text
//! NotStarted ──▶ PrimaryAttempted ──▶ Succeeded
//!                       │
//!                       ▼
//!               FallbackAttempted ──▶ Succeeded | Failed
//! ```
//!
//! [`RenderChain`] drives the transitions and records them in
//! [`RenderOutcome::trace`]. Both renderers sit behind [`PointRenderer`], so
//! tests can swap either one for a stub that always fails, times out or
//! panics.
//!
//! ## Why spawn_blocking + timeout?
//!
//! Rasterising thousands of splats is CPU-bound and must not stall the Tokio
//! worker threads. Rendering is also the only stage whose latency depends on
//! a pluggable engine, so each attempt runs under a timeout; expiry counts as
//! a failure and hands over to the fallback. A timed-out blocking task cannot
//! be cancelled, it finishes in the background and its result is dropped.
//!
//! ## Offscreen context lifetime
//!
//! [`PerspectiveRenderer`] draws into an [`OffscreenContext`] created inside
//! the attempt and released by `Drop`, on success, on error and on unwind
//! alike. No context outlives the attempt that created it.

use crate::error::{FillError, RenderFailure};
use crate::observer::PipelineObserver;
use crate::pipeline::points::PointSet;
use crate::pipeline::volume::BoundingVolume;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Renders a point set to an RGB raster.
pub trait PointRenderer: Send + Sync {
    /// Short name used in logs and [`RenderFailure`]s.
    fn name(&self) -> &'static str;

    /// Render the set. Must not require a display surface.
    fn render(&self, points: &PointSet) -> Result<RgbImage, RenderFailure>;
}

/// States visited by [`RenderChain::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    NotStarted,
    PrimaryAttempted,
    FallbackAttempted,
    Succeeded,
    Failed,
}

/// Which renderer produced the retained raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderProvenance {
    Primary,
    Fallback,
}

/// A successful render and how it was reached.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub image: RgbImage,
    pub provenance: RenderProvenance,
    /// Name of the renderer that produced `image`.
    pub renderer: &'static str,
    /// Why the primary renderer failed, when the fallback was used.
    pub primary_failure: Option<RenderFailure>,
    pub trace: Vec<RenderState>,
}

/// Primary renderer, fallback renderer and the per-attempt time budget.
#[derive(Clone)]
pub struct RenderChain {
    primary: Arc<dyn PointRenderer>,
    fallback: Arc<dyn PointRenderer>,
    timeout: Duration,
    observer: Option<Arc<dyn PipelineObserver>>,
}

impl RenderChain {
    pub fn new(
        primary: Arc<dyn PointRenderer>,
        fallback: Arc<dyn PointRenderer>,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            timeout,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Render `points`, falling back once if the primary renderer fails.
    ///
    /// Exactly one raster is returned on success. When both attempts fail the
    /// two failures are returned as [`FillError::RenderFailed`].
    pub async fn render(&self, points: Arc<PointSet>) -> Result<RenderOutcome, FillError> {
        let mut trace = vec![RenderState::NotStarted];

        trace.push(RenderState::PrimaryAttempted);
        let primary_failure = match attempt(&self.primary, &points, self.timeout).await {
            Ok(image) => {
                trace.push(RenderState::Succeeded);
                info!(
                    "Rendered {} points with primary renderer '{}' ({}x{})",
                    points.len(),
                    self.primary.name(),
                    image.width(),
                    image.height()
                );
                return Ok(RenderOutcome {
                    image,
                    provenance: RenderProvenance::Primary,
                    renderer: self.primary.name(),
                    primary_failure: None,
                    trace,
                });
            }
            Err(failure) => failure,
        };

        warn!("Primary renderer failed, falling back: {}", primary_failure);
        if let Some(ref observer) = self.observer {
            observer.on_render_fallback(self.primary.name(), &primary_failure.to_string());
        }

        trace.push(RenderState::FallbackAttempted);
        match attempt(&self.fallback, &points, self.timeout).await {
            Ok(image) => {
                trace.push(RenderState::Succeeded);
                info!(
                    "Rendered {} points with fallback renderer '{}' ({}x{})",
                    points.len(),
                    self.fallback.name(),
                    image.width(),
                    image.height()
                );
                Ok(RenderOutcome {
                    image,
                    provenance: RenderProvenance::Fallback,
                    renderer: self.fallback.name(),
                    primary_failure: Some(primary_failure),
                    trace,
                })
            }
            Err(fallback_failure) => {
                trace.push(RenderState::Failed);
                debug!("Render trace: {:?}", trace);
                Err(FillError::RenderFailed {
                    primary: primary_failure,
                    fallback: fallback_failure,
                })
            }
        }
    }
}

/// One bounded attempt on the blocking pool.
async fn attempt(
    renderer: &Arc<dyn PointRenderer>,
    points: &Arc<PointSet>,
    timeout: Duration,
) -> Result<RgbImage, RenderFailure> {
    let name = renderer.name();
    let r = Arc::clone(renderer);
    let pts = Arc::clone(points);
    let task = tokio::task::spawn_blocking(move || r.render(&pts));

    let image = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(join_err)) if join_err.is_panic() => {
            return Err(RenderFailure::Panicked {
                renderer: name.to_string(),
                detail: panic_detail(join_err),
            });
        }
        Ok(Err(join_err)) => {
            return Err(RenderFailure::CaptureFailed {
                renderer: name.to_string(),
                detail: join_err.to_string(),
            });
        }
        Err(_) => {
            return Err(RenderFailure::TimedOut {
                renderer: name.to_string(),
                millis: timeout.as_millis() as u64,
            });
        }
    };

    if image.width() == 0 || image.height() == 0 {
        return Err(RenderFailure::EmptyFrame {
            renderer: name.to_string(),
        });
    }
    Ok(image)
}

fn panic_detail(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ── Offscreen context ─────────────────────────────────────────────────────

/// Colour + depth buffers for one render attempt.
pub struct OffscreenContext {
    color: RgbImage,
    depth: Vec<f32>,
    point_fragments: usize,
}

impl OffscreenContext {
    /// Largest surface edge we agree to allocate.
    pub const MAX_DIMENSION: u32 = 8192;

    /// Allocate buffers cleared to `background` and infinite depth.
    pub fn acquire(width: u32, height: u32, background: Rgb<u8>) -> Result<Self, String> {
        if width == 0 || height == 0 {
            return Err(format!("surface is {width}x{height}"));
        }
        if width > Self::MAX_DIMENSION || height > Self::MAX_DIMENSION {
            return Err(format!(
                "surface {width}x{height} exceeds {0}x{0}",
                Self::MAX_DIMENSION
            ));
        }
        debug!("Acquired offscreen context {}x{}", width, height);
        Ok(Self {
            color: RgbImage::from_pixel(width, height, background),
            depth: vec![f32::INFINITY; (width * height) as usize],
            point_fragments: 0,
        })
    }

    pub fn width(&self) -> u32 {
        self.color.width()
    }

    pub fn height(&self) -> u32 {
        self.color.height()
    }

    /// Depth-tested filled disc centred on `(x, y)`.
    pub fn splat(&mut self, x: f64, y: f64, depth: f32, radius: i32, color: Rgb<u8>) {
        let (cx, cy) = (x.round() as i64, y.round() as i64);
        let r2 = (radius * radius) as i64;
        for dy in -radius as i64..=radius as i64 {
            for dx in -radius as i64..=radius as i64 {
                if dx * dx + dy * dy > r2 {
                    continue;
                }
                let (px, py) = (cx + dx, cy + dy);
                if px < 0 || py < 0 || px >= self.width() as i64 || py >= self.height() as i64 {
                    continue;
                }
                let idx = py as usize * self.width() as usize + px as usize;
                if depth < self.depth[idx] {
                    self.depth[idx] = depth;
                    self.color.put_pixel(px as u32, py as u32, color);
                    self.point_fragments += 1;
                }
            }
        }
    }

    /// Unshaded line with no depth write, drawn behind later splats.
    pub fn line(&mut self, from: (f64, f64), to: (f64, f64), color: Rgb<u8>) {
        draw_line_segment_mut(
            &mut self.color,
            (from.0 as f32, from.1 as f32),
            (to.0 as f32, to.1 as f32),
            color,
        );
    }

    /// Copy out the frame, or `None` if no point fragment was written.
    pub fn capture(&self) -> Option<RgbImage> {
        (self.point_fragments > 0).then(|| self.color.clone())
    }
}

impl Drop for OffscreenContext {
    fn drop(&mut self) {
        debug!(
            "Released offscreen context {}x{}",
            self.color.width(),
            self.color.height()
        );
    }
}

// ── Primary renderer ──────────────────────────────────────────────────────

const BACKGROUND: Rgb<u8> = Rgb([24, 24, 28]);
const WIREFRAME: Rgb<u8> = Rgb([90, 90, 104]);
const NEAR_COLOR: [f64; 3] = [255.0, 96.0, 64.0];
const FAR_COLOR: [f64; 3] = [110.0, 30.0, 30.0];
/// Half the diagonal of the unit cube: the farthest a normalised point can
/// sit from the origin.
const HALF_DIAGONAL: f64 = 0.866_025_403_784_438_6;

/// Software perspective renderer with depth buffering.
///
/// Points are centred on their bounding box, scaled so the largest extent is
/// 1, rotated by `yaw`/`pitch` and projected through a pinhole camera
/// `camera_distance` units from the origin. Nearer points are brighter.
#[derive(Debug, Clone)]
pub struct PerspectiveRenderer {
    pub width: u32,
    pub height: u32,
    pub point_radius: i32,
    pub yaw: f64,
    pub pitch: f64,
    pub camera_distance: f64,
    pub draw_bounding_box: bool,
}

impl PerspectiveRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            point_radius: 2,
            yaw: 35f64.to_radians(),
            pitch: 25f64.to_radians(),
            camera_distance: 2.5,
            draw_bounding_box: true,
        }
    }

    fn focal_length(&self) -> f64 {
        self.width.min(self.height) as f64 * 0.9
    }

    /// Rotate a normalised point into camera space.
    fn to_camera(&self, p: [f64; 3]) -> [f64; 3] {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        let x1 = p[0] * cy - p[2] * sy;
        let z1 = p[0] * sy + p[2] * cy;
        let y2 = p[1] * cp - z1 * sp;
        let z2 = p[1] * sp + z1 * cp;
        [x1, y2, z2 + self.camera_distance]
    }

    /// Screen position and depth, or `None` behind the near plane.
    fn project(&self, p: [f64; 3]) -> Option<(f64, f64, f64)> {
        let [x, y, z] = self.to_camera(p);
        if !(z > 0.1) {
            return None;
        }
        let f = self.focal_length();
        Some((
            self.width as f64 / 2.0 + f * x / z,
            self.height as f64 / 2.0 - f * y / z,
            z,
        ))
    }

    fn shade(&self, depth: f64) -> Rgb<u8> {
        let near = self.camera_distance - HALF_DIAGONAL;
        let t = ((depth - near) / (2.0 * HALF_DIAGONAL)).clamp(0.0, 1.0);
        let mix = |i: usize| (NEAR_COLOR[i] + t * (FAR_COLOR[i] - NEAR_COLOR[i])).round() as u8;
        Rgb([mix(0), mix(1), mix(2)])
    }

    fn draw_box(
        &self,
        ctx: &mut OffscreenContext,
        bv: &BoundingVolume,
        normalize: &dyn Fn([f64; 3]) -> [f64; 3],
    ) {
        let corners: Vec<Option<(f64, f64, f64)>> = (0..8)
            .map(|i| {
                let pick = |axis: usize| {
                    if i & (1 << axis) == 0 {
                        bv.min[axis]
                    } else {
                        bv.max[axis]
                    }
                };
                self.project(normalize([pick(0), pick(1), pick(2)]))
            })
            .collect();

        for i in 0..8usize {
            for bit in [1usize, 2, 4] {
                let j = i | bit;
                if j == i {
                    continue;
                }
                if let (Some(a), Some(b)) = (corners[i], corners[j]) {
                    ctx.line((a.0, a.1), (b.0, b.1), WIREFRAME);
                }
            }
        }
    }
}

impl PointRenderer for PerspectiveRenderer {
    fn name(&self) -> &'static str {
        "perspective"
    }

    fn render(&self, points: &PointSet) -> Result<RgbImage, RenderFailure> {
        let mut ctx = OffscreenContext::acquire(self.width, self.height, BACKGROUND).map_err(
            |detail| RenderFailure::InitFailed {
                renderer: self.name().to_string(),
                detail,
            },
        )?;

        let bv = BoundingVolume::from_points(points);
        let center = bv.center();
        let extent = bv.max_extent();
        let scale = if extent > 0.0 { 1.0 / extent } else { 1.0 };
        let normalize = |p: [f64; 3]| {
            [
                (p[0] - center[0]) * scale,
                (p[1] - center[1]) * scale,
                (p[2] - center[2]) * scale,
            ]
        };

        if self.draw_bounding_box && !bv.is_empty() {
            self.draw_box(&mut ctx, &bv, &normalize);
        }

        for p in points.iter() {
            if let Some((x, y, depth)) = self.project(normalize(*p)) {
                if x.is_finite() && y.is_finite() {
                    ctx.splat(x, y, depth as f32, self.point_radius, self.shade(depth));
                }
            }
        }

        ctx.capture().ok_or_else(|| RenderFailure::EmptyFrame {
            renderer: self.name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::points::SyntheticPointSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingRenderer;

    impl PointRenderer for FailingRenderer {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn render(&self, _points: &PointSet) -> Result<RgbImage, RenderFailure> {
            Err(RenderFailure::InitFailed {
                renderer: self.name().into(),
                detail: "no GPU".into(),
            })
        }
    }

    struct PanickingRenderer;

    impl PointRenderer for PanickingRenderer {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn render(&self, _points: &PointSet) -> Result<RgbImage, RenderFailure> {
            panic!("driver crashed")
        }
    }

    struct SlowRenderer;

    impl PointRenderer for SlowRenderer {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn render(&self, _points: &PointSet) -> Result<RgbImage, RenderFailure> {
            std::thread::sleep(Duration::from_millis(400));
            Ok(RgbImage::new(4, 4))
        }
    }

    struct ZeroAreaRenderer;

    impl PointRenderer for ZeroAreaRenderer {
        fn name(&self) -> &'static str {
            "zero-area"
        }

        fn render(&self, _points: &PointSet) -> Result<RgbImage, RenderFailure> {
            Ok(RgbImage::new(0, 0))
        }
    }

    struct CountingRenderer {
        calls: AtomicUsize,
    }

    impl PointRenderer for CountingRenderer {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn render(&self, _points: &PointSet) -> Result<RgbImage, RenderFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])))
        }
    }

    fn cloud() -> Arc<PointSet> {
        Arc::new(SyntheticPointSource::new(200, Some(3)).generate())
    }

    fn chain(primary: Arc<dyn PointRenderer>, fallback: Arc<dyn PointRenderer>) -> RenderChain {
        RenderChain::new(primary, fallback, Duration::from_secs(5))
    }

    #[test]
    fn perspective_renders_synthetic_cloud() {
        let img = PerspectiveRenderer::new(160, 120)
            .render(&cloud())
            .expect("render should succeed");
        assert_eq!(img.dimensions(), (160, 120));
        assert!(img.pixels().any(|p| *p != BACKGROUND && *p != WIREFRAME));
    }

    #[test]
    fn perspective_empty_set_is_empty_frame() {
        let err = PerspectiveRenderer::new(64, 64)
            .render(&PointSet::default())
            .unwrap_err();
        assert!(matches!(err, RenderFailure::EmptyFrame { .. }));
    }

    #[test]
    fn perspective_zero_surface_is_init_failure() {
        let err = PerspectiveRenderer::new(0, 64).render(&cloud()).unwrap_err();
        assert!(matches!(err, RenderFailure::InitFailed { .. }));
    }

    #[test]
    fn perspective_single_point_is_visible() {
        let img = PerspectiveRenderer::new(32, 32)
            .render(&vec![[5.0, 5.0, 5.0]].into())
            .unwrap();
        // Degenerate set is centred on screen.
        assert_ne!(*img.get_pixel(16, 16), BACKGROUND);
    }

    #[test]
    fn nearer_points_are_brighter() {
        let r = PerspectiveRenderer::new(10, 10);
        let near = r.shade(r.camera_distance - HALF_DIAGONAL);
        let far = r.shade(r.camera_distance + HALF_DIAGONAL);
        assert!(near.0[0] > far.0[0]);
    }

    #[test]
    fn offscreen_context_rejects_oversized_surface() {
        let oversized = OffscreenContext::MAX_DIMENSION + 1;
        assert!(OffscreenContext::acquire(oversized, 1, BACKGROUND).is_err());
        let ctx = OffscreenContext::acquire(4, 4, BACKGROUND).unwrap();
        assert!(ctx.capture().is_none());
    }

    #[test]
    fn splat_respects_depth() {
        let mut ctx = OffscreenContext::acquire(5, 5, BACKGROUND).unwrap();
        ctx.splat(2.0, 2.0, 1.0, 0, Rgb([10, 10, 10]));
        ctx.splat(2.0, 2.0, 2.0, 0, Rgb([200, 200, 200]));
        let frame = ctx.capture().unwrap();
        assert_eq!(*frame.get_pixel(2, 2), Rgb([10, 10, 10]));
    }

    #[test]
    fn wireframe_line_is_clipped_and_leaves_depth_untouched() {
        let mut ctx = OffscreenContext::acquire(8, 8, BACKGROUND).unwrap();
        ctx.line((-4.0, 3.0), (20.0, 3.0), WIREFRAME);
        assert!((0..8).all(|x| *ctx.color.get_pixel(x, 3) == WIREFRAME));
        assert_eq!(*ctx.color.get_pixel(3, 0), BACKGROUND);
        // Lines alone do not make a frame.
        assert!(ctx.capture().is_none());
        ctx.splat(3.0, 3.0, 1.0, 0, Rgb([10, 10, 10]));
        assert_eq!(*ctx.capture().unwrap().get_pixel(3, 3), Rgb([10, 10, 10]));
    }

    #[test]
    fn chain_runs_on_current_thread_runtime() {
        let outcome = tokio_test::block_on(
            chain(Arc::new(FailingRenderer), Arc::new(PerspectiveRenderer::new(24, 24)))
                .render(cloud()),
        )
        .unwrap();
        assert_eq!(outcome.renderer, "perspective");
        assert_eq!(outcome.provenance, RenderProvenance::Fallback);
    }

    #[tokio::test]
    async fn primary_success_skips_fallback() {
        let fallback = Arc::new(CountingRenderer {
            calls: AtomicUsize::new(0),
        });
        let outcome = chain(Arc::new(PerspectiveRenderer::new(64, 48)), fallback.clone())
            .render(cloud())
            .await
            .unwrap();
        assert_eq!(outcome.provenance, RenderProvenance::Primary);
        assert_eq!(outcome.renderer, "perspective");
        assert_eq!(
            outcome.trace,
            vec![
                RenderState::NotStarted,
                RenderState::PrimaryAttempted,
                RenderState::Succeeded
            ]
        );
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_primary_uses_fallback() {
        let outcome = chain(
            Arc::new(FailingRenderer),
            Arc::new(CountingRenderer {
                calls: AtomicUsize::new(0),
            }),
        )
        .render(cloud())
        .await
        .unwrap();
        assert_eq!(outcome.provenance, RenderProvenance::Fallback);
        assert_eq!(outcome.image.dimensions(), (8, 8));
        assert!(matches!(
            outcome.primary_failure,
            Some(RenderFailure::InitFailed { .. })
        ));
        assert_eq!(
            outcome.trace,
            vec![
                RenderState::NotStarted,
                RenderState::PrimaryAttempted,
                RenderState::FallbackAttempted,
                RenderState::Succeeded
            ]
        );
    }

    #[tokio::test]
    async fn panicking_primary_uses_fallback() {
        let outcome = chain(
            Arc::new(PanickingRenderer),
            Arc::new(PerspectiveRenderer::new(32, 32)),
        )
        .render(cloud())
        .await
        .unwrap();
        match outcome.primary_failure {
            Some(RenderFailure::Panicked { ref detail, .. }) => {
                assert!(detail.contains("driver crashed"))
            }
            ref other => panic!("expected panic failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timed_out_primary_uses_fallback() {
        let outcome = RenderChain::new(
            Arc::new(SlowRenderer),
            Arc::new(PerspectiveRenderer::new(32, 32)),
            Duration::from_millis(50),
        )
        .render(cloud())
        .await
        .unwrap();
        assert_eq!(outcome.provenance, RenderProvenance::Fallback);
        assert!(matches!(
            outcome.primary_failure,
            Some(RenderFailure::TimedOut { millis: 50, .. })
        ));
    }

    #[tokio::test]
    async fn zero_area_image_counts_as_failure() {
        let fallback = Arc::new(PerspectiveRenderer::new(16, 16));
        let outcome = chain(Arc::new(ZeroAreaRenderer), fallback)
            .render(cloud())
            .await
            .unwrap();
        assert!(matches!(
            outcome.primary_failure,
            Some(RenderFailure::EmptyFrame { .. })
        ));
    }

    #[tokio::test]
    async fn both_failing_is_render_error() {
        let err = chain(Arc::new(FailingRenderer), Arc::new(PanickingRenderer))
            .render(cloud())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        match err {
            FillError::RenderFailed { primary, fallback } => {
                assert_eq!(primary.renderer(), "failing");
                assert_eq!(fallback.renderer(), "panicking");
            }
            other => panic!("expected RenderFailed, got {other:?}"),
        }
    }
}
