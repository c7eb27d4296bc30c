//! Fallback renderer: red markers on white, oblique projection, no axes.
//!
//! Deliberately simple. It has no depth buffer and no surface to
//! negotiate, so it keeps working when the perspective renderer cannot.

use crate::error::RenderFailure;
use crate::pipeline::points::PointSet;
use crate::pipeline::render::PointRenderer;
use crate::pipeline::volume::BoundingVolume;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const MARKER: Rgb<u8> = Rgb([220, 20, 20]);

/// Cabinet projection: z recedes up and to the right at half scale.
const DEPTH_SHEAR: f64 = 0.353_553_390_593_273_8; // 0.5 · cos 45°

/// 2D scatter of the point set in a cabinet projection.
#[derive(Debug, Clone)]
pub struct ScatterRenderer {
    pub width: u32,
    pub height: u32,
    pub marker_radius: i32,
    /// Blank border around the plot, in pixels.
    pub margin: u32,
}

impl ScatterRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            marker_radius: 3,
            margin: 8,
        }
    }

    fn project(p: [f64; 3]) -> (f64, f64) {
        (p[0] + DEPTH_SHEAR * p[2], p[1] + DEPTH_SHEAR * p[2])
    }
}

impl PointRenderer for ScatterRenderer {
    fn name(&self) -> &'static str {
        "scatter"
    }

    fn render(&self, points: &PointSet) -> Result<RgbImage, RenderFailure> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderFailure::InitFailed {
                renderer: self.name().to_string(),
                detail: format!("surface is {}x{}", self.width, self.height),
            });
        }
        if points.is_empty() {
            return Err(RenderFailure::EmptyFrame {
                renderer: self.name().to_string(),
            });
        }

        let bv = BoundingVolume::from_points(points);
        let c = bv.center();
        let centered = |p: &[f64; 3]| Self::project([p[0] - c[0], p[1] - c[1], p[2] - c[2]]);

        // Fit the projected cloud into the drawable area, keeping aspect.
        let half_span = points
            .iter()
            .map(centered)
            .fold(0.0f64, |acc, (x, y)| acc.max(x.abs()).max(y.abs()));
        let drawable_w = self.width.saturating_sub(2 * self.margin).max(1) as f64;
        let drawable_h = self.height.saturating_sub(2 * self.margin).max(1) as f64;
        let scale = if half_span > 0.0 {
            0.5 * drawable_w.min(drawable_h) / half_span
        } else {
            0.0
        };

        let mut img = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        let (ox, oy) = (self.width as f64 / 2.0, self.height as f64 / 2.0);
        let mut drawn = 0usize;
        for p in points.iter() {
            let (x, y) = centered(p);
            let (sx, sy) = (ox + x * scale, oy - y * scale);
            if !(sx.is_finite() && sy.is_finite()) {
                continue;
            }
            draw_filled_circle_mut(
                &mut img,
                (sx.round() as i32, sy.round() as i32),
                self.marker_radius,
                MARKER,
            );
            drawn += 1;
        }

        if drawn == 0 {
            return Err(RenderFailure::EmptyFrame {
                renderer: self.name().to_string(),
            });
        }
        Ok(img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::points::SyntheticPointSource;

    #[test]
    fn draws_red_markers_on_white() {
        let set = SyntheticPointSource::new(100, Some(9)).generate();
        let img = ScatterRenderer::new(120, 90).render(&set).unwrap();
        assert_eq!(img.dimensions(), (120, 90));
        assert!(img.pixels().any(|p| *p == MARKER));
        assert_eq!(*img.get_pixel(0, 0), BACKGROUND);
    }

    #[test]
    fn degenerate_set_draws_centre_marker() {
        let img = ScatterRenderer::new(40, 40)
            .render(&vec![[2.0, 2.0, 2.0], [2.0, 2.0, 2.0]].into())
            .unwrap();
        assert_eq!(*img.get_pixel(20, 20), MARKER);
    }

    #[test]
    fn empty_set_is_empty_frame() {
        let err = ScatterRenderer::new(40, 40)
            .render(&PointSet::default())
            .unwrap_err();
        assert!(matches!(err, RenderFailure::EmptyFrame { .. }));
    }

    #[test]
    fn zero_surface_is_init_failure() {
        let set = SyntheticPointSource::new(5, Some(1)).generate();
        let err = ScatterRenderer::new(10, 0).render(&set).unwrap_err();
        assert!(matches!(err, RenderFailure::InitFailed { .. }));
    }
}
