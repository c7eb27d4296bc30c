//! Bounding-volume estimation over a point set.
//!
//! All arithmetic is `f64`, the same precision the points are stored in, so
//! min/max comparisons and extents never mix units. Extents below
//! [`EXTENT_EPSILON`] are treated as exactly zero: a cloud of near-duplicate
//! points must report no volume rather than a vanishing positive number.

use crate::pipeline::points::PointSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Extents at or below this are zero.
pub const EXTENT_EPSILON: f64 = 1e-12;

/// Axis-aligned bounding box of a point set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingVolume {
    pub min: [f64; 3],
    pub max: [f64; 3],
    /// Number of points the box was computed from.
    pub point_count: usize,
}

impl BoundingVolume {
    /// Compute the box. An empty set yields a zero box and logs a warning.
    pub fn from_points(points: &PointSet) -> Self {
        let mut iter = points.iter();
        let Some(first) = iter.next() else {
            warn!("Bounding volume requested for an empty point set; reporting 0");
            return Self {
                min: [0.0; 3],
                max: [0.0; 3],
                point_count: 0,
            };
        };

        let mut min = *first;
        let mut max = *first;
        for p in iter {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }

        let bv = Self {
            min,
            max,
            point_count: points.len(),
        };
        debug!(
            "Bounding box {:?} → {:?}, volume {:.6}",
            bv.min,
            bv.max,
            bv.volume()
        );
        bv
    }

    pub fn is_empty(&self) -> bool {
        self.point_count == 0
    }

    /// Per-axis extent, with sub-epsilon extents snapped to zero.
    pub fn extents(&self) -> [f64; 3] {
        let mut e = [0.0; 3];
        for axis in 0..3 {
            let d = self.max[axis] - self.min[axis];
            e[axis] = if d > EXTENT_EPSILON { d } else { 0.0 };
        }
        e
    }

    /// Product of the extents. Zero for empty or degenerate sets.
    pub fn volume(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.extents().iter().product()
    }

    pub fn center(&self) -> [f64; 3] {
        [
            0.5 * (self.min[0] + self.max[0]),
            0.5 * (self.min[1] + self.max[1]),
            0.5 * (self.min[2] + self.max[2]),
        ]
    }

    /// Largest extent, used to normalise points for rendering.
    pub fn max_extent(&self) -> f64 {
        self.extents().iter().copied().fold(0.0, f64::max)
    }
}
