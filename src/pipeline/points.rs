//! Point sets and the sources that produce them.
//!
//! ## The synthetic cloud is a placeholder
//!
//! A single photograph carries no depth, so [`SyntheticPointSource`] does not
//! look at the image at all: it scatters points uniformly in the unit cube to
//! give the response a plausible bounding volume and to exercise the render
//! path. Real depth data plugs in behind the same [`PointSource`] trait —
//! [`PointCloudFileSource`] already does this for LiDAR scans exported as
//! ASCII PCD or XYZ — and nothing downstream changes.

use crate::error::FillError;
use image::DynamicImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// An ordered sequence of 3D points. May be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSet {
    points: Vec<[f64; 3]>,
}

impl PointSet {
    pub fn new(points: Vec<[f64; 3]>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f64; 3]> {
        self.points.iter()
    }
}

impl From<Vec<[f64; 3]>> for PointSet {
    fn from(points: Vec<[f64; 3]>) -> Self {
        Self::new(points)
    }
}

/// Produces the point set for a request.
///
/// Implementations receive the decoded photograph so that a depth-estimating
/// source can use it; sources that don't need it ignore it.
pub trait PointSource: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Build the point set for one request.
    fn build(&self, image: &DynamicImage) -> Result<PointSet, FillError>;
}

// ── Synthetic ─────────────────────────────────────────────────────────────

/// Uniformly random points in `[0, 1)³`, independent of the image.
#[derive(Debug, Clone)]
pub struct SyntheticPointSource {
    count: usize,
    seed: Option<u64>,
}

impl SyntheticPointSource {
    pub fn new(count: usize, seed: Option<u64>) -> Self {
        Self { count, seed }
    }

    /// Generate the cloud. Each call with a fixed seed yields the same set.
    pub fn generate(&self) -> PointSet {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let points = (0..self.count)
            .map(|_| [rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()])
            .collect();
        PointSet::new(points)
    }
}

impl PointSource for SyntheticPointSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn build(&self, _image: &DynamicImage) -> Result<PointSet, FillError> {
        let set = self.generate();
        debug!("Generated synthetic point cloud: {} points", set.len());
        Ok(set)
    }
}

// ── Point-cloud files ─────────────────────────────────────────────────────

/// A point cloud loaded once from disk and returned for every request.
///
/// Supported formats, chosen by extension:
/// - `.pcd` — ASCII PCD (v0.6/v0.7) with `x`, `y`, `z` fields
/// - anything else — plain text, three numbers per line, `#` comments
#[derive(Debug, Clone)]
pub struct PointCloudFileSource {
    path: PathBuf,
    points: PointSet,
}

impl PointCloudFileSource {
    /// Read and parse the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FillError> {
        let path = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path).map_err(|e| FillError::PointCloudLoad {
            path: path.clone(),
            detail: e.to_string(),
        })?;

        let is_pcd = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pcd"));

        let parsed = if is_pcd {
            parse_pcd(&text)
        } else {
            parse_xyz(&text)
        };
        let points = parsed.map_err(|detail| FillError::PointCloudLoad {
            path: path.clone(),
            detail,
        })?;

        info!("Loaded {} points from {}", points.len(), path.display());
        Ok(Self { path, points })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn points(&self) -> &PointSet {
        &self.points
    }
}

impl PointSource for PointCloudFileSource {
    fn name(&self) -> &'static str {
        "point-cloud-file"
    }

    fn build(&self, _image: &DynamicImage) -> Result<PointSet, FillError> {
        Ok(self.points.clone())
    }
}

/// Parse an ASCII PCD document.
///
/// Points with a non-finite coordinate (PCD writes `nan` for invalid
/// returns) are dropped.
pub fn parse_pcd(text: &str) -> Result<PointSet, String> {
    let mut fields: Vec<String> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    let mut declared_points: Option<usize> = None;
    let mut lines = text.lines();

    // Header runs up to and including the DATA line.
    loop {
        let line = lines
            .next()
            .ok_or_else(|| "missing DATA line in PCD header".to_string())?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let key = parts.next().unwrap_or_default().to_ascii_uppercase();
        let values: Vec<&str> = parts.collect();
        match key.as_str() {
            "FIELDS" => fields = values.iter().map(|v| v.to_ascii_lowercase()).collect(),
            "COUNT" => {
                counts = values
                    .iter()
                    .map(|v| v.parse::<usize>())
                    .collect::<Result<_, _>>()
                    .map_err(|e| format!("bad COUNT entry: {e}"))?;
            }
            "POINTS" => declared_points = values.first().and_then(|v| v.parse().ok()),
            "DATA" => {
                let kind = values.first().copied().unwrap_or_default();
                if !kind.eq_ignore_ascii_case("ascii") {
                    return Err(format!(
                        "DATA {kind} is not supported; convert the cloud to ASCII PCD"
                    ));
                }
                break;
            }
            _ => {}
        }
    }

    if counts.is_empty() {
        counts = vec![1; fields.len()];
    }
    if counts.len() != fields.len() {
        return Err(format!(
            "FIELDS lists {} entries but COUNT lists {}",
            fields.len(),
            counts.len()
        ));
    }

    // Column offset of each field, accounting for multi-count fields.
    let column_of = |name: &str| -> Result<usize, String> {
        let idx = fields
            .iter()
            .position(|f| f == name)
            .ok_or_else(|| format!("FIELDS has no '{name}' field"))?;
        Ok(counts[..idx].iter().sum())
    };
    let cols = [column_of("x")?, column_of("y")?, column_of("z")?];

    let mut points = Vec::with_capacity(declared_points.unwrap_or(0));
    let mut dropped = 0usize;
    for (n, line) in lines.enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let values: Vec<&str> = line.split_whitespace().collect();
        let mut p = [0.0f64; 3];
        for (axis, &col) in cols.iter().enumerate() {
            let raw = values
                .get(col)
                .ok_or_else(|| format!("data row {} has only {} columns", n + 1, values.len()))?;
            p[axis] = raw
                .parse::<f64>()
                .map_err(|_| format!("data row {}: '{}' is not a number", n + 1, raw))?;
        }
        if p.iter().all(|v| v.is_finite()) {
            points.push(p);
        } else {
            dropped += 1;
        }
    }

    if dropped > 0 {
        debug!("Dropped {} non-finite PCD points", dropped);
    }
    if let Some(declared) = declared_points {
        if declared != points.len() + dropped {
            warn!(
                "PCD header declares {} points but {} rows were read",
                declared,
                points.len() + dropped
            );
        }
    }

    Ok(PointSet::new(points))
}

/// Parse plain-text XYZ: three numbers per line separated by whitespace or
/// commas; extra columns (intensity, colour) are ignored.
pub fn parse_xyz(text: &str) -> Result<PointSet, String> {
    let mut points = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let values: Vec<f64> = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .take(3)
            .map(|s| s.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("line {}: {e}", n + 1))?;
        if values.len() < 3 {
            return Err(format!("line {}: expected x y z", n + 1));
        }
        let p = [values[0], values[1], values[2]];
        if p.iter().all(|v| v.is_finite()) {
            points.push(p);
        }
    }
    Ok(PointSet::new(points))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank() -> DynamicImage {
        DynamicImage::new_rgb8(1, 1)
    }

    #[test]
    fn synthetic_count_and_range() {
        let set = SyntheticPointSource::new(500, Some(1)).build(&blank()).unwrap();
        assert_eq!(set.len(), 500);
        assert!(set
            .iter()
            .all(|p| p.iter().all(|&v| (0.0..1.0).contains(&v))));
    }

    #[test]
    fn synthetic_seed_is_deterministic() {
        let a = SyntheticPointSource::new(50, Some(42)).generate();
        let b = SyntheticPointSource::new(50, Some(42)).generate();
        let c = SyntheticPointSource::new(50, Some(43)).generate();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn synthetic_zero_count_is_empty() {
        assert!(SyntheticPointSource::new(0, None).generate().is_empty());
    }

    #[test]
    fn pcd_with_multi_count_fields() {
        let pcd = "\
# .PCD v0.7 - Point Cloud Data file format
VERSION 0.7
FIELDS normal x y z
SIZE 4 4 4 4
TYPE F F F F
COUNT 3 1 1 1
WIDTH 3
HEIGHT 1
POINTS 3
DATA ascii
0 0 1 1.0 2.0 3.0
0 0 1 4.0 5.0 6.0
0 0 1 nan nan nan
";
        let set = parse_pcd(pcd).unwrap();
        assert_eq!(set.points(), &[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    }

    #[test]
    fn pcd_binary_rejected() {
        let pcd = "FIELDS x y z\nDATA binary\n";
        let err = parse_pcd(pcd).unwrap_err();
        assert!(err.contains("binary"), "got: {err}");
    }

    #[test]
    fn pcd_missing_axis_rejected() {
        let err = parse_pcd("FIELDS x y\nDATA ascii\n1 2\n").unwrap_err();
        assert!(err.contains("'z'"), "got: {err}");
    }

    #[test]
    fn xyz_parses_commas_and_comments() {
        let set = parse_xyz("# scan\n1,2,3\n4 5 6 255\n\n").unwrap();
        assert_eq!(set.points(), &[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    }

    #[test]
    fn xyz_short_line_rejected() {
        assert!(parse_xyz("1 2\n").is_err());
    }

    #[test]
    fn file_source_loads_pcd() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("container_scan.pcd");
        std::fs::write(&path, "FIELDS x y z\nPOINTS 2\nDATA ascii\n0 0 0\n2 3 4\n").unwrap();

        let source = PointCloudFileSource::open(&path).unwrap();
        assert_eq!(source.name(), "point-cloud-file");
        assert_eq!(source.build(&blank()).unwrap().len(), 2);
    }

    #[test]
    fn file_source_missing_file() {
        let err = PointCloudFileSource::open("/no/such/scan.pcd").unwrap_err();
        assert!(matches!(err, FillError::PointCloudLoad { .. }));
    }
}
