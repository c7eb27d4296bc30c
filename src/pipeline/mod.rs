//! Pipeline stages for container fill estimation.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. replace the synthetic point cloud with a real
//! depth sensor) without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ decode ──▶ fill ──▶ points ──▶ volume ──▶ render ──▶ encode
//! (bytes)   (raster)  (mask)   (PointSet) (AABB)    (RgbImage)  (base64)
//! ```
//!
//! 1. [`input`]  — canonicalise the user-supplied path or URL to upload bytes
//! 2. [`decode`] — sniff the format against the allow-list and decode
//! 3. [`fill`]   — luminance → smoothing → threshold → fill percentage
//! 4. [`points`] — produce the point set (synthetic, or loaded from a scan)
//! 5. [`volume`] — axis-aligned bounding volume of the point set
//! 6. [`render`] — primary perspective renderer with the [`scatter`]
//!    fallback; runs in `spawn_blocking` under a timeout
//! 7. [`encode`] — PNG/JPEG-encode and base64-wrap the chosen raster

pub mod decode;
pub mod encode;
pub mod fill;
pub mod input;
pub mod points;
pub mod render;
pub mod scatter;
pub mod volume;
