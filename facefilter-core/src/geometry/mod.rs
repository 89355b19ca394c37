//! geometry — landmark sets to bounding boxes and openness decisions
//!
//! Normalized landmarks are projected to integer pixel coordinates by
//! truncation, then reduced to an axis-aligned box whose extents are
//! `max - min` along each axis (no inclusive `+1`).

use tracing::debug;

use crate::detection::{FaceLandmarks, Region};
use crate::error::{FilterError, Result};

/// Integer pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Scale a normalized `[x, y]` landmark against frame dimensions.
    pub fn from_normalized(norm: [f32; 2], width: u32, height: u32) -> Self {
        Self {
            x: (norm[0] * width as f32) as i32,
            y: (norm[1] * height as f32) as i32,
        }
    }
}

/// Axis-aligned box: top-left corner plus exclusive extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Bounding box and point set of one facial region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionGeometry {
    pub bounds: BoundingBox,
    pub points: Vec<Point>,
}

impl RegionGeometry {
    pub fn width(&self) -> u32 {
        self.bounds.width
    }

    pub fn height(&self) -> u32 {
        self.bounds.height
    }

    /// Integer-truncated mean of the region's points.
    pub fn centroid(&self) -> Point {
        centroid_of(&self.points)
    }
}

/// Per-face openness of an eye or the mouth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpennessStatus {
    Open,
    Close,
}

impl OpennessStatus {
    pub fn is_open(self) -> bool {
        self == OpennessStatus::Open
    }
}

/// Minimal axis-aligned box covering `points`, or `None` when empty.
pub fn bounding_box_of(points: &[Point]) -> Option<BoundingBox> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &points[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(BoundingBox {
        x: min_x,
        y: min_y,
        width: max_x.abs_diff(min_x),
        height: max_y.abs_diff(min_y),
    })
}

/// Integer-truncated mean of `points`; the origin for an empty set.
pub fn centroid_of(points: &[Point]) -> Point {
    if points.is_empty() {
        return Point::new(0, 0);
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0i64, 0i64), |(sx, sy), p| (sx + p.x as i64, sy + p.y as i64));
    Point::new((sx as f64 / n) as i32, (sy as f64 / n) as i32)
}

/// Project `region`'s landmarks of `face` into a `width`×`height` frame and
/// measure them. Non-finite landmarks make the region degenerate.
pub fn region_geometry(
    (width, height): (u32, u32),
    face: &FaceLandmarks,
    region: Region,
) -> Result<RegionGeometry> {
    let points = region
        .indices()
        .map(|i| {
            let p = face.get(i)?;
            if !(p[0].is_finite() && p[1].is_finite()) {
                return Err(FilterError::DegenerateGeometry(format!(
                    "landmark {i} of {region:?} is not finite: {p:?}"
                )));
            }
            Ok(Point::from_normalized(p, width, height))
        })
        .collect::<Result<Vec<_>>>()?;
    let bounds = bounding_box_of(&points).ok_or(FilterError::EmptyRegion(region))?;
    Ok(RegionGeometry { bounds, points })
}

/// Openness of `region` for a single face.
///
/// Open iff `region_height / face_oval_height * 100 > threshold`, evaluated
/// as `region_height * 100 > threshold * face_oval_height` so integer
/// heights compare exactly at the boundary.
pub fn face_openness(
    dims: (u32, u32),
    face: &FaceLandmarks,
    region: Region,
    threshold: f32,
) -> Result<OpennessStatus> {
    let region_height = region_geometry(dims, face, region)?.height();
    let oval_height = region_geometry(dims, face, Region::FaceOval)?.height();
    if oval_height == 0 {
        return Err(FilterError::DegenerateGeometry(format!(
            "face oval has zero height while classifying {region:?}"
        )));
    }

    let open = region_height as f64 * 100.0 > threshold as f64 * oval_height as f64;
    debug!(
        ?region,
        region_height,
        oval_height,
        threshold,
        open,
        "openness"
    );
    Ok(if open {
        OpennessStatus::Open
    } else {
        OpennessStatus::Close
    })
}

/// Classify `region` for every face, indexed by detector order. Errors are
/// kept per face so one degenerate face does not hide the others.
pub fn classify_openness(
    dims: (u32, u32),
    faces: &[FaceLandmarks],
    region: Region,
    threshold: f32,
) -> Vec<Result<OpennessStatus>> {
    faces
        .iter()
        .map(|face| face_openness(dims, face, region, threshold))
        .collect()
}
