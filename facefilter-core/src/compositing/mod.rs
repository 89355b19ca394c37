//! compositing — scale a filter asset onto a facial region
//!
//! An overlay is sized from the region's bounding-box height, centred on the
//! region's landmark centroid, and blended through an inverse binary mask:
//! near-black asset pixels keep the background, everything else is replaced
//! by the asset.
//!
//! Overlays that extend past the frame edge are clipped to the frame; only the
//! intersecting pixels are written.

use fast_image_resize as fr;
use tracing::debug;

use crate::error::{FilterError, Result};
use crate::geometry::{centroid_of, Point};
use crate::video::{luma, RgbFrame};

/// Asset intensity at or below which a pixel counts as background.
pub const DEFAULT_MASK_THRESHOLD: u8 = 25;

/// Mask value for pixels where the background is kept.
const MASK_KEEP: u8 = 255;
/// Largest overlay extent accepted, as a multiple of the frame extent.
pub const MAX_OVERLAY_FRAME_MULTIPLE: f64 = 4.0;

/// Resized asset, its inverse mask, and where its top-left corner lands.
#[derive(Debug, Clone)]
pub struct OverlayPlacement {
    pub asset: RgbFrame,
    /// One byte per asset pixel: 255 keeps the background, 0 takes the asset.
    pub mask: Vec<u8>,
    pub anchor: Point,
}

impl OverlayPlacement {
    pub fn width(&self) -> u32 {
        self.asset.width
    }

    pub fn height(&self) -> u32 {
        self.asset.height
    }
}

/// Reusable compositing context; keeps the resizer between overlays.
pub struct OverlayCompositor {
    resizer: fr::Resizer,
    mask_threshold: u8,
}

impl OverlayCompositor {
    pub fn new(mask_threshold: u8) -> Self {
        Self {
            resizer: fr::Resizer::new(),
            mask_threshold,
        }
    }

    /// Size, mask and anchor `asset` for a region of `region_height` pixels
    /// whose landmarks are `region_points`, inside a `frame_dims` frame.
    ///
    /// Overlays more than [`MAX_OVERLAY_FRAME_MULTIPLE`] times the frame in
    /// either direction are rejected before any pixels are allocated.
    pub fn place(
        &mut self,
        asset: &RgbFrame,
        region_points: &[Point],
        region_height: u32,
        scale: f32,
        frame_dims: (u32, u32),
    ) -> Result<OverlayPlacement> {
        if asset.width == 0 || asset.height == 0 {
            return Err(FilterError::Compositing("filter asset is empty".into()));
        }
        if region_points.is_empty() {
            return Err(FilterError::Compositing("region has no landmarks".into()));
        }

        let required_height = (region_height as f64 * scale as f64).round();
        if !required_height.is_finite() || required_height < 1.0 {
            return Err(FilterError::Compositing(format!(
                "overlay height {required_height} from region height {region_height} x {scale}"
            )));
        }
        let (frame_width, frame_height) = frame_dims;
        let max_height = frame_height as f64 * MAX_OVERLAY_FRAME_MULTIPLE;
        if required_height > max_height {
            return Err(FilterError::Compositing(format!(
                "overlay height {required_height} exceeds limit {max_height} for a {frame_width}x{frame_height} frame"
            )));
        }
        let required_width = (asset.width as f64 * (required_height / asset.height as f64)).trunc();
        let max_width = frame_width as f64 * MAX_OVERLAY_FRAME_MULTIPLE;
        if required_width > max_width {
            return Err(FilterError::Compositing(format!(
                "overlay width {required_width} exceeds limit {max_width} for a {frame_width}x{frame_height} frame"
            )));
        }
        let required_height = required_height as u32;
        let required_width = required_width as u32;
        if required_width == 0 {
            return Err(FilterError::Compositing(format!(
                "overlay width collapses to zero at height {required_height}"
            )));
        }

        let resized = self.resize(asset, required_width, required_height)?;
        let mask = inverse_mask(&resized, self.mask_threshold);

        let center = centroid_of(region_points);
        let anchor = Point::new(
            (center.x as f64 - resized.width as f64 / 2.0) as i32,
            (center.y as f64 - resized.height as f64 / 2.0) as i32,
        );
        debug!(
            cx = center.x,
            cy = center.y,
            width = resized.width,
            height = resized.height,
            anchor_x = anchor.x,
            anchor_y = anchor.y,
            "overlay placed"
        );

        Ok(OverlayPlacement {
            asset: resized,
            mask,
            anchor,
        })
    }

    /// Composite `asset` onto a copy of `target`; `target` is left untouched.
    pub fn composite(
        &mut self,
        target: &RgbFrame,
        asset: &RgbFrame,
        region_points: &[Point],
        region_height: u32,
        scale: f32,
    ) -> Result<RgbFrame> {
        let placement =
            self.place(asset, region_points, region_height, scale, target.dimensions())?;
        let mut out = target.clone();
        apply_placement(&mut out, &placement)?;
        Ok(out)
    }

    fn resize(&mut self, asset: &RgbFrame, width: u32, height: u32) -> Result<RgbFrame> {
        if (width, height) == asset.dimensions() {
            return Ok(asset.clone());
        }

        let src = fr::images::ImageRef::new(asset.width, asset.height, &asset.data, fr::PixelType::U8x3)
            .map_err(|e| FilterError::Resize(format!("asset source: {e}")))?;
        let mut dst = fr::images::Image::new(width, height, fr::PixelType::U8x3);

        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
        self.resizer
            .resize(&src, &mut dst, Some(&options))
            .map_err(|e| FilterError::Resize(format!("{width}x{height}: {e}")))?;

        RgbFrame::new(width, height, dst.into_vec())
    }
}

impl Default for OverlayCompositor {
    fn default() -> Self {
        Self::new(DEFAULT_MASK_THRESHOLD)
    }
}

/// One-shot [`OverlayCompositor::composite`] with the default mask threshold.
pub fn composite(
    target: &RgbFrame,
    asset: &RgbFrame,
    region_points: &[Point],
    region_height: u32,
    scale: f32,
) -> Result<RgbFrame> {
    OverlayCompositor::default().composite(target, asset, region_points, region_height, scale)
}

/// 255 where the asset's intensity is `<= threshold`, 0 elsewhere.
pub fn inverse_mask(asset: &RgbFrame, threshold: u8) -> Vec<u8> {
    asset
        .data
        .chunks_exact(3)
        .map(|px| {
            if luma(px[0], px[1], px[2]) <= threshold {
                MASK_KEEP
            } else {
                0
            }
        })
        .collect()
}

/// Blend a placement into `frame` in place: `out = (bg & mask) + asset`,
/// saturating. The overlay rectangle is clipped to the frame. Returns the
/// number of pixels written.
pub fn apply_placement(frame: &mut RgbFrame, placement: &OverlayPlacement) -> Result<usize> {
    let (ow, oh) = placement.asset.dimensions();
    if placement.mask.len() != ow as usize * oh as usize {
        return Err(FilterError::Compositing(format!(
            "mask of {} entries for {ow}x{oh} overlay",
            placement.mask.len()
        )));
    }

    let ax = placement.anchor.x as i64;
    let ay = placement.anchor.y as i64;
    let x0 = ax.max(0);
    let y0 = ay.max(0);
    let x1 = (ax + ow as i64).min(frame.width as i64);
    let y1 = (ay + oh as i64).min(frame.height as i64);
    if x0 >= x1 || y0 >= y1 {
        debug!(ax, ay, "overlay entirely outside frame");
        return Ok(0);
    }

    let frame_stride = frame.stride();
    let asset_stride = placement.asset.stride();
    for y in y0..y1 {
        let oy = (y - ay) as usize;
        for x in x0..x1 {
            let ox = (x - ax) as usize;
            let mask = placement.mask[oy * ow as usize + ox];
            let dst = y as usize * frame_stride + x as usize * 3;
            let src = oy * asset_stride + ox * 3;
            for c in 0..3 {
                let bg = frame.data[dst + c] & mask;
                frame.data[dst + c] = bg.saturating_add(placement.asset.data[src + c]);
            }
        }
    }

    Ok(((x1 - x0) * (y1 - y0)) as usize)
}
