use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::assets::FilterAssets;
use crate::compositing::{apply_placement, OverlayCompositor};
use crate::config::FilterSettings;
use crate::detection::{FaceLandmarks, LandmarkDetector, Region};
use crate::error::{FilterError, Result};
use crate::geometry::{classify_openness, region_geometry, OpennessStatus};
use crate::video::{draw_boxes, PixelRect, RgbFrame};

/// Colour of the debug region outlines.
const DEBUG_BOX_COLOR: [u8; 3] = [0, 255, 0];
/// Frames between timing summaries.
const PROFILE_INTERVAL: u64 = 300;

/// Read-only state shared by every frame: detector handle, assets, settings.
///
/// Built once before serving and passed by reference.
pub struct FilterContext {
    detector: Box<dyn LandmarkDetector>,
    assets: FilterAssets,
    settings: FilterSettings,
}

impl FilterContext {
    pub fn new(
        detector: Box<dyn LandmarkDetector>,
        assets: FilterAssets,
        settings: FilterSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            detector,
            assets,
            settings,
        })
    }

    pub fn assets(&self) -> &FilterAssets {
        &self.assets
    }

    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }
}

/// Result of filtering one frame.
#[derive(Debug)]
pub enum FrameOutcome {
    /// All intended overlays were applied (possibly none).
    Filtered(RgbFrame),
    /// Processing failed; `frame` is the input, untouched.
    Fallback { frame: RgbFrame, reason: FilterError },
}

impl FrameOutcome {
    pub fn into_frame(self) -> RgbFrame {
        match self {
            FrameOutcome::Filtered(frame) | FrameOutcome::Fallback { frame, .. } => frame,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, FrameOutcome::Fallback { .. })
    }
}

/// Counters accumulated over a pipeline's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub faces: u64,
    pub overlays: u64,
    pub skipped_faces: u64,
    pub fallbacks: u64,
}

/// Per-session filter worker. Owns its compositing buffers; the context is
/// borrowed.
pub struct FilterPipeline<'a> {
    context: &'a FilterContext,
    compositor: OverlayCompositor,
    stats: PipelineStats,
    prof_detect: Duration,
    prof_composite: Duration,
}

impl<'a> FilterPipeline<'a> {
    pub fn new(context: &'a FilterContext) -> Self {
        Self {
            context,
            compositor: OverlayCompositor::new(context.settings.mask_threshold),
            stats: PipelineStats::default(),
            prof_detect: Duration::ZERO,
            prof_composite: Duration::ZERO,
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Detect faces and apply every open region's overlay. On any failure the
    /// input frame is handed back unchanged.
    pub fn process(&mut self, frame: RgbFrame) -> FrameOutcome {
        self.stats.frames += 1;

        let detect_start = Instant::now();
        let detected = self.context.detector.detect(&frame);
        self.prof_detect += detect_start.elapsed();

        let outcome = match detected {
            Ok(faces) if faces.is_empty() => {
                debug!("no faces detected");
                FrameOutcome::Filtered(frame)
            }
            Ok(faces) => {
                self.stats.faces += faces.len() as u64;
                let composite_start = Instant::now();
                let result = self.apply_filters(&frame, &faces);
                self.prof_composite += composite_start.elapsed();
                match result {
                    Ok(filtered) => FrameOutcome::Filtered(filtered),
                    Err(reason) => FrameOutcome::Fallback { frame, reason },
                }
            }
            Err(reason) => FrameOutcome::Fallback { frame, reason },
        };

        if let FrameOutcome::Fallback { reason, .. } = &outcome {
            self.stats.fallbacks += 1;
            warn!("frame filter failed, returning input: {reason}");
        }

        if self.stats.frames % PROFILE_INTERVAL == 0 {
            let frames = self.stats.frames as f64;
            info!(
                frames = self.stats.frames,
                fallbacks = self.stats.fallbacks,
                detect_ms_per_frame = format!("{:.2}", self.prof_detect.as_secs_f64() * 1000.0 / frames),
                composite_ms_per_frame =
                    format!("{:.2}", self.prof_composite.as_secs_f64() * 1000.0 / frames),
                "pipeline timings"
            );
        }

        outcome
    }

    /// Composite onto a working copy so a failure part-way leaves no partial
    /// overlays behind.
    fn apply_filters(&mut self, frame: &RgbFrame, faces: &[FaceLandmarks]) -> Result<RgbFrame> {
        let settings = &self.context.settings;
        let dims = frame.dimensions();

        let mut statuses = Vec::with_capacity(Region::OVERLAY_ORDER.len());
        for region in Region::OVERLAY_ORDER {
            let threshold = *settings
                .thresholds
                .get(region)
                .ok_or_else(|| FilterError::Config(format!("no threshold for {region:?}")))?;
            statuses.push((region, classify_openness(dims, faces, region, threshold)));
        }

        let mut working = frame.clone();
        let mut debug_boxes = Vec::new();

        for (face_no, face) in faces.iter().enumerate() {
            let mut open_regions = Vec::with_capacity(statuses.len());
            let mut degenerate = None;
            for (region, per_face) in &statuses {
                match &per_face[face_no] {
                    Ok(OpennessStatus::Open) => open_regions.push(*region),
                    Ok(OpennessStatus::Close) => {}
                    Err(e) => {
                        degenerate = Some(e.to_string());
                        break;
                    }
                }
            }
            if let Some(reason) = degenerate {
                self.stats.skipped_faces += 1;
                warn!(face_no, "skipping face: {reason}");
                continue;
            }
            debug!(face_no, ?open_regions, "classified face");

            for region in open_regions {
                let geometry = region_geometry(dims, face, region)?;
                let asset = self.context.assets.for_region(region).ok_or_else(|| {
                    FilterError::Compositing(format!("no asset for {region:?}"))
                })?;
                let scale = *settings
                    .scales
                    .get(region)
                    .ok_or_else(|| FilterError::Config(format!("no scale for {region:?}")))?;

                let placement = self.compositor.place(
                    asset.image(),
                    &geometry.points,
                    geometry.height(),
                    scale,
                    dims,
                )?;
                apply_placement(&mut working, &placement)?;
                self.stats.overlays += 1;
            }

            if settings.debug_regions {
                for region in [
                    Region::LeftEye,
                    Region::RightEye,
                    Region::Mouth,
                    Region::FaceOval,
                ] {
                    let b = region_geometry(dims, face, region)?.bounds;
                    debug_boxes.push(PixelRect {
                        x: b.x,
                        y: b.y,
                        width: b.width,
                        height: b.height,
                    });
                }
            }
        }

        if !debug_boxes.is_empty() {
            draw_boxes(&mut working, &debug_boxes, DEBUG_BOX_COLOR)?;
        }

        Ok(working)
    }
}

/// Filter a single frame with a throwaway pipeline.
pub fn filter_frame(context: &FilterContext, frame: RgbFrame) -> FrameOutcome {
    FilterPipeline::new(context).process(frame)
}
