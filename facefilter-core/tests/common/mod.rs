#![allow(dead_code)]

use facefilter_core::{
    assets::{FilterAsset, FilterAssets},
    config::{FilterSettings, RegionTable},
    detection::{FaceLandmarks, Region, StaticDetector, FACE_MESH_POINTS},
    pipeline::FilterContext,
    video::RgbFrame,
};

pub const FRAME_DIMS: (u32, u32) = (400, 400);
pub const BACKGROUND: [u8; 3] = [128, 128, 128];
pub const EYE_COLOR: [u8; 3] = [255, 0, 0];
pub const MOUTH_COLOR: [u8; 3] = [0, 0, 255];

/// Pixel box as (x, y, width, height).
pub type PxBox = (u32, u32, u32, u32);

/// Landmarks whose regions span exactly the given pixel boxes.
pub fn synthetic_face(
    dims: (u32, u32),
    left_eye: PxBox,
    right_eye: PxBox,
    mouth: PxBox,
    oval: PxBox,
) -> FaceLandmarks {
    let (fw, fh) = (dims.0 as f32, dims.1 as f32);
    let mut points = vec![[0.5f32, 0.5f32]; FACE_MESH_POINTS];
    for (region, (x, y, w, h)) in [
        (Region::LeftEye, left_eye),
        (Region::RightEye, right_eye),
        (Region::Mouth, mouth),
        (Region::FaceOval, oval),
    ] {
        let mut unique: Vec<usize> = Vec::new();
        for idx in region.indices() {
            if !unique.contains(&idx) {
                unique.push(idx);
            }
        }
        for (k, idx) in unique.iter().enumerate() {
            let (px, py) = match k % 4 {
                0 => (x, y),
                1 => (x + w, y),
                2 => (x, y + h),
                _ => (x + w, y + h),
            };
            points[*idx] = [(px as f32 + 0.5) / fw, (py as f32 + 0.5) / fh];
        }
    }
    FaceLandmarks::new(points)
}

/// Face oval 300 px tall; left eye 6% of it, right eye 1%, mouth 10%.
pub fn winking_face() -> FaceLandmarks {
    synthetic_face(
        FRAME_DIMS,
        (100, 120, 40, 18),
        (260, 120, 40, 3),
        (170, 280, 60, 30),
        (50, 50, 300, 300),
    )
}

/// Eye threshold 4.5%, mouth threshold 15%.
pub fn context_with(faces: Vec<FaceLandmarks>) -> FilterContext {
    let eye = FilterAsset::new("eye", RgbFrame::filled(8, 8, EYE_COLOR)).unwrap();
    let mouth = FilterAsset::new("mouth", RgbFrame::filled(16, 8, MOUTH_COLOR)).unwrap();
    let settings = FilterSettings {
        thresholds: RegionTable {
            left_eye: 4.5,
            right_eye: 4.5,
            mouth: 15.0,
        },
        ..FilterSettings::default()
    };
    FilterContext::new(
        Box::new(StaticDetector::new(faces)),
        FilterAssets::new(eye, mouth),
        settings,
    )
    .unwrap()
}

pub fn gray_frame() -> RgbFrame {
    RgbFrame::filled(FRAME_DIMS.0, FRAME_DIMS.1, BACKGROUND)
}

/// Within JPEG tolerance of `expected`.
pub fn close_to(actual: [u8; 3], expected: [u8; 3]) -> bool {
    actual
        .iter()
        .zip(expected.iter())
        .all(|(a, e)| (*a as i16 - *e as i16).abs() <= 40)
}
