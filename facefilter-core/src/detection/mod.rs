//! detection — face-mesh topology and landmark detectors
//!
//! The landmark model is consumed as a black box: an image goes in, zero or
//! more faces of normalized `(x, y)` landmarks come out, indexed by the fixed
//! face-mesh topology below.
//!
//! Two detectors implement [`LandmarkDetector`]:
//! - [`FaceMeshDetector`] runs a 468-point face-mesh ONNX model over the
//!   whole frame (single face, suited to webcam framing).
//! - [`StaticDetector`] replays a fixed set of faces; used for offline runs
//!   with precomputed landmarks and in tests.

use anyhow::{Context, Result as AnyResult};
use fast_image_resize as fr;
use ort::session::Session;
use ort::value::Tensor;
use rayon::prelude::*;
use serde::Deserialize;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use crate::error::{FilterError, Result};
use crate::video::RgbFrame;

// ── Topology ─────────────────────────────────────────────────────────────────

/// Number of landmarks in a face-mesh record.
pub const FACE_MESH_POINTS: usize = 468;

/// Named facial region, defined by a fixed set of landmark index pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    LeftEye,
    RightEye,
    Mouth,
    FaceOval,
}

impl Region {
    /// Regions that receive overlays, in the order they are applied.
    pub const OVERLAY_ORDER: [Region; 3] = [Region::LeftEye, Region::RightEye, Region::Mouth];

    /// Landmark index pairs (mesh edges) bounding this region.
    pub fn connections(self) -> &'static [(usize, usize)] {
        match self {
            Region::LeftEye => LEFT_EYE,
            Region::RightEye => RIGHT_EYE,
            Region::Mouth => LIPS,
            Region::FaceOval => FACE_OVAL,
        }
    }

    /// Flattened landmark indices, pair by pair. Shared vertices appear once
    /// per edge they belong to.
    pub fn indices(self) -> impl Iterator<Item = usize> {
        self.connections().iter().flat_map(|&(a, b)| [a, b])
    }
}

const LEFT_EYE: &[(usize, usize)] = &[
    (263, 249), (249, 390), (390, 373), (373, 374), (374, 380), (380, 381), (381, 382),
    (382, 362), (263, 466), (466, 388), (388, 387), (387, 386), (386, 385), (385, 384),
    (384, 398), (398, 362),
];

const RIGHT_EYE: &[(usize, usize)] = &[
    (33, 7), (7, 163), (163, 144), (144, 145), (145, 153), (153, 154), (154, 155),
    (155, 133), (33, 246), (246, 161), (161, 160), (160, 159), (159, 158), (158, 157),
    (157, 173), (173, 133),
];

const LIPS: &[(usize, usize)] = &[
    (61, 146), (146, 91), (91, 181), (181, 84), (84, 17), (17, 314), (314, 405),
    (405, 321), (321, 375), (375, 291), (61, 185), (185, 40), (40, 39), (39, 37),
    (37, 0), (0, 267), (267, 269), (269, 270), (270, 409), (409, 291), (78, 95),
    (95, 88), (88, 178), (178, 87), (87, 14), (14, 317), (317, 402), (402, 318),
    (318, 324), (324, 308), (78, 191), (191, 80), (80, 81), (81, 82), (82, 13),
    (13, 312), (312, 311), (311, 310), (310, 415), (415, 308),
];

const FACE_OVAL: &[(usize, usize)] = &[
    (10, 338), (338, 297), (297, 332), (332, 284), (284, 251), (251, 389), (389, 356),
    (356, 454), (454, 323), (323, 361), (361, 288), (288, 397), (397, 365), (365, 379),
    (379, 378), (378, 400), (400, 377), (377, 152), (152, 148), (148, 176), (176, 149),
    (149, 150), (150, 136), (136, 172), (172, 58), (58, 132), (132, 93), (93, 234),
    (234, 127), (127, 162), (162, 21), (21, 54), (54, 103), (103, 67), (67, 109),
    (109, 10),
];

// ── Public types ─────────────────────────────────────────────────────────────

/// One detected face: normalized `[x, y]` landmarks in topology order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FaceLandmarks {
    pub points: Vec<[f32; 2]>,
}

impl FaceLandmarks {
    pub fn new(points: Vec<[f32; 2]>) -> Self {
        Self { points }
    }

    pub fn get(&self, index: usize) -> Result<[f32; 2]> {
        self.points
            .get(index)
            .copied()
            .ok_or(FilterError::MissingLandmark {
                index,
                len: self.points.len(),
            })
    }
}

/// Maps an image to zero or more faces of landmarks.
///
/// Handles are built once at startup and shared read-only across frames.
pub trait LandmarkDetector: Send + Sync {
    fn detect(&self, frame: &RgbFrame) -> Result<Vec<FaceLandmarks>>;
}

// ── Static detector ──────────────────────────────────────────────────────────

/// Returns the same faces for every frame.
#[derive(Debug, Clone, Default)]
pub struct StaticDetector {
    faces: Vec<FaceLandmarks>,
}

impl StaticDetector {
    pub fn new(faces: Vec<FaceLandmarks>) -> Self {
        Self { faces }
    }

    /// Load faces from a JSON array of `{"points": [[x, y], ...]}` records.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let faces: Vec<FaceLandmarks> = serde_json::from_str(&raw).map_err(|e| {
            FilterError::Detection(format!("bad landmark file {}: {e}", path.display()))
        })?;
        Ok(Self::new(faces))
    }
}

impl LandmarkDetector for StaticDetector {
    fn detect(&self, _frame: &RgbFrame) -> Result<Vec<FaceLandmarks>> {
        Ok(self.faces.clone())
    }
}

// ── Face-mesh ONNX detector ──────────────────────────────────────────────────

/// Face-mesh model input size (square).
const MESH_SIZE: u32 = 192;
/// Presence logit above which the mesh output is treated as a face.
const PRESENCE_LOGIT_THRESHOLD: f32 = 0.0;

/// Wraps a face-mesh ONNX session (468 landmarks + face presence score).
pub struct FaceMeshDetector {
    session: Mutex<Session>,
    input_name: String,
}

impl FaceMeshDetector {
    /// Load a face-mesh ONNX model from `model_path`.
    pub fn load<P: AsRef<Path>>(model_path: P) -> AnyResult<Self> {
        let session = build_ort_session(model_path.as_ref())?;
        let input_name = session
            .inputs
            .first()
            .context("face-mesh model declares no inputs")?
            .name
            .clone();
        debug!(input = %input_name, "face-mesh session ready");
        Ok(Self {
            session: Mutex::new(session),
            input_name,
        })
    }

    fn detect_inner(&self, frame: &RgbFrame) -> AnyResult<Vec<FaceLandmarks>> {
        let input_tensor = preprocess_mesh(frame)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("face-mesh session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .context("face-mesh inference failed")?;

        // The landmark tensor is the one carrying 468 * 3 values; the
        // presence score is the single-element tensor.
        let mut landmarks: Option<Vec<f32>> = None;
        let mut presence: Option<f32> = None;
        for (_name, value) in outputs.iter() {
            let (_shape, data) = value
                .try_extract_tensor::<f32>()
                .context("failed to extract face-mesh output tensor")?;
            if data.len() >= FACE_MESH_POINTS * 3 {
                landmarks = Some(data.to_vec());
            } else if data.len() == 1 {
                presence = Some(data[0]);
            }
        }

        let landmarks = landmarks.context("face-mesh model produced no landmark tensor")?;
        if let Some(logit) = presence {
            debug!(logit, "face presence");
            if logit <= PRESENCE_LOGIT_THRESHOLD {
                return Ok(Vec::new());
            }
        }

        let scale = MESH_SIZE as f32;
        let points = landmarks
            .chunks_exact(3)
            .take(FACE_MESH_POINTS)
            .map(|xyz| [xyz[0] / scale, xyz[1] / scale])
            .collect();
        Ok(vec![FaceLandmarks::new(points)])
    }
}

impl LandmarkDetector for FaceMeshDetector {
    fn detect(&self, frame: &RgbFrame) -> Result<Vec<FaceLandmarks>> {
        self.detect_inner(frame)
            .map_err(|e| FilterError::Detection(format!("{e:#}")))
    }
}

/// Resize the frame to the mesh input and build an NCHW `[0, 1]` tensor.
fn preprocess_mesh(frame: &RgbFrame) -> AnyResult<ort::value::DynValue> {
    let src = fr::images::ImageRef::new(frame.width, frame.height, &frame.data, fr::PixelType::U8x3)
        .context("failed to create face-mesh resize source")?;
    let mut dst = fr::images::Image::new(MESH_SIZE, MESH_SIZE, fr::PixelType::U8x3);

    let options =
        fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
    fr::Resizer::new()
        .resize(&src, &mut dst, Some(&options))
        .context("face-mesh resize failed")?;
    let raw = dst.into_vec();

    let size = (MESH_SIZE * MESH_SIZE) as usize;
    let mut tensor_data = vec![0f32; 3 * size];
    tensor_data
        .par_chunks_mut(size)
        .enumerate()
        .for_each(|(channel, plane)| {
            for (idx, out) in plane.iter_mut().enumerate() {
                *out = raw[idx * 3 + channel] as f32 / 255.0;
            }
        });

    let shape = [1usize, 3, MESH_SIZE as usize, MESH_SIZE as usize];
    Ok(Tensor::from_array((shape, tensor_data.into_boxed_slice()))
        .context("failed to create face-mesh input tensor")?
        .into_dyn())
}

fn build_ort_session(model_path: &Path) -> AnyResult<Session> {
    let mut builder = Session::builder().context("failed to create ORT session builder")?;
    builder = builder
        .with_intra_threads(1)
        .context("failed to set ORT intra threads")?;
    builder = builder
        .with_inter_threads(1)
        .context("failed to set ORT inter threads")?;
    builder
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load face-mesh model {}", model_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn topology_indices_fit_face_mesh() {
        for region in [
            Region::LeftEye,
            Region::RightEye,
            Region::Mouth,
            Region::FaceOval,
        ] {
            assert!(region.indices().all(|i| i < FACE_MESH_POINTS), "{region:?}");
        }
    }

    #[test]
    fn region_loops_are_closed() {
        // Every vertex of a closed contour belongs to exactly two edges.
        for region in [Region::LeftEye, Region::RightEye, Region::FaceOval] {
            let unique: BTreeSet<usize> = region.indices().collect();
            assert_eq!(region.indices().count(), unique.len() * 2, "{region:?}");
        }
    }

    #[test]
    fn indices_flatten_pairs_in_order() {
        let first: Vec<usize> = Region::RightEye.indices().take(4).collect();
        assert_eq!(first, vec![33, 7, 7, 163]);
        assert_eq!(Region::Mouth.indices().count(), 80);
        assert_eq!(Region::FaceOval.indices().count(), 72);
    }

    #[test]
    fn overlay_order_is_eyes_then_mouth() {
        assert_eq!(
            Region::OVERLAY_ORDER,
            [Region::LeftEye, Region::RightEye, Region::Mouth]
        );
    }

    #[test]
    fn missing_landmark_is_reported() {
        let face = FaceLandmarks::new(vec![[0.5, 0.5]; 3]);
        assert_eq!(face.get(2).unwrap(), [0.5, 0.5]);
        assert!(matches!(
            face.get(10),
            Err(FilterError::MissingLandmark { index: 10, len: 3 })
        ));
    }

    #[test]
    fn static_detector_loads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.json");
        std::fs::write(&path, r#"[{"points": [[0.1, 0.2], [0.3, 0.4]]}]"#).unwrap();

        let detector = StaticDetector::from_json_file(&path).unwrap();
        let faces = detector.detect(&RgbFrame::filled(2, 2, [0, 0, 0])).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].points[1], [0.3, 0.4]);
    }

    #[test]
    fn static_detector_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            StaticDetector::from_json_file(&path),
            Err(FilterError::Detection(_))
        ));
    }
}
