use thiserror::Error;

use crate::detection::Region;

/// Errors raised while analysing, compositing or transporting a frame.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("region {0:?} has no landmark points")]
    EmptyRegion(Region),

    #[error("landmark {index} missing from face record of {len} points")]
    MissingLandmark { index: usize, len: usize },

    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("compositing failed: {0}")]
    Compositing(String),

    #[error("resize failed: {0}")]
    Resize(String),

    #[error("invalid frame buffer: {0}")]
    InvalidFrame(String),

    #[error("image decode failed: {0}")]
    Decode(#[source] image::ImageError),

    #[error("image encode failed: {0}")]
    Encode(#[source] image::ImageError),

    #[error("landmark detection failed: {0}")]
    Detection(String),

    #[error("filter asset {path}: {reason}")]
    Asset { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("payload of {len} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, FilterError>;
