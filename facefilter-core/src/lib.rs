pub mod assets;
pub mod compositing;
pub mod config;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod runtime;
pub mod transport;
pub mod video;

// Re-export the library error type so callers only need `facefilter_core::FilterError`
pub use error::{FilterError, Result};
