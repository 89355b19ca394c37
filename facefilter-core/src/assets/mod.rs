//! assets — filter artwork loaded once at startup
//!
//! Assets are authored on a near-black background; everything at or below the
//! mask threshold is treated as transparent when composited.

use std::path::Path;
use tracing::info;

use crate::detection::Region;
use crate::error::{FilterError, Result};
use crate::video::RgbFrame;

/// Immutable filter image.
#[derive(Debug, Clone)]
pub struct FilterAsset {
    name: String,
    image: RgbFrame,
}

impl FilterAsset {
    pub fn new(name: impl Into<String>, image: RgbFrame) -> Result<Self> {
        let name = name.into();
        if image.width == 0 || image.height == 0 {
            return Err(FilterError::Asset {
                path: name,
                reason: "image has no pixels".into(),
            });
        }
        Ok(Self { name, image })
    }

    /// Decode an image file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|e| FilterError::Asset {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let asset = Self::new(path.display().to_string(), RgbFrame::from_image(img.into_rgb8()))?;
        info!(
            path = %path.display(),
            width = asset.image.width,
            height = asset.image.height,
            "loaded filter asset"
        );
        Ok(asset)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &RgbFrame {
        &self.image
    }
}

/// The eye asset (shared by both eyes) and the mouth asset.
#[derive(Debug, Clone)]
pub struct FilterAssets {
    pub eye: FilterAsset,
    pub mouth: FilterAsset,
}

impl FilterAssets {
    pub fn new(eye: FilterAsset, mouth: FilterAsset) -> Self {
        Self { eye, mouth }
    }

    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(eye_path: P, mouth_path: Q) -> Result<Self> {
        Ok(Self::new(
            FilterAsset::load(eye_path)?,
            FilterAsset::load(mouth_path)?,
        ))
    }

    /// Asset drawn over `region`; the face oval carries none.
    pub fn for_region(&self, region: Region) -> Option<&FilterAsset> {
        match region {
            Region::LeftEye | Region::RightEye => Some(&self.eye),
            Region::Mouth => Some(&self.mouth),
            Region::FaceOval => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn loads_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eye.png");
        RgbImage::from_pixel(6, 4, Rgb([255, 0, 0])).save(&path).unwrap();

        let asset = FilterAsset::load(&path).unwrap();
        assert_eq!(asset.image().dimensions(), (6, 4));
        assert_eq!(asset.image().pixel(0, 0), Some([255, 0, 0]));
    }

    #[test]
    fn missing_file_is_an_asset_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FilterAsset::load(dir.path().join("nope.png")).unwrap_err();
        assert!(matches!(err, FilterError::Asset { .. }));
    }

    #[test]
    fn empty_image_is_rejected() {
        assert!(FilterAsset::new("empty", RgbFrame::filled(0, 0, [0, 0, 0])).is_err());
    }

    #[test]
    fn eyes_share_one_asset() {
        let eye = FilterAsset::new("eye", RgbFrame::filled(2, 2, [1, 1, 1])).unwrap();
        let mouth = FilterAsset::new("mouth", RgbFrame::filled(2, 2, [2, 2, 2])).unwrap();
        let assets = FilterAssets::new(eye, mouth);

        assert_eq!(assets.for_region(Region::LeftEye).unwrap().name(), "eye");
        assert_eq!(assets.for_region(Region::RightEye).unwrap().name(), "eye");
        assert_eq!(assets.for_region(Region::Mouth).unwrap().name(), "mouth");
        assert!(assets.for_region(Region::FaceOval).is_none());
    }
}
