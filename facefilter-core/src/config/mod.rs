//! config — filter and server settings
//!
//! Defaults live in code; an optional TOML file may override any field, and
//! the CLI overrides the file.
//!
//! ```toml
//! [filter]
//! thresholds = { left_eye = 4.5, right_eye = 4.5, mouth = 15.0 }
//! scales = { left_eye = 2.5, right_eye = 2.5, mouth = 2.0 }
//!
//! [server]
//! listen_addr = "0.0.0.0:5005"
//! read_timeout_ms = 5000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::compositing::DEFAULT_MASK_THRESHOLD;
use crate::detection::Region;
use crate::error::{FilterError, Result};
use crate::video::DEFAULT_JPEG_QUALITY;

/// Default listen address for the frame server.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5005";
/// Largest request payload accepted before the session is dropped.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;
/// Eye openness threshold, percent of face-oval height.
pub const DEFAULT_EYE_THRESHOLD: f32 = 6.0;
/// Mouth openness threshold, percent of face-oval height.
pub const DEFAULT_MOUTH_THRESHOLD: f32 = 15.0;
/// Overlay height as a multiple of the region height.
pub const DEFAULT_OVERLAY_SCALE: f32 = 2.0;

/// One value per overlay region, looked up by [`Region`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionTable<T> {
    pub left_eye: T,
    pub right_eye: T,
    pub mouth: T,
}

impl<T> RegionTable<T> {
    pub fn get(&self, region: Region) -> Option<&T> {
        match region {
            Region::LeftEye => Some(&self.left_eye),
            Region::RightEye => Some(&self.right_eye),
            Region::Mouth => Some(&self.mouth),
            Region::FaceOval => None,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (Region, &T)> {
        [
            (Region::LeftEye, &self.left_eye),
            (Region::RightEye, &self.right_eye),
            (Region::Mouth, &self.mouth),
        ]
        .into_iter()
    }
}

/// Per-frame filter behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Openness thresholds in percent of face-oval height.
    pub thresholds: RegionTable<f32>,
    /// Overlay height multipliers.
    pub scales: RegionTable<f32>,
    pub mask_threshold: u8,
    /// Outline each region's bounding box on the output.
    pub debug_regions: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            thresholds: RegionTable {
                left_eye: DEFAULT_EYE_THRESHOLD,
                right_eye: DEFAULT_EYE_THRESHOLD,
                mouth: DEFAULT_MOUTH_THRESHOLD,
            },
            scales: RegionTable {
                left_eye: DEFAULT_OVERLAY_SCALE,
                right_eye: DEFAULT_OVERLAY_SCALE,
                mouth: DEFAULT_OVERLAY_SCALE,
            },
            mask_threshold: DEFAULT_MASK_THRESHOLD,
            debug_regions: false,
        }
    }
}

impl FilterSettings {
    pub fn validate(&self) -> Result<()> {
        for (region, t) in self.thresholds.iter() {
            if !t.is_finite() {
                return Err(FilterError::Config(format!(
                    "threshold for {region:?} must be finite, got {t}"
                )));
            }
        }
        for (region, s) in self.scales.iter() {
            if !s.is_finite() || *s <= 0.0 {
                return Err(FilterError::Config(format!(
                    "scale for {region:?} must be positive, got {s}"
                )));
            }
        }
        Ok(())
    }
}

/// Frame server behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub listen_addr: String,
    pub jpeg_quality: u8,
    /// Socket read deadline; `None` blocks indefinitely.
    pub read_timeout_ms: Option<u64>,
    /// Socket write deadline; `None` blocks indefinitely.
    pub write_timeout_ms: Option<u64>,
    pub max_payload_bytes: usize,
    /// Serve a single session, then return.
    pub once: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            read_timeout_ms: None,
            write_timeout_ms: None,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            once: false,
        }
    }
}

impl ServerSettings {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(FilterError::Config(format!(
                "jpeg_quality must be 1-100, got {}",
                self.jpeg_quality
            )));
        }
        if self.max_payload_bytes == 0 {
            return Err(FilterError::Config("max_payload_bytes must be non-zero".into()));
        }
        Ok(())
    }
}

/// Everything a config file may set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub filter: FilterSettings,
    pub server: ServerSettings,
}

impl Settings {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(raw).map_err(|e| FilterError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FilterError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.filter.validate()?;
        self.server.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let s = Settings::default();
        assert_eq!(s.filter.thresholds.get(Region::LeftEye), Some(&6.0));
        assert_eq!(s.filter.thresholds.get(Region::Mouth), Some(&15.0));
        assert_eq!(s.filter.scales.get(Region::RightEye), Some(&2.0));
        assert_eq!(s.filter.thresholds.get(Region::FaceOval), None);
        assert_eq!(s.filter.mask_threshold, 25);
        assert_eq!(s.server.listen_addr, "127.0.0.1:5005");
        assert!(s.server.read_timeout().is_none());
        s.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let s = Settings::from_toml_str(
            r#"
            [filter]
            thresholds = { left_eye = 4.5, right_eye = 4.5, mouth = 15.0 }

            [server]
            read_timeout_ms = 2500
            "#,
        )
        .unwrap();
        assert_eq!(s.filter.thresholds.left_eye, 4.5);
        assert_eq!(s.filter.scales, FilterSettings::default().scales);
        assert_eq!(s.server.read_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(s.server.jpeg_quality, 90);
    }

    #[test]
    fn rejects_non_positive_scale() {
        let err = Settings::from_toml_str(
            "[filter]\nscales = { left_eye = 0.0, right_eye = 2.0, mouth = 2.0 }\n",
        )
        .unwrap_err();
        assert!(matches!(err, FilterError::Config(_)));
    }

    #[test]
    fn rejects_out_of_range_quality() {
        let err = Settings::from_toml_str("[server]\njpeg_quality = 0\n").unwrap_err();
        assert!(matches!(err, FilterError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facefilter.toml");
        std::fs::write(&path, "[server]\nlisten_addr = \"0.0.0.0:9000\"\nonce = true\n").unwrap();

        let s = Settings::load(&path).unwrap();
        assert_eq!(s.server.listen_addr, "0.0.0.0:9000");
        assert!(s.server.once);
        assert!(Settings::load(dir.path().join("missing.toml")).is_err());
    }
}
