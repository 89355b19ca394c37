//! video — packed RGB frame buffer and the JPEG bridge
//!
//! Every stage of the filter pipeline passes frames around as `RgbFrame`:
//! the transport decodes request payloads into one, the pipeline composites
//! onto it, and the transport encodes it back to JPEG for the response.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::rect::Rect;

use crate::error::{FilterError, Result};

/// Default JPEG quality used when encoding responses.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// A single frame in RGB24 format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    pub data: Vec<u8>, // packed RGB24, row-major
    pub width: u32,
    pub height: u32,
}

impl RgbFrame {
    /// Wrap an existing RGB24 buffer, checking that its length matches the
    /// dimensions.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FilterError::InvalidFrame(format!(
                "{width}x{height} frame needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// A frame where every pixel has the same colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            data,
            width,
            height,
        }
    }

    pub fn from_image(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
        }
    }

    /// Byte length of one row.
    pub fn stride(&self) -> usize {
        self.width as usize * 3
    }

    /// `[r, g, b]` at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = y as usize * self.stride() + x as usize * 3;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// BT.601 luma with the same fixed-point rounding OpenCV uses for its
/// colour-to-gray conversion.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    const R_W: u32 = 4899;
    const G_W: u32 = 9617;
    const B_W: u32 = 1868;
    ((r as u32 * R_W + g as u32 * G_W + b as u32 * B_W + (1 << 13)) >> 14) as u8
}

/// Decode an encoded image payload (JPEG on the wire) into an RGB frame.
pub fn decode_jpeg(bytes: &[u8]) -> Result<RgbFrame> {
    let img = image::load_from_memory(bytes).map_err(FilterError::Decode)?;
    Ok(RgbFrame::from_image(img.into_rgb8()))
}

/// Encode a frame as JPEG at the given quality (1-100).
pub fn encode_jpeg(frame: &RgbFrame, quality: u8) -> Result<Vec<u8>> {
    let img: ImageBuffer<Rgb<u8>, &[u8]> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.data.as_slice()).ok_or_else(
            || FilterError::InvalidFrame(format!("{}x{} buffer too short", frame.width, frame.height)),
        )?;

    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    img.write_with_encoder(encoder)
        .map_err(FilterError::Encode)?;
    Ok(buf)
}

/// Axis-aligned box in frame pixels, used for debug drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Draw hollow rectangles onto a frame's RGB data in-place (debug output).
pub fn draw_boxes(frame: &mut RgbFrame, boxes: &[PixelRect], color: [u8; 3]) -> Result<()> {
    let (width, height) = frame.dimensions();
    // Draw through a view of the frame's own buffer.
    let mut img: ImageBuffer<Rgb<u8>, &mut [u8]> =
        ImageBuffer::from_raw(width, height, frame.data.as_mut_slice()).ok_or_else(|| {
            FilterError::InvalidFrame(format!("{width}x{height} buffer too short"))
        })?;

    for b in boxes {
        if b.width == 0 || b.height == 0 {
            continue;
        }
        let rect = Rect::at(b.x, b.y).of_size(b.width, b.height);
        imageproc::drawing::draw_hollow_rect_mut(&mut img, rect, Rgb(color));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbFrame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push((x % 256) as u8);
                data.push((y % 256) as u8);
                data.push(128);
            }
        }
        RgbFrame::new(width, height, data).unwrap()
    }

    #[test]
    fn new_rejects_mismatched_buffer() {
        assert!(RgbFrame::new(4, 4, vec![0; 10]).is_err());
        assert!(RgbFrame::new(4, 4, vec![0; 48]).is_ok());
    }

    #[test]
    fn pixel_reads_row_major_rgb() {
        let frame = gradient(8, 4);
        assert_eq!(frame.pixel(3, 2), Some([3, 2, 128]));
        assert_eq!(frame.pixel(8, 0), None);
    }

    #[test]
    fn luma_matches_reference_points() {
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 255, 255), 255);
        // 0.299 * 100 = 29.9 -> 30
        assert_eq!(luma(100, 0, 0), 30);
        assert_eq!(luma(0, 0, 255), 29);
    }

    #[test]
    fn jpeg_round_trip_keeps_dimensions() {
        let frame = gradient(64, 48);
        let jpeg = encode_jpeg(&frame, 90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = decode_jpeg(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
        assert_eq!(decoded.data.len(), 64 * 48 * 3);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_jpeg(b"definitely not a jpeg"),
            Err(FilterError::Decode(_))
        ));
        assert!(decode_jpeg(&[]).is_err());
    }

    #[test]
    fn draw_boxes_marks_outline_only() {
        let mut frame = RgbFrame::filled(20, 20, [0, 0, 0]);
        let rect = PixelRect {
            x: 5,
            y: 5,
            width: 10,
            height: 10,
        };
        draw_boxes(&mut frame, &[rect], [0, 255, 0]).unwrap();
        assert_eq!(frame.pixel(5, 5), Some([0, 255, 0]));
        assert_eq!(frame.pixel(14, 10), Some([0, 255, 0]));
        assert_eq!(frame.pixel(10, 10), Some([0, 0, 0]));
    }

    #[test]
    fn draw_boxes_on_short_buffer_leaves_frame_intact() {
        let mut frame = RgbFrame {
            data: vec![7; 10],
            width: 4,
            height: 4,
        };
        let rect = PixelRect {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
        };
        assert!(matches!(
            draw_boxes(&mut frame, &[rect], [0, 255, 0]),
            Err(FilterError::InvalidFrame(_))
        ));
        assert_eq!(frame.data, vec![7; 10]);
    }
}
