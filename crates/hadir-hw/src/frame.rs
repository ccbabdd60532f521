//! Frame type and image processing: YUYV/MJPEG to RGB, dark detection, snapshots.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hadir_core::FrameRef;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

/// A captured packed-RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn view(&self) -> FrameRef<'_> {
        FrameRef {
            data: &self.data,
            width: self.width,
            height: self.height,
        }
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let pixels = self.data.len() / 3;
        if pixels == 0 {
            return 0.0;
        }
        self.data
            .chunks_exact(3)
            .map(|px| luma(px[0], px[1], px[2]) as f32)
            .sum::<f32>()
            / pixels as f32
    }

    /// True if more than `threshold_pct` of pixels have luma below 32.
    pub fn is_dark(&self, threshold_pct: f32) -> bool {
        let pixels = self.data.len() / 3;
        if pixels == 0 {
            return true;
        }
        let dark = self
            .data
            .chunks_exact(3)
            .filter(|px| luma(px[0], px[1], px[2]) < 32)
            .count();
        (dark as f32 / pixels as f32) > threshold_pct
    }

    /// Encode as a `data:image/jpeg;base64,...` URL, the proof format the backend accepts.
    pub fn to_jpeg_data_url(&self, quality: u8) -> Result<String, FrameError> {
        let expected = (self.width * self.height * 3) as usize;
        if self.data.len() < expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality)
            .encode(&self.data[..expected], self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|e| FrameError::Encode(e.to_string()))?;

        Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg)))
    }
}

/// BT.601 luma.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for quad in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    [
        clamp(1.164 * c + 1.596 * e),
        clamp(1.164 * c - 0.392 * d - 0.813 * e),
        clamp(1.164 * c + 2.017 * d),
    ]
}

/// Decode a Motion-JPEG buffer to RGB, checking the decoded size.
pub fn mjpeg_to_rgb(jpeg: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let img = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?
        .to_rgb8();
    if img.width() != width || img.height() != height {
        return Err(FrameError::Decode(format!(
            "expected {width}x{height}, decoded {}x{}",
            img.width(),
            img.height()
        )));
    }
    Ok(img.into_raw())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("snapshot encode failed: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: Vec<u8>, width: u32, height: u32) -> Frame {
        Frame {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        }
    }

    #[test]
    fn test_yuyv_to_rgb_grey_levels() {
        // Neutral chroma: output is grey, brighter Y gives brighter RGB
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb.len(), 6);
        assert_eq!(&rgb[..3], &[0, 0, 0]);
        assert_eq!(&rgb[3..], &[255, 255, 255]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(matches!(
            yuyv_to_rgb(&yuyv, 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_dark_frame() {
        assert!(frame(vec![0u8; 300], 10, 10).is_dark(0.95));
        assert!(!frame(vec![128u8; 300], 10, 10).is_dark(0.95));
        assert!(frame(vec![], 0, 0).is_dark(0.95));
    }

    #[test]
    fn test_avg_brightness() {
        let f = frame(vec![100u8; 30], 5, 2);
        assert!((f.avg_brightness() - 100.0).abs() < 1.0);
    }

    #[test]
    fn test_jpeg_data_url() {
        let f = frame(vec![200u8; 16 * 16 * 3], 16, 16);
        let url = f.to_jpeg_data_url(80).unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));

        let payload = url.trim_start_matches("data:image/jpeg;base64,");
        let bytes = STANDARD.decode(payload).unwrap();
        let decoded = mjpeg_to_rgb(&bytes, 16, 16).unwrap();
        assert_eq!(decoded.len(), 16 * 16 * 3);
    }

    #[test]
    fn test_jpeg_rejects_short_buffer() {
        let f = frame(vec![0u8; 10], 16, 16);
        assert!(f.to_jpeg_data_url(80).is_err());
    }

    #[test]
    fn test_mjpeg_size_mismatch() {
        let f = frame(vec![50u8; 8 * 8 * 3], 8, 8);
        let url = f.to_jpeg_data_url(90).unwrap();
        let bytes = STANDARD
            .decode(url.trim_start_matches("data:image/jpeg;base64,"))
            .unwrap();
        assert!(matches!(mjpeg_to_rgb(&bytes, 16, 16), Err(FrameError::Decode(_))));
    }
}
