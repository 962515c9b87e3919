//! Frame type, YUYV to RGB conversion and dark-frame detection.

/// Memory layout of [`Frame::data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// One byte per pixel.
    Gray8,
    /// Three bytes per pixel, R G B.
    Rgb8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Gray8 => 1,
            PixelLayout::Rgb8 => 3,
        }
    }
}

/// A captured camera frame at the stream's native resolution.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Average byte value across all channels (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Expected length of `data` for this frame's geometry and layout.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.layout.bytes_per_pixel()
    }
}

/// Convert packed YUYV (4:2:2) to interleaved RGB using BT.601 studio-range
/// integer coefficients. Each 4-byte group yields two pixels sharing U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for group in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (group[0], group[1], group[2], group[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

/// Returns true if more than `threshold_pct` of the bytes fall in the
/// darkest bucket (0–31).
pub fn is_dark_frame(pixels: &[u8], threshold_pct: f32) -> bool {
    if pixels.is_empty() {
        return true;
    }
    let dark_count = pixels.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / pixels.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame buffer does not match geometry: expected {expected} bytes, got {actual}")]
    GeometryMismatch { expected: usize, actual: usize },
    #[error("frame has zero width or height")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(matches!(
            yuyv_to_rgb(&yuyv, 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_yuyv_to_rgb_black_and_white() {
        // Studio range: Y=16 is black, Y=235 is white, neutral chroma.
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_to_rgb_red_bias() {
        // High V pushes red up and green down.
        let yuyv = vec![128, 128, 128, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb.len(), 6);
        assert!(rgb[0] > rgb[1]);
        assert!(rgb[0] > rgb[2]);
        assert_eq!(&rgb[..3], &rgb[3..]);
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&[0u8; 1000], 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!is_dark_frame(&[128u8; 1000], 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_dark_frame_borderline_bright() {
        // 94% dark, 6% bright → should NOT be dark
        let mut gray = vec![10u8; 940];
        gray.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&gray, 0.95));
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame {
            data: vec![0, 100, 200, 100],
            width: 2,
            height: 2,
            layout: PixelLayout::Gray8,
            timestamp: std::time::Instant::now(),
            sequence: 0,
            is_dark: false,
        };
        assert!((frame.avg_brightness() - 100.0).abs() < 1e-6);
        assert_eq!(frame.expected_len(), 4);
    }
}
