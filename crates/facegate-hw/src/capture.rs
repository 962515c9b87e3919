//! Still capture: grab the current frame from a live stream and encode it as JPEG.

use crate::camera::CameraError;
use crate::frame::{Frame, FrameError, PixelLayout};
use crate::stream::CaptureStream;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;

/// JPEG quality used for every still sent to the recognition service.
pub const JPEG_QUALITY: u8 = 80;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// A JPEG-encoded still together with the geometry of the frame it came from.
#[derive(Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Driver sequence number of the source frame.
    pub sequence: u32,
}

impl std::fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedImage")
            .field("len", &self.bytes.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Capture one still from `stream` at its native resolution.
pub async fn capture(stream: &dyn CaptureStream) -> Result<EncodedImage, CaptureError> {
    let frame = stream.grab().await?;
    if frame.is_dark {
        tracing::debug!(seq = frame.sequence, "captured frame is mostly dark");
    }
    encode_jpeg(&frame, JPEG_QUALITY)
}

/// Encode a frame as baseline JPEG at the given quality (1–100).
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<EncodedImage, CaptureError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(FrameError::Empty.into());
    }
    let expected = frame.expected_len();
    if frame.data.len() != expected {
        return Err(FrameError::GeometryMismatch {
            expected,
            actual: frame.data.len(),
        }
        .into());
    }

    let color = match frame.layout {
        PixelLayout::Gray8 => ExtendedColorType::L8,
        PixelLayout::Rgb8 => ExtendedColorType::Rgb8,
    };

    let mut bytes = Vec::with_capacity(expected / 8);
    JpegEncoder::new_with_quality(&mut bytes, quality).encode(
        &frame.data,
        frame.width,
        frame.height,
        color,
    )?;

    tracing::trace!(
        seq = frame.sequence,
        width = frame.width,
        height = frame.height,
        bytes = bytes.len(),
        "encoded still"
    );

    Ok(EncodedImage {
        bytes,
        width: frame.width,
        height: frame.height,
        sequence: frame.sequence,
    })
}
