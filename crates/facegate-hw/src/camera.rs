//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, PixelLayout};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream as _;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Driver buffers in the mmap queue. Kept small so a dequeued frame is
/// never far behind the sensor.
const STREAM_BUFFERS: u32 = 2;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("camera stream released")]
    Released,
}

/// Requested capture geometry. The driver may negotiate something else;
/// frames always carry the negotiated size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConstraints {
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, converted to RGB.
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel, native IR camera output).
    Grey,
    /// 16-bit little-endian grayscale, downscaled to 8 bits.
    Y16,
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and negotiate
    /// a capture format as close to `constraints` as the driver allows.
    pub fn open(device_path: &str, constraints: CameraConstraints) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                CameraError::PermissionDenied(format!("{device_path}: {e}"))
            } else if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV; IR-only devices usually come back as GREY or Y16.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = constraints.width;
        fmt.height = constraints.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            PixelFormat::Y16
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            requested_width = constraints.width,
            requested_height = constraints.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Start a memory-mapped capture stream on this device.
    ///
    /// The stream stays on until the returned value is dropped. The caller
    /// must keep dequeuing, otherwise the driver holds on to stale frames.
    pub fn start_stream(&self) -> Result<FrameStream<'_>, CameraError> {
        let inner = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS).map_err(|e| {
            CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
        })?;
        Ok(FrameStream {
            camera: self,
            inner,
        })
    }

    /// Convert a raw buffer into frame pixels based on the negotiated format.
    fn decode(&self, buf: &[u8]) -> Result<(Vec<u8>, PixelLayout), CameraError> {
        let pixels = (self.width * self.height) as usize;

        match self.pixel_format {
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok((buf[..pixels].to_vec(), PixelLayout::Gray8))
            }
            PixelFormat::Y16 => {
                let expected_bytes = pixels * 2;
                if buf.len() < expected_bytes {
                    return Err(CameraError::CaptureFailed(format!(
                        "Y16 buffer too short: expected {expected_bytes}, got {}",
                        buf.len()
                    )));
                }
                // Keep the high byte of each little-endian sample.
                let gray = buf[..expected_bytes]
                    .chunks_exact(2)
                    .map(|px| px[1])
                    .collect();
                Ok((gray, PixelLayout::Gray8))
            }
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height)
                .map(|rgb| (rgb, PixelLayout::Rgb8))
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// A running capture stream borrowed from a [`Camera`].
pub struct FrameStream<'a> {
    camera: &'a Camera,
    inner: MmapStream<'a>,
}

impl FrameStream<'_> {
    /// Dequeue the next buffer and hand it straight back to the driver.
    pub fn skip_frame(&mut self) -> Result<(), CameraError> {
        self.inner
            .next()
            .map(|_| ())
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))
    }

    /// Dequeue the next buffer and decode it into a [`Frame`].
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .inner
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;

        let (data, layout) = self.camera.decode(buf)?;
        let is_dark = frame::is_dark_frame(&data, 0.95);

        Ok(Frame {
            data,
            width: self.camera.width,
            height: self.camera.height,
            layout,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        })
    }
}
