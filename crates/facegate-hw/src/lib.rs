//! facegate-hw — Hardware abstraction for camera capture.
//!
//! Provides the camera ports used by the verification flows, a V4L2-backed
//! implementation that owns each device on a worker thread, and the frame
//! capturer that turns live frames into JPEG stills.

pub mod camera;
pub mod capture;
pub mod frame;
pub mod stream;

pub use camera::{Camera, CameraConstraints, CameraError, DeviceInfo, PixelFormat};
pub use capture::{capture, encode_jpeg, CaptureError, EncodedImage, JPEG_QUALITY};
pub use frame::{Frame, PixelLayout};
pub use stream::{
    CameraProvider, CaptureStream, V4lCameraProvider, V4lStream, DEFAULT_WARMUP_FRAMES,
};
