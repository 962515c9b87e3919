//! Camera ports and the V4L2 stream worker.
//!
//! A [`CameraProvider`] hands out [`CaptureStream`]s. The V4L2 provider opens
//! the device on a dedicated OS thread which owns it for the stream's whole
//! lifetime. The thread discards the warmup frames, then keeps draining the
//! driver queue so buffers never go stale; frame requests travel over a
//! channel and replies come back on a oneshot. Releasing the stream closes the
//! channel, the thread exits and the device is stopped and closed.

use crate::camera::{Camera, CameraConstraints, CameraError, FrameStream};
use crate::frame::Frame;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

/// Frames dropped after stream start while AGC/AE settles.
pub const DEFAULT_WARMUP_FRAMES: usize = 4;

/// Pause after a failed dequeue while no grab is waiting.
const DRAIN_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// An active camera session.
#[async_trait]
pub trait CaptureStream: Send + Sync {
    /// Grab the most recent frame. Fails with [`CameraError::Released`]
    /// once the stream has been released.
    async fn grab(&self) -> Result<Frame, CameraError>;

    /// Stop the underlying tracks. Idempotent.
    fn release(&self);
}

/// Source of camera streams.
#[async_trait]
pub trait CameraProvider: Send + Sync {
    /// Acquire a new stream. Fails with the platform's permission/device error.
    async fn acquire(
        &self,
        constraints: CameraConstraints,
    ) -> Result<Arc<dyn CaptureStream>, CameraError>;
}

/// Opens V4L2 streams on a fixed device path.
#[derive(Debug, Clone)]
pub struct V4lCameraProvider {
    device_path: String,
    warmup_frames: usize,
}

impl V4lCameraProvider {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            warmup_frames: DEFAULT_WARMUP_FRAMES,
        }
    }

    /// Number of frames to drop after each stream start.
    pub fn with_warmup_frames(mut self, warmup_frames: usize) -> Self {
        self.warmup_frames = warmup_frames;
        self
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[async_trait]
impl CameraProvider for V4lCameraProvider {
    async fn acquire(
        &self,
        constraints: CameraConstraints,
    ) -> Result<Arc<dyn CaptureStream>, CameraError> {
        let stream = V4lStream::open(&self.device_path, constraints, self.warmup_frames).await?;
        Ok(Arc::new(stream))
    }
}

/// Messages sent from async callers to the camera thread.
enum StreamRequest {
    Grab {
        reply: oneshot::Sender<Result<Frame, CameraError>>,
    },
}

/// Handle to a camera thread streaming from one V4L2 device.
pub struct V4lStream {
    device_path: String,
    tx: Mutex<Option<mpsc::Sender<StreamRequest>>>,
}

impl V4lStream {
    /// Spawn the camera thread, open the device and start streaming.
    ///
    /// Resolves once the warmup frames are discarded, or with the error that
    /// prevented it.
    pub async fn open(
        device_path: &str,
        constraints: CameraConstraints,
        warmup_frames: usize,
    ) -> Result<Self, CameraError> {
        let (tx, rx) = mpsc::channel::<StreamRequest>(4);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), CameraError>>();
        let path = device_path.to_string();

        std::thread::Builder::new()
            .name("facegate-camera".into())
            .spawn(move || run_camera_thread(&path, constraints, warmup_frames, rx, ready_tx))
            .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn camera thread: {e}")))?;

        ready_rx.await.map_err(|_| {
            CameraError::CaptureFailed("camera thread exited during startup".into())
        })??;

        Ok(Self {
            device_path: device_path.to_string(),
            tx: Mutex::new(Some(tx)),
        })
    }

    fn sender(&self) -> Option<mpsc::Sender<StreamRequest>> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CaptureStream for V4lStream {
    async fn grab(&self) -> Result<Frame, CameraError> {
        let tx = self.sender().ok_or(CameraError::Released)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(StreamRequest::Grab { reply: reply_tx })
            .await
            .map_err(|_| CameraError::Released)?;
        reply_rx.await.map_err(|_| CameraError::Released)?
    }

    fn release(&self) {
        let previous = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            tracing::debug!(device = %self.device_path, "releasing camera stream");
        }
    }
}

impl Drop for V4lStream {
    fn drop(&mut self) {
        self.release();
    }
}

/// Frame queue driven by the camera thread.
trait FrameSource {
    /// Dequeue one frame without decoding it.
    fn skip_frame(&mut self) -> Result<(), CameraError>;

    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

impl FrameSource for FrameStream<'_> {
    fn skip_frame(&mut self) -> Result<(), CameraError> {
        FrameStream::skip_frame(self)
    }

    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        FrameStream::next_frame(self)
    }
}

fn run_camera_thread(
    path: &str,
    constraints: CameraConstraints,
    warmup_frames: usize,
    mut rx: mpsc::Receiver<StreamRequest>,
    ready: oneshot::Sender<Result<(), CameraError>>,
) {
    let camera = match Camera::open(path, constraints) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let mut stream = match camera.start_stream() {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = discard_warmup(&mut stream, warmup_frames) {
        let _ = ready.send(Err(e));
        return;
    }

    tracing::info!(
        device = path,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera stream started"
    );
    if ready.send(Ok(())).is_err() {
        // Caller gave up while we were opening the device.
        return;
    }

    serve_requests(&mut stream, &mut rx);

    tracing::info!(device = path, "camera stream stopped");
}

fn discard_warmup(source: &mut impl FrameSource, count: usize) -> Result<(), CameraError> {
    if count > 0 {
        tracing::debug!(count, "discarding warmup frames");
    }
    for _ in 0..count {
        source.skip_frame()?;
    }
    Ok(())
}

/// Answer grab requests until every sender is gone.
///
/// Between requests the queue is drained, so each grab is answered with the
/// first frame dequeued after the request arrived.
fn serve_requests(source: &mut impl FrameSource, rx: &mut mpsc::Receiver<StreamRequest>) {
    loop {
        match rx.try_recv() {
            Ok(StreamRequest::Grab { reply }) => {
                let _ = reply.send(source.next_frame());
            }
            Err(TryRecvError::Empty) => {
                if let Err(e) = source.skip_frame() {
                    tracing::debug!(error = %e, "failed to drain camera queue");
                    std::thread::sleep(DRAIN_ERROR_BACKOFF);
                }
            }
            Err(TryRecvError::Disconnected) => return,
        }
    }
}
