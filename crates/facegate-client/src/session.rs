//! Per-session state shared by the enrollment and recognition flows.
//!
//! Everything a flow owns (camera streams, timers, the processing guard, the
//! liveness batch and the session token) lives in one [`SessionContext`].
//! Each flow has a generation counter that every teardown bumps; timer bodies
//! and response handlers carry the generation they started under and discard
//! themselves once it is no longer current.

use crate::api::{FaceService, Identity};
use crate::error::FlowError;
use crate::notify::Notifier;
use facegate_hw::{CameraProvider, CaptureStream, EncodedImage};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Collaborators shared by every flow.
#[derive(Clone)]
pub struct Ports {
    pub camera: Arc<dyn CameraProvider>,
    pub service: Arc<dyn FaceService>,
    pub notifier: Arc<dyn Notifier>,
}

/// Which screen the user is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Enroll,
    Recognize,
}

/// Snapshot of a flow's generation counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecognitionPhase {
    #[default]
    Idle,
    Polling,
    Liveness(LivenessPhase),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessPhase {
    Armed,
    Capturing,
    Submitting,
    Succeeded,
    Failed,
}

/// Terminal result of a liveness challenge, published for front ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Verified { user_id: String },
    Aborted,
}

/// Progress of the current liveness attempt.
#[derive(Debug, Clone)]
pub(crate) struct ChallengeState {
    frames_captured: usize,
    target: usize,
    identity: Identity,
}

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub view: Option<View>,
    pub enrollment_camera: bool,
    pub recognition_camera: bool,
    pub polling: bool,
    pub capturing: bool,
    pub processing: bool,
    pub phase: RecognitionPhase,
    pub frames_buffered: usize,
    pub has_session_token: bool,
    /// `(frames_captured, target)` of the current attempt.
    pub challenge: Option<(usize, usize)>,
}

#[derive(Default)]
struct SessionState {
    view: Option<View>,

    enroll_gen: u64,
    enroll_stream: Option<Arc<dyn CaptureStream>>,

    recognition_gen: u64,
    recognition_stream: Option<Arc<dyn CaptureStream>>,
    poll_timer: Option<JoinHandle<()>>,
    capture_timer: Option<JoinHandle<()>>,
    processing: bool,
    phase: RecognitionPhase,
    challenge: Option<ChallengeState>,
    frames: Vec<EncodedImage>,
    identity: Option<Identity>,
}

struct Shared {
    state: Mutex<SessionState>,
    outcome: watch::Sender<Option<ChallengeOutcome>>,
}

/// Clone-safe handle to the session state.
#[derive(Clone)]
pub struct SessionContext {
    shared: Arc<Shared>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::default()),
                outcome,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let s = self.lock();
        SessionSnapshot {
            view: s.view,
            enrollment_camera: s.enroll_stream.is_some(),
            recognition_camera: s.recognition_stream.is_some(),
            polling: s.poll_timer.is_some(),
            capturing: s.capture_timer.is_some(),
            processing: s.processing,
            phase: s.phase,
            frames_buffered: s.frames.len(),
            has_session_token: s.identity.is_some(),
            challenge: s.challenge.as_ref().map(|c| (c.frames_captured, c.target)),
        }
    }

    pub(crate) fn set_view(&self, view: View) {
        self.lock().view = Some(view);
    }

    /// Receiver for the terminal outcome of each liveness challenge.
    pub fn outcomes(&self) -> watch::Receiver<Option<ChallengeOutcome>> {
        self.shared.outcome.subscribe()
    }

    pub(crate) fn publish_outcome(&self, outcome: ChallengeOutcome) {
        self.shared.outcome.send_replace(Some(outcome));
    }

    /// Tear down both flows. Safe to call when nothing is active.
    pub fn teardown(&self) {
        self.teardown_enrollment();
        self.teardown_recognition();
    }

    /// Release the enrollment stream. Returns whether one was active.
    pub fn teardown_enrollment(&self) -> bool {
        let stream = {
            let mut s = self.lock();
            s.enroll_gen += 1;
            s.enroll_stream.take()
        };
        match stream {
            Some(stream) => {
                stream.release();
                tracing::debug!("enrollment stream released");
                true
            }
            None => false,
        }
    }

    /// Release the recognition stream, cancel both timers and clear the
    /// guard, liveness batch, challenge and session token.
    pub fn teardown_recognition(&self) {
        let (stream, timers) = {
            let mut s = self.lock();
            s.recognition_gen += 1;
            s.processing = false;
            s.phase = RecognitionPhase::Idle;
            s.challenge = None;
            s.frames.clear();
            s.identity = None;
            (
                s.recognition_stream.take(),
                [s.poll_timer.take(), s.capture_timer.take()],
            )
        };
        for timer in timers.into_iter().flatten() {
            timer.abort();
        }
        if let Some(stream) = stream {
            stream.release();
            tracing::debug!("recognition stream released");
        }
    }

    pub(crate) fn install_enroll_stream(&self, stream: Arc<dyn CaptureStream>) -> Generation {
        let (generation, previous) = {
            let mut s = self.lock();
            s.enroll_gen += 1;
            (Generation(s.enroll_gen), s.enroll_stream.replace(stream))
        };
        if let Some(previous) = previous {
            previous.release();
        }
        generation
    }

    pub(crate) fn enroll_stream(&self) -> Option<(Arc<dyn CaptureStream>, Generation)> {
        let s = self.lock();
        s.enroll_stream
            .clone()
            .map(|stream| (stream, Generation(s.enroll_gen)))
    }

    pub(crate) fn is_enroll_current(&self, generation: Generation) -> bool {
        self.lock().enroll_gen == generation.0
    }

    pub(crate) fn install_recognition_stream(&self, stream: Arc<dyn CaptureStream>) -> Generation {
        let (generation, previous) = {
            let mut s = self.lock();
            s.recognition_gen += 1;
            s.phase = RecognitionPhase::Polling;
            (Generation(s.recognition_gen), s.recognition_stream.replace(stream))
        };
        if let Some(previous) = previous {
            previous.release();
        }
        generation
    }

    #[cfg(test)]
    pub(crate) fn current_recognition_generation(&self) -> Generation {
        Generation(self.lock().recognition_gen)
    }

    pub(crate) fn is_recognition_current(&self, generation: Generation) -> bool {
        self.lock().recognition_gen == generation.0
    }

    pub(crate) fn recognition_stream(&self, generation: Generation) -> Option<Arc<dyn CaptureStream>> {
        let s = self.lock();
        if s.recognition_gen != generation.0 {
            return None;
        }
        s.recognition_stream.clone()
    }

    /// Store the polling timer, or abort it at once if the flow moved on.
    pub(crate) fn set_poll_timer(&self, generation: Generation, timer: JoinHandle<()>) {
        let mut s = self.lock();
        if s.recognition_gen == generation.0 && s.phase == RecognitionPhase::Polling {
            if let Some(old) = s.poll_timer.replace(timer) {
                old.abort();
            }
        } else {
            timer.abort();
        }
    }

    /// Take the processing guard unless an attempt is already in flight.
    pub(crate) fn try_begin_processing(&self, generation: Generation) -> Option<ProcessingGuard> {
        let mut s = self.lock();
        if s.recognition_gen != generation.0 || s.processing {
            return None;
        }
        s.processing = true;
        Some(ProcessingGuard {
            ctx: self.clone(),
            generation,
        })
    }

    /// Record a recognized identity and stop polling. Returns false if the
    /// flow is stale or no longer polling.
    pub(crate) fn accept_identity(&self, generation: Generation, identity: Identity) -> bool {
        let timer = {
            let mut s = self.lock();
            if s.recognition_gen != generation.0 || s.phase != RecognitionPhase::Polling {
                return false;
            }
            s.identity = Some(identity);
            s.phase = RecognitionPhase::Liveness(LivenessPhase::Armed);
            s.poll_timer.take()
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        true
    }

    /// Start a new liveness attempt: empty the batch and create the
    /// challenge state. Rejected while a submission is outstanding.
    pub(crate) fn arm_challenge(&self, generation: Generation, target: usize) -> Result<Identity, FlowError> {
        let mut s = self.lock();
        if s.recognition_gen != generation.0 {
            return Err(FlowError::Stale);
        }
        match s.phase {
            RecognitionPhase::Liveness(LivenessPhase::Submitting) => return Err(FlowError::Busy),
            RecognitionPhase::Liveness(_) => {}
            _ => return Err(FlowError::Stale),
        }
        let identity = s.identity.clone().ok_or(FlowError::Stale)?;
        s.frames.clear();
        s.challenge = Some(ChallengeState {
            frames_captured: 0,
            target,
            identity: identity.clone(),
        });
        s.phase = RecognitionPhase::Liveness(LivenessPhase::Capturing);
        Ok(identity)
    }

    pub(crate) fn set_capture_timer(&self, generation: Generation, timer: JoinHandle<()>) {
        let mut s = self.lock();
        let capturing = s.phase == RecognitionPhase::Liveness(LivenessPhase::Capturing);
        if s.recognition_gen == generation.0 && capturing {
            if let Some(old) = s.capture_timer.replace(timer) {
                old.abort();
            }
        } else {
            timer.abort();
        }
    }

    /// `(frames_captured, target)` of the current attempt.
    pub(crate) fn challenge_progress(&self, generation: Generation) -> Option<(usize, usize)> {
        let s = self.lock();
        if s.recognition_gen != generation.0 {
            return None;
        }
        s.challenge.as_ref().map(|c| (c.frames_captured, c.target))
    }

    /// Append a frame to the batch; returns the new `(captured, target)`.
    pub(crate) fn push_frame(&self, generation: Generation, image: EncodedImage) -> Option<(usize, usize)> {
        let mut s = self.lock();
        if s.recognition_gen != generation.0 {
            return None;
        }
        let challenge = s.challenge.as_mut()?;
        if challenge.frames_captured >= challenge.target {
            return None;
        }
        challenge.frames_captured += 1;
        let progress = (challenge.frames_captured, challenge.target);
        s.frames.push(image);
        Some(progress)
    }

    /// Enter Submitting: the capture timer is finished and the batch moves
    /// out of the context.
    pub(crate) fn begin_submission(&self, generation: Generation) -> Option<(Vec<EncodedImage>, Identity)> {
        let mut s = self.lock();
        if s.recognition_gen != generation.0 {
            return None;
        }
        let identity = s.challenge.as_ref()?.identity.clone();
        s.capture_timer = None;
        s.phase = RecognitionPhase::Liveness(LivenessPhase::Submitting);
        Some((std::mem::take(&mut s.frames), identity))
    }

    /// Record how the submission resolved.
    pub(crate) fn conclude_submission(&self, generation: Generation, succeeded: bool) -> bool {
        let mut s = self.lock();
        if s.recognition_gen != generation.0 {
            return false;
        }
        if succeeded {
            s.phase = RecognitionPhase::Liveness(LivenessPhase::Succeeded);
            s.challenge = None;
        } else {
            s.phase = RecognitionPhase::Liveness(LivenessPhase::Failed);
        }
        true
    }
}

/// Exclusion token for recognition submissions. Dropping it clears the
/// flag, unless the flow was torn down (and possibly restarted) since.
pub(crate) struct ProcessingGuard {
    ctx: SessionContext,
    generation: Generation,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        let mut s = self.ctx.lock();
        if s.recognition_gen == self.generation.0 {
            s.processing = false;
        }
    }
}
