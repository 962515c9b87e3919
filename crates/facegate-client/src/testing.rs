//! In-memory camera, service and notifier for flow tests.

use crate::api::{ApiError, FaceService, Identity, RecognitionReply, ServiceReply};
use crate::config::FlowSettings;
use crate::coordinator::SessionCoordinator;
use crate::notify::{Channel, Notifier, Progress, Prompt, PromptOutcome, Severity};
use crate::session::Ports;
use async_trait::async_trait;
use facegate_hw::{
    CameraConstraints, CameraError, CameraProvider, CaptureStream, EncodedImage, Frame,
    PixelLayout,
};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub(crate) fn reply<T: DeserializeOwned>(value: serde_json::Value) -> T {
    serde_json::from_value(value).unwrap()
}

pub(crate) struct MockStream {
    sequence: Arc<AtomicU32>,
    released: AtomicBool,
    jitter: bool,
}

impl MockStream {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            sequence: Arc::new(AtomicU32::new(0)),
            released: AtomicBool::new(false),
            jitter: false,
        })
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureStream for MockStream {
    async fn grab(&self) -> Result<Frame, CameraError> {
        if self.is_released() {
            return Err(CameraError::Released);
        }
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        if self.jitter {
            // Some grabs take longer than a 100 ms liveness tick.
            let delay = [0u64, 30, 140][sequence as usize % 3];
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(Frame {
            data: vec![40 + (sequence % 200) as u8; 16],
            width: 4,
            height: 4,
            layout: PixelLayout::Gray8,
            timestamp: Instant::now(),
            sequence,
            is_dark: false,
        })
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct MockCamera {
    failure: Option<String>,
    jitter: bool,
    sequence: Arc<AtomicU32>,
    streams: Mutex<Vec<Arc<MockStream>>>,
}

impl MockCamera {
    pub(crate) fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn with_jitter() -> Self {
        Self {
            jitter: true,
            ..Self::default()
        }
    }

    pub(crate) fn acquisitions(&self) -> usize {
        self.streams.lock().unwrap().len()
    }

    pub(crate) fn last_stream(&self) -> Option<Arc<MockStream>> {
        self.streams.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CameraProvider for MockCamera {
    async fn acquire(
        &self,
        _constraints: CameraConstraints,
    ) -> Result<Arc<dyn CaptureStream>, CameraError> {
        if let Some(message) = &self.failure {
            return Err(CameraError::PermissionDenied(message.clone()));
        }
        let stream = Arc::new(MockStream {
            sequence: Arc::clone(&self.sequence),
            released: AtomicBool::new(false),
            jitter: self.jitter,
        });
        self.streams.lock().unwrap().push(Arc::clone(&stream));
        Ok(stream)
    }
}

#[derive(Default)]
pub(crate) struct MockService {
    enroll: Mutex<VecDeque<Result<ServiceReply, ApiError>>>,
    recognition: Mutex<VecDeque<Result<RecognitionReply, ApiError>>>,
    liveness: Mutex<VecDeque<Result<ServiceReply, ApiError>>>,
    enroll_delay: Mutex<Duration>,
    recognition_delay: Mutex<Duration>,
    liveness_delay: Mutex<Duration>,
    recognize_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    enrolled: Mutex<Vec<String>>,
    liveness_batches: Mutex<Vec<(Vec<u32>, Identity)>>,
}

impl MockService {
    pub(crate) fn push_enroll(&self, reply: Result<ServiceReply, ApiError>) {
        self.enroll.lock().unwrap().push_back(reply);
    }

    pub(crate) fn push_recognition(&self, reply: Result<RecognitionReply, ApiError>) {
        self.recognition.lock().unwrap().push_back(reply);
    }

    pub(crate) fn push_liveness(&self, reply: Result<ServiceReply, ApiError>) {
        self.liveness.lock().unwrap().push_back(reply);
    }

    pub(crate) fn set_enroll_delay(&self, delay: Duration) {
        *self.enroll_delay.lock().unwrap() = delay;
    }

    pub(crate) fn set_recognition_delay(&self, delay: Duration) {
        *self.recognition_delay.lock().unwrap() = delay;
    }

    pub(crate) fn set_liveness_delay(&self, delay: Duration) {
        *self.liveness_delay.lock().unwrap() = delay;
    }

    pub(crate) fn recognize_calls(&self) -> usize {
        self.recognize_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn enrolled(&self) -> Vec<String> {
        self.enrolled.lock().unwrap().clone()
    }

    /// Frame sequence numbers and identity of every liveness submission.
    pub(crate) fn liveness_batches(&self) -> Vec<(Vec<u32>, Identity)> {
        self.liveness_batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl FaceService for MockService {
    async fn add_user(&self, name: &str, _image: EncodedImage) -> Result<ServiceReply, ApiError> {
        self.enrolled.lock().unwrap().push(name.to_string());
        let delay = *self.enroll_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        let next = self.enroll.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(reply(serde_json::json!({"status": "success", "msg": format!("User '{name}' added")})))
        })
    }

    async fn recognize(&self, _image: EncodedImage) -> Result<RecognitionReply, ApiError> {
        self.recognize_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.recognition_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let next = self.recognition.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(reply(serde_json::json!({"status": "failed", "msg": "no match"}))))
    }

    async fn check_liveness(
        &self,
        frames: Vec<EncodedImage>,
        identity: &Identity,
    ) -> Result<ServiceReply, ApiError> {
        let sequences = frames.iter().map(|f| f.sequence).collect();
        self.liveness_batches
            .lock()
            .unwrap()
            .push((sequences, identity.clone()));

        let delay = *self.liveness_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        let next = self.liveness.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(reply(serde_json::json!({"status": "failed", "msg": "no blink detected"})))
        })
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    messages: Mutex<Vec<(Channel, String, Severity)>>,
    prompts: Mutex<Vec<Prompt>>,
    answers: Mutex<VecDeque<PromptOutcome>>,
    prompt_delay: Mutex<Duration>,
    progress: Mutex<Vec<Progress>>,
    name_resets: AtomicUsize,
}

impl RecordingNotifier {
    /// Queue the answer for the next prompt. Unanswered prompts confirm.
    pub(crate) fn answer(&self, outcome: PromptOutcome) {
        self.answers.lock().unwrap().push_back(outcome);
    }

    /// Keep every prompt open for `delay` before answering.
    pub(crate) fn set_prompt_delay(&self, delay: Duration) {
        *self.prompt_delay.lock().unwrap() = delay;
    }

    pub(crate) fn messages(&self) -> Vec<(Channel, String, Severity)> {
        self.messages.lock().unwrap().clone()
    }

    pub(crate) fn has_message(&self, needle: &str) -> bool {
        self.messages().iter().any(|(_, m, _)| m.contains(needle))
    }

    pub(crate) fn last_message(&self, channel: Channel) -> Option<(String, Severity)> {
        self.messages()
            .into_iter()
            .rev()
            .find(|(c, _, _)| *c == channel)
            .map(|(_, m, s)| (m, s))
    }

    pub(crate) fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }

    pub(crate) fn progress(&self) -> Vec<Progress> {
        self.progress.lock().unwrap().clone()
    }

    pub(crate) fn name_resets(&self) -> usize {
        self.name_resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn inform(&self, channel: Channel, message: &str, severity: Severity) {
        self.messages
            .lock()
            .unwrap()
            .push((channel, message.to_string(), severity));
    }

    async fn confirm(&self, prompt: Prompt) -> PromptOutcome {
        self.prompts.lock().unwrap().push(prompt);
        let delay = *self.prompt_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        let answer = self.answers.lock().unwrap().pop_front();
        answer.unwrap_or(PromptOutcome::Confirmed)
    }

    fn progress(&self, progress: Progress) {
        self.progress.lock().unwrap().push(progress);
    }

    fn reset_name_input(&self) {
        self.name_resets.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) struct Harness {
    pub coordinator: SessionCoordinator,
    pub camera: Arc<MockCamera>,
    pub service: Arc<MockService>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_camera(MockCamera::default())
    }

    pub(crate) fn with_camera(camera: MockCamera) -> Self {
        let camera = Arc::new(camera);
        let service = Arc::new(MockService::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let ports = Ports {
            camera: camera.clone(),
            service: service.clone(),
            notifier: notifier.clone(),
        };
        Self {
            coordinator: SessionCoordinator::new(ports, FlowSettings::default()),
            camera,
            service,
            notifier,
        }
    }
}
