//! Recognition polling: submit one frame every poll interval until the
//! service identifies the face, then hand off to the liveness challenge.

use crate::api::Identity;
use crate::config::FlowSettings;
use crate::error::FlowError;
use crate::liveness::LivenessChallenge;
use crate::notify::{Channel, Progress, Severity};
use crate::session::{Generation, Ports, ProcessingGuard, SessionContext};
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Clone)]
pub struct RecognitionPoller {
    ctx: SessionContext,
    ports: Ports,
    settings: FlowSettings,
}

impl RecognitionPoller {
    pub(crate) fn new(ctx: SessionContext, ports: Ports, settings: FlowSettings) -> Self {
        Self {
            ctx,
            ports,
            settings,
        }
    }

    /// Acquire the camera and start the polling timer.
    pub async fn start(&self) -> Result<(), FlowError> {
        self.ctx.teardown_recognition();

        let stream = match self.ports.camera.acquire(self.settings.camera).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "recognition camera unavailable");
                let err = FlowError::Device(e);
                self.ports
                    .notifier
                    .inform(Channel::Recognition, &err.to_string(), Severity::Error);
                return Err(err);
            }
        };

        let generation = self.ctx.install_recognition_stream(stream);
        self.ports.notifier.inform(
            Channel::Recognition,
            "Starting automatic recognition...",
            Severity::Processing,
        );

        let poller = self.clone();
        let timer = tokio::spawn(async move { poller.run_polling(generation).await });
        self.ctx.set_poll_timer(generation, timer);

        tracing::info!(
            interval_ms = self.settings.poll_interval.as_millis() as u64,
            "recognition polling started"
        );
        Ok(())
    }

    /// Tear down the recognition flow. Idempotent.
    pub fn stop(&self) {
        stop_recognition(&self.ctx, &self.ports);
    }

    async fn run_polling(self, generation: Generation) {
        let period = self.settings.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if !self.ctx.is_recognition_current(generation) {
                break;
            }
            let Some(guard) = self.ctx.try_begin_processing(generation) else {
                tracing::trace!("recognition attempt still in flight; tick dropped");
                continue;
            };
            let poller = self.clone();
            tokio::spawn(async move { poller.attempt(generation, guard).await });
        }
    }

    async fn attempt(self, generation: Generation, guard: ProcessingGuard) {
        match self.recognize_once(generation).await {
            Ok(Some(identity)) => {
                tracing::info!(user_id = %identity.user_id, "face recognized");
            }
            Ok(None) | Err(FlowError::Stale) => {}
            Err(e) => tracing::debug!(error = %e, "recognition attempt failed"),
        }
        drop(guard);
    }

    /// One capture-and-submit round. Returns the identity on a match.
    async fn recognize_once(&self, generation: Generation) -> Result<Option<Identity>, FlowError> {
        let Some(stream) = self.ctx.recognition_stream(generation) else {
            return Ok(None);
        };
        let notifier = &self.ports.notifier;

        let result = async {
            let image = facegate_hw::capture(stream.as_ref()).await?;
            if !self.ctx.is_recognition_current(generation) {
                tracing::debug!("dropping frame captured for a torn-down session");
                return Err(FlowError::Stale);
            }
            notifier.inform(
                Channel::Recognition,
                "Processing recognition...",
                Severity::Processing,
            );
            Ok::<_, FlowError>(self.ports.service.recognize(image).await?)
        }
        .await;

        if !self.ctx.is_recognition_current(generation) {
            tracing::debug!("discarding recognition response for a torn-down session");
            return Err(FlowError::Stale);
        }

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "recognition request failed");
                notifier.inform(
                    Channel::Recognition,
                    &format!("Recognition error: {e}"),
                    Severity::Error,
                );
                return Err(e);
            }
        };

        if !reply.is_success() {
            let message = reply.msg.unwrap_or_else(|| "Face not recognized.".to_string());
            notifier.inform(Channel::Recognition, &message, Severity::Error);
            return Err(FlowError::Service(message));
        }

        let Some(identity) = reply.identity() else {
            let message = "Recognition response is missing the user id or session token.";
            tracing::warn!("recognition success without identity");
            notifier.inform(Channel::Recognition, message, Severity::Error);
            return Err(FlowError::Service(message.to_string()));
        };

        if !self.ctx.accept_identity(generation, identity.clone()) {
            return Err(FlowError::Stale);
        }
        notifier.inform(
            Channel::Recognition,
            &format!(
                "Recognition successful! User ID: {}. Starting liveness check...",
                identity.user_id
            ),
            Severity::Success,
        );

        LivenessChallenge::new(self.ctx.clone(), self.ports.clone(), self.settings.liveness)
            .arm(generation)?;
        Ok(Some(identity))
    }
}

/// The single recognition teardown path, shared by `stop()`, challenge
/// completion and challenge abort.
pub(crate) fn stop_recognition(ctx: &SessionContext, ports: &Ports) {
    ctx.teardown_recognition();
    ports.notifier.progress(Progress::Hidden);
    ports
        .notifier
        .inform(Channel::Recognition, "Recognition stopped.", Severity::Info);
    tracing::info!("recognition stopped");
}
