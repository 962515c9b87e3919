//! Liveness challenge: capture a fixed-rate, fixed-duration frame batch and
//! submit it for blink detection, offering retry or abort on failure.

use crate::api::Identity;
use crate::config::LivenessParams;
use crate::error::FlowError;
use crate::notify::{Channel, Progress, Prompt, PromptOutcome, Severity};
use crate::recognition::stop_recognition;
use crate::session::{ChallengeOutcome, Generation, Ports, SessionContext};
use facegate_hw::EncodedImage;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Clone)]
pub(crate) struct LivenessChallenge {
    ctx: SessionContext,
    ports: Ports,
    params: LivenessParams,
}

impl LivenessChallenge {
    pub(crate) fn new(ctx: SessionContext, ports: Ports, params: LivenessParams) -> Self {
        Self { ctx, ports, params }
    }

    /// Start a fresh attempt: empty batch, progress at zero, capture timer
    /// running.
    pub(crate) fn arm(&self, generation: Generation) -> Result<(), FlowError> {
        let target = self.params.target();
        let identity = self.ctx.arm_challenge(generation, target)?;

        let notifier = &self.ports.notifier;
        notifier.progress(Progress::Capturing {
            captured: 0,
            target,
        });
        notifier.inform(
            Channel::Recognition,
            &format!(
                "Please blink naturally for {} seconds...",
                self.params.duration_secs
            ),
            Severity::Processing,
        );
        tracing::info!(user_id = %identity.user_id, target, "liveness challenge armed");

        let challenge = self.clone();
        let timer = tokio::spawn(async move { challenge.run(generation).await });
        self.ctx.set_capture_timer(generation, timer);
        Ok(())
    }

    async fn run(self, generation: Generation) {
        let tick = self.params.tick();
        let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
        // Late ticks are delayed, never bunched, so the batch is exactly `target`.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some((captured, target)) = self.ctx.challenge_progress(generation) else {
                return;
            };
            if captured >= target {
                break;
            }
            let Some(stream) = self.ctx.recognition_stream(generation) else {
                return;
            };
            match facegate_hw::capture(stream.as_ref()).await {
                Ok(image) => match self.ctx.push_frame(generation, image) {
                    Some((captured, target)) => self
                        .ports
                        .notifier
                        .progress(Progress::Capturing { captured, target }),
                    None => return,
                },
                Err(e) => tracing::warn!(error = %e, "failed to capture liveness frame"),
            }
        }

        let Some((frames, identity)) = self.ctx.begin_submission(generation) else {
            return;
        };
        self.submit(generation, frames, identity).await;
    }

    async fn submit(&self, generation: Generation, frames: Vec<EncodedImage>, identity: Identity) {
        let notifier = &self.ports.notifier;
        notifier.inform(
            Channel::Recognition,
            "Analyzing liveness...",
            Severity::Processing,
        );
        tracing::info!(
            frames = frames.len(),
            user_id = %identity.user_id,
            "submitting liveness batch"
        );

        let result = self.ports.service.check_liveness(frames, &identity).await;

        if !self.ctx.is_recognition_current(generation) {
            tracing::debug!("discarding liveness response for a torn-down session");
            return;
        }
        notifier.progress(Progress::Hidden);

        match result {
            Ok(reply) if reply.is_success() => self.succeed(generation, identity).await,
            Ok(reply) => {
                let message = reply.msg.unwrap_or_else(|| "Please try again.".to_string());
                tracing::info!(user_id = %identity.user_id, %message, "liveness rejected");
                self.fail(generation, message).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "liveness request failed");
                self.fail(generation, format!("Liveness check error: {e}")).await;
            }
        }
    }

    async fn succeed(&self, generation: Generation, identity: Identity) {
        if !self.ctx.conclude_submission(generation, true) {
            return;
        }
        tracing::info!(user_id = %identity.user_id, "liveness verified");

        self.ports
            .notifier
            .confirm(Prompt::acknowledge(
                "Liveness Verified!",
                "Authentication successful!",
                Severity::Success,
            ))
            .await;

        if !self.ctx.is_recognition_current(generation) {
            return;
        }
        stop_recognition(&self.ctx, &self.ports);
        self.ctx.publish_outcome(ChallengeOutcome::Verified {
            user_id: identity.user_id,
        });
    }

    async fn fail(&self, generation: Generation, message: String) {
        if !self.ctx.conclude_submission(generation, false) {
            return;
        }

        let answer = self
            .ports
            .notifier
            .confirm(Prompt::choice(
                "Liveness Failed",
                message,
                Severity::Error,
                "Retry",
                "Stop",
            ))
            .await;

        if !self.ctx.is_recognition_current(generation) {
            return;
        }
        match answer {
            PromptOutcome::Confirmed => {
                tracing::info!("retrying liveness challenge");
                if let Err(e) = self.arm(generation) {
                    tracing::warn!(error = %e, "could not re-arm liveness challenge");
                }
            }
            PromptOutcome::Cancelled => {
                self.ports.notifier.inform(
                    Channel::Recognition,
                    "Liveness check stopped.",
                    Severity::Error,
                );
                stop_recognition(&self.ctx, &self.ports);
                self.ctx.publish_outcome(ChallengeOutcome::Aborted);
            }
        }
    }
}
