//! Session coordinator: owns the session context, hands out the flows and
//! performs the teardown on view switches and shutdown.

use crate::config::FlowSettings;
use crate::enrollment::EnrollmentFlow;
use crate::notify::{Channel, Progress, Severity};
use crate::recognition::RecognitionPoller;
use crate::session::{ChallengeOutcome, Ports, SessionContext, SessionSnapshot, View};
use tokio::sync::watch;

pub struct SessionCoordinator {
    ctx: SessionContext,
    ports: Ports,
    settings: FlowSettings,
}

impl SessionCoordinator {
    pub fn new(ports: Ports, settings: FlowSettings) -> Self {
        ports
            .notifier
            .inform(Channel::Enrollment, "Ready to add new users.", Severity::Info);
        ports.notifier.inform(
            Channel::Recognition,
            "Ready for face recognition.",
            Severity::Info,
        );
        Self {
            ctx: SessionContext::new(),
            ports,
            settings,
        }
    }

    pub fn enrollment(&self) -> EnrollmentFlow {
        EnrollmentFlow::new(self.ctx.clone(), self.ports.clone(), self.settings)
    }

    pub fn recognition(&self) -> RecognitionPoller {
        RecognitionPoller::new(self.ctx.clone(), self.ports.clone(), self.settings)
    }

    /// Switch to `view`, tearing down whatever the previous view left running.
    pub fn switch_view(&self, view: View) {
        self.teardown();
        self.ctx.set_view(view);
        tracing::debug!(?view, "switched view");
    }

    /// Final teardown before the front end goes away.
    pub fn shutdown(&self) {
        self.teardown();
        tracing::info!("session shut down");
    }

    /// Stop every stream and timer and clear all session data. Idempotent.
    pub fn teardown(&self) {
        self.ctx.teardown();
        self.ports.notifier.progress(Progress::Hidden);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.ctx.snapshot()
    }

    /// Terminal outcomes of liveness challenges.
    pub fn outcomes(&self) -> watch::Receiver<Option<ChallengeOutcome>> {
        self.ctx.outcomes()
    }

    #[cfg(test)]
    pub(crate) fn context(&self) -> &SessionContext {
        &self.ctx
    }

    #[cfg(test)]
    pub(crate) fn ports(&self) -> &Ports {
        &self.ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RecognitionPhase;
    use crate::testing::{reply, Harness};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_new_reports_ready_on_both_channels() {
        let h = Harness::new();
        assert_eq!(
            h.notifier.messages(),
            vec![
                (Channel::Enrollment, "Ready to add new users.".to_string(), Severity::Info),
                (Channel::Recognition, "Ready for face recognition.".to_string(), Severity::Info),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_view_stops_both_flows() {
        let h = Harness::new();
        h.coordinator.enrollment().start_camera().await.unwrap();
        let enroll_stream = h.camera.last_stream().unwrap();
        h.coordinator.recognition().start().await.unwrap();
        let rec_stream = h.camera.last_stream().unwrap();

        h.coordinator.switch_view(View::Recognize);

        let snap = h.coordinator.snapshot();
        assert_eq!(snap.view, Some(View::Recognize));
        assert!(enroll_stream.is_released());
        assert!(rec_stream.is_released());
        assert!(!snap.enrollment_camera);
        assert!(!snap.recognition_camera);
        assert!(!snap.polling);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.service.recognize_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_is_idempotent_mid_challenge() {
        let h = Harness::new();
        h.service.push_recognition(Ok(reply(json!({
            "status": "success",
            "user_id": "u1",
            "session_token": "tok-abc",
        }))));
        h.coordinator.recognition().start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2_550)).await;
        assert!(h.coordinator.snapshot().frames_buffered > 0);

        h.coordinator.teardown();
        let once = h.coordinator.snapshot();
        h.coordinator.teardown();
        let twice = h.coordinator.snapshot();

        assert_eq!(once, twice);
        assert_eq!(once.phase, RecognitionPhase::Idle);
        assert_eq!(once.frames_buffered, 0);
        assert!(!once.has_session_token);
        assert!(!once.processing);
        assert!(!once.capturing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_with_nothing_active() {
        let h = Harness::new();
        let before = h.coordinator.snapshot();
        h.coordinator.shutdown();
        h.coordinator.shutdown();
        assert_eq!(h.coordinator.snapshot(), before);
    }
}
