//! Enrollment: register one named user from a single captured frame.

use crate::config::FlowSettings;
use crate::error::{FlowError, ValidationError};
use crate::notify::{Channel, Severity};
use crate::session::{Ports, SessionContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentPhase {
    Idle,
    CameraActive,
}

#[derive(Clone)]
pub struct EnrollmentFlow {
    ctx: SessionContext,
    ports: Ports,
    settings: FlowSettings,
}

impl EnrollmentFlow {
    pub(crate) fn new(ctx: SessionContext, ports: Ports, settings: FlowSettings) -> Self {
        Self {
            ctx,
            ports,
            settings,
        }
    }

    pub fn phase(&self) -> EnrollmentPhase {
        if self.ctx.snapshot().enrollment_camera {
            EnrollmentPhase::CameraActive
        } else {
            EnrollmentPhase::Idle
        }
    }

    /// Acquire the enrollment camera, replacing any stream already held.
    pub async fn start_camera(&self) -> Result<(), FlowError> {
        self.ctx.teardown_enrollment();

        match self.ports.camera.acquire(self.settings.camera).await {
            Ok(stream) => {
                self.ctx.install_enroll_stream(stream);
                tracing::info!("enrollment camera started");
                self.inform(
                    "Camera started. Position your face and click capture.",
                    Severity::Info,
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "enrollment camera unavailable");
                let err = FlowError::Device(e);
                self.inform(&err.to_string(), Severity::Error);
                Err(err)
            }
        }
    }

    /// Capture one frame and enroll it under `name`.
    ///
    /// Returns the service's confirmation message. The camera stays on
    /// whatever the outcome.
    pub async fn capture_and_enroll(&self, name: &str) -> Result<String, FlowError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(self.reject(ValidationError::EmptyName));
        }
        let Some((stream, generation)) = self.ctx.enroll_stream() else {
            return Err(self.reject(ValidationError::CameraNotStarted));
        };

        self.inform("Capturing and processing...", Severity::Processing);

        let result = async {
            let image = facegate_hw::capture(stream.as_ref()).await?;
            if !self.ctx.is_enroll_current(generation) {
                return Err(FlowError::Stale);
            }
            Ok::<_, FlowError>(self.ports.service.add_user(name, image).await?)
        }
        .await;

        if !self.ctx.is_enroll_current(generation) {
            tracing::debug!(name, "discarding enrollment response for a stopped camera");
            return Err(FlowError::Stale);
        }

        match result {
            Ok(reply) if reply.is_success() => {
                let message = reply.msg.unwrap_or_else(|| format!("User '{name}' added"));
                tracing::info!(name, "user enrolled");
                self.inform(&message, Severity::Success);
                self.ports.notifier.reset_name_input();
                Ok(message)
            }
            Ok(reply) => {
                let message = reply.msg.unwrap_or_else(|| "Enrollment failed.".to_string());
                tracing::info!(name, %message, "enrollment rejected");
                self.inform(&message, Severity::Error);
                Err(FlowError::Service(message))
            }
            Err(e) => {
                tracing::warn!(name, error = %e, "enrollment request failed");
                self.inform(&format!("Error adding user: {e}"), Severity::Error);
                Err(e)
            }
        }
    }

    /// Release the enrollment camera. Idempotent.
    pub fn stop_camera(&self) {
        if self.ctx.teardown_enrollment() {
            tracing::info!("enrollment camera stopped");
        }
        self.inform("Camera stopped.", Severity::Info);
    }

    fn reject(&self, err: ValidationError) -> FlowError {
        self.inform(&err.to_string(), Severity::Error);
        err.into()
    }

    fn inform(&self, message: &str, severity: Severity) {
        self.ports
            .notifier
            .inform(Channel::Enrollment, message, severity);
    }
}
