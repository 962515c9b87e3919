//! facegate-client — Face verification client.
//!
//! Drives enrollment, periodic recognition and the timed blink-capture
//! liveness challenge against a remote recognition service. Camera,
//! service and presentation are collaborators behind traits.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod enrollment;
pub mod error;
mod liveness;
pub mod notify;
pub mod recognition;
pub mod session;

#[cfg(test)]
mod testing;

pub use api::{FaceService, HttpFaceService, Identity, SessionToken};
pub use config::{Config, FlowSettings, LivenessParams};
pub use coordinator::SessionCoordinator;
pub use enrollment::{EnrollmentFlow, EnrollmentPhase};
pub use error::{FlowError, ValidationError};
pub use notify::{Channel, Notifier, Progress, Prompt, PromptOutcome, Severity};
pub use recognition::RecognitionPoller;
pub use session::{ChallengeOutcome, Ports, SessionSnapshot, View};
