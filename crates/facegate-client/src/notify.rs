//! Presentation port: status messages, prompts and progress indication.

use async_trait::async_trait;

/// Where a status message belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Enrollment,
    Recognition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Processing,
    Success,
    Error,
}

/// A modal prompt. Without a cancel label it is a plain acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub confirm_label: String,
    pub cancel_label: Option<String>,
}

impl Prompt {
    pub fn acknowledge(title: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            confirm_label: "OK".into(),
            cancel_label: None,
        }
    }

    pub fn choice(
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        confirm_label: impl Into<String>,
        cancel_label: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            confirm_label: confirm_label.into(),
            cancel_label: Some(cancel_label.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    Confirmed,
    Cancelled,
}

/// Liveness capture progress indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Hidden,
    Capturing { captured: usize, target: usize },
}

impl Progress {
    /// Completed fraction in [0, 1], or `None` when hidden.
    pub fn fraction(&self) -> Option<f32> {
        match *self {
            Progress::Hidden => None,
            Progress::Capturing { target: 0, .. } => Some(1.0),
            Progress::Capturing { captured, target } => Some(captured as f32 / target as f32),
        }
    }
}

/// Front end the flows report to.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn inform(&self, channel: Channel, message: &str, severity: Severity);

    /// Show `prompt` and wait for the user's answer.
    async fn confirm(&self, prompt: Prompt) -> PromptOutcome;

    fn progress(&self, progress: Progress);

    /// Clear the enrollment name input after a successful enrollment.
    fn reset_name_input(&self) {}
}
