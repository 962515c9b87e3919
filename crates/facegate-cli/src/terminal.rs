//! Terminal front end: status lines on stdout, a one-line progress bar and
//! prompts answered on stdin.

use async_trait::async_trait;
use facegate_client::{Channel, Notifier, Progress, Prompt, PromptOutcome, Severity};
use std::io::{BufRead, BufReader, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Mutex};

const BAR_WIDTH: usize = 30;

pub struct TerminalNotifier {
    answers: Mutex<mpsc::Receiver<String>>,
    progress_visible: AtomicBool,
}

impl TerminalNotifier {
    pub fn new() -> Self {
        Self::with_input(BufReader::new(std::io::stdin()))
    }

    /// Answer prompts from `input` instead of stdin.
    pub fn with_input(input: impl BufRead + Send + 'static) -> Self {
        Self {
            answers: Mutex::new(spawn_line_reader(input)),
            progress_visible: AtomicBool::new(false),
        }
    }

    /// Terminate an in-place progress line before printing anything else.
    fn end_progress_line(&self) {
        if self.progress_visible.swap(false, Ordering::SeqCst) {
            println!();
        }
    }

    async fn read_answer(&self) -> Option<String> {
        self.answers.lock().await.recv().await
    }
}

/// Read lines on a detached OS thread. A blocked read there never holds up
/// runtime shutdown, so Ctrl-C exits even while a prompt is waiting.
fn spawn_line_reader(input: impl BufRead + Send + 'static) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    let spawned = std::thread::Builder::new()
        .name("facegate-stdin".into())
        .spawn(move || {
            for line in input.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to read from stdin");
                        return;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        // The receiver sees a closed channel and every prompt cancels.
        tracing::warn!(error = %e, "failed to spawn stdin reader");
    }
    rx
}

#[async_trait]
impl Notifier for TerminalNotifier {
    fn inform(&self, channel: Channel, message: &str, severity: Severity) {
        self.end_progress_line();
        let tag = match severity {
            Severity::Info => "info",
            Severity::Processing => "....",
            Severity::Success => " ok ",
            Severity::Error => "fail",
        };
        let scope = match channel {
            Channel::Enrollment => "enroll",
            Channel::Recognition => "verify",
        };
        println!("[{tag}] {scope}: {message}");
    }

    async fn confirm(&self, prompt: Prompt) -> PromptOutcome {
        self.end_progress_line();
        println!();
        println!("== {} ==", prompt.title);
        println!("{}", prompt.message);

        let Some(cancel_label) = prompt.cancel_label else {
            print!("Press Enter to continue ");
            let _ = std::io::stdout().flush();
            let _ = self.read_answer().await;
            return PromptOutcome::Confirmed;
        };

        loop {
            print!("[{}] / [{}]? ", prompt.confirm_label, cancel_label);
            let _ = std::io::stdout().flush();

            // EOF on stdin counts as cancel.
            let Some(answer) = self.read_answer().await else {
                return PromptOutcome::Cancelled;
            };
            match parse_answer(&answer, &prompt.confirm_label, &cancel_label) {
                Some(outcome) => return outcome,
                None => println!("Please answer {} or {}.", prompt.confirm_label, cancel_label),
            }
        }
    }

    fn progress(&self, progress: Progress) {
        match render_bar(progress) {
            None => self.end_progress_line(),
            Some(bar) => {
                print!("\r  {bar}");
                let _ = std::io::stdout().flush();
                self.progress_visible.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// Match an answer against the full label or its first letter, case-insensitively.
fn parse_answer(answer: &str, confirm: &str, cancel: &str) -> Option<PromptOutcome> {
    let answer = answer.trim().to_lowercase();
    if answer.is_empty() {
        return None;
    }
    let matches = |label: &str| {
        let label = label.to_lowercase();
        answer == label || label.starts_with(&answer)
    };
    if matches(confirm) {
        Some(PromptOutcome::Confirmed)
    } else if matches(cancel) {
        Some(PromptOutcome::Cancelled)
    } else {
        None
    }
}

fn render_bar(progress: Progress) -> Option<String> {
    let Progress::Capturing { captured, target } = progress else {
        return None;
    };
    let fraction = progress.fraction()?.clamp(0.0, 1.0);
    let filled = ((fraction * BAR_WIDTH as f32).round() as usize).min(BAR_WIDTH);
    Some(format!(
        "blink: [{}{}] {captured}/{target}",
        "#".repeat(filled),
        " ".repeat(BAR_WIDTH - filled)
    ))
}
