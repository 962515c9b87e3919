use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_client::{
    ChallengeOutcome, Config, HttpFaceService, Ports, SessionCoordinator, View,
};
use facegate_hw::{Camera, CameraProvider, V4lCameraProvider, JPEG_QUALITY};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod terminal;

use terminal::TerminalNotifier;

#[derive(Parser)]
#[command(name = "facegate", about = "Face verification client with blink liveness check")]
struct Cli {
    /// Recognition service base URL (overrides FACEGATE_API_BASE)
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// V4L2 camera device (overrides FACEGATE_CAMERA_DEVICE)
    #[arg(long, global = true)]
    device: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll your face under a name
    Enroll {
        /// Name to register
        #[arg(short, long)]
        name: String,
        /// Seconds to wait after the camera starts, to get into position
        #[arg(long, default_value_t = 2)]
        countdown: u64,
    },
    /// Recognize your face, then pass the blink liveness check
    Verify,
    /// List V4L2 capture devices
    Devices,
    /// Capture one JPEG still for camera diagnostics
    Snapshot {
        /// Output file
        #[arg(short, long, default_value = "snapshot.jpg")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(api_base) = cli.api_base {
        config.api_base = api_base;
    }
    if let Some(device) = cli.device {
        config.camera_device = device;
    }

    match cli.command {
        Commands::Enroll { name, countdown } => enroll(&config, &name, countdown).await,
        Commands::Verify => verify(&config).await,
        Commands::Devices => {
            devices();
            Ok(())
        }
        Commands::Snapshot { output } => snapshot(&config, &output).await,
    }
}

fn session(config: &Config) -> Result<SessionCoordinator> {
    let service = HttpFaceService::new(&config.api_base, config.request_timeout())
        .context("failed to create HTTP client")?;
    tracing::info!(
        api = %config.api_base,
        device = %config.camera_device,
        "facegate session starting"
    );
    let ports = Ports {
        camera: Arc::new(camera_provider(config)),
        service: Arc::new(service),
        notifier: Arc::new(TerminalNotifier::new()),
    };
    Ok(SessionCoordinator::new(ports, config.flow))
}

fn camera_provider(config: &Config) -> V4lCameraProvider {
    V4lCameraProvider::new(&config.camera_device).with_warmup_frames(config.warmup_frames)
}

async fn enroll(config: &Config, name: &str, countdown: u64) -> Result<()> {
    let session = session(config)?;
    session.switch_view(View::Enroll);

    let flow = session.enrollment();
    flow.start_camera().await?;
    if countdown > 0 {
        tokio::time::sleep(Duration::from_secs(countdown)).await;
    }
    let result = flow.capture_and_enroll(name).await;
    flow.stop_camera();
    session.shutdown();

    result?;
    Ok(())
}

async fn verify(config: &Config) -> Result<()> {
    let session = session(config)?;
    session.switch_view(View::Recognize);

    let mut outcomes = session.outcomes();
    session.recognition().start().await?;

    let outcome = tokio::select! {
        outcome = outcomes.wait_for(Option::is_some) => outcome.ok().and_then(|o| o.clone()),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            None
        }
    };
    session.shutdown();

    match outcome {
        Some(ChallengeOutcome::Verified { user_id }) => {
            println!("Verified user {user_id}");
            Ok(())
        }
        Some(ChallengeOutcome::Aborted) => bail!("liveness check stopped"),
        None => bail!("verification interrupted"),
    }
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
}

async fn snapshot(config: &Config, output: &Path) -> Result<()> {
    let provider = camera_provider(config);
    let stream = provider
        .acquire(config.flow.camera)
        .await
        .with_context(|| format!("failed to open {}", provider.device_path()))?;

    let frame = stream.grab().await;
    stream.release();
    let frame = frame.context("failed to capture frame")?;

    println!(
        "{}x{} {:?}, seq {}, brightness {:.1}{}",
        frame.width,
        frame.height,
        frame.layout,
        frame.sequence,
        frame.avg_brightness(),
        if frame.is_dark { " (dark)" } else { "" }
    );

    let still = facegate_hw::encode_jpeg(&frame, JPEG_QUALITY)?;
    tokio::fs::write(output, &still.bytes)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Wrote {} ({} bytes)", output.display(), still.bytes.len());
    Ok(())
}
