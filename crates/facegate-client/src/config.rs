use facegate_hw::{CameraConstraints, DEFAULT_WARMUP_FRAMES};
use std::time::Duration;

/// Client configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the recognition service (default: http://localhost:8888).
    pub api_base: String,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Frames dropped after each stream start for AGC/AE stabilization.
    pub warmup_frames: usize,
    /// Per-request timeout for service calls.
    pub request_timeout_secs: u64,
    /// Camera geometry and flow timing.
    pub flow: FlowSettings,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = CameraConstraints::default();
        Self {
            api_base: std::env::var("FACEGATE_API_BASE")
                .unwrap_or_else(|_| "http://localhost:8888".to_string()),
            camera_device: std::env::var("FACEGATE_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            warmup_frames: env_usize("FACEGATE_WARMUP_FRAMES", DEFAULT_WARMUP_FRAMES),
            request_timeout_secs: env_u64("FACEGATE_REQUEST_TIMEOUT_SECS", 30),
            flow: FlowSettings {
                camera: CameraConstraints {
                    width: env_u32("FACEGATE_CAMERA_WIDTH", defaults.width),
                    height: env_u32("FACEGATE_CAMERA_HEIGHT", defaults.height),
                },
                ..FlowSettings::default()
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Camera geometry and the timers that drive the flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowSettings {
    pub camera: CameraConstraints,
    /// Period of the recognition polling timer.
    pub poll_interval: Duration,
    pub liveness: LivenessParams,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            camera: CameraConstraints::default(),
            poll_interval: Duration::from_millis(2000),
            liveness: LivenessParams::default(),
        }
    }
}

/// Capture rate and duration of one liveness attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessParams {
    pub frames_per_second: u32,
    pub duration_secs: u32,
}

impl Default for LivenessParams {
    fn default() -> Self {
        Self {
            frames_per_second: 10,
            duration_secs: 3,
        }
    }
}

impl LivenessParams {
    /// Number of frames in one batch.
    pub fn target(&self) -> usize {
        (self.frames_per_second * self.duration_secs) as usize
    }

    /// Interval between capture ticks.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.frames_per_second.max(1)))
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_liveness_params() {
        let params = LivenessParams::default();
        assert_eq!(params.target(), 30);
        assert_eq!(params.tick(), Duration::from_millis(100));
    }

    #[test]
    fn test_zero_rate_does_not_divide_by_zero() {
        let params = LivenessParams {
            frames_per_second: 0,
            duration_secs: 3,
        };
        assert_eq!(params.target(), 0);
        assert_eq!(params.tick(), Duration::from_millis(1000));
    }

    #[test]
    fn test_default_flow_settings() {
        let settings = FlowSettings::default();
        assert_eq!(settings.poll_interval, Duration::from_millis(2000));
        assert_eq!(settings.camera, CameraConstraints { width: 640, height: 480 });
    }
}
