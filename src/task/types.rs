use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

/// Total prompt budget enforced by the provider (user text plus the quality
/// suffix appended at submission time).
pub const MAX_PROMPT_LENGTH: usize = 4000;

/// Interval between provider polls (worker) and status polls (client).
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Worker gives up after this many polls (~15 minutes of wall time).
pub const MAX_POLL_ATTEMPTS: u32 = 180;

/// Consecutive poll transport errors before the worker declares the
/// connection lost.
pub const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 15;

/// The client poller tolerates more consecutive errors than the worker; its
/// failure domain (browser/LAN) is noisier than server-to-provider.
pub const CLIENT_MAX_CONSECUTIVE_ERRORS: u32 = 20;

pub const DEFAULT_VIDEO_SIZE: &str = "1920x1080";

/// Fixed quality-control instructions appended to every user prompt before
/// submission. Counted against `MAX_PROMPT_LENGTH`.
pub const QUALITY_PROMPT_SUFFIX: &str = "STRICT: Frame 1 identical to source. No pixel modification. Match luminance, contrast, color exactly. No auto-levels, auto-contrast, auto-color. No post-processing, frame enhancement, temporal denoising. CRITICAL: Preserve grain structure, noise pattern, texture pixel-for-pixel. Keep film grain, digital noise, compression artifacts, sensor noise, JPEG artifacts. Authentic skin texture: visible pores, fine lines, blemishes, freckles exactly as original. No smoothing, denoising, enhancing, upscaling, beauty filters. Raw sensor noise, natural eye color, realistic teeth. Preserve lighting, shadows, highlights, color temperature, white balance. Shot on iPhone 15 Pro standard mode, no HDR, raw output with defects. Natural handheld movement with micro-jitter, breathing motion. Camera movements smooth with organic acceleration/deceleration, realistic easing: slow start, smooth middle, gentle stop. No mechanical/robotic camera. ABSOLUTE ZERO SMOOTHING: Every grain/noise pixel transfers identically. Grain flickers naturally between frames maintaining density. JPEG artifacts, banding, color noise visible every frame. No temporal stabilization, frame blending, noise reduction. Each frame as noisy as source. Paused frame indistinguishable from original. Realistic hand-to-clothing interaction with fabric deformation, finger grip, fabric tension. Apply realistic physics. AVOID: smoothing, denoising, beauty filters, auto-enhancement, grain removal, plastic skin, temporal smoothing, fake motion, stiff camera, processed video.";

/// Map a resolution label to the provider size string.
pub fn resolution_size(label: &str) -> &'static str {
    match label {
        "720p" => "1280x720",
        _ => DEFAULT_VIDEO_SIZE,
    }
}

/// Expected wall time for a generation job, used to estimate progress.
/// Longer clips take the provider proportionally longer.
pub fn expected_job_duration(video_seconds: u32) -> Duration {
    if video_seconds >= 10 {
        Duration::from_secs(300)
    } else {
        Duration::from_secs(180)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Processing,
    Success,
    Fail,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Fail => "FAIL",
            TaskStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Settings echoed back with the task so the final result can be associated
/// with its inputs without a second round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSettings {
    pub duration: u32,
    pub fps: u32,
    pub resolution: String,
    pub quality: String,
    pub match_original_resolution: bool,
    pub enable_quality_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            duration: 5,
            fps: 30,
            resolution: "1080p".to_string(),
            quality: "quality".to_string(),
            match_original_resolution: true,
            enable_quality_mode: false,
            seed: None,
        }
    }
}

/// One in-flight or completed generation request. The store owns the
/// canonical record; the worker and the endpoints read and conditionally
/// overwrite it through the store, never through a private copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<VideoSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    pub fn new(id: String, image_url: String, prompt: String, settings: VideoSettings) -> Self {
        Self {
            id,
            status: TaskStatus::Processing,
            progress: 0,
            start_time: Utc::now(),
            image_url: Some(image_url),
            prompt: Some(prompt),
            settings: Some(settings),
            video_url: None,
            error: None,
        }
    }
}

/// Everything the worker needs to drive one provider job. Built by the
/// submission endpoint, carried through the scheduler queue.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub task_id: String,
    pub image_url: String,
    pub prompt: String,
    pub duration: u32,
    pub fps: u32,
    pub video_size: String,
    pub match_original_resolution: bool,
    pub enable_quality_mode: bool,
    pub seed: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Processing).unwrap(),
            "\"PROCESSING\""
        );
        assert_eq!(
            serde_json::from_str::<TaskStatus>("\"CANCELLED\"").unwrap(),
            TaskStatus::Cancelled
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Fail.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_resolution_lookup() {
        assert_eq!(resolution_size("720p"), "1280x720");
        assert_eq!(resolution_size("1080p"), "1920x1080");
        assert_eq!(resolution_size("anything-else"), DEFAULT_VIDEO_SIZE);
    }

    #[test]
    fn test_expected_duration_scales_with_length() {
        assert_eq!(expected_job_duration(5), Duration::from_secs(180));
        assert_eq!(expected_job_duration(10), Duration::from_secs(300));
    }

    #[test]
    fn test_quality_suffix_fits_budget() {
        // the fixed suffix must leave room for user text
        assert!(QUALITY_PROMPT_SUFFIX.len() < MAX_PROMPT_LENGTH / 2);
    }
}
