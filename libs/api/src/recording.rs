use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Camera as known by the control plane. Read-only for the recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSource {
    pub id: String,
    /// rtsp://, rtsps:// or rtmp:// input
    pub input_url: String,
    /// Overrides the system retention window when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrator_id: Option<String>,
    #[serde(default)]
    pub recording_type: RecordingType,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingType {
    #[default]
    Continuous,
    Motion,
    Manual,
    Scheduled,
}

impl std::fmt::Display for RecordingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingType::Continuous => write!(f, "continuous"),
            RecordingType::Motion => write!(f, "motion"),
            RecordingType::Manual => write!(f, "manual"),
            RecordingType::Scheduled => write!(f, "scheduled"),
        }
    }
}

impl FromStr for RecordingType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "continuous" => Ok(RecordingType::Continuous),
            "motion" => Ok(RecordingType::Motion),
            "manual" => Ok(RecordingType::Manual),
            "scheduled" => Ok(RecordingType::Scheduled),
            _ => Err(()),
        }
    }
}

/// A finalized segment row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSegment {
    pub id: String,
    pub camera_id: String,
    pub filename: String,
    pub start_time: DateTime<Utc>,
    /// Actual duration in milliseconds
    pub duration_ms: i64,
    pub size_bytes: u64,
    pub stream_url: String,
    pub download_url: String,
    pub recording_type: RecordingType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecordingResponse {
    pub camera_id: String,
    /// false when a recording was already running for this camera
    pub started: bool,
    pub status: RecordingStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub camera_id: String,
    pub active: bool,
    /// Stop accepted, in-flight segment still finishing
    pub stopping: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Consecutive failed spawn attempts
    pub retries: u32,
    pub segments_registered: u64,
    pub segments_discarded: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
