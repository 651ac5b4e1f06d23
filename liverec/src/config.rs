use std::path::{Component, Path, PathBuf};
use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use api::recording::CameraSource;
use api::stream::QualityProfile;
use serde::{Deserialize, Serialize};

use crate::stream::quality;

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub worker: Worker,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub storage: storage::StorageConfig,
    #[serde(default)]
    pub database: Database,
    /// Cameras recorded continuously from boot
    #[serde(default)]
    pub cameras: Vec<CameraSource>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Http {
    #[serde(default = "default_http_listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Public address segment and manifest URLs are derived from
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    #[serde(default = "default_encoder_binary")]
    pub binary: String,
    #[serde(default = "default_rtsp_transport")]
    pub rtsp_transport: String,
    #[serde(default = "default_encoder_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "default_recordings_root")]
    pub root: String,
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u64,
    /// Extra time before a segment encoder is force-killed
    #[serde(default = "default_kill_margin_seconds")]
    pub kill_margin_seconds: u64,
    /// Time a stopped encoder gets to flush before it is killed
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Below this a segment is treated as a corrupt artifact
    #[serde(default = "default_min_segment_bytes")]
    pub min_segment_bytes: u64,
    /// Above this a segment is kept even on a non-zero exit
    #[serde(default = "default_substantial_segment_bytes")]
    pub substantial_segment_bytes: u64,
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Copy accepted segments into the storage backend and drop the local file
    #[serde(default)]
    pub upload: bool,
    #[serde(default)]
    pub remove_discarded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_streams_root")]
    pub root: String,
    #[serde(default = "default_max_streams")]
    pub max_streams: usize,
    #[serde(default = "default_quality")]
    pub default_quality: String,
    #[serde(default = "default_hls_time")]
    pub hls_time: u32,
    #[serde(default = "default_hls_list_size")]
    pub hls_list_size: u32,
    /// Manifest older than this is reported stale
    #[serde(default = "default_fresh_seconds")]
    pub fresh_seconds: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_manifest_poll_attempts")]
    pub manifest_poll_attempts: u32,
    /// Added to, or replacing, the built-in profiles by id
    #[serde(default)]
    pub profiles: Vec<QualityProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_retention_days")]
    pub default_days: u32,
    #[serde(default = "default_min_days")]
    pub min_days: u32,
    #[serde(default = "default_max_days")]
    pub max_days: u32,
    /// UTC hour the daily sweep runs at
    #[serde(default = "default_daily_at_hour")]
    pub daily_at_hour: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    /// `memory` keeps metadata in-process
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

fn default_http_listen() -> SocketAddr {
    SocketAddr::from_str(&format!(
        "0.0.0.0:{}",
        env::var("PORT").unwrap_or(String::from("8080"))
    ))
    .expect("invalid listen address")
}

fn default_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    })
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_encoder_binary() -> String {
    "ffmpeg".to_string()
}

fn default_rtsp_transport() -> String {
    "tcp".to_string()
}

fn default_encoder_log_level() -> String {
    "warning".to_string()
}

fn default_recordings_root() -> String {
    "./recordings".to_string()
}

fn default_segment_seconds() -> u64 {
    300
}

fn default_kill_margin_seconds() -> u64 {
    60
}

fn default_stop_grace_seconds() -> u64 {
    10
}

fn default_retry_backoff_ms() -> u64 {
    5000
}

fn default_min_segment_bytes() -> u64 {
    100 * 1024
}

fn default_substantial_segment_bytes() -> u64 {
    1024 * 1024
}

fn default_extension() -> String {
    "mp4".to_string()
}

fn default_streams_root() -> String {
    "./streams".to_string()
}

fn default_max_streams() -> usize {
    4
}

fn default_quality() -> String {
    "medium".to_string()
}

fn default_hls_time() -> u32 {
    2
}

fn default_hls_list_size() -> u32 {
    6
}

fn default_fresh_seconds() -> u64 {
    10
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_manifest_poll_attempts() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    7
}

fn default_min_days() -> u32 {
    1
}

fn default_max_days() -> u32 {
    3650
}

fn default_daily_at_hour() -> u32 {
    3
}

fn default_database_url() -> String {
    "sqlite://livenvr.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for Http {
    fn default() -> Self {
        Self {
            listen: default_http_listen(),
            cors: Default::default(),
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: Default::default(),
        }
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            binary: default_encoder_binary(),
            rtsp_transport: default_rtsp_transport(),
            log_level: default_encoder_log_level(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            root: default_recordings_root(),
            segment_seconds: default_segment_seconds(),
            kill_margin_seconds: default_kill_margin_seconds(),
            stop_grace_seconds: default_stop_grace_seconds(),
            retry_backoff_ms: default_retry_backoff_ms(),
            min_segment_bytes: default_min_segment_bytes(),
            substantial_segment_bytes: default_substantial_segment_bytes(),
            extension: default_extension(),
            upload: false,
            remove_discarded: false,
        }
    }
}

impl RecorderConfig {
    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(self.segment_seconds)
    }

    pub fn kill_margin(&self) -> Duration {
        Duration::from_secs(self.kill_margin_seconds)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            root: default_streams_root(),
            max_streams: default_max_streams(),
            default_quality: default_quality(),
            hls_time: default_hls_time(),
            hls_list_size: default_hls_list_size(),
            fresh_seconds: default_fresh_seconds(),
            settle_ms: default_settle_ms(),
            manifest_poll_attempts: default_manifest_poll_attempts(),
            profiles: vec![],
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_days: default_retention_days(),
            min_days: default_min_days(),
            max_days: default_max_days(),
            daily_at_hour: default_daily_at_hour(),
        }
    }
}

impl RetentionConfig {
    pub fn check_days(&self, days: u32) -> anyhow::Result<()> {
        if days < self.min_days || days > self.max_days {
            anyhow::bail!(
                "retention of {} days outside [{}, {}]",
                days,
                self.min_days,
                self.max_days
            );
        }
        Ok(())
    }
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let rec = &self.recorder;
        if rec.segment_seconds == 0 {
            anyhow::bail!("recorder.segment_seconds must be positive");
        }
        if rec.min_segment_bytes > rec.substantial_segment_bytes {
            anyhow::bail!(
                "recorder.min_segment_bytes ({}) exceeds substantial_segment_bytes ({})",
                rec.min_segment_bytes,
                rec.substantial_segment_bytes
            );
        }
        if rec.extension.is_empty() || rec.extension.contains(['/', '.']) {
            anyhow::bail!("recorder.extension must be a bare extension like mp4");
        }
        let same_root = match &self.storage {
            storage::StorageConfig::Fs { root } => same_dir(root, &rec.root),
            _ => false,
        };
        if !rec.upload && !same_root {
            anyhow::bail!(
                "recorder.upload = false needs an fs storage rooted at recorder.root ({})",
                rec.root
            );
        }
        if rec.upload && same_root {
            anyhow::bail!("recorder.upload = true needs storage outside recorder.root");
        }

        let streaming = &self.streaming;
        if streaming.max_streams == 0 {
            anyhow::bail!("streaming.max_streams must be positive");
        }
        if streaming.hls_time == 0 {
            anyhow::bail!("streaming.hls_time must be positive");
        }
        let profiles = quality::profiles(&streaming.profiles);
        if quality::find(&profiles, &streaming.default_quality).is_none() {
            anyhow::bail!(
                "streaming.default_quality {} is not a known profile",
                streaming.default_quality
            );
        }

        let retention = &self.retention;
        if retention.min_days == 0 || retention.min_days > retention.max_days {
            anyhow::bail!(
                "retention bounds [{}, {}] are invalid",
                retention.min_days,
                retention.max_days
            );
        }
        retention.check_days(retention.default_days)?;
        if retention.daily_at_hour > 23 {
            anyhow::bail!("retention.daily_at_hour must be within 0..=23");
        }

        for camera in &self.cameras {
            crate::recorder::validate_camera(camera, retention)
                .map_err(|e| anyhow::anyhow!("camera config error: {}", e))?;
        }
        Ok(())
    }
}

fn same_dir(a: &str, b: &str) -> bool {
    let norm = |p: &str| {
        Path::new(p)
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect::<PathBuf>()
    };
    norm(a) == norm(b)
}
