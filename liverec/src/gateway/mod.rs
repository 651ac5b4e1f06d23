use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use api::recording::{CameraSource, RecordingSegment, RecordingType};

use crate::config::Database as DatabaseConfig;

mod database;
mod memory;

pub use database::DatabaseMetadata;
pub use memory::MemoryMetadata;

/// Row about to be registered by the finalizer
#[derive(Debug, Clone, PartialEq)]
pub struct NewSegment {
    pub camera_id: String,
    pub filename: String,
    pub start_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub size_bytes: u64,
    pub stream_url: String,
    pub download_url: String,
    pub recording_type: RecordingType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraRetention {
    pub camera_id: String,
    /// `None` falls back to the system default
    pub retention_days: Option<u32>,
}

/// Recording rows and camera retention settings
#[async_trait]
pub trait MetadataGateway: Send + Sync {
    async fn create_segment(&self, segment: NewSegment) -> Result<RecordingSegment>;

    /// All segments of a camera, oldest first
    async fn segments(&self, camera_id: &str) -> Result<Vec<RecordingSegment>>;

    /// Segments that started strictly before `cutoff`, oldest first
    async fn segments_before(
        &self,
        camera_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RecordingSegment>>;

    /// Returns whether a row was removed
    async fn delete_segment(&self, id: &str) -> Result<bool>;

    async fn upsert_camera(&self, camera: &CameraSource) -> Result<()>;

    /// Every camera with settings or segments
    async fn camera_retention(&self) -> Result<Vec<CameraRetention>>;
}

pub async fn connect(cfg: &DatabaseConfig) -> Result<Arc<dyn MetadataGateway>> {
    if cfg.url == "memory" {
        tracing::warn!("[metadata] using in-process store, rows are lost on restart");
        return Ok(Arc::new(MemoryMetadata::new()));
    }
    Ok(Arc::new(DatabaseMetadata::connect(cfg).await?))
}
