use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use api::recording::{CameraSource, RecordingSegment};

use super::{CameraRetention, MetadataGateway, NewSegment};

#[derive(Default)]
pub struct MemoryMetadata {
    segments: RwLock<HashMap<String, RecordingSegment>>,
    cameras: RwLock<HashMap<String, CameraSource>>,
}

impl MemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    async fn select<F>(&self, filter: F) -> Vec<RecordingSegment>
    where
        F: Fn(&RecordingSegment) -> bool,
    {
        let mut found: Vec<_> = self
            .segments
            .read()
            .await
            .values()
            .filter(|s| filter(s))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.start_time);
        found
    }
}

#[async_trait]
impl MetadataGateway for MemoryMetadata {
    async fn create_segment(&self, segment: NewSegment) -> Result<RecordingSegment> {
        let row = RecordingSegment {
            id: Uuid::new_v4().to_string(),
            camera_id: segment.camera_id,
            filename: segment.filename,
            start_time: segment.start_time,
            duration_ms: segment.duration_ms,
            size_bytes: segment.size_bytes,
            stream_url: segment.stream_url,
            download_url: segment.download_url,
            recording_type: segment.recording_type,
        };
        self.segments
            .write()
            .await
            .insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn segments(&self, camera_id: &str) -> Result<Vec<RecordingSegment>> {
        Ok(self.select(|s| s.camera_id == camera_id).await)
    }

    async fn segments_before(
        &self,
        camera_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RecordingSegment>> {
        Ok(self
            .select(|s| s.camera_id == camera_id && s.start_time < cutoff)
            .await)
    }

    async fn delete_segment(&self, id: &str) -> Result<bool> {
        Ok(self.segments.write().await.remove(id).is_some())
    }

    async fn upsert_camera(&self, camera: &CameraSource) -> Result<()> {
        self.cameras
            .write()
            .await
            .insert(camera.id.clone(), camera.clone());
        Ok(())
    }

    async fn camera_retention(&self) -> Result<Vec<CameraRetention>> {
        let mut retention: HashMap<String, Option<u32>> = self
            .cameras
            .read()
            .await
            .values()
            .map(|c| (c.id.clone(), c.retention_days))
            .collect();
        for segment in self.segments.read().await.values() {
            retention.entry(segment.camera_id.clone()).or_insert(None);
        }
        Ok(retention
            .into_iter()
            .map(|(camera_id, retention_days)| CameraRetention {
                camera_id,
                retention_days,
            })
            .collect())
    }
}
