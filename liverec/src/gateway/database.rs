use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use tracing::info;
use uuid::Uuid;

use api::recording::{CameraSource, RecordingSegment};

use super::{CameraRetention, MetadataGateway, NewSegment};
use crate::config::Database as DatabaseConfig;
use crate::entity::cameras::{self, Entity as Cameras};
use crate::entity::recording_segments::{self, Entity as RecordingSegments};
use crate::migration::{Migrator, MigratorTrait};

/// Metadata persisted through sea-orm
#[derive(Clone)]
pub struct DatabaseMetadata {
    connection: DatabaseConnection,
}

impl DatabaseMetadata {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut opt = ConnectOptions::new(&config.url);
        opt.max_connections(config.max_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(3600))
            .sqlx_logging(false);

        info!("[metadata] connecting to database: {}", config.url);
        let connection = Database::connect(opt).await?;

        info!("[metadata] running database migrations");
        Migrator::up(&connection, None).await?;

        Ok(Self { connection })
    }
}

fn now() -> DateTime<FixedOffset> {
    DateTime::<FixedOffset>::from(Utc::now())
}

fn to_segment(model: recording_segments::Model) -> Result<RecordingSegment> {
    let start_time = DateTime::<Utc>::from_timestamp_micros(model.start_ts)
        .ok_or_else(|| anyhow!("segment {} has invalid start_ts {}", model.id, model.start_ts))?;
    Ok(RecordingSegment {
        id: model.id.to_string(),
        camera_id: model.camera_id,
        filename: model.filename,
        start_time,
        duration_ms: model.duration_ms,
        size_bytes: u64::try_from(model.size_bytes).unwrap_or_default(),
        stream_url: model.stream_url,
        download_url: model.download_url,
        recording_type: model.recording_type.parse().unwrap_or_default(),
    })
}

fn to_segments(models: Vec<recording_segments::Model>) -> Result<Vec<RecordingSegment>> {
    models.into_iter().map(to_segment).collect()
}

#[async_trait]
impl MetadataGateway for DatabaseMetadata {
    async fn create_segment(&self, segment: NewSegment) -> Result<RecordingSegment> {
        let model = recording_segments::ActiveModel {
            id: Set(Uuid::new_v4()),
            camera_id: Set(segment.camera_id),
            filename: Set(segment.filename),
            start_ts: Set(segment.start_time.timestamp_micros()),
            duration_ms: Set(segment.duration_ms),
            size_bytes: Set(i64::try_from(segment.size_bytes)?),
            stream_url: Set(segment.stream_url),
            download_url: Set(segment.download_url),
            recording_type: Set(segment.recording_type.to_string()),
            created_at: Set(now()),
        };
        to_segment(model.insert(&self.connection).await?)
    }

    async fn segments(&self, camera_id: &str) -> Result<Vec<RecordingSegment>> {
        let models = RecordingSegments::find()
            .filter(recording_segments::Column::CameraId.eq(camera_id))
            .order_by_asc(recording_segments::Column::StartTs)
            .all(&self.connection)
            .await?;
        to_segments(models)
    }

    async fn segments_before(
        &self,
        camera_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RecordingSegment>> {
        let models = RecordingSegments::find()
            .filter(recording_segments::Column::CameraId.eq(camera_id))
            .filter(recording_segments::Column::StartTs.lt(cutoff.timestamp_micros()))
            .order_by_asc(recording_segments::Column::StartTs)
            .all(&self.connection)
            .await?;
        to_segments(models)
    }

    async fn delete_segment(&self, id: &str) -> Result<bool> {
        let id = Uuid::parse_str(id)?;
        let res = RecordingSegments::delete_by_id(id)
            .exec(&self.connection)
            .await?;
        Ok(res.rows_affected > 0)
    }

    async fn upsert_camera(&self, camera: &CameraSource) -> Result<()> {
        let retention_days = camera.retention_days.map(i32::try_from).transpose()?;
        let existing = Cameras::find_by_id(camera.id.clone())
            .one(&self.connection)
            .await?;

        if let Some(existing) = existing {
            let mut model: cameras::ActiveModel = existing.into();
            model.input_url = Set(camera.input_url.clone());
            model.retention_days = Set(retention_days);
            model.client_id = Set(camera.client_id.clone());
            model.integrator_id = Set(camera.integrator_id.clone());
            model.recording_type = Set(camera.recording_type.to_string());
            model.updated_at = Set(now());
            model.update(&self.connection).await?;
        } else {
            cameras::ActiveModel {
                id: Set(camera.id.clone()),
                input_url: Set(camera.input_url.clone()),
                retention_days: Set(retention_days),
                client_id: Set(camera.client_id.clone()),
                integrator_id: Set(camera.integrator_id.clone()),
                recording_type: Set(camera.recording_type.to_string()),
                updated_at: Set(now()),
            }
            .insert(&self.connection)
            .await?;
        }
        Ok(())
    }

    async fn camera_retention(&self) -> Result<Vec<CameraRetention>> {
        let mut retention: Vec<CameraRetention> = Cameras::find()
            .all(&self.connection)
            .await?
            .into_iter()
            .map(|c| CameraRetention {
                camera_id: c.id,
                retention_days: c.retention_days.and_then(|d| u32::try_from(d).ok()),
            })
            .collect();

        let recorded: Vec<String> = RecordingSegments::find()
            .select_only()
            .column(recording_segments::Column::CameraId)
            .distinct()
            .into_tuple()
            .all(&self.connection)
            .await?;
        for camera_id in recorded {
            if !retention.iter().any(|r| r.camera_id == camera_id) {
                retention.push(CameraRetention {
                    camera_id,
                    retention_days: None,
                });
            }
        }
        Ok(retention)
    }
}
