use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use api::recording::RecordingSegment;
use api::retention::SweepReport;
use storage::StorageGateway;

use crate::config::RetentionConfig;
use crate::gateway::MetadataGateway;
use crate::naming;

/// Deletes segments older than their camera's retention window, bytes first
pub struct RetentionSweeper {
    cfg: RetentionConfig,
    metadata: Arc<dyn MetadataGateway>,
    storage: Arc<dyn StorageGateway>,
    /// Recordings root, for local copies the storage backend does not own
    local_root: Option<PathBuf>,
    running: Mutex<()>,
}

impl RetentionSweeper {
    pub fn new(
        cfg: RetentionConfig,
        metadata: Arc<dyn MetadataGateway>,
        storage: Arc<dyn StorageGateway>,
        local_root: Option<PathBuf>,
    ) -> Self {
        Self {
            cfg,
            metadata,
            storage,
            local_root,
            running: Mutex::new(()),
        }
    }

    /// Days a camera keeps its segments. Stored overrides outside the
    /// configured bounds are clamped.
    pub fn window_days(&self, retention_days: Option<u32>) -> u32 {
        retention_days
            .map(|d| d.clamp(self.cfg.min_days, self.cfg.max_days))
            .unwrap_or(self.cfg.default_days)
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Sweeps as of `now`. Concurrent calls run one after another.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let _running = self.running.lock().await;
        let mut report = SweepReport {
            started_at: Some(now),
            ..Default::default()
        };

        let cameras = match self.metadata.camera_retention().await {
            Ok(cameras) => cameras,
            Err(e) => {
                tracing::error!("[retention] failed to list cameras: {:?}", e);
                report.errors += 1;
                return report;
            }
        };

        for camera in cameras {
            report.cameras += 1;
            let days = self.window_days(camera.retention_days);
            let cutoff = now - Duration::days(days as i64);
            let expired = match self
                .metadata
                .segments_before(&camera.camera_id, cutoff)
                .await
            {
                Ok(expired) => expired,
                Err(e) => {
                    tracing::error!(
                        "[retention] {} failed to query expired segments: {:?}",
                        camera.camera_id,
                        e
                    );
                    report.errors += 1;
                    continue;
                }
            };

            if !expired.is_empty() {
                tracing::info!(
                    "[retention] {} has {} segments before {} ({} days)",
                    camera.camera_id,
                    expired.len(),
                    cutoff,
                    days
                );
            }
            for segment in expired {
                report.examined += 1;
                self.purge(&segment, &mut report).await;
            }
        }

        tracing::info!(
            "[retention] sweep done: cameras={} examined={} storage_deleted={} metadata_deleted={} errors={}",
            report.cameras,
            report.examined,
            report.storage_deleted,
            report.metadata_deleted,
            report.errors
        );
        report
    }

    async fn purge(&self, segment: &RecordingSegment, report: &mut SweepReport) {
        let key = naming::storage_key(&segment.camera_id, &segment.filename);
        if let Err(e) = self.storage.delete(&key).await {
            tracing::warn!("[retention] failed to delete {}: {:?}", key, e);
            report.errors += 1;
            return;
        }
        if let Some(root) = &self.local_root {
            let path = naming::segment_path(root, &segment.camera_id, &segment.filename);
            if let Err(e) = tokio::fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!("[retention] failed to delete {:?}: {}", path, e);
                report.errors += 1;
                return;
            }
        }
        report.storage_deleted += 1;

        match self.metadata.delete_segment(&segment.id).await {
            Ok(true) => report.metadata_deleted += 1,
            Ok(false) => tracing::debug!("[retention] row {} already gone", segment.id),
            Err(e) => {
                tracing::warn!("[retention] failed to delete row {}: {:?}", segment.id, e);
                report.errors += 1;
            }
        }
    }

    /// Sweeps every day at the configured UTC hour until cancelled
    pub async fn run_daily(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let now = Utc::now();
            let next = next_run(now, self.cfg.daily_at_hour);
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!("[retention] next sweep at {}", next);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    self.sweep().await;
                }
            }
        }
        tracing::info!("[retention] daily sweep stopped");
    }
}

/// First `hour`:00 UTC strictly after `now`
pub fn next_run(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let today = now
        .date_naive()
        .and_hms_opt(hour.min(23), 0, 0)
        .unwrap_or_default()
        .and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}
