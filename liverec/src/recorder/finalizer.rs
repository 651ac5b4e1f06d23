use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};

use api::recording::{RecordingSegment, RecordingType};
use storage::StorageGateway;

use crate::config::RecorderConfig;
use crate::gateway::{MetadataGateway, NewSegment};
use crate::naming;
use crate::process::ExitStatus;

/// Size thresholds deciding whether a finished segment is kept
#[derive(Debug, Clone, Copy)]
pub struct AcceptancePolicy {
    pub min_bytes: u64,
    pub substantial_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    Missing,
    TooSmall { size: u64 },
    /// Non-zero exit with a file too small to trust
    Unclean { size: u64, status: ExitStatus },
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscardReason::Missing => write!(f, "output file missing"),
            DiscardReason::TooSmall { size } => write!(f, "output too small ({size} bytes)"),
            DiscardReason::Unclean { size, status } => {
                write!(f, "encoder {status} with only {size} bytes")
            }
        }
    }
}

impl AcceptancePolicy {
    pub fn from_config(cfg: &RecorderConfig) -> Self {
        Self {
            min_bytes: cfg.min_segment_bytes,
            substantial_bytes: cfg.substantial_segment_bytes,
        }
    }

    pub fn judge(&self, size: Option<u64>, status: ExitStatus) -> Result<u64, DiscardReason> {
        let size = size.ok_or(DiscardReason::Missing)?;
        if size < self.min_bytes {
            return Err(DiscardReason::TooSmall { size });
        }
        if status.success() || size >= self.substantial_bytes {
            Ok(size)
        } else {
            Err(DiscardReason::Unclean { size, status })
        }
    }
}

/// An encoder run that has exited and awaits triage
#[derive(Debug, Clone)]
pub struct CompletedSegment {
    pub camera_id: String,
    pub recording_type: RecordingType,
    pub filename: String,
    pub path: PathBuf,
    pub start_time: DateTime<Utc>,
    pub planned: Duration,
    pub elapsed: Duration,
    pub status: ExitStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Registered(RecordingSegment),
    Discarded(DiscardReason),
}

pub struct Finalizer {
    policy: AcceptancePolicy,
    base_url: String,
    upload: bool,
    remove_discarded: bool,
    metadata: Arc<dyn MetadataGateway>,
    storage: Arc<dyn StorageGateway>,
}

impl Finalizer {
    pub fn new(
        cfg: &RecorderConfig,
        base_url: String,
        metadata: Arc<dyn MetadataGateway>,
        storage: Arc<dyn StorageGateway>,
    ) -> Self {
        Self {
            policy: AcceptancePolicy::from_config(cfg),
            base_url,
            upload: cfg.upload,
            remove_discarded: cfg.remove_discarded,
            metadata,
            storage,
        }
    }

    /// True when `filename` already names a local file or a stored object
    pub async fn name_in_use(&self, camera_id: &str, filename: &str, local: &Path) -> Result<bool> {
        if tokio::fs::try_exists(local).await? {
            return Ok(true);
        }
        self.storage
            .exists(&naming::storage_key(camera_id, filename))
            .await
    }

    /// Registers the segment if the policy accepts it. An error means the
    /// segment was accepted but could not be stored or registered.
    pub async fn finalize(&self, segment: CompletedSegment) -> Result<Disposition> {
        let size = tokio::fs::metadata(&segment.path)
            .await
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len());

        let size = match self.policy.judge(size, segment.status) {
            Ok(size) => size,
            Err(reason) => {
                tracing::info!(
                    "[finalizer] {} discarded {}: {}",
                    segment.camera_id,
                    segment.filename,
                    reason
                );
                if self.remove_discarded && reason != DiscardReason::Missing {
                    if let Err(e) = tokio::fs::remove_file(&segment.path).await {
                        tracing::warn!("[finalizer] failed to remove {:?}: {}", segment.path, e);
                    }
                }
                return Ok(Disposition::Discarded(reason));
            }
        };

        let key = naming::storage_key(&segment.camera_id, &segment.filename);
        if self.upload {
            let bytes = tokio::fs::read(&segment.path).await?;
            self.storage.put(&key, bytes).await?;
            tracing::debug!("[finalizer] uploaded {}", key);
        }

        let duration = segment.elapsed.min(segment.planned);
        let registered = self
            .metadata
            .create_segment(NewSegment {
                camera_id: segment.camera_id.clone(),
                stream_url: naming::stream_url(&self.base_url, &segment.camera_id, &segment.filename),
                download_url: naming::download_url(
                    &self.base_url,
                    &segment.camera_id,
                    &segment.filename,
                ),
                filename: segment.filename.clone(),
                start_time: segment.start_time,
                duration_ms: duration.as_millis() as i64,
                size_bytes: size,
                recording_type: segment.recording_type,
            })
            .await;

        let row = match registered {
            Ok(row) => row,
            Err(e) => {
                // the local file stays; only the unregistered upload goes
                if self.upload {
                    if let Err(del) = self.storage.delete(&key).await {
                        tracing::error!("[finalizer] failed to roll back {}: {:?}", key, del);
                    }
                }
                return Err(e);
            }
        };

        if self.upload {
            if let Err(e) = tokio::fs::remove_file(&segment.path).await {
                tracing::warn!("[finalizer] failed to remove {:?}: {}", segment.path, e);
            }
        }

        tracing::info!(
            "[finalizer] {} registered {} size={} duration_ms={} exit={}",
            row.camera_id,
            row.filename,
            row.size_bytes,
            row.duration_ms,
            segment.status
        );
        Ok(Disposition::Registered(row))
    }
}
