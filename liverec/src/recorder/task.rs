use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use api::recording::CameraSource;

use super::Progress;
use super::finalizer::{CompletedSegment, Disposition, Finalizer};
use crate::config::RecorderConfig;
use crate::naming;
use crate::process::{EncoderJob, ExitStatus, Launcher, ProcessHandle};

const MAX_NAME_ATTEMPTS: u32 = 100;

/// Chains bounded encoder runs into one continuous recording until cancelled
pub(super) struct SegmentLoop {
    pub camera: CameraSource,
    pub cfg: RecorderConfig,
    pub launcher: Arc<dyn Launcher>,
    pub finalizer: Arc<Finalizer>,
    pub progress: Arc<Mutex<Progress>>,
    pub cancel: CancellationToken,
}

impl SegmentLoop {
    pub async fn run(self) {
        let root = PathBuf::from(&self.cfg.root);
        let dir = naming::segment_dir(&root, &self.camera.id);
        let duration = self.cfg.segment_duration();

        loop {
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                self.spawn_failed(format!("create {}: {}", dir.display(), e));
                if !self.backoff().await {
                    break;
                }
                continue;
            }

            let start_time = Utc::now();
            let filename = match self.claim_filename(&dir, start_time).await {
                Ok(filename) => filename,
                Err(e) => {
                    self.spawn_failed(e.to_string());
                    if !self.backoff().await {
                        break;
                    }
                    continue;
                }
            };
            let output = dir.join(&filename);

            if !self.begin_segment(start_time) {
                break;
            }

            let job = EncoderJob::Segment {
                camera_id: self.camera.id.clone(),
                input_url: self.camera.input_url.clone(),
                output: output.clone(),
                duration,
            };
            let mut handle = match self.launcher.spawn(job).await {
                Ok(handle) => handle,
                Err(e) => {
                    self.spawn_failed(e.to_string());
                    if !self.backoff().await {
                        break;
                    }
                    continue;
                }
            };

            {
                let mut p = lock(&self.progress);
                p.retries = 0;
                p.last_error = None;
                p.pid = handle.pid();
            }
            tracing::info!(
                "[recorder] {} segment {} started pid={:?}",
                self.camera.id,
                filename,
                handle.pid()
            );

            let started = Instant::now();
            let status = self.supervise(&mut handle).await;
            let elapsed = started.elapsed();

            let result = self
                .finalizer
                .finalize(CompletedSegment {
                    camera_id: self.camera.id.clone(),
                    recording_type: self.camera.recording_type,
                    filename,
                    path: output,
                    start_time,
                    planned: duration,
                    elapsed,
                    status,
                })
                .await;

            let produced = {
                let mut p = lock(&self.progress);
                p.in_flight = false;
                p.pid = None;
                p.segment_started_at = None;
                match result {
                    Ok(Disposition::Registered(_)) => {
                        p.registered += 1;
                        true
                    }
                    Ok(Disposition::Discarded(reason)) => {
                        p.discarded += 1;
                        p.last_error = Some(format!("segment discarded: {reason}"));
                        false
                    }
                    Err(e) => {
                        tracing::error!("[recorder] {} finalize failed: {:?}", self.camera.id, e);
                        p.discarded += 1;
                        p.last_error = Some(format!("finalize: {e}"));
                        true
                    }
                }
            };

            if self.cancel.is_cancelled() {
                break;
            }
            // an encoder that produced nothing usually means the source is down
            if !produced && !self.backoff().await {
                break;
            }
        }
        tracing::info!("[recorder] {} loop finished", self.camera.id);
    }

    /// First name for a segment starting at `start_time` that no earlier
    /// segment of this camera holds, locally or in storage
    async fn claim_filename(
        &self,
        dir: &Path,
        start_time: chrono::DateTime<Utc>,
    ) -> anyhow::Result<String> {
        for seq in 0..MAX_NAME_ATTEMPTS {
            let filename =
                naming::segment_filename_seq(&self.camera.id, start_time, seq, &self.cfg.extension);
            if !self
                .finalizer
                .name_in_use(&self.camera.id, &filename, &dir.join(&filename))
                .await?
            {
                return Ok(filename);
            }
        }
        anyhow::bail!(
            "no free segment name for {} at {}",
            self.camera.id,
            start_time
        )
    }

    /// Marks a segment in flight unless a stop already landed
    fn begin_segment(&self, start_time: chrono::DateTime<Utc>) -> bool {
        let mut p = lock(&self.progress);
        if self.cancel.is_cancelled() {
            return false;
        }
        p.in_flight = true;
        p.segment_started_at = Some(start_time);
        true
    }

    fn spawn_failed(&self, error: String) {
        let mut p = lock(&self.progress);
        p.in_flight = false;
        p.segment_started_at = None;
        p.retries += 1;
        tracing::warn!(
            "[recorder] {} encoder failed to start (attempt {}): {}, retrying in {:?}",
            self.camera.id,
            p.retries,
            error,
            self.cfg.retry_backoff()
        );
        p.last_error = Some(error);
    }

    /// Returns false when stopped while waiting
    async fn backoff(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(self.cfg.retry_backoff()) => true,
        }
    }

    async fn supervise(&self, handle: &mut ProcessHandle) -> ExitStatus {
        let deadline = sleep(self.cfg.segment_duration() + self.cfg.kill_margin());
        tokio::pin!(deadline);

        tokio::select! {
            status = handle.wait() => return status,
            _ = &mut deadline => {
                tracing::warn!(
                    "[recorder] {} encoder overran its segment, killing pid={:?}",
                    self.camera.id,
                    handle.pid()
                );
                handle.kill();
                return handle.wait().await;
            }
            _ = self.cancel.cancelled() => {}
        }

        tracing::info!("[recorder] {} stopping, finishing current segment", self.camera.id);
        handle.terminate();
        tokio::select! {
            status = handle.wait() => status,
            _ = sleep(self.cfg.stop_grace()) => {
                tracing::warn!(
                    "[recorder] {} encoder ignored terminate, killing pid={:?}",
                    self.camera.id,
                    handle.pid()
                );
                handle.kill();
                handle.wait().await
            }
        }
    }
}

pub(super) fn lock(progress: &Mutex<Progress>) -> std::sync::MutexGuard<'_, Progress> {
    progress.lock().unwrap_or_else(|e| e.into_inner())
}
