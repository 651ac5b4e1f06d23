use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use api::stream::{QualityProfile, StartStreamRequest, StreamStatus};

use crate::config::StreamingConfig;
use crate::error::AppError;
use crate::naming;
use crate::process::{EncoderJob, Launcher, ProcessHandle};
use crate::recorder::validate_source;
use crate::registry::Registry;
use crate::result::Result;

pub mod quality;

struct ActiveStream {
    generation: u64,
    input_url: String,
    profile: QualityProfile,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    watcher: JoinHandle<()>,
    /// Held for as long as the stream occupies a slot
    permit: OwnedSemaphorePermit,
}

/// Live HLS renditions, at most one per camera and `max_streams` overall
pub struct StreamingManager {
    cfg: StreamingConfig,
    base_url: String,
    root: PathBuf,
    profiles: Vec<QualityProfile>,
    launcher: Arc<dyn Launcher>,
    registry: Arc<Registry<ActiveStream>>,
    slots: Arc<Semaphore>,
    /// Last fatal error of streams that died on their own
    failures: Arc<RwLock<HashMap<String, String>>>,
    generation: AtomicU64,
    closed: CancellationToken,
}

impl StreamingManager {
    pub fn new(cfg: StreamingConfig, base_url: String, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            root: PathBuf::from(&cfg.root),
            profiles: quality::profiles(&cfg.profiles),
            slots: Arc::new(Semaphore::new(cfg.max_streams)),
            cfg,
            base_url,
            launcher,
            registry: Arc::new(Registry::new()),
            failures: Default::default(),
            generation: AtomicU64::new(0),
            closed: CancellationToken::new(),
        }
    }

    pub fn profiles(&self) -> &[QualityProfile] {
        &self.profiles
    }

    fn profile(&self, id: Option<&str>) -> Result<QualityProfile> {
        let id = id.unwrap_or(&self.cfg.default_quality);
        quality::find(&self.profiles, id)
            .cloned()
            .ok_or_else(|| AppError::invalid_input(format!("unknown quality profile {id}")))
    }

    /// Starts a live rendition. An already running stream is returned as is.
    pub async fn start(&self, camera_id: &str, req: StartStreamRequest) -> Result<StreamStatus> {
        validate_source(camera_id, &req.input_url).map_err(AppError::invalid_input)?;
        let profile = self.profile(req.quality.as_deref())?;

        let _guard = self.registry.lock(camera_id).await;
        if self.closed.is_cancelled() {
            return Err(AppError::conflict("streaming is shutting down"));
        }
        if self.registry.contains(camera_id).await {
            return Ok(self.status(camera_id).await);
        }

        let permit = self.slots.clone().try_acquire_owned().map_err(|_| {
            AppError::capacity(format!(
                "maximum of {} concurrent streams reached",
                self.cfg.max_streams
            ))
        })?;

        self.failures.write().await.remove(camera_id);
        self.launch(camera_id, req.input_url, profile, Utc::now(), permit)
            .await?;
        tracing::info!("[stream] {} started", camera_id);
        Ok(self.status(camera_id).await)
    }

    /// Kills the live encoder. Files already written stay on disk.
    pub async fn stop(&self, camera_id: &str) -> Result<StreamStatus> {
        let _guard = self.registry.lock(camera_id).await;
        let stream = self
            .registry
            .remove(camera_id)
            .await
            .ok_or_else(|| AppError::not_found(format!("{camera_id} is not streaming")))?;
        self.teardown(camera_id, stream).await;
        self.failures.write().await.remove(camera_id);
        tracing::info!("[stream] {} stopped", camera_id);
        Ok(self.status(camera_id).await)
    }

    /// Replaces the live encoder with one using `quality`. With `wait` the
    /// call returns once the new manifest is served, or fails after a
    /// bounded number of polls.
    pub async fn change_quality(
        &self,
        camera_id: &str,
        quality: &str,
        wait: bool,
    ) -> Result<StreamStatus> {
        let profile = self.profile(Some(quality))?;
        {
            let _guard = self.registry.lock(camera_id).await;
            let current = self
                .registry
                .with(camera_id, |s| s.profile.id.clone())
                .await
                .ok_or_else(|| AppError::not_found(format!("{camera_id} is not streaming")))?;
            if current == profile.id {
                return Ok(self.status(camera_id).await);
            }

            let Some(old) = self.registry.remove(camera_id).await else {
                return Err(AppError::not_found(format!("{camera_id} is not streaming")));
            };
            let input_url = old.input_url.clone();
            let started_at = old.started_at;
            let permit = self.teardown(camera_id, old).await;
            self.failures.write().await.remove(camera_id);

            tracing::info!(
                "[stream] {} switching quality {} -> {}",
                camera_id,
                current,
                profile.id
            );
            self.launch(camera_id, input_url, profile, started_at, permit)
                .await?;
        }

        if wait {
            self.wait_for_manifest(camera_id).await?;
        }
        Ok(self.status(camera_id).await)
    }

    /// Polls until the manifest of the running encoder exists
    pub async fn wait_for_manifest(&self, camera_id: &str) -> Result<()> {
        let manifest = naming::manifest_path(&self.root, camera_id);
        for _ in 0..self.cfg.manifest_poll_attempts {
            tokio::time::sleep(Duration::from_millis(self.cfg.settle_ms)).await;
            if !self.registry.contains(camera_id).await {
                let error = self.failures.read().await.get(camera_id).cloned();
                return Err(AppError::throw(format!(
                    "stream {} ended while waiting for its manifest: {}",
                    camera_id,
                    error.unwrap_or_else(|| "stopped".to_string())
                )));
            }
            if tokio::fs::try_exists(&manifest).await.unwrap_or(false) {
                return Ok(());
            }
        }
        Err(AppError::ManifestNotReady(format!(
            "{} has no manifest after {} attempts",
            camera_id, self.cfg.manifest_poll_attempts
        )))
    }

    pub async fn status(&self, camera_id: &str) -> StreamStatus {
        let running = self
            .registry
            .with(camera_id, |s| (s.profile.id.clone(), s.started_at))
            .await;
        let Some((quality, started_at)) = running else {
            return StreamStatus {
                camera_id: camera_id.to_string(),
                last_error: self.failures.read().await.get(camera_id).cloned(),
                ..Default::default()
            };
        };

        let now = Utc::now();
        let manifest_updated_at = manifest_mtime(&naming::manifest_path(&self.root, camera_id)).await;
        let manifest_fresh = manifest_updated_at
            .is_some_and(|t| (now - t).num_seconds() <= self.cfg.fresh_seconds as i64);
        StreamStatus {
            camera_id: camera_id.to_string(),
            active: true,
            quality: Some(quality),
            started_at: Some(started_at),
            uptime_seconds: (now - started_at).num_seconds().max(0) as u64,
            manifest_fresh,
            manifest_updated_at,
            manifest_url: Some(naming::manifest_url(&self.base_url, camera_id)),
            last_error: None,
        }
    }

    pub async fn active_streams(&self) -> Vec<StreamStatus> {
        let mut ids = self.registry.map(|id, _| id.to_string()).await;
        ids.sort();
        let mut all = Vec::with_capacity(ids.len());
        for id in ids {
            all.push(self.status(&id).await);
        }
        all
    }

    /// Local path of a file in a camera's live output directory
    pub fn hls_file(&self, camera_id: &str, file: &str) -> Option<PathBuf> {
        (naming::is_safe_component(camera_id) && naming::is_safe_component(file))
            .then(|| naming::stream_dir(&self.root, camera_id).join(file))
    }

    pub async fn shutdown(&self) {
        self.closed.cancel();
        for camera_id in self.registry.known().await {
            let _guard = self.registry.lock(&camera_id).await;
            if let Some(stream) = self.registry.remove(&camera_id).await {
                self.teardown(&camera_id, stream).await;
            }
        }
        tracing::info!("[stream] all streams stopped");
    }

    /// Spawns the encoder and registers it. Must hold the camera lock.
    async fn launch(
        &self,
        camera_id: &str,
        input_url: String,
        profile: QualityProfile,
        started_at: DateTime<Utc>,
        permit: OwnedSemaphorePermit,
    ) -> Result<()> {
        let dir = naming::stream_dir(&self.root, camera_id);
        tokio::fs::create_dir_all(&dir).await?;
        // readiness is judged by the manifest appearing
        let manifest = naming::manifest_path(&self.root, camera_id);
        if let Err(e) = tokio::fs::remove_file(&manifest).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("[stream] {} stale manifest not removed: {}", camera_id, e);
        }

        let job = EncoderJob::Live {
            camera_id: camera_id.to_string(),
            input_url: input_url.clone(),
            dir,
            profile: profile.clone(),
            hls_time: self.cfg.hls_time,
            hls_list_size: self.cfg.hls_list_size,
        };
        let handle = match self.launcher.spawn(job).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("[stream] {} encoder failed to start: {:?}", camera_id, e);
                self.failures
                    .write()
                    .await
                    .insert(camera_id.to_string(), e.to_string());
                return Err(AppError::throw(format!(
                    "failed to start live encoder for {camera_id}: {e}"
                )));
            }
        };
        tracing::info!(
            "[stream] {} encoding {} pid={:?}",
            camera_id,
            profile.id,
            handle.pid()
        );

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.closed.child_token();
        let watcher = tokio::spawn(watch(
            camera_id.to_string(),
            generation,
            handle,
            cancel.clone(),
            self.registry.clone(),
            self.failures.clone(),
        ));

        let stream = ActiveStream {
            generation,
            input_url,
            profile,
            started_at,
            cancel,
            watcher,
            permit,
        };
        if self.registry.insert_if_absent(camera_id, stream).await.is_err() {
            return Err(AppError::throw(format!("stream {camera_id} registered twice")));
        }
        Ok(())
    }

    /// Kills the encoder of a removed entry, handing its slot back
    async fn teardown(&self, camera_id: &str, stream: ActiveStream) -> OwnedSemaphorePermit {
        stream.cancel.cancel();
        if let Err(e) = stream.watcher.await {
            tracing::error!("[stream] {} watcher failed: {}", camera_id, e);
        }
        stream.permit
    }
}

async fn manifest_mtime(path: &std::path::Path) -> Option<DateTime<Utc>> {
    let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Owns the encoder. A stream that dies on its own is dropped and its
/// error kept for the next status query; it is never restarted.
async fn watch(
    camera_id: String,
    generation: u64,
    mut handle: ProcessHandle,
    cancel: CancellationToken,
    registry: Arc<Registry<ActiveStream>>,
    failures: Arc<RwLock<HashMap<String, String>>>,
) {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            handle.kill();
            let status = handle.wait().await;
            tracing::debug!("[stream] {} encoder stopped: {}", camera_id, status);
        }
        status = handle.wait() => {
            tracing::warn!("[stream] {} encoder died: {}", camera_id, status);
            failures
                .write()
                .await
                .insert(camera_id.clone(), format!("live encoder {status}"));
            // frees the slot
            registry
                .remove_if(&camera_id, |s| s.generation == generation)
                .await;
        }
    }
}
