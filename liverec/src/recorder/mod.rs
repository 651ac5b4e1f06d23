use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use api::recording::{CameraSource, RecordingStatus, StartRecordingResponse};
use storage::StorageGateway;

use crate::config::{RecorderConfig, RetentionConfig};
use crate::error::AppError;
use crate::gateway::MetadataGateway;
use crate::naming;
use crate::process::Launcher;
use crate::registry::Registry;
use crate::result::Result;

pub mod finalizer;
mod task;

pub use finalizer::{AcceptancePolicy, CompletedSegment, DiscardReason, Disposition, Finalizer};

use task::{SegmentLoop, lock};

const INPUT_SCHEMES: [&str; 4] = ["rtsp://", "rtsps://", "rtmp://", "rtmps://"];

/// Camera id and input url shared by recording and live streaming
pub fn validate_source(camera_id: &str, input_url: &str) -> anyhow::Result<()> {
    if !naming::is_safe_component(camera_id) {
        anyhow::bail!("invalid camera id {:?}", camera_id);
    }
    let url = input_url.trim().to_ascii_lowercase();
    if url.is_empty() {
        anyhow::bail!("camera {} has no input url", camera_id);
    }
    if !INPUT_SCHEMES.iter().any(|s| url.starts_with(s)) {
        anyhow::bail!(
            "camera {} input url must be rtsp or rtmp: {}",
            camera_id,
            input_url
        );
    }
    Ok(())
}

/// Structural checks done before any side effect of a start command
pub fn validate_camera(camera: &CameraSource, retention: &RetentionConfig) -> anyhow::Result<()> {
    validate_source(&camera.id, &camera.input_url)?;
    if let Some(days) = camera.retention_days {
        retention.check_days(days)?;
    }
    Ok(())
}

/// Shared between a camera's segment loop and status queries
#[derive(Debug, Default)]
pub(crate) struct Progress {
    stopping: bool,
    in_flight: bool,
    segment_started_at: Option<DateTime<Utc>>,
    pid: Option<u32>,
    retries: u32,
    registered: u64,
    discarded: u64,
    last_error: Option<String>,
}

impl Progress {
    fn status(&self, camera_id: &str) -> RecordingStatus {
        RecordingStatus {
            camera_id: camera_id.to_string(),
            active: true,
            stopping: self.stopping,
            segment_started_at: self.segment_started_at,
            pid: self.pid,
            retries: self.retries,
            segments_registered: self.registered,
            segments_discarded: self.discarded,
            last_error: self.last_error.clone(),
        }
    }
}

struct ActiveRecording {
    generation: u64,
    cancel: CancellationToken,
    progress: Arc<Mutex<Progress>>,
    task: JoinHandle<()>,
}

/// Keeps one segment loop alive per recorded camera
pub struct RecordingSupervisor {
    cfg: RecorderConfig,
    retention: RetentionConfig,
    launcher: Arc<dyn Launcher>,
    finalizer: Arc<Finalizer>,
    metadata: Arc<dyn MetadataGateway>,
    registry: Arc<Registry<ActiveRecording>>,
    /// Loops released by `stop` that may still be winding down
    detached: Mutex<Vec<(String, JoinHandle<()>)>>,
    generation: AtomicU64,
    closed: CancellationToken,
}

impl RecordingSupervisor {
    pub fn new(
        cfg: RecorderConfig,
        retention: RetentionConfig,
        base_url: String,
        launcher: Arc<dyn Launcher>,
        metadata: Arc<dyn MetadataGateway>,
        storage: Arc<dyn StorageGateway>,
    ) -> Self {
        let finalizer = Arc::new(Finalizer::new(&cfg, base_url, metadata.clone(), storage));
        Self {
            cfg,
            retention,
            launcher,
            finalizer,
            metadata,
            registry: Arc::new(Registry::new()),
            detached: Mutex::new(vec![]),
            generation: AtomicU64::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Starts continuous recording. Returns `started = false` when the
    /// camera is already being recorded.
    pub async fn start(&self, camera: CameraSource) -> Result<StartRecordingResponse> {
        validate_camera(&camera, &self.retention).map_err(AppError::invalid_input)?;

        let _guard = self.registry.lock(&camera.id).await;
        if self.closed.is_cancelled() {
            return Err(AppError::conflict("recorder is shutting down"));
        }

        let existing = self
            .registry
            .with(&camera.id, |entry| lock(&entry.progress).status(&camera.id))
            .await;
        if let Some(status) = existing {
            if status.stopping {
                return Err(AppError::conflict(format!(
                    "recording of {} is still stopping",
                    camera.id
                )));
            }
            return Ok(StartRecordingResponse {
                camera_id: camera.id,
                started: false,
                status,
            });
        }

        if let Err(e) = self.metadata.upsert_camera(&camera).await {
            tracing::warn!("[recorder] {} failed to save camera settings: {:?}", camera.id, e);
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.closed.child_token();
        let progress = Arc::new(Mutex::new(Progress::default()));
        let camera_id = camera.id.clone();

        let segments = SegmentLoop {
            camera,
            cfg: self.cfg.clone(),
            launcher: self.launcher.clone(),
            finalizer: self.finalizer.clone(),
            progress: progress.clone(),
            cancel: cancel.clone(),
        };
        let registry = self.registry.clone();
        let id = camera_id.clone();
        let task = tokio::spawn(async move {
            segments.run().await;
            registry.remove_if(&id, |e| e.generation == generation).await;
        });

        let entry = ActiveRecording {
            generation,
            cancel,
            progress,
            task,
        };
        let status = lock(&entry.progress).status(&camera_id);
        if self.registry.insert_if_absent(&camera_id, entry).await.is_err() {
            return Err(AppError::throw(format!("recording of {camera_id} registered twice")));
        }

        tracing::info!("[recorder] {} recording started", camera_id);
        Ok(StartRecordingResponse {
            camera_id,
            started: true,
            status,
        })
    }

    /// Requests a stop. The segment in flight, if any, is finished and
    /// finalized before the recording disappears.
    pub async fn stop(&self, camera_id: &str) -> Result<RecordingStatus> {
        let _guard = self.registry.lock(camera_id).await;

        let stopped = self
            .registry
            .with(camera_id, |entry| {
                let mut p = lock(&entry.progress);
                p.stopping = true;
                entry.cancel.cancel();
                (p.in_flight, p.status(camera_id))
            })
            .await;

        let Some((in_flight, mut status)) = stopped else {
            return Err(AppError::not_found(format!("{camera_id} is not recording")));
        };

        if !in_flight {
            if let Some(entry) = self.registry.remove(camera_id).await {
                self.detach(camera_id, entry.task);
            }
            status.active = false;
            status.stopping = false;
        }
        tracing::info!(
            "[recorder] {} stop requested, segment in flight: {}",
            camera_id,
            in_flight
        );
        Ok(status)
    }

    fn detach(&self, camera_id: &str, task: JoinHandle<()>) {
        let mut detached = self.detached.lock().unwrap_or_else(|e| e.into_inner());
        detached.retain(|(_, task)| !task.is_finished());
        detached.push((camera_id.to_string(), task));
    }

    pub async fn status(&self, camera_id: &str) -> RecordingStatus {
        self.registry
            .with(camera_id, |entry| lock(&entry.progress).status(camera_id))
            .await
            .unwrap_or_else(|| RecordingStatus {
                camera_id: camera_id.to_string(),
                ..Default::default()
            })
    }

    pub async fn list(&self) -> Vec<RecordingStatus> {
        let mut all = self
            .registry
            .map(|camera_id, entry| lock(&entry.progress).status(camera_id))
            .await;
        all.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        all
    }

    pub async fn is_active(&self, camera_id: &str) -> bool {
        self.registry.contains(camera_id).await
    }

    /// Stops every camera and waits for in-flight segments to be finalized.
    /// Later starts are refused.
    pub async fn shutdown(&self) {
        self.closed.cancel();

        let mut tasks = vec![];
        for camera_id in self.registry.known().await {
            let _guard = self.registry.lock(&camera_id).await;
            if let Some(entry) = self.registry.remove(&camera_id).await {
                lock(&entry.progress).stopping = true;
                entry.cancel.cancel();
                tasks.push((camera_id, entry.task));
            }
        }
        tasks.extend(
            self.detached
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .drain(..),
        );

        for (camera_id, task) in tasks {
            if let Err(e) = task.await {
                tracing::error!("[recorder] {} segment loop failed: {}", camera_id, e);
            }
        }
        tracing::info!("[recorder] all recordings stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::time::Duration;

    use api::recording::RecordingType;
    use storage::ObjectStore;

    use crate::gateway::MemoryMetadata;
    use crate::process::fake::{FakeLauncher, Script};
    use crate::process::{EncoderJob, ExitStatus, Signal};

    const MB: usize = 1024 * 1024;

    struct Harness {
        dir: tempfile::TempDir,
        launcher: FakeLauncher,
        metadata: Arc<MemoryMetadata>,
        recorder: RecordingSupervisor,
    }

    fn harness(script: Script) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RecorderConfig {
            root: dir.path().join("recordings").to_string_lossy().into_owned(),
            ..Default::default()
        };
        let op = storage::create_operator(&storage::StorageConfig::Fs {
            root: cfg.root.clone(),
        })
        .unwrap();
        let launcher = FakeLauncher::new(script);
        let metadata = Arc::new(MemoryMetadata::new());
        let recorder = RecordingSupervisor::new(
            cfg,
            RetentionConfig::default(),
            "http://nvr.local:8080".to_string(),
            Arc::new(launcher.clone()),
            metadata.clone(),
            Arc::new(ObjectStore::new(op)),
        );
        Harness {
            dir,
            launcher,
            metadata,
            recorder,
        }
    }

    fn camera(id: &str) -> CameraSource {
        CameraSource {
            id: id.to_string(),
            input_url: "rtsp://10.0.0.2:554/stream1".to_string(),
            retention_days: Some(7),
            client_id: Some("client-1".to_string()),
            integrator_id: None,
            recording_type: RecordingType::Continuous,
        }
    }

    async fn until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..100_000 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_validate_camera() {
        let retention = RetentionConfig::default();
        assert!(validate_camera(&camera("cam01"), &retention).is_ok());

        let mut rtmp = camera("cam01");
        rtmp.input_url = "rtmp://10.0.0.2/live/cam01".to_string();
        assert!(validate_camera(&rtmp, &retention).is_ok());

        let mut no_url = camera("cam01");
        no_url.input_url = " ".to_string();
        assert!(validate_camera(&no_url, &retention).is_err());

        let mut http = camera("cam01");
        http.input_url = "http://10.0.0.2/stream".to_string();
        assert!(validate_camera(&http, &retention).is_err());

        assert!(validate_camera(&camera("../etc"), &retention).is_err());

        let mut forever = camera("cam01");
        forever.retention_days = Some(0);
        assert!(validate_camera(&forever, &retention).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_structural_errors_have_no_side_effects() {
        let h = harness(Script::stubborn());
        let mut bad = camera("cam01");
        bad.input_url = String::new();
        let err = h.recorder.start(bad).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(h.launcher.spawned(), 0);
        assert!(!h.recorder.is_active("cam01").await);
        assert!(h.metadata.camera_retention().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_yields_one_recording() {
        let h = harness(Script::stubborn());
        let (a, b) = tokio::join!(
            h.recorder.start(camera("cam01")),
            h.recorder.start(camera("cam01"))
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.started, b.started);

        until(|| async { h.launcher.spawned() == 1 }).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.launcher.spawned(), 1);
        assert_eq!(h.recorder.list().await.len(), 1);

        let again = h.recorder.start(camera("cam01")).await.unwrap();
        assert!(!again.started);
        assert!(again.status.active);
        assert_eq!(h.launcher.spawned(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_saves_camera_retention() {
        let h = harness(Script::stubborn());
        h.recorder.start(camera("cam01")).await.unwrap();
        let cameras = h.metadata.camera_retention().await.unwrap();
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].retention_days, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_encoder_is_killed_and_rotated() {
        let h = harness(Script::stubborn().writes(2 * MB));
        h.recorder.start(camera("cam01")).await.unwrap();
        until(|| async { h.launcher.spawned() == 1 }).await;

        let EncoderJob::Segment { duration, .. } = &h.launcher.jobs()[0] else {
            panic!("expected a segment job");
        };
        assert_eq!(*duration, Duration::from_secs(300));

        tokio::time::sleep(Duration::from_secs(355)).await;
        assert!(h.launcher.signals(0).is_empty());
        assert_eq!(h.launcher.spawned(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.launcher.signals(0), vec![Signal::Kill]);
        assert_eq!(h.launcher.exit_of(0), Some(ExitStatus::killed()));

        until(|| async { h.launcher.spawned() == 2 }).await;
        let segments = h.metadata.segments("cam01").await.unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].duration_ms, 300_000);
        assert_eq!(segments[0].size_bytes, 2 * MB as u64);
        assert_eq!(h.recorder.status("cam01").await.segments_registered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_segments_chain_back_to_back() {
        let h = harness(Script::well_behaved(Duration::from_secs(300), 2 * MB));
        h.recorder.start(camera("cam01")).await.unwrap();

        until(|| async { h.launcher.spawned() == 3 }).await;
        assert_eq!(h.launcher.exit_of(0), Some(ExitStatus::code(0)));
        assert_eq!(h.launcher.exit_of(1), Some(ExitStatus::code(0)));
        assert!(h.launcher.signals(0).is_empty());
        assert_eq!(h.recorder.status("cam01").await.segments_registered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_segment_finalizes_and_ends() {
        let h = harness(Script::well_behaved(Duration::from_secs(300), 2 * MB));
        h.recorder.start(camera("cam01")).await.unwrap();
        until(|| async { h.launcher.spawned() == 1 }).await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        let status = h.recorder.stop("cam01").await.unwrap();
        assert!(status.active);
        assert!(status.stopping);

        until(|| async { !h.recorder.is_active("cam01").await }).await;
        assert_eq!(h.launcher.signals(0), vec![Signal::Terminate]);
        assert_eq!(h.metadata.segments("cam01").await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(h.launcher.spawned(), 1);
        assert_eq!(h.launcher.running(), 0);
        assert!(!h.recorder.status("cam01").await.active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_kills_encoder_ignoring_terminate() {
        let h = harness(Script::stubborn().writes(2 * MB));
        h.recorder.start(camera("cam01")).await.unwrap();
        until(|| async { h.launcher.spawned() == 1 }).await;

        h.recorder.stop("cam01").await.unwrap();

        // a start while the segment drains is refused
        let err = h.recorder.start(camera("cam01")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        until(|| async { !h.recorder.is_active("cam01").await }).await;
        assert_eq!(
            h.launcher.signals(0),
            vec![Signal::Terminate, Signal::Kill]
        );
        assert_eq!(h.metadata.segments("cam01").await.unwrap().len(), 1);

        let restarted = h.recorder.start(camera("cam01")).await.unwrap();
        assert!(restarted.started);
        until(|| async { h.launcher.spawned() == 2 }).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unknown_camera_is_not_found() {
        let h = harness(Script::stubborn());
        let err = h.recorder.stop("cam09").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_failures_retry_with_backoff() {
        let h = harness(Script::stubborn());
        h.launcher.fail_spawns(2);
        h.recorder.start(camera("cam01")).await.unwrap();

        until(|| async { h.recorder.status("cam01").await.retries == 1 }).await;
        let status = h.recorder.status("cam01").await;
        assert!(status.active);
        assert!(status.last_error.unwrap().contains("No such file"));
        assert_eq!(h.launcher.spawned(), 0);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(h.launcher.spawned(), 1);
        let status = h.recorder.status("cam01").await;
        assert_eq!(status.retries, 0);
        assert_eq!(status.pid, Some(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_retry() {
        let h = harness(Script::stubborn());
        h.launcher.fail_spawns(u32::MAX);
        h.recorder.start(camera("cam01")).await.unwrap();
        until(|| async { h.recorder.status("cam01").await.retries >= 1 }).await;

        let status = h.recorder.stop("cam01").await.unwrap();
        assert!(!status.active);
        assert!(!h.recorder.is_active("cam01").await);

        let retries = h.recorder.status("cam01").await.retries;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.recorder.status("cam01").await.retries, retries);
        assert_eq!(h.launcher.spawned(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_output_is_discarded_and_backed_off() {
        let h = harness(Script::well_behaved(Duration::from_secs(2), 0).writes(10));
        h.recorder.start(camera("cam01")).await.unwrap();

        until(|| async { h.recorder.status("cam01").await.segments_discarded == 1 }).await;
        let status = h.recorder.status("cam01").await;
        assert!(status.last_error.unwrap().contains("too small"));
        assert_eq!(h.launcher.spawned(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.launcher.spawned(), 2);
        assert!(h.metadata.segments("cam01").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_finalizes_every_camera() {
        let h = harness(Script::well_behaved(Duration::from_secs(300), 2 * MB));
        h.recorder.start(camera("cam01")).await.unwrap();
        h.recorder.start(camera("cam02")).await.unwrap();
        until(|| async { h.launcher.spawned() == 2 }).await;

        h.recorder.shutdown().await;
        assert_eq!(h.launcher.running(), 0);
        assert!(h.recorder.list().await.is_empty());
        assert_eq!(h.metadata.segments("cam01").await.unwrap().len(), 1);
        assert_eq!(h.metadata.segments("cam02").await.unwrap().len(), 1);

        let err = h.recorder.start(camera("cam03")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(h.dir.path().join("recordings").join("cam01").is_dir());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_released_loops() {
        let h = harness(Script::stubborn());
        h.launcher.fail_spawns(u32::MAX);
        h.recorder.start(camera("cam01")).await.unwrap();
        until(|| async { h.recorder.status("cam01").await.retries >= 1 }).await;

        let status = h.recorder.stop("cam01").await.unwrap();
        assert!(!status.active);
        assert_eq!(h.recorder.detached.lock().unwrap().len(), 1);

        h.recorder.shutdown().await;
        assert!(h.recorder.detached.lock().unwrap().is_empty());
        assert_eq!(h.launcher.spawned(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_within_a_second_gets_a_fresh_segment_name() {
        let h = harness(Script::well_behaved(Duration::from_secs(300), 2 * MB));
        h.recorder.start(camera("cam01")).await.unwrap();
        until(|| async { h.launcher.spawned() == 1 }).await;
        h.recorder.stop("cam01").await.unwrap();
        until(|| async { !h.recorder.is_active("cam01").await }).await;

        h.recorder.start(camera("cam01")).await.unwrap();
        until(|| async { h.launcher.spawned() == 2 }).await;
        h.recorder.stop("cam01").await.unwrap();
        until(|| async { !h.recorder.is_active("cam01").await }).await;

        let outputs: Vec<_> = h
            .launcher
            .jobs()
            .into_iter()
            .map(|job| match job {
                EncoderJob::Segment { output, .. } => output,
                EncoderJob::Live { .. } => panic!("expected a segment job"),
            })
            .collect();
        assert_ne!(outputs[0], outputs[1]);

        let rows = h.metadata.segments("cam01").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_ne!(rows[0].filename, rows[1].filename);
    }
}
