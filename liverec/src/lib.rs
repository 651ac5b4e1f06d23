use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{Level, error, info, info_span, warn};

use storage::{ObjectStore, StorageGateway};

use crate::config::Config;
use crate::process::{FfmpegLauncher, Launcher};
use crate::recorder::RecordingSupervisor;
use crate::retention::RetentionSweeper;
use crate::route::AppState;
use crate::stream::StreamingManager;

pub mod config;
pub mod error;
pub mod gateway;
pub mod naming;
pub mod process;
pub mod recorder;
pub mod result;
pub mod retention;
pub mod route;
pub mod stream;

mod entity;
mod migration;
mod registry;

/// Serves until `signal` resolves, encoding with the configured ffmpeg
pub async fn serve<F>(cfg: Config, listener: TcpListener, signal: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let launcher = Arc::new(FfmpegLauncher::new(cfg.encoder.clone()));
    serve_with(cfg, launcher, listener, signal).await
}

pub async fn serve_with<F>(
    cfg: Config,
    launcher: Arc<dyn Launcher>,
    listener: TcpListener,
    signal: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metadata = gateway::connect(&cfg.database).await?;
    let storage: Arc<dyn StorageGateway> =
        Arc::new(ObjectStore::new(storage::init_operator(&cfg.storage).await?));

    let recorder = Arc::new(RecordingSupervisor::new(
        cfg.recorder.clone(),
        cfg.retention.clone(),
        cfg.worker.base_url.clone(),
        launcher.clone(),
        metadata.clone(),
        storage.clone(),
    ));
    let streams = Arc::new(StreamingManager::new(
        cfg.streaming.clone(),
        cfg.worker.base_url.clone(),
        launcher,
    ));
    let sweeper = Arc::new(RetentionSweeper::new(
        cfg.retention.clone(),
        metadata.clone(),
        storage.clone(),
        Some(PathBuf::from(&cfg.recorder.root)),
    ));

    let background = CancellationToken::new();
    let daily = if cfg.retention.enabled {
        Some(tokio::spawn(
            sweeper.clone().run_daily(background.child_token()),
        ))
    } else {
        warn!("[retention] daily sweep disabled");
        None
    };

    for camera in cfg.cameras.iter().cloned() {
        let camera_id = camera.id.clone();
        match recorder.start(camera).await {
            Ok(_) => info!("[recorder] {} recording from config", camera_id),
            Err(e) => error!("[recorder] {} failed to start from config: {}", camera_id, e),
        }
    }

    let app_state = AppState {
        recorder: recorder.clone(),
        streams: streams.clone(),
        sweeper,
        metadata,
        storage,
    };
    let app = Router::new()
        .merge(route::recording::route())
        .merge(route::stream::route())
        .merge(route::cleanup::route())
        .with_state(app_state)
        .layer(if cfg.http.cors {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
        })
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        "http_request",
                        uri = ?request.uri(),
                        method = ?request.method(),
                    )
                })
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO))
                .on_failure(tower_http::trace::DefaultOnFailure::new().level(Level::INFO)),
        );

    info!("Server listening on {}", listener.local_addr()?);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await;

    background.cancel();
    if let Some(daily) = daily {
        let _ = daily.await;
    }
    streams.shutdown().await;
    recorder.shutdown().await;

    served?;
    Ok(())
}
