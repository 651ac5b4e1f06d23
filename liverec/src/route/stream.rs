use axum::extract::{Path, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::{HeaderValue, StatusCode, header};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use api::stream::{ChangeQualityRequest, QualityProfile, StartStreamRequest, StreamStatus};

use crate::error::AppError;
use crate::result::Result;
use crate::route::AppState;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::STREAMS, get(index))
        .route(api::path::STREAM_PROFILES, get(profiles))
        .route(
            &api::path::stream("{camera}"),
            post(start).get(show).delete(stop),
        )
        .route(&api::path::stream_quality("{camera}"), post(change_quality))
        .route(&api::path::hls("{camera}", "{file}"), get(hls))
}

async fn start(
    State(state): State<AppState>,
    Path(camera): Path<String>,
    Json(req): Json<StartStreamRequest>,
) -> Result<Json<StreamStatus>> {
    Ok(Json(state.streams.start(&camera, req).await?))
}

async fn stop(
    State(state): State<AppState>,
    Path(camera): Path<String>,
) -> Result<Json<StreamStatus>> {
    Ok(Json(state.streams.stop(&camera).await?))
}

async fn show(
    State(state): State<AppState>,
    Path(camera): Path<String>,
) -> Result<Json<StreamStatus>> {
    Ok(Json(state.streams.status(&camera).await))
}

async fn index(State(state): State<AppState>) -> Result<Json<Vec<StreamStatus>>> {
    Ok(Json(state.streams.active_streams().await))
}

async fn profiles(State(state): State<AppState>) -> Result<Json<Vec<QualityProfile>>> {
    Ok(Json(state.streams.profiles().to_vec()))
}

async fn change_quality(
    State(state): State<AppState>,
    Path(camera): Path<String>,
    Json(req): Json<ChangeQualityRequest>,
) -> Result<Json<StreamStatus>> {
    Ok(Json(
        state
            .streams
            .change_quality(&camera, &req.quality, req.wait)
            .await?,
    ))
}

/// Playlist and segment types players insist on; other files keep the
/// guessed type
fn hls_content_type(file: &str) -> Option<&'static str> {
    match file.rsplit_once('.').map(|(_, ext)| ext) {
        Some("m3u8") => Some("application/vnd.apple.mpegurl"),
        Some("ts") => Some("video/mp2t"),
        _ => None,
    }
}

async fn hls(
    State(state): State<AppState>,
    Path((camera, file)): Path<(String, String)>,
    request: Request,
) -> Result<Response> {
    let path = state
        .streams
        .hls_file(&camera, &file)
        .ok_or_else(|| AppError::invalid_input("invalid hls path"))?;
    let mut response = ServeFile::new(path).oneshot(request).await.into_response();
    if response.status() == StatusCode::NOT_FOUND {
        return Err(AppError::not_found(format!("{camera}/{file} not found")));
    }

    let headers = response.headers_mut();
    if let Some(mime) = hls_content_type(&file) {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hls_content_types() {
        assert_eq!(
            hls_content_type("index.m3u8"),
            Some("application/vnd.apple.mpegurl")
        );
        assert_eq!(hls_content_type("segment_00001.ts"), Some("video/mp2t"));
        assert_eq!(hls_content_type("init.mp4"), None);
    }
}
