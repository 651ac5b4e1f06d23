use std::ops::{Bound, Range};

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use headers::HeaderMapExt;
use http::{HeaderMap, HeaderValue, StatusCode, header};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use api::recording::{CameraSource, RecordingSegment, RecordingStatus, StartRecordingResponse};
use storage::StorageGateway;

use crate::error::AppError;
use crate::naming;
use crate::result::Result;
use crate::route::AppState;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::RECORDINGS, post(start).get(index))
        .route(&api::path::recording("{camera}"), get(show).delete(stop))
        .route(
            &format!("{}/segments", api::path::recording("{camera}")),
            get(segments),
        )
        .route(
            &api::path::segment("{camera}", "{filename}"),
            get(download),
        )
        .route(
            &api::path::segment_stream("{camera}", "{filename}"),
            get(stream),
        )
}

async fn start(
    State(state): State<AppState>,
    Json(camera): Json<CameraSource>,
) -> Result<Json<StartRecordingResponse>> {
    Ok(Json(state.recorder.start(camera).await?))
}

async fn stop(
    State(state): State<AppState>,
    Path(camera): Path<String>,
) -> Result<Json<RecordingStatus>> {
    Ok(Json(state.recorder.stop(&camera).await?))
}

async fn show(
    State(state): State<AppState>,
    Path(camera): Path<String>,
) -> Result<Json<RecordingStatus>> {
    Ok(Json(state.recorder.status(&camera).await))
}

async fn index(State(state): State<AppState>) -> Result<Json<Vec<RecordingStatus>>> {
    Ok(Json(state.recorder.list().await))
}

async fn segments(
    State(state): State<AppState>,
    Path(camera): Path<String>,
) -> Result<Json<Vec<RecordingSegment>>> {
    Ok(Json(state.metadata.segments(&camera).await?))
}

async fn download(
    State(state): State<AppState>,
    Path((camera, filename)): Path<(String, String)>,
    request: Request,
) -> Result<Response> {
    serve_segment(state, camera, filename, true, request).await
}

async fn stream(
    State(state): State<AppState>,
    Path((camera, filename)): Path<(String, String)>,
    request: Request,
) -> Result<Response> {
    serve_segment(state, camera, filename, false, request).await
}

async fn serve_segment(
    state: AppState,
    camera: String,
    filename: String,
    attachment: bool,
    request: Request,
) -> Result<Response> {
    if !naming::is_safe_component(&camera) || !naming::is_safe_component(&filename) {
        return Err(AppError::invalid_input("invalid segment path"));
    }
    let key = naming::storage_key(&camera, &filename);
    if naming::parse_segment_start(&camera, &filename).is_none() {
        return Err(AppError::not_found(format!("segment {key} not found")));
    }

    let mut response = match state.storage.local_path(&key) {
        Some(path) => ServeFile::new(path).oneshot(request).await.into_response(),
        None => remote_segment(state.storage.as_ref(), &key, &filename, request.headers()).await?,
    };
    if response.status() == StatusCode::NOT_FOUND {
        return Err(AppError::not_found(format!("segment {key} not found")));
    }

    let disposition = if attachment {
        format!("attachment; filename=\"{filename}\"")
    } else {
        "inline".to_string()
    };
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, HeaderValue::from_str(&disposition)?);
    Ok(response)
}

/// Streams an object from a remote backend, honouring a single byte range
async fn remote_segment(
    storage: &dyn StorageGateway,
    key: &str,
    filename: &str,
    headers: &HeaderMap,
) -> Result<Response> {
    let Some(len) = storage.size(key).await? else {
        return Err(AppError::not_found(format!("segment {key} not found")));
    };

    let requested = headers.typed_get::<headers::Range>();
    let span = match &requested {
        None => 0..len,
        Some(range) => match range
            .satisfiable_ranges(len)
            .next()
            .and_then(|bounds| byte_span(bounds, len))
        {
            Some(span) => span,
            None => {
                return Ok((
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, format!("bytes */{len}"))],
                )
                    .into_response());
            }
        },
    };

    let mime = mime_guess::from_path(filename).first_or_octet_stream();
    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(header::CONTENT_LENGTH, span.end - span.start)
        .header(header::ACCEPT_RANGES, "bytes");
    builder = if requested.is_some() {
        builder.status(StatusCode::PARTIAL_CONTENT).header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", span.start, span.end - 1, len),
        )
    } else {
        builder.status(StatusCode::OK)
    };
    let body = Body::from_stream(storage.read_range(key, span).await?);
    Ok(builder.body(body)?)
}

fn byte_span((start, end): (Bound<u64>, Bound<u64>), len: u64) -> Option<Range<u64>> {
    let start = match start {
        Bound::Included(s) => s,
        Bound::Excluded(s) => s.saturating_add(1),
        Bound::Unbounded => 0,
    };
    let end = match end {
        Bound::Included(e) => e.saturating_add(1).min(len),
        Bound::Excluded(e) => e.min(len),
        Bound::Unbounded => len,
    };
    (start < end).then_some(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::ObjectStore;

    async fn fixture() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let op = storage::create_operator(&storage::StorageConfig::Fs {
            root: dir.path().to_string_lossy().into_owned(),
        })
        .unwrap();
        let store = ObjectStore::new(op);
        let bytes: Vec<u8> = (0..100).collect();
        store.put("cam01/a.mp4", bytes).await.unwrap();
        (dir, store)
    }

    async fn body(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_byte_span() {
        use Bound::*;
        assert_eq!(byte_span((Included(0), Included(9)), 100), Some(0..10));
        assert_eq!(byte_span((Included(90), Unbounded), 100), Some(90..100));
        assert_eq!(byte_span((Included(50), Included(500)), 100), Some(50..100));
        assert_eq!(byte_span((Included(100), Unbounded), 100), None);
    }

    #[tokio::test]
    async fn test_remote_segment_whole_body() {
        let (_dir, store) = fixture().await;
        let response = remote_segment(&store, "cam01/a.mp4", "a.mp4", &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "100");
        assert_eq!(body(response).await, (0..100).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_remote_segment_range() {
        let (_dir, store) = fixture().await;
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=10-19"));
        let response = remote_segment(&store, "cam01/a.mp4", "a.mp4", &headers)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 10-19/100");
        assert_eq!(body(response).await, (10..20).collect::<Vec<u8>>());

        headers.insert(header::RANGE, HeaderValue::from_static("bytes=200-300"));
        let response = remote_segment(&store, "cam01/a.mp4", "a.mp4", &headers)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */100");
    }

    #[tokio::test]
    async fn test_remote_segment_missing() {
        let (_dir, store) = fixture().await;
        let err = remote_segment(&store, "cam01/b.mp4", "b.mp4", &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
