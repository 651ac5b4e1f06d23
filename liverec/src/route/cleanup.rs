use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use api::retention::SweepReport;

use crate::route::AppState;

pub fn route() -> Router<AppState> {
    Router::new().route(api::path::CLEANUP, post(trigger))
}

/// Runs a sweep now, after any sweep already in progress
async fn trigger(State(state): State<AppState>) -> crate::result::Result<Json<SweepReport>> {
    Ok(Json(state.sweeper.sweep().await))
}
