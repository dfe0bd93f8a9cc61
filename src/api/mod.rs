use axum::http::StatusCode;
use axum::Router;
use std::sync::Arc;

use crate::AppState;

mod catalog;
mod data;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/api", catalog::routes())
        .nest("/data", data::routes()) // Raw files and resized images under /data/:source/*path
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
