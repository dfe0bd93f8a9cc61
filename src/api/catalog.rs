// Read-only catalog endpoints

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::catalog::{self, Catalog};
use crate::models::{Collection, CollectionSummary};
use crate::AppState;

use super::internal_error;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/collections", get(list_collections))
        .route("/collection/:coll", get(get_collection))
        .route("/collection/:coll/items", get(list_items))
        .route("/collection/:coll/item/:item", get(get_item))
        .route("/collection/:coll/genres", get(list_genres))
}

#[derive(Debug, Deserialize)]
pub struct ItemQuery {
    /// Present (any value) to skip NFO decoding
    pub nonfo: Option<String>,
}

fn find_collection(
    snapshot: &Catalog,
    name: &str,
) -> Result<Arc<Collection>, (StatusCode, String)> {
    snapshot
        .collection(name)
        .cloned()
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Collection not found".to_string()))
}

/// True if the client already holds `etag`
fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').map(str::trim).any(|t| t == etag || t == "*"))
}

/// JSON response tagged with `etag`, or 304 if the client has it already.
fn json_with_etag<T: Serialize>(
    headers: &HeaderMap,
    etag: String,
    body: &T,
) -> Result<Response, (StatusCode, String)> {
    if etag_matches(headers, &etag) {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(header::ETAG, etag)
            .body(Body::empty())
            .map_err(internal_error);
    }

    let json = serde_json::to_vec(body).map_err(internal_error)?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ETAG, etag)
        .body(Body::from(json))
        .map_err(internal_error)
}

/// Tag for the item list. NFO re-reads change list fields too, so the
/// newest NFO time is part of it.
fn items_etag(last_modified: i64, coll: &Collection) -> String {
    format!("\"{:x}.{:x}\"", last_modified, coll.nfo_modified())
}

/// GET /api/collections
async fn list_collections(State(state): State<Arc<AppState>>) -> Json<Vec<CollectionSummary>> {
    Json(state.catalog.snapshot().summaries())
}

/// GET /api/collection/:coll
async fn get_collection(
    State(state): State<Arc<AppState>>,
    Path(coll): Path<String>,
) -> Result<Json<CollectionSummary>, (StatusCode, String)> {
    let snapshot = state.catalog.snapshot();
    Ok(Json(find_collection(&snapshot, &coll)?.summary()))
}

/// GET /api/collection/:coll/items
async fn list_items(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(coll): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    let snapshot = state.catalog.snapshot();
    let coll = find_collection(&snapshot, &coll)?;

    let (items, last_modified) = catalog::items(&coll);
    json_with_etag(&headers, items_etag(last_modified, &coll), &items)
}

/// GET /api/collection/:coll/item/:item
async fn get_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((coll, item)): Path<(String, String)>,
    Query(query): Query<ItemQuery>,
) -> Result<Response, (StatusCode, String)> {
    let snapshot = state.catalog.snapshot();
    let coll = find_collection(&snapshot, &coll)?;

    let with_nfo = query.nonfo.is_none();
    let item = catalog::item_detail(&coll, &item, with_nfo)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Item not found".to_string()))?;

    let etag = format!(
        "\"{:x}.{:x}{}\"",
        item.last_video,
        item.nfo_time,
        if with_nfo { "" } else { "n" }
    );
    json_with_etag(&headers, etag, &item)
}

/// GET /api/collection/:coll/genres
async fn list_genres(
    State(state): State<Arc<AppState>>,
    Path(coll): Path<String>,
) -> Result<Json<BTreeMap<String, usize>>, (StatusCode, String)> {
    let snapshot = state.catalog.snapshot();
    let coll = find_collection(&snapshot, &coll)?;
    Ok(Json(catalog::genres(&coll)))
}
