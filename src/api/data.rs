// Files below a collection root: videos, subtitles, and images (resized
// on request)

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use std::path::{Component, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::services::imagecache::{image_content_type, Artifact, ArtifactError, ImageParams};
use crate::AppState;

use super::internal_error;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/:source/*path", get(get_data))
}

/// Relative path below the collection root, refusing anything that could
/// climb out of it.
fn safe_relative(path: &str) -> Option<PathBuf> {
    let rel = std::path::Path::new(path.trim_start_matches('/'));
    let clean = rel.components().all(|c| matches!(c, Component::Normal(_)));
    (clean && !rel.as_os_str().is_empty()).then(|| rel.to_path_buf())
}

/// Get the MIME type for a raw file based on extension
fn get_content_type(path: &std::path::Path) -> &'static str {
    if let Some(image) = image_content_type(path) {
        return image;
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "mp4" | "m4v" | "m4u" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "divx" => "video/x-msvideo",
        "srt" => "application/x-subrip",
        "vtt" => "text/vtt; charset=utf-8",
        "nfo" => "text/xml; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Parse HTTP Range header (e.g., "bytes=0-1023" or "bytes=1024-")
fn parse_range_header(range_header: Option<&HeaderValue>, file_size: u64) -> Option<(u64, u64)> {
    let range = range_header?.to_str().ok()?.strip_prefix("bytes=")?;
    let (start, end) = range.split_once('-')?;
    if file_size == 0 {
        return None;
    }

    let start: u64 = if start.is_empty() {
        // Suffix range: "-500" means last 500 bytes
        let suffix_len: u64 = end.parse().ok()?;
        file_size.saturating_sub(suffix_len)
    } else {
        start.parse().ok()?
    };
    let end: u64 = if end.is_empty() || range.starts_with('-') {
        file_size - 1
    } else {
        end.parse().ok()?
    };

    if start > end || start >= file_size {
        return None;
    }
    Some((start, end.min(file_size - 1)))
}

/// GET /data/:source/*path
async fn get_data(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((source, path)): Path<(usize, String)>,
    Query(params): Query<ImageParams>,
) -> Result<Response, (StatusCode, String)> {
    let snapshot = state.catalog.snapshot();
    let coll = snapshot
        .by_source(source)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Collection not found".to_string()))?;
    let rel = safe_relative(&path)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "Invalid path".to_string()))?;
    let full = coll.directory.join(rel);

    if image_content_type(&full).is_none() {
        return serve_file(&full, &headers).await;
    }

    match state.images.resolve(&full, &params).await {
        Ok(artifact) => image_response(artifact),
        Err(ArtifactError::NotFound) => Err((StatusCode::NOT_FOUND, "File not found".to_string())),
        Err(ArtifactError::NotAnImage) => serve_file(&full, &headers).await,
        Err(e) => {
            tracing::warn!("Image {} failed: {}", full.display(), e);
            Err(internal_error(e))
        }
    }
}

fn image_response(artifact: Artifact) -> Result<Response, (StatusCode, String)> {
    let size = artifact.blob.size();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, artifact.content_type)
        .header(header::CONTENT_LENGTH, size)
        .header(header::CACHE_CONTROL, "public, max-age=86400") // Cache for 24 hours
        .body(artifact.blob.into_body())
        .map_err(internal_error)
}

/// Stream a file as-is, honoring a single byte range
async fn serve_file(
    path: &std::path::Path,
    headers: &HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    let mut file = File::open(path)
        .await
        .map_err(|e| (StatusCode::NOT_FOUND, format!("Cannot open file: {}", e)))?;
    let metadata = file.metadata().await.map_err(internal_error)?;
    if !metadata.is_file() {
        return Err((StatusCode::NOT_FOUND, "Not a file".to_string()));
    }

    let file_size = metadata.len();
    let content_type = get_content_type(path);

    match parse_range_header(headers.get(header::RANGE), file_size) {
        Some((start, end)) => {
            let length = end - start + 1;
            tracing::debug!(
                "Serving range {}-{}/{} for {}",
                start,
                end,
                file_size,
                path.display()
            );

            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(internal_error)?;
            let body = Body::from_stream(ReaderStream::new(file.take(length)));

            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, length)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, file_size),
                )
                .header(header::ACCEPT_RANGES, "bytes")
                .body(body)
                .map_err(internal_error)
        }
        None => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, file_size)
            .header(header::ACCEPT_RANGES, "bytes")
            .body(Body::from_stream(ReaderStream::new(file)))
            .map_err(internal_error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_relative() {
        assert_eq!(
            safe_relative("Alien%20(1979)/poster.jpg"),
            Some(PathBuf::from("Alien%20(1979)/poster.jpg"))
        );
        assert_eq!(
            safe_relative("/Show/S01/ep.mkv"),
            Some(PathBuf::from("Show/S01/ep.mkv"))
        );
        assert_eq!(safe_relative("Show/../../etc/passwd"), None);
        assert_eq!(safe_relative("./poster.jpg"), None);
        assert_eq!(safe_relative(""), None);
    }

    #[test]
    fn test_parse_range_header() {
        let range = |s: &'static str| HeaderValue::from_static(s);
        assert_eq!(parse_range_header(Some(&range("bytes=0-99")), 1000), Some((0, 99)));
        assert_eq!(parse_range_header(Some(&range("bytes=900-")), 1000), Some((900, 999)));
        assert_eq!(parse_range_header(Some(&range("bytes=-100")), 1000), Some((900, 999)));
        assert_eq!(parse_range_header(Some(&range("bytes=0-5000")), 1000), Some((0, 999)));
        assert_eq!(parse_range_header(Some(&range("bytes=1000-")), 1000), None);
        assert_eq!(parse_range_header(Some(&range("items=0-1")), 1000), None);
        assert_eq!(parse_range_header(None, 1000), None);
    }

    #[test]
    fn test_content_types() {
        use std::path::Path;
        assert_eq!(get_content_type(Path::new("a/b.mkv")), "video/x-matroska");
        assert_eq!(get_content_type(Path::new("b.en.srt")), "application/x-subrip");
        assert_eq!(get_content_type(Path::new("poster.tbn")), "image/jpeg");
        assert_eq!(get_content_type(Path::new("README")), "application/octet-stream");
    }
}
