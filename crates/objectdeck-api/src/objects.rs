//! Object resource handlers
//!
//! Listing, head, batch delete, presigned downloads with a proxy fallback,
//! streaming proxy download/upload, index search, and favorites.

use crate::error::ApiResult;
use crate::AppState;
use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use futures::TryStreamExt;
use objectdeck_common::{Error, ProfileId};
use objectdeck_providers::{ListObjectsPage, ListObjectsRequest};
use objectdeck_store::SearchFilters;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const PRESIGN_TTL: Duration = Duration::from_secs(900);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub prefix: String,
    pub delimiter: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct KeyQuery {
    pub key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignQuery {
    pub key: String,
    #[serde(default)]
    pub proxy: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    pub extension: Option<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub modified_after: Option<chrono::DateTime<chrono::Utc>>,
    pub modified_before: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Deserialize)]
pub struct DeleteBatchRequest {
    pub keys: Vec<String>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Path((id, bucket)): Path<(ProfileId, String)>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListObjectsPage>> {
    let provider = state.provider(id)?;
    let page = provider
        .list_objects(&ListObjectsRequest {
            bucket,
            prefix: query.prefix,
            delimiter: query.delimiter,
            cursor: query.cursor,
            limit: query.limit,
        })
        .await?;
    Ok(Json(page))
}

pub async fn head(
    State(state): State<Arc<AppState>>,
    Path((id, bucket)): Path<(ProfileId, String)>,
    Query(query): Query<KeyQuery>,
) -> ApiResult<Json<objectdeck_common::ObjectEntry>> {
    let provider = state.provider(id)?;
    Ok(Json(provider.head_object(&bucket, &query.key).await?))
}

pub async fn delete_batch(
    State(state): State<Arc<AppState>>,
    Path((id, bucket)): Path<(ProfileId, String)>,
    Json(request): Json<DeleteBatchRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if request.keys.is_empty() {
        return Err(Error::invalid_argument("keys must not be empty").into());
    }
    let provider = state.provider(id)?;
    provider.delete_objects(&bucket, &request.keys).await?;
    Ok(Json(serde_json::json!({"deleted": request.keys.len()})))
}

/// Presigned download URL, or a proxy URL when `proxy=true` (or the
/// provider cannot presign).
pub async fn presign_download(
    State(state): State<Arc<AppState>>,
    Path((id, bucket)): Path<(ProfileId, String)>,
    Query(query): Query<PresignQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let proxy_url = format!(
        "/api/profiles/{id}/buckets/{bucket}/objects/download?key={}",
        urlencode(&query.key)
    );
    if query.proxy {
        return Ok(Json(serde_json::json!({"url": proxy_url, "proxy": true})));
    }
    let provider = state.provider(id)?;
    match provider.presign_get(&bucket, &query.key, PRESIGN_TTL).await {
        Ok(url) => Ok(Json(serde_json::json!({"url": url, "proxy": false}))),
        Err(e) if e.code() == objectdeck_common::ErrorCode::NotSupported => {
            Ok(Json(serde_json::json!({"url": proxy_url, "proxy": true})))
        }
        Err(e) => Err(e.into()),
    }
}

/// Streaming proxy download.
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path((id, bucket)): Path<(ProfileId, String)>,
    Query(query): Query<KeyQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range);
    let provider = state.provider(id)?;
    let body = provider.get_object(&bucket, &query.key, range).await?;

    let mut response = Response::builder().status(if range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    });
    if let Some(len) = body.content_length {
        response = response.header(header::CONTENT_LENGTH, len);
    }
    response = response.header(
        header::CONTENT_TYPE,
        body.content_type.as_deref().unwrap_or("application/octet-stream"),
    );
    if let Some(etag) = &body.etag {
        response = response.header(header::ETAG, etag);
    }
    let filename = query.key.rsplit('/').next().unwrap_or(&query.key);
    response = response.header(
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{filename}\""),
    );
    response
        .body(Body::from_stream(body.stream))
        .map_err(|e| Error::internal(format!("build response: {e}")).into())
}

/// Streaming proxy upload: the request body goes straight to the provider.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Path((id, bucket)): Path<(ProfileId, String)>,
    Query(query): Query<KeyQuery>,
    request: Request,
) -> ApiResult<StatusCode> {
    let len = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let stream = request
        .into_body()
        .into_data_stream()
        .map_err(|e| std::io::Error::other(e.to_string()));
    let provider = state.provider(id)?;
    provider
        .put_object_stream(
            &bucket,
            &query.key,
            reqwest::Body::wrap_stream(stream),
            len,
            content_type.as_deref(),
        )
        .await?;
    Ok(StatusCode::CREATED)
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Path((id, bucket)): Path<(ProfileId, String)>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<objectdeck_store::SearchPage>> {
    let filters = SearchFilters {
        extension: query.extension,
        min_size: query.min_size,
        max_size: query.max_size,
        modified_after: query.modified_after,
        modified_before: query.modified_before,
    };
    let page = state.store.search_object_index(
        id,
        &bucket,
        &query.q,
        &filters,
        query.cursor.as_deref(),
        query.limit.unwrap_or(100),
    )?;
    Ok(Json(page))
}

pub async fn index_summary(
    State(state): State<Arc<AppState>>,
    Path((id, bucket)): Path<(ProfileId, String)>,
) -> ApiResult<Json<objectdeck_store::IndexSummary>> {
    Ok(Json(state.store.object_index_summary(id, &bucket)?))
}

pub async fn list_favorites(
    State(state): State<Arc<AppState>>,
    Path((id, bucket)): Path<(ProfileId, String)>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.store.list_favorites(id, &bucket)?))
}

pub async fn add_favorite(
    State(state): State<Arc<AppState>>,
    Path((id, bucket)): Path<(ProfileId, String)>,
    Json(request): Json<KeyBody>,
) -> ApiResult<StatusCode> {
    state.store.add_favorite(id, &bucket, &request.key)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_favorite(
    State(state): State<Arc<AppState>>,
    Path((id, bucket)): Path<(ProfileId, String)>,
    Query(query): Query<KeyQuery>,
) -> ApiResult<StatusCode> {
    state.store.remove_favorite(id, &bucket, &query.key)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct KeyBody {
    pub key: String,
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Parse a `bytes=start-end?` range header.
fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end = if end.is_empty() { None } else { Some(end.parse().ok()?) };
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("bytes=0-99"), Some((0, Some(99))));
        assert_eq!(parse_range("bytes=100-"), Some((100, None)));
        assert_eq!(parse_range("items=1-2"), None);
        assert_eq!(parse_range("bytes=x-"), None);
    }

    #[test]
    fn test_urlencode_keeps_slashes() {
        assert_eq!(urlencode("dir/file name.txt"), "dir/file%20name.txt");
    }
}
