//! Upload session handlers

use crate::error::ApiResult;
use crate::AppState;
use axum::extract::{Multipart, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::Json;
use futures::TryStreamExt;
use objectdeck_common::{Error, ProfileId, UploadMode, UploadSessionId};
use objectdeck_providers::CompletedPart;
use objectdeck_store::{JobRecord, UploadSession};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadRequest {
    pub profile_id: ProfileId,
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    pub mode: UploadMode,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateUploadRequest>,
) -> ApiResult<(StatusCode, Json<UploadSession>)> {
    let session = state.uploads.create_session(
        request.profile_id,
        &request.bucket,
        &request.prefix,
        request.mode,
    )?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<UploadSessionId>,
) -> ApiResult<Json<UploadSession>> {
    Ok(Json(state.uploads.get_session(id)?))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<UploadSessionId>,
) -> ApiResult<StatusCode> {
    state.uploads.delete_session(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Append multipart form files to a staging session. Each part's filename
/// is the object path under the session prefix.
pub async fn append_files(
    State(state): State<Arc<AppState>>,
    Path(id): Path<UploadSessionId>,
    mut multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let mut accepted = 0u64;
    let mut bytes = 0u64;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::invalid_argument(format!("multipart body: {e}")))?
    {
        let Some(rel_path) = field.file_name().map(String::from) else {
            continue;
        };
        let stream = futures::stream::unfold(field, |mut field| async move {
            match field.chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), field)),
                Ok(None) => None,
                Err(e) => Some((Err(e.to_string()), field)),
            }
        });
        futures::pin_mut!(stream);
        bytes += state.uploads.append_file(id, &rel_path, stream).await?;
        accepted += 1;
    }
    if accepted == 0 {
        return Err(Error::invalid_argument("no file parts in request").into());
    }
    Ok(Json(serde_json::json!({"files": accepted, "bytes": bytes})))
}

#[derive(Deserialize)]
pub struct DirectQuery {
    pub path: String,
}

/// Direct-stream a request body into the session's bucket.
pub async fn direct(
    State(state): State<Arc<AppState>>,
    Path(id): Path<UploadSessionId>,
    Query(query): Query<DirectQuery>,
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
    state
        .uploads
        .direct_put(
            id,
            &query.path,
            reqwest::Body::wrap_stream(stream),
            len,
            content_type.as_deref(),
        )
        .await?;
    Ok(StatusCode::CREATED)
}

#[derive(Deserialize)]
pub struct PresignRequest {
    pub path: String,
}

pub async fn presign_put(
    State(state): State<Arc<AppState>>,
    Path(id): Path<UploadSessionId>,
    Json(request): Json<PresignRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let url = state.uploads.presign_put(id, &request.path).await?;
    Ok(Json(serde_json::json!({"url": url})))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMultipartRequest {
    pub path: String,
    pub chunk_size: u64,
    pub total_size: u64,
}

pub async fn create_multipart(
    State(state): State<Arc<AppState>>,
    Path(id): Path<UploadSessionId>,
    Json(request): Json<CreateMultipartRequest>,
) -> ApiResult<(StatusCode, Json<objectdeck_uploads::MultipartIssue>)> {
    let issue = state
        .uploads
        .create_multipart(id, &request.path, request.chunk_size, request.total_size)
        .await?;
    Ok((StatusCode::CREATED, Json(issue)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignPartRequest {
    pub path: String,
    pub part_number: u32,
}

pub async fn presign_part(
    State(state): State<Arc<AppState>>,
    Path((id, upload_id)): Path<(UploadSessionId, String)>,
    Json(request): Json<PresignPartRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let url = state
        .uploads
        .presign_part(id, &upload_id, &request.path, request.part_number)
        .await?;
    Ok(Json(serde_json::json!({"url": url})))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteMultipartRequest {
    pub path: String,
    pub parts: Vec<CompletedPart>,
}

pub async fn complete_multipart(
    State(state): State<Arc<AppState>>,
    Path((id, upload_id)): Path<(UploadSessionId, String)>,
    Json(request): Json<CompleteMultipartRequest>,
) -> ApiResult<StatusCode> {
    state
        .uploads
        .complete_multipart(id, &upload_id, &request.path, &request.parts)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Commit a staging session into a transfer job.
pub async fn commit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<UploadSessionId>,
) -> ApiResult<(StatusCode, Json<JobRecord>)> {
    let job = state.uploads.commit(id)?;
    Ok((StatusCode::CREATED, Json(job)))
}
