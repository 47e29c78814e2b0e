//! Job resource handlers

use crate::error::ApiResult;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use objectdeck_common::{Error, ErrorCode, JobId, JobStatus, JobType, ProfileId};
use objectdeck_store::{JobFilter, JobPage, JobRecord, NewJob};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub profile_id: ProfileId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobsQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub error_code: Option<String>,
    pub profile_id: Option<ProfileId>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<JobPage>> {
    let status = match &query.status {
        Some(raw) => Some(
            JobStatus::parse(raw)
                .ok_or_else(|| Error::invalid_argument(format!("unknown status {raw:?}")))?,
        ),
        None => None,
    };
    let job_type = match &query.job_type {
        Some(raw) => Some(
            JobType::parse(raw)
                .ok_or_else(|| Error::invalid_argument(format!("unknown job type {raw:?}")))?,
        ),
        None => None,
    };
    let filter = JobFilter {
        status,
        job_type,
        error_code: query.error_code.as_deref().map(ErrorCode::parse),
        profile_id: query.profile_id,
    };
    let page = state
        .store
        .list_jobs(&filter, query.cursor.as_deref(), query.limit.unwrap_or(50))?;
    Ok(Json(page))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobRecord>)> {
    let job_type = JobType::parse(&request.job_type)
        .ok_or_else(|| Error::invalid_argument(format!("unknown job type {:?}", request.job_type)))?;
    let job = state.scheduler.enqueue(NewJob {
        profile_id: request.profile_id,
        job_type,
        payload: request.payload,
    })?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<JobRecord>> {
    Ok(Json(state.store.get_job(id)?))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<JobRecord>> {
    Ok(Json(state.scheduler.cancel(id)?))
}

pub async fn retry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<(StatusCode, Json<JobRecord>)> {
    let job = state.scheduler.retry(id)?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<StatusCode> {
    state.scheduler.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct TailQuery {
    pub bytes: Option<u64>,
}

/// Last N bytes of the job log.
pub async fn logs_tail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
    Query(query): Query<TailQuery>,
) -> ApiResult<Json<Value>> {
    state.store.get_job(id)?;
    let chunk = state
        .engine
        .stream_tail(id, query.bytes.unwrap_or(16 * 1024))?;
    Ok(Json(serde_json::json!({
        "data": String::from_utf8_lossy(&chunk.bytes),
        "nextOffset": chunk.next_offset,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FromQuery {
    #[serde(default)]
    pub offset: u64,
    pub max_bytes: Option<u64>,
}

/// Log bytes from an offset. A `nextOffset` smaller than the requested
/// offset means the log rotated and the client must reset.
pub async fn logs_from(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
    Query(query): Query<FromQuery>,
) -> ApiResult<Json<Value>> {
    state.store.get_job(id)?;
    let chunk = state
        .engine
        .stream_from(id, query.offset, query.max_bytes.unwrap_or(64 * 1024))?;
    Ok(Json(serde_json::json!({
        "data": String::from_utf8_lossy(&chunk.bytes),
        "nextOffset": chunk.next_offset,
    })))
}
