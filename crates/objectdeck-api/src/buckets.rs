//! Bucket resource handlers

use crate::error::ApiResult;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use objectdeck_common::ProfileId;
use objectdeck_providers::BucketInfo;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct CreateBucketRequest {
    pub name: String,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ProfileId>,
) -> ApiResult<Json<Vec<BucketInfo>>> {
    let provider = state.provider(id)?;
    Ok(Json(provider.list_buckets().await?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ProfileId>,
    Json(request): Json<CreateBucketRequest>,
) -> ApiResult<StatusCode> {
    if request.name.is_empty() {
        return Err(objectdeck_common::Error::invalid_argument("bucket name is required").into());
    }
    let provider = state.provider(id)?;
    provider.create_bucket(&request.name).await?;
    Ok(StatusCode::CREATED)
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path((id, bucket)): Path<(ProfileId, String)>,
) -> ApiResult<StatusCode> {
    let provider = state.provider(id)?;
    provider.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_policy(
    State(state): State<Arc<AppState>>,
    Path((id, bucket)): Path<(ProfileId, String)>,
) -> ApiResult<Json<Value>> {
    let provider = state.provider(id)?;
    Ok(Json(provider.get_bucket_policy(&bucket).await?))
}

pub async fn put_policy(
    State(state): State<Arc<AppState>>,
    Path((id, bucket)): Path<(ProfileId, String)>,
    Json(policy): Json<Value>,
) -> ApiResult<StatusCode> {
    let provider = state.provider(id)?;
    provider.put_bucket_policy(&bucket, &policy).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_policy(
    State(state): State<Arc<AppState>>,
    Path((id, bucket)): Path<(ProfileId, String)>,
) -> ApiResult<StatusCode> {
    let provider = state.provider(id)?;
    provider.delete_bucket_policy(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn validate_policy(
    State(state): State<Arc<AppState>>,
    Path((id, _bucket)): Path<(ProfileId, String)>,
    Json(policy): Json<Value>,
) -> ApiResult<Json<Value>> {
    let provider = state.provider(id)?;
    provider.validate_policy(&policy)?;
    Ok(Json(serde_json::json!({"valid": true})))
}
