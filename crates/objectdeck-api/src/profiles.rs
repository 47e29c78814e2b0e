//! Profile resource handlers
//!
//! Profile responses never carry secrets; the dedicated `/secrets` endpoint
//! returns the decrypted values for clients that need to re-edit them.

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use objectdeck_common::{ProfileId, ProviderKind};
use objectdeck_store::{NewProfile, Profile, ProfileTlsConfig, ProfileUpdate};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Profile as exposed over the wire, secrets elided.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub id: ProfileId,
    pub name: String,
    pub provider: ProviderKind,
    pub config: Value,
    pub preserve_leading_slash: bool,
    pub tls_insecure_skip_verify: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Profile> for ProfileResponse {
    fn from(profile: Profile) -> Self {
        Self {
            id: profile.id,
            name: profile.name,
            provider: profile.provider,
            config: profile.config,
            preserve_leading_slash: profile.preserve_leading_slash,
            tls_insecure_skip_verify: profile.tls_insecure_skip_verify,
            created_at: profile.created_at,
            updated_at: profile.updated_at,
        }
    }
}

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<ProfileResponse>>> {
    let profiles = state.store.list_profiles()?;
    Ok(Json(profiles.into_iter().map(ProfileResponse::from).collect()))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewProfile>,
) -> ApiResult<(StatusCode, Json<ProfileResponse>)> {
    let profile = state.store.create_profile(new)?;
    Ok((StatusCode::CREATED, Json(profile.into())))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ProfileId>,
) -> ApiResult<Json<ProfileResponse>> {
    Ok(Json(state.store.get_profile(id)?.into()))
}

/// Decrypted provider secrets for one profile.
pub async fn secrets(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ProfileId>,
) -> ApiResult<Json<Value>> {
    Ok(Json(state.store.get_profile(id)?.secrets))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ProfileId>,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<Json<ProfileResponse>> {
    Ok(Json(state.store.update_profile(id, update)?.into()))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ProfileId>,
) -> ApiResult<StatusCode> {
    state.scheduler.delete_profile(id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_tls(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ProfileId>,
) -> ApiResult<Json<Value>> {
    match state.store.get_profile_tls(id)? {
        Some(tls) => Ok(Json(serde_json::to_value(tls).map_err(objectdeck_common::Error::from)?)),
        None => Err(ApiError(objectdeck_common::Error::not_found(
            "profile has no TLS config",
        ))),
    }
}

pub async fn put_tls(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ProfileId>,
    Json(tls): Json<ProfileTlsConfig>,
) -> ApiResult<StatusCode> {
    state.store.put_profile_tls(id, &tls)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_tls(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ProfileId>,
) -> ApiResult<StatusCode> {
    state.store.delete_profile_tls(id)?;
    Ok(StatusCode::NO_CONTENT)
}
