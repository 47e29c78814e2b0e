//! HTTP/WS surface
//!
//! REST resources over the store, scheduler, and upload subsystem, plus two
//! realtime transports (WebSocket and SSE) fed by the event bus. All routes
//! sit behind the token/host middleware in [`auth`].

mod auth;
mod buckets;
mod error;
mod jobs;
mod meta;
mod objects;
mod profiles;
mod realtime;
mod uploads;

pub use auth::AuthConfig;
pub use error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::{middleware, Router};
use objectdeck_common::{ProfileId, Result};
use objectdeck_engine::EngineDriver;
use objectdeck_events::EventBus;
use objectdeck_jobs::{Connector, Scheduler};
use objectdeck_providers::ObjectStore;
use objectdeck_store::Store;
use objectdeck_uploads::UploadManager;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Limits surfaced via `/meta` so clients can adapt without probing.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaLimits {
    pub upload_max_bytes: u64,
    pub upload_ttl_seconds: u64,
    pub job_concurrency: usize,
    pub job_log_max_bytes: u64,
    pub direct_stream: bool,
}

/// Shared state for all handlers.
pub struct AppState {
    pub store: Store,
    pub bus: Arc<EventBus>,
    pub scheduler: Arc<Scheduler>,
    pub uploads: Arc<UploadManager>,
    pub engine: EngineDriver,
    pub connector: Connector,
    pub auth: AuthConfig,
    pub limits: MetaLimits,
    pub engine_version: Option<String>,
    /// Cancelled at server shutdown; realtime streams close with 1001.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build a provider adapter for a profile, TLS material included.
    pub(crate) fn provider(&self, profile_id: ProfileId) -> Result<Box<dyn ObjectStore>> {
        let profile = self.store.get_profile(profile_id)?;
        let tls = self.store.get_profile_tls(profile_id).ok().flatten();
        (self.connector)(&profile, tls.as_ref())
    }
}

/// Assemble the full application router.
pub fn router(state: Arc<AppState>, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        // Profiles
        .route("/profiles", get(profiles::list).post(profiles::create))
        .route(
            "/profiles/{id}",
            get(profiles::get).put(profiles::update).delete(profiles::remove),
        )
        .route("/profiles/{id}/secrets", get(profiles::secrets))
        .route(
            "/profiles/{id}/tls",
            get(profiles::get_tls).put(profiles::put_tls).delete(profiles::delete_tls),
        )
        // Buckets
        .route(
            "/profiles/{id}/buckets",
            get(buckets::list).post(buckets::create),
        )
        .route("/profiles/{id}/buckets/{bucket}", delete(buckets::remove))
        .route(
            "/profiles/{id}/buckets/{bucket}/policy",
            get(buckets::get_policy)
                .put(buckets::put_policy)
                .delete(buckets::delete_policy),
        )
        .route(
            "/profiles/{id}/buckets/{bucket}/policy/validate",
            post(buckets::validate_policy),
        )
        // Objects
        .route("/profiles/{id}/buckets/{bucket}/objects", get(objects::list))
        .route("/profiles/{id}/buckets/{bucket}/objects/head", get(objects::head))
        .route(
            "/profiles/{id}/buckets/{bucket}/objects/delete",
            post(objects::delete_batch),
        )
        .route(
            "/profiles/{id}/buckets/{bucket}/objects/presign",
            get(objects::presign_download),
        )
        .route(
            "/profiles/{id}/buckets/{bucket}/objects/download",
            get(objects::download),
        )
        .route(
            "/profiles/{id}/buckets/{bucket}/objects/upload",
            put(objects::upload),
        )
        .route(
            "/profiles/{id}/buckets/{bucket}/objects/search",
            get(objects::search),
        )
        .route(
            "/profiles/{id}/buckets/{bucket}/index/summary",
            get(objects::index_summary),
        )
        .route(
            "/profiles/{id}/buckets/{bucket}/favorites",
            get(objects::list_favorites)
                .post(objects::add_favorite)
                .delete(objects::remove_favorite),
        )
        // Uploads
        .route("/uploads", post(uploads::create))
        .route("/uploads/{id}", get(uploads::get).delete(uploads::remove))
        .route("/uploads/{id}/files", post(uploads::append_files))
        .route("/uploads/{id}/direct", put(uploads::direct))
        .route("/uploads/{id}/presign", post(uploads::presign_put))
        .route("/uploads/{id}/multipart", post(uploads::create_multipart))
        .route(
            "/uploads/{id}/multipart/{upload_id}/parts",
            post(uploads::presign_part),
        )
        .route(
            "/uploads/{id}/multipart/{upload_id}/complete",
            post(uploads::complete_multipart),
        )
        .route("/uploads/{id}/commit", post(uploads::commit))
        // Jobs
        .route("/jobs", get(jobs::list).post(jobs::create))
        .route("/jobs/{id}", get(jobs::get).delete(jobs::remove))
        .route("/jobs/{id}/cancel", post(jobs::cancel))
        .route("/jobs/{id}/retry", post(jobs::retry))
        .route("/jobs/{id}/logs/tail", get(jobs::logs_tail))
        .route("/jobs/{id}/logs", get(jobs::logs_from))
        // Meta
        .route("/meta", get(meta::meta));

    let mut app = Router::new()
        .nest("/api", api)
        .route("/ws", get(realtime::ws_handler))
        .route("/events", get(realtime::sse_handler))
        .layer(DefaultBodyLimit::max(
            usize::try_from(state.limits.upload_max_bytes).unwrap_or(usize::MAX),
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::auth_layer,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }
    app
}
