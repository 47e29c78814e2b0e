//! Server metadata endpoint

use crate::AppState;
use axum::extract::State;
use axum::Json;
use objectdeck_common::ProviderKind;
use objectdeck_providers::Capabilities;
use serde_json::Value;
use std::sync::Arc;

const PROVIDERS: [ProviderKind; 6] = [
    ProviderKind::AwsS3,
    ProviderKind::S3Compatible,
    ProviderKind::OciS3Compat,
    ProviderKind::AzureBlob,
    ProviderKind::GcpGcs,
    ProviderKind::OciObjectStorage,
];

/// Version, per-provider capability matrix, configured limits, and whether
/// a transfer engine is present.
pub async fn meta(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut capabilities = serde_json::Map::new();
    for kind in PROVIDERS {
        capabilities.insert(
            kind.as_str().to_string(),
            serde_json::to_value(Capabilities::for_kind(kind)).unwrap_or(Value::Null),
        );
    }
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "capabilities": capabilities,
        "limits": state.limits,
        "engine": {
            "present": state.engine.is_available(),
            "version": state.engine_version,
        },
    }))
}
