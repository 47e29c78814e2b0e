//! Request authentication and cross-origin controls
//!
//! One optional static token guards the whole surface, matched against the
//! `X-Api-Token` header (WS/SSE may pass `?token=` instead, since browser
//! EventSource and WebSocket cannot set headers). When the server is bound
//! beyond loopback, requests must additionally carry an allowed `Host` and,
//! when present, an allowed `Origin`.

use axum::extract::{Query, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use objectdeck_common::Error;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::ApiError;
use crate::AppState;

/// Authentication settings resolved at startup.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub api_token: Option<String>,
    pub allow_remote: bool,
    pub allowed_hosts: Vec<String>,
}

#[derive(Deserialize)]
pub(crate) struct TokenQuery {
    token: Option<String>,
}

fn host_allowed(config: &AuthConfig, value: &str) -> bool {
    let host = value.split(':').next().unwrap_or(value);
    if matches!(host, "localhost" | "127.0.0.1" | "[::1]") {
        return true;
    }
    config.allowed_hosts.iter().any(|allowed| allowed == host)
}

fn origin_allowed(config: &AuthConfig, value: &str) -> bool {
    let rest = value
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    host_allowed(config, rest)
}

/// Core check shared by the middleware and the realtime handlers.
pub(crate) fn authorize(
    config: &AuthConfig,
    header_token: Option<&str>,
    query_token: Option<&str>,
    host: Option<&str>,
    origin: Option<&str>,
) -> Result<(), Error> {
    if let Some(expected) = &config.api_token {
        let presented = header_token.or(query_token);
        if presented != Some(expected.as_str()) {
            return Err(Error::Unauthorized("missing or invalid API token".into()));
        }
    }
    if config.allow_remote {
        match host {
            Some(host) if host_allowed(config, host) => {}
            Some(host) => {
                return Err(Error::Forbidden(format!("host {host} is not allowed")));
            }
            None => return Err(Error::Forbidden("request has no Host header".into())),
        }
        if let Some(origin) = origin {
            if !origin_allowed(config, origin) {
                return Err(Error::Forbidden(format!("origin {origin} is not allowed")));
            }
        }
    }
    Ok(())
}

/// Axum middleware for the REST surface. Realtime routes re-check with the
/// query token allowance inside their handlers.
pub async fn auth_layer(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // The WebSocket route authenticates after the upgrade so failures can
    // surface as close code 4401 instead of a failed handshake.
    if request.uri().path() == "/ws" {
        return Ok(next.run(request).await);
    }
    let headers = request.headers();
    let header_token = headers.get("x-api-token").and_then(|v| v.to_str().ok());
    let host = headers.get("host").and_then(|v| v.to_str().ok());
    let origin = headers.get("origin").and_then(|v| v.to_str().ok());
    let realtime = request.uri().path() == "/events";
    let query_token = if realtime { query.token.as_deref() } else { None };

    authorize(&state.auth, header_token, query_token, host, origin)?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: Option<&str>, remote: bool, hosts: &[&str]) -> AuthConfig {
        AuthConfig {
            api_token: token.map(String::from),
            allow_remote: remote,
            allowed_hosts: hosts.iter().map(|h| h.to_string()).collect(),
        }
    }

    #[test]
    fn test_token_checks() {
        let c = config(Some("s3cret"), false, &[]);
        assert!(authorize(&c, Some("s3cret"), None, None, None).is_ok());
        assert!(authorize(&c, None, Some("s3cret"), None, None).is_ok());
        assert!(matches!(
            authorize(&c, Some("wrong"), None, None, None),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            authorize(&c, None, None, None, None),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_no_token_configured_allows_local() {
        let c = config(None, false, &[]);
        assert!(authorize(&c, None, None, Some("localhost:8080"), None).is_ok());
    }

    #[test]
    fn test_remote_requires_allowed_host() {
        let c = config(Some("t"), true, &["deck.example.com"]);
        assert!(authorize(&c, Some("t"), None, Some("deck.example.com:9300"), None).is_ok());
        assert!(matches!(
            authorize(&c, Some("t"), None, Some("evil.example.com"), None),
            Err(Error::Forbidden(_))
        ));
        // Loopback hosts always pass.
        assert!(authorize(&c, Some("t"), None, Some("127.0.0.1:9300"), None).is_ok());
    }

    #[test]
    fn test_origin_checked_when_present() {
        let c = config(None, true, &["deck.example.com"]);
        assert!(authorize(
            &c,
            None,
            None,
            Some("deck.example.com"),
            Some("https://deck.example.com")
        )
        .is_ok());
        assert!(matches!(
            authorize(
                &c,
                None,
                None,
                Some("deck.example.com"),
                Some("https://attacker.example.com")
            ),
            Err(Error::Forbidden(_))
        ));
    }
}
