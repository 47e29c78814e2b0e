//! Outbound HTTP client construction
//!
//! One `reqwest` client per adapter, honoring the profile's mTLS material
//! and the `tlsInsecureSkipVerify` escape hatch for self-signed lab setups.

use objectdeck_common::{Error, Result};
use objectdeck_store::{ProfileTlsConfig, TlsMode};
use std::time::Duration;

pub(crate) fn build_http_client(
    insecure_skip_verify: bool,
    tls: Option<&ProfileTlsConfig>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(300))
        .use_rustls_tls();

    if insecure_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(tls) = tls {
        if tls.mode == TlsMode::Mtls {
            let cert = tls
                .client_cert_pem
                .as_deref()
                .ok_or_else(|| Error::invalid_argument("mTLS config is missing client certificate"))?;
            let key = tls
                .client_key_pem
                .as_deref()
                .ok_or_else(|| Error::invalid_argument("mTLS config is missing client key"))?;
            let identity_pem = format!("{cert}\n{key}");
            let identity = reqwest::Identity::from_pem(identity_pem.as_bytes())
                .map_err(|e| Error::invalid_argument(format!("invalid mTLS identity: {e}")))?;
            builder = builder.identity(identity);
        }
        if let Some(ca) = tls.ca_pem.as_deref() {
            let ca = reqwest::Certificate::from_pem(ca.as_bytes())
                .map_err(|e| Error::invalid_argument(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(ca);
        }
    }

    builder
        .build()
        .map_err(|e| Error::internal(format!("build http client: {e}")))
}

/// Percent-encode a string for a URL path segment or query value. Unreserved
/// characters (`A-Z a-z 0-9 - _ . ~`) pass through.
pub(crate) fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => {
                out.push('%');
                out.push(
                    char::from_digit(u32::from(b >> 4), 16)
                        .unwrap()
                        .to_ascii_uppercase(),
                );
                out.push(
                    char::from_digit(u32::from(b & 0xf), 16)
                        .unwrap()
                        .to_ascii_uppercase(),
                );
            }
        }
    }
    out
}

/// Encode an object key for a URL path, keeping `/` separators.
pub(crate) fn uri_encode_path(key: &str) -> String {
    key.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}
