//! AWS Signature V4 request signing and presigned URL generation
//!
//! Covers header-signed API calls (UNSIGNED-PAYLOAD) and query-string
//! presigning for GET/PUT/part uploads.
//!
//! Reference: https://docs.aws.amazon.com/AmazonS3/latest/API/sig-v4-authenticating-requests.html

use crate::client::{uri_encode, uri_encode_path};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Credentials and scope for SigV4 signing.
#[derive(Debug, Clone)]
pub struct SigningKey {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
}

/// Headers to apply to an outgoing signed request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub authorization: String,
    pub x_amz_date: String,
    pub x_amz_content_sha256: String,
    pub x_amz_security_token: Option<String>,
}

/// Sign a request with `Authorization`-header auth.
///
/// `path` must already be percent-encoded; `query` pairs are raw and get
/// encoded and sorted here. `payload_hash` is the hex SHA-256 of the body or
/// [`UNSIGNED_PAYLOAD`].
pub fn sign_request(
    key: &SigningKey,
    method: &str,
    host: &str,
    path: &str,
    query: &[(String, String)],
    payload_hash: &str,
    now: DateTime<Utc>,
) -> SignedHeaders {
    let date_str = now.format("%Y%m%d").to_string();
    let datetime_str = now.format("%Y%m%dT%H%M%SZ").to_string();
    let credential_scope = format!("{date_str}/{}/s3/aws4_request", key.region);

    let canonical_qs = canonical_query(query);

    // Signed headers: host + the x-amz-* values we set, sorted.
    let mut header_pairs: Vec<(String, String)> = vec![
        ("host".into(), host.to_string()),
        ("x-amz-content-sha256".into(), payload_hash.to_string()),
        ("x-amz-date".into(), datetime_str.clone()),
    ];
    if let Some(token) = &key.session_token {
        header_pairs.push(("x-amz-security-token".into(), token.clone()));
    }
    header_pairs.sort();
    let canonical_headers: String = header_pairs
        .iter()
        .map(|(k, v)| format!("{k}:{}\n", v.trim()))
        .collect();
    let signed_headers: String = header_pairs
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{method}\n{path}\n{canonical_qs}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );

    let signature = compute_signature(key, &credential_scope, &canonical_request, &datetime_str, &date_str);

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        key.access_key_id,
    );

    SignedHeaders {
        authorization,
        x_amz_date: datetime_str,
        x_amz_content_sha256: payload_hash.to_string(),
        x_amz_security_token: key.session_token.clone(),
    }
}

/// Generate a presigned URL for any method (GET downloads, PUT uploads,
/// multipart part PUTs via `extra_query`).
pub fn presign_url(
    key: &SigningKey,
    method: &str,
    endpoint: &str,
    bucket: &str,
    object_key: &str,
    extra_query: &[(String, String)],
    expires_in: Duration,
    now: DateTime<Utc>,
) -> String {
    let date_str = now.format("%Y%m%d").to_string();
    let datetime_str = now.format("%Y%m%dT%H%M%SZ").to_string();
    let credential_scope = format!("{date_str}/{}/s3/aws4_request", key.region);
    let credential = format!("{}/{credential_scope}", key.access_key_id);

    let host = endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');

    let mut query: Vec<(String, String)> = vec![
        ("X-Amz-Algorithm".into(), "AWS4-HMAC-SHA256".into()),
        ("X-Amz-Credential".into(), credential),
        ("X-Amz-Date".into(), datetime_str.clone()),
        ("X-Amz-Expires".into(), expires_in.as_secs().to_string()),
        ("X-Amz-SignedHeaders".into(), "host".into()),
    ];
    if let Some(token) = &key.session_token {
        query.push(("X-Amz-Security-Token".into(), token.clone()));
    }
    query.extend_from_slice(extra_query);

    let canonical_qs = canonical_query(&query);
    let canonical_uri = format!("/{}/{}", uri_encode(bucket), uri_encode_path(object_key));

    let canonical_request = format!(
        "{method}\n{canonical_uri}\n{canonical_qs}\nhost:{host}\n\nhost\n{UNSIGNED_PAYLOAD}"
    );

    let signature = compute_signature(key, &credential_scope, &canonical_request, &datetime_str, &date_str);

    format!(
        "{endpoint}{canonical_uri}?{canonical_qs}&X-Amz-Signature={signature}",
        endpoint = endpoint.trim_end_matches('/'),
    )
}

fn canonical_query(query: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn compute_signature(
    key: &SigningKey,
    credential_scope: &str,
    canonical_request: &str,
    datetime_str: &str,
    date_str: &str,
) -> String {
    let cr_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    let string_to_sign =
        format!("AWS4-HMAC-SHA256\n{datetime_str}\n{credential_scope}\n{cr_hash}");
    let signing_key = derive_signing_key(&key.secret_access_key, date_str, &key.region);
    let mut mac = HmacSha256::new_from_slice(&signing_key).expect("HMAC accepts any key length");
    mac.update(string_to_sign.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Derive the SigV4 signing key from the secret and scope components.
fn derive_signing_key(secret: &str, date: &str, region: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Hex SHA-256 of a byte payload.
pub(crate) fn payload_sha256(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SigningKey {
        SigningKey {
            access_key_id: "AKID".into(),
            secret_access_key: "secret".into(),
            session_token: None,
            region: "us-east-1".into(),
        }
    }

    #[test]
    fn test_presign_put_shape() {
        let url = presign_url(
            &test_key(),
            "PUT",
            "http://localhost:9000",
            "my-bucket",
            "path/to/file.parquet",
            &[],
            Duration::from_secs(3600),
            Utc::now(),
        );
        assert!(url.starts_with("http://localhost:9000/my-bucket/path/to/file.parquet?"));
        assert!(url.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[test]
    fn test_presign_part_carries_upload_query() {
        let url = presign_url(
            &test_key(),
            "PUT",
            "https://s3.amazonaws.com",
            "b",
            "k",
            &[
                ("partNumber".into(), "3".into()),
                ("uploadId".into(), "abc".into()),
            ],
            Duration::from_secs(600),
            Utc::now(),
        );
        assert!(url.contains("partNumber=3"));
        assert!(url.contains("uploadId=abc"));
    }

    #[test]
    fn test_session_token_is_signed_header() {
        let mut key = test_key();
        key.session_token = Some("tok".into());
        let signed = sign_request(
            &key,
            "GET",
            "s3.amazonaws.com",
            "/bucket",
            &[],
            UNSIGNED_PAYLOAD,
            Utc::now(),
        );
        assert!(signed.authorization.contains("x-amz-security-token"));
        assert_eq!(signed.x_amz_security_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_signature_is_stable_for_fixed_inputs() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = sign_request(&test_key(), "GET", "h", "/p", &[], UNSIGNED_PAYLOAD, now);
        let b = sign_request(&test_key(), "GET", "h", "/p", &[], UNSIGNED_PAYLOAD, now);
        assert_eq!(a.authorization, b.authorization);
    }

    #[test]
    fn test_canonical_query_sorted() {
        let qs = canonical_query(&[
            ("uploadId".into(), "u".into()),
            ("partNumber".into(), "1".into()),
        ]);
        assert_eq!(qs, "partNumber=1&uploadId=u");
    }
}
