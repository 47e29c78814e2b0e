//! S3 dialect client
//!
//! Serves `aws_s3`, `s3_compatible`, and `oci_s3_compat` profiles. Requests
//! are path-style and signed with SigV4; bodies of API calls are hashed,
//! object payloads go out as UNSIGNED-PAYLOAD.

pub(crate) mod sign;
mod xml;

use crate::client::{uri_encode, uri_encode_path};
use crate::error::{check_response, transport_error};
use crate::{
    json_str, json_str_opt, BucketInfo, CompletedPart, ListObjectsPage, ListObjectsRequest,
    ObjectBody,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use objectdeck_common::{Error, ObjectEntry, ProviderKind, Result};
use objectdeck_store::Profile;
use serde_json::Value;
use sign::{payload_sha256, presign_url, sign_request, SigningKey, UNSIGNED_PAYLOAD};
use std::time::Duration;

#[derive(Debug)]
pub struct S3Client {
    http: reqwest::Client,
    kind: ProviderKind,
    endpoint: String,
    host: String,
    key: SigningKey,
    preserve_leading_slash: bool,
}

impl S3Client {
    pub fn from_profile(profile: &Profile, http: reqwest::Client) -> Result<Self> {
        let region = json_str_opt(&profile.config, "region").unwrap_or("us-east-1").to_string();
        let endpoint = match json_str_opt(&profile.config, "endpoint") {
            Some(e) => e.trim_end_matches('/').to_string(),
            None if profile.provider == ProviderKind::AwsS3 => {
                format!("https://s3.{region}.amazonaws.com")
            }
            None => {
                return Err(Error::invalid_argument(
                    "s3-compatible profile requires an endpoint",
                ))
            }
        };
        let host = endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string();
        let key = SigningKey {
            access_key_id: json_str(&profile.secrets, "accessKeyId")?.to_string(),
            secret_access_key: json_str(&profile.secrets, "secretAccessKey")?.to_string(),
            session_token: json_str_opt(&profile.secrets, "sessionToken").map(String::from),
            region,
        };
        Ok(Self {
            http,
            kind: profile.provider,
            endpoint,
            host,
            key,
            preserve_leading_slash: profile.preserve_leading_slash,
        })
    }

    fn object_key<'a>(&self, key: &'a str) -> &'a str {
        if self.preserve_leading_slash {
            key
        } else {
            key.trim_start_matches('/')
        }
    }

    fn path(&self, bucket: &str, key: Option<&str>) -> String {
        match key {
            Some(key) => format!(
                "/{}/{}",
                uri_encode(bucket),
                uri_encode_path(self.object_key(key))
            ),
            None => format!("/{}", uri_encode(bucket)),
        }
    }

    /// Build and send a signed request.
    async fn send(
        &self,
        context: &str,
        method: reqwest::Method,
        path: &str,
        query: &[(String, String)],
        body: Option<Bytes>,
        content_type: Option<&str>,
        content_md5: Option<String>,
        range: Option<String>,
    ) -> Result<reqwest::Response> {
        let payload_hash = match &body {
            Some(bytes) => payload_sha256(bytes),
            None => payload_sha256(b""),
        };
        let signed = sign_request(
            &self.key,
            method.as_str(),
            &self.host,
            path,
            query,
            &payload_hash,
            Utc::now(),
        );

        // Keep the sent query byte-identical to the canonical form.
        let mut url = format!("{}{}", self.endpoint, path);
        if !query.is_empty() {
            let qs: Vec<String> = query
                .iter()
                .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
                .collect();
            url.push('?');
            url.push_str(&qs.join("&"));
        }

        let mut req = self
            .http
            .request(method, &url)
            .header("authorization", &signed.authorization)
            .header("x-amz-date", &signed.x_amz_date)
            .header("x-amz-content-sha256", &signed.x_amz_content_sha256);
        if let Some(token) = &signed.x_amz_security_token {
            req = req.header("x-amz-security-token", token);
        }
        if let Some(ct) = content_type {
            req = req.header("content-type", ct);
        }
        if let Some(md5) = content_md5 {
            req = req.header("content-md5", md5);
        }
        if let Some(range) = range {
            req = req.header("range", range);
        }
        if let Some(bytes) = body {
            req = req.body(bytes);
        }

        let response = req
            .send()
            .await
            .map_err(|e| transport_error(context, &e))?;
        check_response(context, response).await
    }
}

fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_rfc2822(s))
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

#[async_trait]
impl crate::ObjectStore for S3Client {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let response = self
            .send("ListBuckets", reqwest::Method::GET, "/", &[], None, None, None, None)
            .await?;
        let body = response.text().await.map_err(|e| transport_error("ListBuckets", &e))?;
        let parsed: xml::ListAllMyBucketsResult = quick_xml::de::from_str(&body)
            .map_err(|e| Error::internal(format!("parse ListBuckets response: {e}")))?;
        Ok(parsed
            .buckets
            .bucket
            .into_iter()
            .map(|b| BucketInfo {
                name: b.name,
                created_at: b.creation_date.as_deref().and_then(parse_http_date),
            })
            .collect())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let body = if self.kind == ProviderKind::AwsS3 && self.key.region != "us-east-1" {
            Some(Bytes::from(format!(
                "<CreateBucketConfiguration><LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
                self.key.region
            )))
        } else {
            None
        };
        self.send(
            "CreateBucket",
            reqwest::Method::PUT,
            &self.path(bucket, None),
            &[],
            body,
            Some("application/xml"),
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.send(
            "DeleteBucket",
            reqwest::Method::DELETE,
            &self.path(bucket, None),
            &[],
            None,
            None,
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn list_objects(&self, req: &ListObjectsRequest) -> Result<ListObjectsPage> {
        let mut query: Vec<(String, String)> = vec![("list-type".into(), "2".into())];
        if !req.prefix.is_empty() {
            query.push(("prefix".into(), req.prefix.clone()));
        }
        if let Some(delimiter) = &req.delimiter {
            query.push(("delimiter".into(), delimiter.clone()));
        }
        if let Some(cursor) = &req.cursor {
            query.push(("continuation-token".into(), cursor.clone()));
        }
        if let Some(limit) = req.limit {
            query.push(("max-keys".into(), limit.to_string()));
        }

        let response = self
            .send(
                "ListObjects",
                reqwest::Method::GET,
                &self.path(&req.bucket, None),
                &query,
                None,
                None,
                None,
                None,
            )
            .await?;
        let body = response.text().await.map_err(|e| transport_error("ListObjects", &e))?;
        let parsed: xml::ListBucketResult = quick_xml::de::from_str(&body)
            .map_err(|e| Error::internal(format!("parse ListObjects response: {e}")))?;

        Ok(ListObjectsPage {
            objects: parsed
                .contents
                .into_iter()
                .map(|o| ObjectEntry {
                    key: o.key,
                    size: o.size,
                    etag: o.etag,
                    last_modified: o.last_modified.as_deref().and_then(parse_http_date),
                })
                .collect(),
            common_prefixes: parsed.common_prefixes.into_iter().map(|p| p.prefix).collect(),
            next_cursor: parsed
                .is_truncated
                .unwrap_or(false)
                .then_some(parsed.next_continuation_token)
                .flatten(),
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectEntry> {
        let response = self
            .send(
                "HeadObject",
                reqwest::Method::HEAD,
                &self.path(bucket, Some(key)),
                &[],
                None,
                None,
                None,
                None,
            )
            .await?;
        let headers = response.headers();
        let size = headers
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(ObjectEntry {
            key: key.to_string(),
            size,
            etag: headers
                .get("etag")
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            last_modified: headers
                .get("last-modified")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_http_date),
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<(u64, Option<u64>)>,
    ) -> Result<ObjectBody> {
        let range_header = range.map(|(start, end)| match end {
            Some(end) => format!("bytes={start}-{end}"),
            None => format!("bytes={start}-"),
        });
        let response = self
            .send(
                "GetObject",
                reqwest::Method::GET,
                &self.path(bucket, Some(key)),
                &[],
                None,
                None,
                None,
                range_header,
            )
            .await?;
        let content_length = response.content_length();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::internal(format!("object stream: {e}"))))
            .boxed();
        Ok(ObjectBody {
            stream,
            content_length,
            content_type,
            etag,
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<()> {
        self.send(
            "PutObject",
            reqwest::Method::PUT,
            &self.path(bucket, Some(key)),
            &[],
            Some(body),
            content_type,
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn put_object_stream(
        &self,
        bucket: &str,
        key: &str,
        body: reqwest::Body,
        len: Option<u64>,
        content_type: Option<&str>,
    ) -> Result<()> {
        let path = self.path(bucket, Some(key));
        let signed = sign_request(
            &self.key,
            "PUT",
            &self.host,
            &path,
            &[],
            UNSIGNED_PAYLOAD,
            Utc::now(),
        );
        let mut req = self
            .http
            .put(format!("{}{}", self.endpoint, path))
            .header("authorization", &signed.authorization)
            .header("x-amz-date", &signed.x_amz_date)
            .header("x-amz-content-sha256", UNSIGNED_PAYLOAD);
        if let Some(token) = &signed.x_amz_security_token {
            req = req.header("x-amz-security-token", token);
        }
        if let Some(len) = len {
            req = req.header("content-length", len);
        }
        if let Some(ct) = content_type {
            req = req.header("content-type", ct);
        }
        let response = req
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error("PutObject", &e))?;
        check_response("PutObject", response).await?;
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        // The wire API caps one request at 1000 keys.
        for chunk in keys.chunks(1000) {
            let request = xml::DeleteRequest {
                objects: chunk
                    .iter()
                    .map(|k| xml::DeleteObject {
                        key: self.object_key(k).to_string(),
                    })
                    .collect(),
                quiet: true,
            };
            let body = quick_xml::se::to_string(&request)
                .map_err(|e| Error::internal(format!("serialize DeleteObjects: {e}")))?;
            let content_md5 = {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .encode(md5::compute(body.as_bytes()).0)
            };
            let response = self
                .send(
                    "DeleteObjects",
                    reqwest::Method::POST,
                    &self.path(bucket, None),
                    &[("delete".into(), String::new())],
                    Some(Bytes::from(body)),
                    Some("application/xml"),
                    Some(content_md5),
                    None,
                )
                .await?;
            let text = response
                .text()
                .await
                .map_err(|e| transport_error("DeleteObjects", &e))?;
            if !text.trim().is_empty() {
                let result: xml::DeleteResult = quick_xml::de::from_str(&text).unwrap_or_default();
                if let Some(err) = result.errors.first() {
                    return Err(Error::provider(
                        objectdeck_common::ErrorCode::Internal,
                        format!("delete failed for key {}", err.key),
                        err.message.clone().or_else(|| err.code.clone()),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String> {
        Ok(presign_url(
            &self.key,
            "GET",
            &self.endpoint,
            bucket,
            self.object_key(key),
            &[],
            ttl,
            Utc::now(),
        ))
    }

    async fn presign_put(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String> {
        Ok(presign_url(
            &self.key,
            "PUT",
            &self.endpoint,
            bucket,
            self.object_key(key),
            &[],
            ttl,
            Utc::now(),
        ))
    }

    async fn create_multipart(&self, bucket: &str, key: &str) -> Result<String> {
        let response = self
            .send(
                "CreateMultipartUpload",
                reqwest::Method::POST,
                &self.path(bucket, Some(key)),
                &[("uploads".into(), String::new())],
                None,
                None,
                None,
                None,
            )
            .await?;
        let body = response
            .text()
            .await
            .map_err(|e| transport_error("CreateMultipartUpload", &e))?;
        let parsed: xml::InitiateMultipartUploadResult = quick_xml::de::from_str(&body)
            .map_err(|e| Error::internal(format!("parse CreateMultipartUpload response: {e}")))?;
        Ok(parsed.upload_id)
    }

    async fn presign_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> Result<String> {
        Ok(presign_url(
            &self.key,
            "PUT",
            &self.endpoint,
            bucket,
            self.object_key(key),
            &[
                ("partNumber".into(), part_number.to_string()),
                ("uploadId".into(), upload_id.to_string()),
            ],
            ttl,
            Utc::now(),
        ))
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let request = xml::CompleteMultipartUploadRequest {
            parts: parts
                .iter()
                .map(|p| xml::CompletePartXml {
                    part_number: p.part_number,
                    etag: p.etag.clone(),
                })
                .collect(),
        };
        let body = quick_xml::se::to_string(&request)
            .map_err(|e| Error::internal(format!("serialize CompleteMultipartUpload: {e}")))?;
        self.send(
            "CompleteMultipartUpload",
            reqwest::Method::POST,
            &self.path(bucket, Some(key)),
            &[("uploadId".into(), upload_id.to_string())],
            Some(Bytes::from(body)),
            Some("application/xml"),
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.send(
            "AbortMultipartUpload",
            reqwest::Method::DELETE,
            &self.path(bucket, Some(key)),
            &[("uploadId".into(), upload_id.to_string())],
            None,
            None,
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn get_bucket_policy(&self, bucket: &str) -> Result<Value> {
        let response = self
            .send(
                "GetBucketPolicy",
                reqwest::Method::GET,
                &self.path(bucket, None),
                &[("policy".into(), String::new())],
                None,
                None,
                None,
                None,
            )
            .await?;
        let body = response
            .text()
            .await
            .map_err(|e| transport_error("GetBucketPolicy", &e))?;
        serde_json::from_str(&body)
            .map_err(|e| Error::internal(format!("parse bucket policy: {e}")))
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &Value) -> Result<()> {
        self.validate_policy(policy)?;
        self.send(
            "PutBucketPolicy",
            reqwest::Method::PUT,
            &self.path(bucket, None),
            &[("policy".into(), String::new())],
            Some(Bytes::from(policy.to_string())),
            Some("application/json"),
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn delete_bucket_policy(&self, bucket: &str) -> Result<()> {
        self.send(
            "DeleteBucketPolicy",
            reqwest::Method::DELETE,
            &self.path(bucket, None),
            &[("policy".into(), String::new())],
            None,
            None,
            None,
            None,
        )
        .await?;
        Ok(())
    }

    fn validate_policy(&self, policy: &Value) -> Result<()> {
        let Some(obj) = policy.as_object() else {
            return Err(Error::invalid_argument("bucket policy must be a JSON object"));
        };
        if !obj.contains_key("Version") {
            return Err(Error::invalid_argument("bucket policy is missing `Version`"));
        }
        match obj.get("Statement") {
            Some(Value::Array(statements)) if !statements.is_empty() => Ok(()),
            _ => Err(Error::invalid_argument(
                "bucket policy requires a non-empty `Statement` array",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectStore;
    use objectdeck_common::ProfileId;

    fn profile(provider: ProviderKind, config: Value, secrets: Value) -> Profile {
        Profile {
            id: ProfileId::new(),
            name: "test".into(),
            provider,
            config,
            secrets,
            preserve_leading_slash: false,
            tls_insecure_skip_verify: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn client() -> S3Client {
        S3Client::from_profile(
            &profile(
                ProviderKind::S3Compatible,
                serde_json::json!({"endpoint": "http://localhost:9000", "region": "us-east-1"}),
                serde_json::json!({"accessKeyId": "AKID", "secretAccessKey": "secret"}),
            ),
            reqwest::Client::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_aws_endpoint_defaults_from_region() {
        let c = S3Client::from_profile(
            &profile(
                ProviderKind::AwsS3,
                serde_json::json!({"region": "eu-west-1"}),
                serde_json::json!({"accessKeyId": "AKID", "secretAccessKey": "secret"}),
            ),
            reqwest::Client::new(),
        )
        .unwrap();
        assert_eq!(c.endpoint, "https://s3.eu-west-1.amazonaws.com");
    }

    #[test]
    fn test_compat_requires_endpoint() {
        let err = S3Client::from_profile(
            &profile(
                ProviderKind::S3Compatible,
                serde_json::json!({"region": "us-east-1"}),
                serde_json::json!({"accessKeyId": "AKID", "secretAccessKey": "secret"}),
            ),
            reqwest::Client::new(),
        )
        .unwrap_err();
        assert_eq!(err.code(), objectdeck_common::ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_leading_slash_handling() {
        let c = client();
        assert_eq!(c.path("b", Some("/k.txt")), "/b/k.txt");

        let mut p = profile(
            ProviderKind::S3Compatible,
            serde_json::json!({"endpoint": "http://localhost:9000"}),
            serde_json::json!({"accessKeyId": "AKID", "secretAccessKey": "secret"}),
        );
        p.preserve_leading_slash = true;
        let c = S3Client::from_profile(&p, reqwest::Client::new()).unwrap();
        assert_eq!(c.path("b", Some("/k.txt")), "/b//k.txt");
    }

    #[test]
    fn test_policy_validation() {
        let c = client();
        assert!(c
            .validate_policy(&serde_json::json!({
                "Version": "2012-10-17",
                "Statement": [{"Effect": "Allow"}],
            }))
            .is_ok());
        assert!(c.validate_policy(&serde_json::json!({"Statement": []})).is_err());
        assert!(c.validate_policy(&serde_json::json!("nope")).is_err());
    }
}
