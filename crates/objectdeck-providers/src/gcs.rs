//! Google Cloud Storage client
//!
//! JSON API over OAuth2. A service-account JWT (RS256) is exchanged for a
//! bearer token and cached until shortly before expiry. Bucket policy is the
//! GCS IAM document: version + etag + bindings.

use crate::client::uri_encode;
use crate::error::{check_response, transport_error};
use crate::rsa::RsaSigner;
use crate::{
    json_str, json_str_opt, BucketInfo, ListObjectsPage, ListObjectsRequest, ObjectBody,
};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use objectdeck_common::{Error, ObjectEntry, ProviderKind, Result};
use objectdeck_store::Profile;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};

const SCOPE: &str = "https://www.googleapis.com/auth/devstorage.full_control";
const TOKEN_EARLY_REFRESH: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ServiceAccount {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct GcsClient {
    http: reqwest::Client,
    endpoint: String,
    project_id: String,
    account: ServiceAccount,
    signer: RsaSigner,
    token: Mutex<Option<CachedToken>>,
}

impl GcsClient {
    pub fn from_profile(profile: &Profile, http: reqwest::Client) -> Result<Self> {
        let sa_json = json_str(&profile.secrets, "serviceAccountJson")?;
        let account: ServiceAccount = serde_json::from_str(sa_json)
            .map_err(|e| Error::invalid_argument(format!("invalid service account JSON: {e}")))?;
        let signer = RsaSigner::from_pem(&account.private_key)?;
        let endpoint = json_str_opt(&profile.config, "endpoint")
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or_else(|| "https://storage.googleapis.com".to_string());
        Ok(Self {
            http,
            endpoint,
            project_id: json_str(&profile.config, "projectId")?.to_string(),
            account,
            signer,
            token: Mutex::new(None),
        })
    }

    fn build_assertion(&self) -> Result<String> {
        let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let header = b64.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let iat = Utc::now().timestamp();
        let claims = serde_json::json!({
            "iss": self.account.client_email,
            "scope": SCOPE,
            "aud": self.account.token_uri,
            "iat": iat,
            "exp": iat + 3600,
        });
        let claims = b64.encode(claims.to_string());
        let signing_input = format!("{header}.{claims}");
        let signature = self.signer.sign(signing_input.as_bytes())?;
        Ok(format!("{signing_input}.{}", b64.encode(signature)))
    }

    async fn bearer_token(&self) -> Result<String> {
        if let Some(cached) = self.token.lock().as_ref() {
            if cached.expires_at > Instant::now() + TOKEN_EARLY_REFRESH {
                return Ok(cached.token.clone());
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default = "default_expiry")]
            expires_in: u64,
        }
        fn default_expiry() -> u64 {
            3600
        }

        let assertion = self.build_assertion()?;
        let response = self
            .http
            .post(&self.account.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error("OAuth token exchange", &e))?;
        let response = check_response("OAuth token exchange", response).await?;
        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| transport_error("OAuth token exchange", &e))?;

        let token = parsed.access_token.clone();
        *self.token.lock() = Some(CachedToken {
            token: parsed.access_token,
            expires_at: Instant::now() + Duration::from_secs(parsed.expires_in),
        });
        Ok(token)
    }

    async fn send(
        &self,
        context: &str,
        method: reqwest::Method,
        url: String,
        body: Option<Bytes>,
        content_type: Option<&str>,
        range: Option<String>,
    ) -> Result<reqwest::Response> {
        let token = self.bearer_token().await?;
        let mut req = self.http.request(method, url).bearer_auth(token);
        if let Some(ct) = content_type {
            req = req.header("content-type", ct);
        }
        if let Some(range) = range {
            req = req.header("range", range);
        }
        if let Some(body) = body {
            req = req.body(body);
        }
        let response = req
            .send()
            .await
            .map_err(|e| transport_error(context, &e))?;
        check_response(context, response).await
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{bucket}/o/{}",
            self.endpoint,
            uri_encode(key.trim_start_matches('/'))
        )
    }
}

#[derive(Debug, Deserialize)]
struct GcsObject {
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    updated: Option<String>,
}

impl GcsObject {
    fn into_entry(self) -> ObjectEntry {
        ObjectEntry {
            key: self.name,
            size: self.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            etag: self.etag,
            last_modified: self
                .updated
                .as_deref()
                .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

#[async_trait]
impl crate::ObjectStore for GcsClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GcpGcs
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        #[derive(Deserialize)]
        struct Buckets {
            #[serde(default)]
            items: Vec<GcsBucket>,
        }
        #[derive(Deserialize)]
        struct GcsBucket {
            name: String,
            #[serde(rename = "timeCreated", default)]
            time_created: Option<String>,
        }

        let url = format!(
            "{}/storage/v1/b?project={}",
            self.endpoint,
            uri_encode(&self.project_id)
        );
        let response = self
            .send("ListBuckets", reqwest::Method::GET, url, None, None, None)
            .await?;
        let parsed: Buckets = response
            .json()
            .await
            .map_err(|e| transport_error("ListBuckets", &e))?;
        Ok(parsed
            .items
            .into_iter()
            .map(|b| BucketInfo {
                name: b.name,
                created_at: b
                    .time_created
                    .as_deref()
                    .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc)),
            })
            .collect())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let url = format!(
            "{}/storage/v1/b?project={}",
            self.endpoint,
            uri_encode(&self.project_id)
        );
        let body = serde_json::json!({"name": bucket}).to_string();
        self.send(
            "CreateBucket",
            reqwest::Method::POST,
            url,
            Some(Bytes::from(body)),
            Some("application/json"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let url = format!("{}/storage/v1/b/{bucket}", self.endpoint);
        self.send("DeleteBucket", reqwest::Method::DELETE, url, None, None, None)
            .await?;
        Ok(())
    }

    async fn list_objects(&self, req: &ListObjectsRequest) -> Result<ListObjectsPage> {
        #[derive(Deserialize)]
        struct Listing {
            #[serde(default)]
            items: Vec<GcsObject>,
            #[serde(default)]
            prefixes: Vec<String>,
            #[serde(rename = "nextPageToken", default)]
            next_page_token: Option<String>,
        }

        let mut url = format!("{}/storage/v1/b/{}/o?", self.endpoint, req.bucket);
        let mut params: Vec<String> = Vec::new();
        if !req.prefix.is_empty() {
            params.push(format!("prefix={}", uri_encode(&req.prefix)));
        }
        if let Some(delimiter) = &req.delimiter {
            params.push(format!("delimiter={}", uri_encode(delimiter)));
        }
        if let Some(cursor) = &req.cursor {
            params.push(format!("pageToken={}", uri_encode(cursor)));
        }
        if let Some(limit) = req.limit {
            params.push(format!("maxResults={limit}"));
        }
        url.push_str(&params.join("&"));

        let response = self
            .send("ListObjects", reqwest::Method::GET, url, None, None, None)
            .await?;
        let parsed: Listing = response
            .json()
            .await
            .map_err(|e| transport_error("ListObjects", &e))?;
        Ok(ListObjectsPage {
            objects: parsed.items.into_iter().map(GcsObject::into_entry).collect(),
            common_prefixes: parsed.prefixes,
            next_cursor: parsed.next_page_token,
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectEntry> {
        let response = self
            .send(
                "GetObjectMetadata",
                reqwest::Method::GET,
                self.object_url(bucket, key),
                None,
                None,
                None,
            )
            .await?;
        let parsed: GcsObject = response
            .json()
            .await
            .map_err(|e| transport_error("GetObjectMetadata", &e))?;
        Ok(parsed.into_entry())
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
        let url = format!("{}?alt=media", self.object_url(bucket, key));
        let response = self
            .send("GetObject", reqwest::Method::GET, url, None, None, range_header)
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
        let url = format!(
            "{}/upload/storage/v1/b/{bucket}/o?uploadType=media&name={}",
            self.endpoint,
            uri_encode(key.trim_start_matches('/'))
        );
        self.send(
            "PutObject",
            reqwest::Method::POST,
            url,
            Some(body),
            content_type.or(Some("application/octet-stream")),
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
        let url = format!(
            "{}/upload/storage/v1/b/{bucket}/o?uploadType=media&name={}",
            self.endpoint,
            uri_encode(key.trim_start_matches('/'))
        );
        let token = self.bearer_token().await?;
        let mut req = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(
                "content-type",
                content_type.unwrap_or("application/octet-stream"),
            );
        if let Some(len) = len {
            req = req.header("content-length", len);
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
        for key in keys {
            let result = self
                .send(
                    "DeleteObject",
                    reqwest::Method::DELETE,
                    self.object_url(bucket, key),
                    None,
                    None,
                    None,
                )
                .await;
            match result {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn get_bucket_policy(&self, bucket: &str) -> Result<Value> {
        let url = format!("{}/storage/v1/b/{bucket}/iam", self.endpoint);
        let response = self
            .send("GetIamPolicy", reqwest::Method::GET, url, None, None, None)
            .await?;
        response
            .json()
            .await
            .map_err(|e| transport_error("GetIamPolicy", &e))
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &Value) -> Result<()> {
        self.validate_policy(policy)?;
        let url = format!("{}/storage/v1/b/{bucket}/iam", self.endpoint);
        self.send(
            "SetIamPolicy",
            reqwest::Method::PUT,
            url,
            Some(Bytes::from(policy.to_string())),
            Some("application/json"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn delete_bucket_policy(&self, bucket: &str) -> Result<()> {
        // IAM policies cannot be deleted; reset to an empty binding set.
        let current = self.get_bucket_policy(bucket).await?;
        let cleared = serde_json::json!({
            "version": current.get("version").cloned().unwrap_or_else(|| Value::from(1)),
            "etag": current.get("etag").cloned().unwrap_or(Value::Null),
            "bindings": [],
        });
        let url = format!("{}/storage/v1/b/{bucket}/iam", self.endpoint);
        self.send(
            "SetIamPolicy",
            reqwest::Method::PUT,
            url,
            Some(Bytes::from(cleared.to_string())),
            Some("application/json"),
            None,
        )
        .await?;
        Ok(())
    }

    fn validate_policy(&self, policy: &Value) -> Result<()> {
        validate_iam_policy(policy)
    }
}

fn validate_iam_policy(policy: &Value) -> Result<()> {
    let Some(bindings) = policy.get("bindings").and_then(Value::as_array) else {
        return Err(Error::invalid_argument(
            "IAM policy requires a `bindings` array",
        ));
    };
    for binding in bindings {
        if binding.get("role").and_then(Value::as_str).is_none() {
            return Err(Error::invalid_argument("IAM binding is missing `role`"));
        }
        if binding.get("members").and_then(Value::as_array).is_none() {
            return Err(Error::invalid_argument("IAM binding is missing `members`"));
        }
    }
    Ok(())
}
