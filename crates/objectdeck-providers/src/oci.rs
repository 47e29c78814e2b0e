//! Oracle OCI Object Storage client (native API)
//!
//! Requests carry an HTTP-signature authorization: RSA-SHA256 over
//! `(request-target)`, `host`, and `date`, with the key id
//! `tenancy/user/fingerprint`. Object uploads are exempt from body signing
//! per the Object Storage API rules.

use crate::client::{uri_encode, uri_encode_path};
use crate::error::{check_response, transport_error};
use crate::rsa::RsaSigner;
use crate::{json_str, json_str_opt, BucketInfo, ListObjectsPage, ListObjectsRequest, ObjectBody};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use objectdeck_common::{Error, ObjectEntry, ProviderKind, Result};
use objectdeck_store::Profile;
use serde::Deserialize;
use sha2::{Digest, Sha256};

pub struct OciClient {
    http: reqwest::Client,
    endpoint: String,
    host: String,
    namespace: String,
    compartment_id: String,
    key_id: String,
    signer: RsaSigner,
}

impl OciClient {
    pub fn from_profile(profile: &Profile, http: reqwest::Client) -> Result<Self> {
        let region = json_str(&profile.config, "region")?;
        let endpoint = json_str_opt(&profile.config, "endpoint")
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://objectstorage.{region}.oraclecloud.com"));
        let host = endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string();
        let tenancy = json_str(&profile.config, "tenancyOcid")?;
        let user = json_str(&profile.config, "userOcid")?;
        let fingerprint = json_str(&profile.config, "fingerprint")?;
        let signer = RsaSigner::from_pem(json_str(&profile.secrets, "privateKeyPem")?)?;
        Ok(Self {
            http,
            endpoint,
            host,
            namespace: json_str(&profile.config, "namespace")?.to_string(),
            compartment_id: tenancy.to_string(),
            key_id: format!("{tenancy}/{user}/{fingerprint}"),
            signer,
        })
    }

    /// Sign and send. `body` participates in the signature for API calls;
    /// object-data PUTs pass `sign_body: false`.
    #[allow(clippy::too_many_arguments)]
    async fn send(
        &self,
        context: &str,
        method: reqwest::Method,
        path_and_query: &str,
        body: Option<Bytes>,
        sign_body: bool,
        content_type: Option<&str>,
        range: Option<String>,
    ) -> Result<reqwest::Response> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let method_lc = method.as_str().to_lowercase();

        let mut header_names = vec!["date", "(request-target)", "host"];
        let mut signing_lines = vec![
            format!("date: {date}"),
            format!("(request-target): {method_lc} {path_and_query}"),
            format!("host: {}", self.host),
        ];

        let mut body_sha = None;
        if sign_body {
            if let Some(body) = &body {
                let sha = base64::engine::general_purpose::STANDARD
                    .encode(Sha256::digest(body));
                let length = body.len();
                let ctype = content_type.unwrap_or("application/json");
                header_names.extend(["content-length", "content-type", "x-content-sha256"]);
                signing_lines.push(format!("content-length: {length}"));
                signing_lines.push(format!("content-type: {ctype}"));
                signing_lines.push(format!("x-content-sha256: {sha}"));
                body_sha = Some(sha);
            }
        }

        let signature = self.signer.sign(signing_lines.join("\n").as_bytes())?;
        let authorization = format!(
            "Signature version=\"1\",keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
            self.key_id,
            header_names.join(" "),
            base64::engine::general_purpose::STANDARD.encode(signature),
        );

        let mut req = self
            .http
            .request(method, format!("{}{}", self.endpoint, path_and_query))
            .header("date", &date)
            .header("authorization", authorization);
        if let Some(sha) = body_sha {
            req = req.header("x-content-sha256", sha);
        }
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

    fn object_path(&self, bucket: &str, key: &str) -> String {
        format!(
            "/n/{}/b/{bucket}/o/{}",
            self.namespace,
            uri_encode_path(key.trim_start_matches('/'))
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OciObjectSummary {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    time_modified: Option<String>,
}

#[async_trait]
impl crate::ObjectStore for OciClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OciObjectStorage
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct OciBucketSummary {
            name: String,
            #[serde(default)]
            time_created: Option<String>,
        }

        let path = format!(
            "/n/{}/b?compartmentId={}",
            self.namespace,
            uri_encode(&self.compartment_id)
        );
        let response = self
            .send("ListBuckets", reqwest::Method::GET, &path, None, true, None, None)
            .await?;
        let parsed: Vec<OciBucketSummary> = response
            .json()
            .await
            .map_err(|e| transport_error("ListBuckets", &e))?;
        Ok(parsed
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
        let path = format!("/n/{}/b", self.namespace);
        let body = serde_json::json!({
            "name": bucket,
            "compartmentId": self.compartment_id,
        })
        .to_string();
        self.send(
            "CreateBucket",
            reqwest::Method::POST,
            &path,
            Some(Bytes::from(body)),
            true,
            Some("application/json"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let path = format!("/n/{}/b/{bucket}", self.namespace);
        self.send("DeleteBucket", reqwest::Method::DELETE, &path, None, true, None, None)
            .await?;
        Ok(())
    }

    async fn list_objects(&self, req: &ListObjectsRequest) -> Result<ListObjectsPage> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Listing {
            #[serde(default)]
            objects: Vec<OciObjectSummary>,
            #[serde(default)]
            prefixes: Vec<String>,
            #[serde(default)]
            next_start_with: Option<String>,
        }

        let mut path = format!(
            "/n/{}/b/{}/o?fields=name,size,etag,timeModified",
            self.namespace, req.bucket
        );
        if !req.prefix.is_empty() {
            path.push_str(&format!("&prefix={}", uri_encode(&req.prefix)));
        }
        if let Some(delimiter) = &req.delimiter {
            path.push_str(&format!("&delimiter={}", uri_encode(delimiter)));
        }
        if let Some(cursor) = &req.cursor {
            path.push_str(&format!("&start={}", uri_encode(cursor)));
        }
        if let Some(limit) = req.limit {
            path.push_str(&format!("&limit={limit}"));
        }

        let response = self
            .send("ListObjects", reqwest::Method::GET, &path, None, true, None, None)
            .await?;
        let parsed: Listing = response
            .json()
            .await
            .map_err(|e| transport_error("ListObjects", &e))?;
        Ok(ListObjectsPage {
            objects: parsed
                .objects
                .into_iter()
                .map(|o| ObjectEntry {
                    key: o.name,
                    size: o.size.unwrap_or(0),
                    etag: o.etag,
                    last_modified: o
                        .time_modified
                        .as_deref()
                        .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                        .map(|t| t.with_timezone(&Utc)),
                })
                .collect(),
            common_prefixes: parsed.prefixes,
            next_cursor: parsed.next_start_with,
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectEntry> {
        let response = self
            .send(
                "HeadObject",
                reqwest::Method::HEAD,
                &self.object_path(bucket, key),
                None,
                true,
                None,
                None,
            )
            .await?;
        let headers = response.headers();
        Ok(ObjectEntry {
            key: key.to_string(),
            size: headers
                .get("content-length")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            etag: headers
                .get("etag")
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            last_modified: headers
                .get("last-modified")
                .and_then(|v| v.to_str().ok())
                .and_then(|t| {
                    chrono::DateTime::parse_from_rfc2822(t)
                        .map(|t| t.with_timezone(&Utc))
                        .ok()
                }),
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
                &self.object_path(bucket, key),
                None,
                true,
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
        // Object data is exempt from body signing.
        self.send(
            "PutObject",
            reqwest::Method::PUT,
            &self.object_path(bucket, key),
            Some(body),
            false,
            content_type,
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
        let path = self.object_path(bucket, key);
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let signing_lines = vec![
            format!("date: {date}"),
            format!("(request-target): put {path}"),
            format!("host: {}", self.host),
        ];
        let signature = self.signer.sign(signing_lines.join("\n").as_bytes())?;
        let authorization = format!(
            "Signature version=\"1\",keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"date (request-target) host\",signature=\"{}\"",
            self.key_id,
            base64::engine::general_purpose::STANDARD.encode(signature),
        );
        let mut req = self
            .http
            .put(format!("{}{}", self.endpoint, path))
            .header("date", &date)
            .header("authorization", authorization);
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
        for key in keys {
            let result = self
                .send(
                    "DeleteObject",
                    reqwest::Method::DELETE,
                    &self.object_path(bucket, key),
                    None,
                    true,
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
}
