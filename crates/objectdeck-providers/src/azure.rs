//! Azure Blob Storage client
//!
//! Shared Key authentication: canonicalized `x-ms-*` headers plus the
//! canonicalized resource are HMAC-SHA256 signed with the account key.
//! Containers map to buckets; container access policy (public access level
//! plus up to five signed identifiers) stands in for bucket policy.

use crate::client::uri_encode_path;
use crate::error::{check_response, transport_error};
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
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const API_VERSION: &str = "2020-10-02";

/// Azure caps stored access policies at five per container.
pub const MAX_SIGNED_IDENTIFIERS: usize = 5;

pub struct AzureClient {
    http: reqwest::Client,
    account: String,
    endpoint: String,
    key: Vec<u8>,
}

impl AzureClient {
    pub fn from_profile(profile: &Profile, http: reqwest::Client) -> Result<Self> {
        let account = json_str(&profile.config, "accountName")?.to_string();
        let endpoint = json_str_opt(&profile.config, "endpoint")
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://{account}.blob.core.windows.net"));
        let key = base64::engine::general_purpose::STANDARD
            .decode(json_str(&profile.secrets, "accountKey")?)
            .map_err(|_| Error::invalid_argument("azure account key is not valid base64"))?;
        Ok(Self {
            http,
            account,
            endpoint,
            key,
        })
    }

    /// Shared Key string-to-sign for the 2015-02-21+ format.
    fn string_to_sign(
        &self,
        method: &str,
        content_length: Option<u64>,
        content_type: Option<&str>,
        range: Option<&str>,
        ms_headers: &BTreeMap<String, String>,
        path: &str,
        query: &[(String, String)],
    ) -> String {
        let canonical_headers: String = ms_headers
            .iter()
            .map(|(k, v)| format!("{k}:{v}\n"))
            .collect();

        let mut canonical_resource = format!("/{}{}", self.account, path);
        let mut sorted_query: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();
        sorted_query.sort();
        for (k, v) in &sorted_query {
            canonical_resource.push_str(&format!("\n{k}:{v}"));
        }

        let length_field = match content_length {
            Some(0) | None => String::new(),
            Some(n) => n.to_string(),
        };

        format!(
            "{method}\n\n\n{length}\n\n{ctype}\n\n\n\n\n\n{range}\n{headers}{resource}",
            length = length_field,
            ctype = content_type.unwrap_or(""),
            range = range.unwrap_or(""),
            headers = canonical_headers,
            resource = canonical_resource,
        )
    }

    #[allow(clippy::too_many_arguments)]
    async fn send(
        &self,
        context: &str,
        method: reqwest::Method,
        path: &str,
        query: &[(String, String)],
        extra_ms_headers: &[(&str, String)],
        body: Option<Bytes>,
        content_type: Option<&str>,
        range: Option<String>,
    ) -> Result<reqwest::Response> {
        let now = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut ms_headers: BTreeMap<String, String> = BTreeMap::new();
        ms_headers.insert("x-ms-date".into(), now);
        ms_headers.insert("x-ms-version".into(), API_VERSION.into());
        for (k, v) in extra_ms_headers {
            ms_headers.insert((*k).to_string(), v.clone());
        }

        let content_length = body.as_ref().map(|b| b.len() as u64);
        let to_sign = self.string_to_sign(
            method.as_str(),
            content_length,
            content_type,
            range.as_deref(),
            &ms_headers,
            path,
            query,
        );
        let signature = base64::engine::general_purpose::STANDARD
            .encode(crate::s3::sign::hmac_sha256(&self.key, to_sign.as_bytes()));

        let mut url = format!("{}{}", self.endpoint, path);
        if !query.is_empty() {
            let qs: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
            url.push('?');
            url.push_str(&qs.join("&"));
        }

        let mut req = self
            .http
            .request(method, &url)
            .header("authorization", format!("SharedKey {}:{signature}", self.account));
        for (k, v) in &ms_headers {
            req = req.header(k.as_str(), v.as_str());
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

    fn blob_path(&self, container: &str, blob: &str) -> String {
        format!("/{container}/{}", uri_encode_path(blob.trim_start_matches('/')))
    }
}

// ---- List XML shapes ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EnumerationResults {
    #[serde(default)]
    containers: Option<Containers>,
    #[serde(default)]
    blobs: Option<Blobs>,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Containers {
    #[serde(rename = "Container", default)]
    container: Vec<NamedEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct Blobs {
    #[serde(rename = "Blob", default)]
    blob: Vec<BlobEntry>,
    #[serde(rename = "BlobPrefix", default)]
    blob_prefix: Vec<NamedEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NamedEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlobEntry {
    name: String,
    #[serde(default)]
    properties: Option<BlobProperties>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobProperties {
    #[serde(rename = "Content-Length", default)]
    content_length: Option<u64>,
    #[serde(rename = "Etag", default)]
    etag: Option<String>,
    #[serde(rename = "Last-Modified", default)]
    last_modified: Option<String>,
}

// ---- Access policy shapes ----

/// JSON form of the container access policy carried through the REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerAccessPolicy {
    /// `none`, `blob`, or `container`.
    #[serde(default)]
    pub public_access: Option<String>,
    #[serde(default)]
    pub signed_identifiers: Vec<SignedIdentifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedIdentifier {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "SignedIdentifiers")]
struct SignedIdentifiersXml {
    #[serde(rename = "SignedIdentifier", default)]
    signed_identifier: Vec<SignedIdentifierXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignedIdentifierXml {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "AccessPolicy")]
    access_policy: AccessPolicyXml,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccessPolicyXml {
    #[serde(rename = "Start", default, skip_serializing_if = "Option::is_none")]
    start: Option<String>,
    #[serde(rename = "Expiry", default, skip_serializing_if = "Option::is_none")]
    expiry: Option<String>,
    #[serde(rename = "Permission", default, skip_serializing_if = "Option::is_none")]
    permission: Option<String>,
}

fn build_identifiers_xml(policy: &ContainerAccessPolicy) -> Result<String> {
    if policy.signed_identifiers.len() > MAX_SIGNED_IDENTIFIERS {
        return Err(Error::invalid_argument(format!(
            "at most {MAX_SIGNED_IDENTIFIERS} signed identifiers are allowed"
        )));
    }
    let doc = SignedIdentifiersXml {
        signed_identifier: policy
            .signed_identifiers
            .iter()
            .map(|s| SignedIdentifierXml {
                id: s.id.clone(),
                access_policy: AccessPolicyXml {
                    start: s.start.clone(),
                    expiry: s.expiry.clone(),
                    permission: s.permission.clone(),
                },
            })
            .collect(),
    };
    // An empty identifier set still serializes to an empty document element,
    // which clears all stored policies on the service side.
    quick_xml::se::to_string(&doc)
        .map_err(|e| Error::internal(format!("serialize signed identifiers: {e}")))
}

#[async_trait]
impl crate::ObjectStore for AzureClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AzureBlob
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let response = self
            .send(
                "ListContainers",
                reqwest::Method::GET,
                "/",
                &[("comp".into(), "list".into())],
                &[],
                None,
                None,
                None,
            )
            .await?;
        let body = response
            .text()
            .await
            .map_err(|e| transport_error("ListContainers", &e))?;
        let parsed: EnumerationResults = quick_xml::de::from_str(&body)
            .map_err(|e| Error::internal(format!("parse ListContainers response: {e}")))?;
        Ok(parsed
            .containers
            .unwrap_or_default()
            .container
            .into_iter()
            .map(|c| BucketInfo {
                name: c.name,
                created_at: None,
            })
            .collect())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.send(
            "CreateContainer",
            reqwest::Method::PUT,
            &format!("/{bucket}"),
            &[("restype".into(), "container".into())],
            &[],
            None,
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.send(
            "DeleteContainer",
            reqwest::Method::DELETE,
            &format!("/{bucket}"),
            &[("restype".into(), "container".into())],
            &[],
            None,
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn list_objects(&self, req: &ListObjectsRequest) -> Result<ListObjectsPage> {
        let mut query: Vec<(String, String)> = vec![
            ("restype".into(), "container".into()),
            ("comp".into(), "list".into()),
        ];
        if !req.prefix.is_empty() {
            query.push(("prefix".into(), req.prefix.clone()));
        }
        if let Some(delimiter) = &req.delimiter {
            query.push(("delimiter".into(), delimiter.clone()));
        }
        if let Some(cursor) = &req.cursor {
            query.push(("marker".into(), cursor.clone()));
        }
        if let Some(limit) = req.limit {
            query.push(("maxresults".into(), limit.to_string()));
        }

        let response = self
            .send(
                "ListBlobs",
                reqwest::Method::GET,
                &format!("/{}", req.bucket),
                &query,
                &[],
                None,
                None,
                None,
            )
            .await?;
        let body = response
            .text()
            .await
            .map_err(|e| transport_error("ListBlobs", &e))?;
        let parsed: EnumerationResults = quick_xml::de::from_str(&body)
            .map_err(|e| Error::internal(format!("parse ListBlobs response: {e}")))?;
        let blobs = parsed.blobs.unwrap_or_default();

        Ok(ListObjectsPage {
            objects: blobs
                .blob
                .into_iter()
                .map(|b| {
                    let props = b.properties.unwrap_or_default();
                    ObjectEntry {
                        key: b.name,
                        size: props.content_length.unwrap_or(0),
                        etag: props.etag,
                        last_modified: props.last_modified.as_deref().and_then(|t| {
                            chrono::DateTime::parse_from_rfc2822(t)
                                .map(|t| t.with_timezone(&Utc))
                                .ok()
                        }),
                    }
                })
                .collect(),
            common_prefixes: blobs.blob_prefix.into_iter().map(|p| p.name).collect(),
            next_cursor: parsed.next_marker.filter(|m| !m.is_empty()),
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectEntry> {
        let response = self
            .send(
                "GetBlobProperties",
                reqwest::Method::HEAD,
                &self.blob_path(bucket, key),
                &[],
                &[],
                None,
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
                "GetBlob",
                reqwest::Method::GET,
                &self.blob_path(bucket, key),
                &[],
                &[],
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
            .map(|chunk| chunk.map_err(|e| Error::internal(format!("blob stream: {e}"))))
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
            "PutBlob",
            reqwest::Method::PUT,
            &self.blob_path(bucket, key),
            &[],
            &[("x-ms-blob-type", "BlockBlob".into())],
            Some(body),
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
        // Shared Key signs Content-Length, so the size must be known up
        // front; the upload path buffers to disk when it is not.
        let Some(len) = len else {
            return Err(Error::invalid_argument(
                "azure direct upload requires a known content length",
            ));
        };
        let path = self.blob_path(bucket, key);
        let now = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut ms_headers: BTreeMap<String, String> = BTreeMap::new();
        ms_headers.insert("x-ms-date".into(), now);
        ms_headers.insert("x-ms-version".into(), API_VERSION.into());
        ms_headers.insert("x-ms-blob-type".into(), "BlockBlob".into());

        let to_sign =
            self.string_to_sign("PUT", Some(len), content_type, None, &ms_headers, &path, &[]);
        let signature = base64::engine::general_purpose::STANDARD
            .encode(crate::s3::sign::hmac_sha256(&self.key, to_sign.as_bytes()));

        let mut req = self
            .http
            .put(format!("{}{}", self.endpoint, path))
            .header("authorization", format!("SharedKey {}:{signature}", self.account))
            .header("content-length", len);
        for (k, v) in &ms_headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(ct) = content_type {
            req = req.header("content-type", ct);
        }
        let response = req
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error("PutBlob", &e))?;
        check_response("PutBlob", response).await?;
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        // No batch delete in the Shared Key surface; issue one call per blob.
        for key in keys {
            let result = self
                .send(
                    "DeleteBlob",
                    reqwest::Method::DELETE,
                    &self.blob_path(bucket, key),
                    &[],
                    &[],
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
        let response = self
            .send(
                "GetContainerAcl",
                reqwest::Method::GET,
                &format!("/{bucket}"),
                &[
                    ("restype".into(), "container".into()),
                    ("comp".into(), "acl".into()),
                ],
                &[],
                None,
                None,
                None,
            )
            .await?;
        let public_access = response
            .headers()
            .get("x-ms-blob-public-access")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response
            .text()
            .await
            .map_err(|e| transport_error("GetContainerAcl", &e))?;
        let identifiers: SignedIdentifiersXml = if body.trim().is_empty() {
            SignedIdentifiersXml::default()
        } else {
            quick_xml::de::from_str(&body)
                .map_err(|e| Error::internal(format!("parse container acl: {e}")))?
        };
        let policy = ContainerAccessPolicy {
            public_access,
            signed_identifiers: identifiers
                .signed_identifier
                .into_iter()
                .map(|s| SignedIdentifier {
                    id: s.id,
                    start: s.access_policy.start,
                    expiry: s.access_policy.expiry,
                    permission: s.access_policy.permission,
                })
                .collect(),
        };
        Ok(serde_json::to_value(policy)?)
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &Value) -> Result<()> {
        self.validate_policy(policy)?;
        let policy: ContainerAccessPolicy = serde_json::from_value(policy.clone())
            .map_err(|e| Error::invalid_argument(format!("invalid container access policy: {e}")))?;
        let xml = build_identifiers_xml(&policy)?;

        let mut ms_headers: Vec<(&str, String)> = Vec::new();
        if let Some(access) = policy.public_access.as_deref().filter(|a| *a != "none") {
            ms_headers.push(("x-ms-blob-public-access", access.to_string()));
        }
        self.send(
            "SetContainerAcl",
            reqwest::Method::PUT,
            &format!("/{bucket}"),
            &[
                ("restype".into(), "container".into()),
                ("comp".into(), "acl".into()),
            ],
            &ms_headers,
            Some(Bytes::from(xml)),
            Some("application/xml"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn delete_bucket_policy(&self, bucket: &str) -> Result<()> {
        // Clearing is a put with no public access and no identifiers.
        let cleared = ContainerAccessPolicy {
            public_access: None,
            signed_identifiers: Vec::new(),
        };
        self.put_bucket_policy(bucket, &serde_json::to_value(cleared)?).await
    }

    fn validate_policy(&self, policy: &Value) -> Result<()> {
        let parsed: ContainerAccessPolicy = serde_json::from_value(policy.clone())
            .map_err(|e| Error::invalid_argument(format!("invalid container access policy: {e}")))?;
        if parsed.signed_identifiers.len() > MAX_SIGNED_IDENTIFIERS {
            return Err(Error::invalid_argument(format!(
                "at most {MAX_SIGNED_IDENTIFIERS} signed identifiers are allowed"
            )));
        }
        if let Some(access) = parsed.public_access.as_deref() {
            if !matches!(access, "none" | "blob" | "container") {
                return Err(Error::invalid_argument(
                    "publicAccess must be one of none, blob, container",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectdeck_common::ProfileId;

    fn client() -> AzureClient {
        let profile = Profile {
            id: ProfileId::new(),
            name: "az".into(),
            provider: ProviderKind::AzureBlob,
            config: serde_json::json!({"accountName": "acct"}),
            secrets: serde_json::json!({
                "accountKey": base64::engine::general_purpose::STANDARD.encode(b"0123456789abcdef"),
            }),
            preserve_leading_slash: false,
            tls_insecure_skip_verify: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        AzureClient::from_profile(&profile, reqwest::Client::new()).unwrap()
    }

    #[test]
    fn test_endpoint_defaults_to_account_host() {
        assert_eq!(client().endpoint, "https://acct.blob.core.windows.net");
    }

    #[test]
    fn test_string_to_sign_shape() {
        let c = client();
        let mut headers = BTreeMap::new();
        headers.insert("x-ms-date".to_string(), "Wed, 01 May 2024 12:00:00 GMT".to_string());
        headers.insert("x-ms-version".to_string(), API_VERSION.to_string());
        let s = c.string_to_sign(
            "GET",
            None,
            None,
            None,
            &headers,
            "/container",
            &[("comp".into(), "list".into()), ("restype".into(), "container".into())],
        );
        let lines: Vec<&str> = s.split('\n').collect();
        assert_eq!(lines[0], "GET");
        // Sorted x-ms headers precede the canonicalized resource.
        assert!(s.contains("x-ms-date:Wed, 01 May 2024 12:00:00 GMT\n"));
        assert!(s.ends_with("/acct/container\ncomp:list\nrestype:container"));
    }

    #[test]
    fn test_zero_length_body_signs_empty_length() {
        let c = client();
        let s = c.string_to_sign("PUT", Some(0), None, None, &BTreeMap::new(), "/x", &[]);
        assert!(s.starts_with("PUT\n\n\n\n"));
    }

    #[test]
    fn test_identifier_cap() {
        let policy = ContainerAccessPolicy {
            public_access: None,
            signed_identifiers: (0..6)
                .map(|i| SignedIdentifier {
                    id: format!("id-{i}"),
                    start: None,
                    expiry: None,
                    permission: Some("r".into()),
                })
                .collect(),
        };
        assert!(build_identifiers_xml(&policy).is_err());
    }

    #[test]
    fn test_identifiers_xml_round_trip() {
        let policy = ContainerAccessPolicy {
            public_access: Some("blob".into()),
            signed_identifiers: vec![SignedIdentifier {
                id: "readers".into(),
                start: Some("2024-01-01T00:00:00Z".into()),
                expiry: Some("2025-01-01T00:00:00Z".into()),
                permission: Some("rl".into()),
            }],
        };
        let xml = build_identifiers_xml(&policy).unwrap();
        assert!(xml.contains("<Id>readers</Id>"));
        assert!(xml.contains("<Permission>rl</Permission>"));

        let parsed: SignedIdentifiersXml = quick_xml::de::from_str(&xml).unwrap();
        assert_eq!(parsed.signed_identifier.len(), 1);
        assert_eq!(parsed.signed_identifier[0].id, "readers");
    }

    #[test]
    fn test_empty_identifier_set_serializes() {
        let policy = ContainerAccessPolicy {
            public_access: None,
            signed_identifiers: Vec::new(),
        };
        let xml = build_identifiers_xml(&policy).unwrap();
        assert!(!xml.contains("SignedIdentifier>"));
    }
}
