//! S3 wire XML documents

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListAllMyBucketsResult {
    #[serde(default)]
    pub buckets: Buckets,
}

#[derive(Debug, Default, Deserialize)]
pub struct Buckets {
    #[serde(rename = "Bucket", default)]
    pub bucket: Vec<BucketXml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BucketXml {
    pub name: String,
    #[serde(default)]
    pub creation_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    #[serde(rename = "Contents", default)]
    pub contents: Vec<ObjectXml>,
    #[serde(rename = "CommonPrefixes", default)]
    pub common_prefixes: Vec<CommonPrefixXml>,
    #[serde(default)]
    pub next_continuation_token: Option<String>,
    #[serde(default)]
    pub is_truncated: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectXml {
    pub key: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, rename = "ETag")]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommonPrefixXml {
    pub prefix: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "Delete")]
pub struct DeleteRequest {
    #[serde(rename = "Object")]
    pub objects: Vec<DeleteObject>,
    #[serde(rename = "Quiet")]
    pub quiet: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteObject {
    #[serde(rename = "Key")]
    pub key: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteResult {
    #[serde(rename = "Error", default)]
    pub errors: Vec<DeleteErrorXml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteErrorXml {
    pub key: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitiateMultipartUploadResult {
    pub upload_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
pub struct CompleteMultipartUploadRequest {
    #[serde(rename = "Part")]
    pub parts: Vec<CompletePartXml>,
}

#[derive(Debug, Serialize)]
pub struct CompletePartXml {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_bucket_result() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>bucket</Name>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>token-1</NextContinuationToken>
  <Contents>
    <Key>photos/cat.jpg</Key>
    <Size>1024</Size>
    <ETag>&quot;abc&quot;</ETag>
    <LastModified>2024-05-01T12:00:00.000Z</LastModified>
  </Contents>
  <Contents>
    <Key>photos/dog.jpg</Key>
    <Size>2048</Size>
  </Contents>
  <CommonPrefixes><Prefix>photos/2024/</Prefix></CommonPrefixes>
</ListBucketResult>"#;
        let parsed: ListBucketResult = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(parsed.contents.len(), 2);
        assert_eq!(parsed.contents[0].key, "photos/cat.jpg");
        assert_eq!(parsed.contents[0].size, 1024);
        assert_eq!(parsed.common_prefixes[0].prefix, "photos/2024/");
        assert_eq!(parsed.next_continuation_token.as_deref(), Some("token-1"));
    }

    #[test]
    fn test_parse_list_buckets() {
        let xml = r#"<ListAllMyBucketsResult>
  <Buckets>
    <Bucket><Name>alpha</Name><CreationDate>2024-01-01T00:00:00Z</CreationDate></Bucket>
    <Bucket><Name>beta</Name></Bucket>
  </Buckets>
</ListAllMyBucketsResult>"#;
        let parsed: ListAllMyBucketsResult = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(parsed.buckets.bucket.len(), 2);
        assert_eq!(parsed.buckets.bucket[1].name, "beta");
    }

    #[test]
    fn test_serialize_delete_request() {
        let req = DeleteRequest {
            objects: vec![
                DeleteObject { key: "a.txt".into() },
                DeleteObject { key: "b.txt".into() },
            ],
            quiet: true,
        };
        let xml = quick_xml::se::to_string(&req).unwrap();
        assert!(xml.starts_with("<Delete>"));
        assert!(xml.contains("<Key>a.txt</Key>"));
        assert!(xml.contains("<Quiet>true</Quiet>"));
    }

    #[test]
    fn test_serialize_complete_multipart() {
        let req = CompleteMultipartUploadRequest {
            parts: vec![CompletePartXml {
                part_number: 1,
                etag: "\"e1\"".into(),
            }],
        };
        let xml = quick_xml::se::to_string(&req).unwrap();
        assert!(xml.contains("<PartNumber>1</PartNumber>"));
    }
}
