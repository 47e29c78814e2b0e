//! Per-provider capability records
//!
//! Clients read this matrix from `/meta` and branch before calling; the
//! scheduler and HTTP surface consult it so unsupported combinations fail
//! with one typed error instead of provider-specific failures mid-call.

use objectdeck_common::ProviderKind;
use serde::Serialize;

/// Which operations a provider dialect implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub bucket_crud: bool,
    pub object_crud: bool,
    pub job_transfer: bool,
    pub bucket_policy: bool,
    pub gcs_iam_policy: bool,
    pub azure_container_access_policy: bool,
    pub presigned_upload: bool,
    pub presigned_multipart_upload: bool,
    pub direct_upload: bool,
}

impl Capabilities {
    #[must_use]
    pub fn for_kind(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::AwsS3 | ProviderKind::S3Compatible | ProviderKind::OciS3Compat => Self {
                bucket_crud: true,
                object_crud: true,
                job_transfer: true,
                bucket_policy: true,
                gcs_iam_policy: false,
                azure_container_access_policy: false,
                presigned_upload: true,
                presigned_multipart_upload: true,
                direct_upload: true,
            },
            ProviderKind::AzureBlob => Self {
                bucket_crud: true,
                object_crud: true,
                job_transfer: true,
                bucket_policy: false,
                gcs_iam_policy: false,
                azure_container_access_policy: true,
                presigned_upload: false,
                presigned_multipart_upload: false,
                direct_upload: true,
            },
            ProviderKind::GcpGcs => Self {
                bucket_crud: true,
                object_crud: true,
                job_transfer: true,
                bucket_policy: false,
                gcs_iam_policy: true,
                azure_container_access_policy: false,
                presigned_upload: false,
                presigned_multipart_upload: false,
                direct_upload: true,
            },
            ProviderKind::OciObjectStorage => Self {
                bucket_crud: true,
                object_crud: true,
                job_transfer: true,
                bucket_policy: false,
                gcs_iam_policy: false,
                azure_container_access_policy: false,
                presigned_upload: false,
                presigned_multipart_upload: false,
                direct_upload: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presigned_follows_s3_dialect() {
        for kind in [
            ProviderKind::AwsS3,
            ProviderKind::S3Compatible,
            ProviderKind::OciS3Compat,
            ProviderKind::AzureBlob,
            ProviderKind::GcpGcs,
            ProviderKind::OciObjectStorage,
        ] {
            let caps = Capabilities::for_kind(kind);
            assert_eq!(caps.presigned_upload, kind.is_s3_dialect());
            assert_eq!(caps.presigned_multipart_upload, kind.is_s3_dialect());
            assert!(caps.direct_upload);
            assert!(caps.job_transfer);
        }
    }

    #[test]
    fn test_policy_families_are_exclusive() {
        assert!(Capabilities::for_kind(ProviderKind::AwsS3).bucket_policy);
        assert!(Capabilities::for_kind(ProviderKind::GcpGcs).gcs_iam_policy);
        assert!(Capabilities::for_kind(ProviderKind::AzureBlob).azure_container_access_policy);
        assert!(!Capabilities::for_kind(ProviderKind::AzureBlob).bucket_policy);
    }
}
