//! S3-compatible storage client
//!
//! Wraps the AWS SDK for S3-compatible multipart uploads.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart},
    Client,
};
use bytes::Bytes;

use super::ObjectStore;
use crate::config::{StorageConfig, StorageProvider};
use crate::error::StorageError;
use crate::upload::{CompletedPart, UploadHandle};

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Client {
    client: Client,
}

impl S3Client {
    /// Create a new S3 client from configuration
    ///
    /// Static keys are used when both are configured; otherwise credentials
    /// come from the default AWS provider chain.
    pub async fn new(config: &StorageConfig) -> Self {
        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "s3-sink");
                let region = config
                    .region
                    .clone()
                    .unwrap_or_else(|| "us-east-1".to_string());

                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(region))
                    .credentials_provider(credentials)
            }
            _ => {
                let mut loader = aws_config::defaults(BehaviorVersion::latest());
                if let Some(region) = &config.region {
                    loader = loader.region(Region::new(region.clone()));
                }
                let shared = loader.load().await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        // MinIO, R2 and B2 are addressed path style
        if config.provider != StorageProvider::S3 {
            builder = builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    /// Check that `bucket` is reachable, logging instead of failing
    pub async fn verify_bucket(&self, bucket: &str) -> bool {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", bucket);
                true
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    DisplayErrorContext(&e)
                );
                false
            }
        }
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<String, StorageError> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                classify(
                    format!("Failed to create multipart upload for {}", key),
                    DisplayErrorContext(&e),
                )
            })?;

        response
            .upload_id()
            .map(|id| id.to_string())
            .ok_or_else(|| {
                StorageError::InvalidResponse(format!(
                    "Create multipart upload for {} returned no upload id",
                    key
                ))
            })
    }

    async fn upload_part(
        &self,
        handle: &UploadHandle,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, StorageError> {
        let content_length = body.len() as i64;

        let response = self
            .client
            .upload_part()
            .bucket(&handle.bucket)
            .key(&handle.key)
            .upload_id(&handle.upload_id)
            .part_number(sdk_part_number(part_number)?)
            .content_length(content_length)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                classify(
                    format!("Failed to upload part {} of {}", part_number, handle.key),
                    DisplayErrorContext(&e),
                )
            })?;

        response.e_tag().map(|tag| tag.to_string()).ok_or_else(|| {
            StorageError::InvalidResponse(format!(
                "Upload of part {} of {} returned no ETag",
                part_number, handle.key
            ))
        })
    }

    async fn complete_multipart_upload(
        &self,
        handle: &UploadHandle,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        let parts = parts
            .iter()
            .map(|part| {
                Ok(S3CompletedPart::builder()
                    .part_number(sdk_part_number(part.part_number)?)
                    .e_tag(&part.e_tag)
                    .build())
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&handle.bucket)
            .key(&handle.key)
            .upload_id(&handle.upload_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(|e| {
                classify(
                    format!("Failed to complete multipart upload {}", handle.upload_id),
                    DisplayErrorContext(&e),
                )
            })?;

        Ok(())
    }

    async fn abort_multipart_upload(&self, handle: &UploadHandle) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&handle.bucket)
            .key(&handle.key)
            .upload_id(&handle.upload_id)
            .send()
            .await
            .map_err(|e| {
                classify(
                    format!("Failed to abort multipart upload {}", handle.upload_id),
                    DisplayErrorContext(&e),
                )
            })?;

        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), StorageError> {
        let content_length = body.len() as i64;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(content_length)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                classify(format!("Failed to put object {}", key), DisplayErrorContext(&e))
            })?;

        Ok(())
    }
}

fn sdk_part_number(part_number: u32) -> Result<i32, StorageError> {
    i32::try_from(part_number)
        .map_err(|_| StorageError::InvalidPart(format!("Part number {} out of range", part_number)))
}

/// Map an SDK failure onto a storage error by its S3 error code
fn classify(context: String, detail: impl std::fmt::Display) -> StorageError {
    let message = format!("{}: {}", context, detail);

    if message.contains("NoSuchUpload") {
        StorageError::UploadNotFound(message)
    } else if message.contains("NoSuchBucket") {
        StorageError::BucketNotFound(message)
    } else if message.contains("AccessDenied") || message.contains("403") {
        StorageError::AccessDenied(message)
    } else if message.contains("InvalidPart") || message.contains("EntityTooSmall") {
        StorageError::InvalidPart(message)
    } else if message.contains("dispatch failure") {
        StorageError::ConnectionFailed(message)
    } else {
        StorageError::SdkError(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_error_code() {
        assert!(matches!(
            classify("abort".into(), "service error: NoSuchUpload: gone"),
            StorageError::UploadNotFound(_)
        ));
        assert!(matches!(
            classify("create".into(), "NoSuchBucket"),
            StorageError::BucketNotFound(_)
        ));
        assert!(matches!(
            classify("part".into(), "AccessDenied: not yours"),
            StorageError::AccessDenied(_)
        ));
        assert!(matches!(
            classify("complete".into(), "EntityTooSmall"),
            StorageError::InvalidPart(_)
        ));
        assert!(matches!(
            classify("put".into(), "dispatch failure: connection refused"),
            StorageError::ConnectionFailed(_)
        ));
        assert!(matches!(
            classify("put".into(), "throttled"),
            StorageError::SdkError(_)
        ));
        // The sink never reads objects, so a missing key is not special
        assert!(matches!(
            classify("complete".into(), "NoSuchKey"),
            StorageError::SdkError(_)
        ));
    }

    #[test]
    fn test_part_number_range() {
        assert_eq!(sdk_part_number(10_000).unwrap(), 10_000);
        assert!(sdk_part_number(u32::MAX).is_err());
    }

    #[tokio::test]
    async fn test_new_with_static_credentials() {
        let config = StorageConfig {
            provider: StorageProvider::Minio,
            endpoint: Some("http://localhost:9000".to_string()),
            bucket: "exports".to_string(),
            access_key: Some("admin".to_string()),
            secret_key: Some("password123".to_string()),
            region: None,
            key_prefix: None,
        };

        let client = S3Client::new(&config).await;
        let sdk_config = client.client.config();
        assert_eq!(sdk_config.region().map(|r| r.as_ref()), Some("us-east-1"));
    }
}
