use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use tracing::debug;

use super::store::{ObjectHeaders, ObjectStore, UploadedPart};
use crate::error::{DeployError, Result};

/// [`ObjectStore`] backed by the AWS SDK
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    region: String,
    profile: Option<String>,
}

impl S3Client {
    /// Build a client for `region`, using `profile` when one was resolved
    /// and the SDK's default credential chain otherwise.
    pub async fn new(region: &str, profile: Option<&str>) -> Self {
        let mut aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()));

        if let Some(profile) = profile {
            aws_config = aws_config.profile_name(profile);
        }

        let sdk_config = aws_config.load().await;
        let client = Client::new(&sdk_config);

        debug!(
            "Created S3 client (region: {}, profile: {})",
            region,
            profile.unwrap_or("<default chain>")
        );

        Self {
            client,
            region: region.to_string(),
            profile: profile.map(str::to_string),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }
}

fn aws_error<E: std::error::Error>(bucket: &str, error: E) -> DeployError {
    DeployError::from_aws_error(bucket, DisplayErrorContext(error))
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<String>> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(head) => Ok(Some(head.e_tag().unwrap_or_default().to_string())),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|service| service.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(None)
                } else {
                    Err(aws_error(bucket, e))
                }
            }
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        headers: &ObjectHeaders,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body.to_vec()))
            .content_length(body.len() as i64)
            .content_type(&headers.content_type)
            .cache_control(&headers.cache_control)
            .set_content_md5(headers.content_md5.clone())
            .send()
            .await
            .map_err(|e| aws_error(bucket, e))?;
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        headers: &ObjectHeaders,
    ) -> Result<String> {
        let multipart = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(&headers.content_type)
            .cache_control(&headers.cache_control)
            .send()
            .await
            .map_err(|e| aws_error(bucket, e))?;

        multipart
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| DeployError::Network {
                message: format!("No upload ID returned from S3 for {}", key),
            })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: &[u8],
    ) -> Result<String> {
        let part = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body.to_vec()))
            .send()
            .await
            .map_err(|e| aws_error(bucket, e))?;

        part.e_tag()
            .map(str::to_string)
            .ok_or_else(|| DeployError::Network {
                message: format!("No ETag returned for part {} of {}", part_number, key),
            })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.e_tag)
                    .build()
            })
            .collect();

        let completed_multipart = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart)
            .send()
            .await
            .map_err(|e| aws_error(bucket, e))?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| aws_error(bucket, e))?;

        debug!("Aborted multipart upload {}", upload_id);
        Ok(())
    }
}
