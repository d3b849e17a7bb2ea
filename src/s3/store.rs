use async_trait::async_trait;

use crate::error::Result;

/// Headers attached to every uploaded object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeaders {
    pub content_type: String,
    pub cache_control: String,
    /// Base64 MD5 of the body, only set for single-shot puts
    pub content_md5: Option<String>,
}

/// A part that has been accepted by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: i32,
    pub e_tag: String,
}

/// The subset of an object store the deployer talks to.
///
/// Implementations must be safe to share between concurrently running
/// site uploads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Return the object's ETag, or `None` if the key does not exist
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<String>>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        headers: &ObjectHeaders,
    ) -> Result<()>;

    /// Start a multipart upload and return its upload id
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        headers: &ObjectHeaders,
    ) -> Result<String>;

    /// Upload one part and return its ETag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: &[u8],
    ) -> Result<String>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()>;

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str)
        -> Result<()>;
}
