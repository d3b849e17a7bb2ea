use std::path::Path;
use tracing::debug;

use super::compare::digest_bytes;
use super::retry::{RetryPolicy, retry};
use super::store::{ObjectHeaders, ObjectStore};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadResult {
    Uploaded { bytes: u64, multipart: bool },
    Skipped,
}

/// Upload a file with a single PUT, sending its Content-MD5 for integrity
pub async fn upload_file(
    store: &dyn ObjectStore,
    bucket: &str,
    s3_key: &str,
    local_path: &Path,
    headers: &ObjectHeaders,
    policy: &RetryPolicy,
) -> Result<u64> {
    let body = tokio::fs::read(local_path).await?;
    let file_size = body.len() as u64;

    let headers = ObjectHeaders {
        content_md5: Some(digest_bytes(&body, body.len()).content_md5()),
        ..headers.clone()
    };

    let operation = format!("PUT s3://{}/{}", bucket, s3_key);
    let body = body.as_slice();
    let headers = &headers;
    retry(policy, &operation, move || {
        store.put_object(bucket, s3_key, body, headers)
    })
    .await?;

    debug!(
        "Uploaded {} -> s3://{}/{} ({} bytes)",
        local_path.display(),
        bucket,
        s3_key,
        file_size
    );

    Ok(file_size)
}
