use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::compare::{buffer_len, read_chunk};
use super::retry::{RetryPolicy, retry};
use super::store::{ObjectHeaders, ObjectStore, UploadedPart};
use crate::error::{DeployError, MultipartStage, Result};

/// Number of parts a file of `size` bytes is split into
pub fn part_count(size: u64, chunk_size: u64) -> u64 {
    size.div_ceil(chunk_size.max(1))
}

fn stage_error(key: &str, stage: MultipartStage, source: DeployError) -> DeployError {
    DeployError::Multipart {
        key: key.to_string(),
        stage,
        source: Box::new(source),
    }
}

/// Upload a large file using S3 multipart upload
///
/// The file is read sequentially in `chunk_size` pieces (the last one may be
/// shorter), each sent as a numbered part. Every request goes through the
/// retry policy. If any stage fails after the upload was created, or `cancel`
/// fires while parts are in flight, the upload is aborted so the bucket does
/// not keep orphaned parts.
///
/// Returns the number of bytes uploaded.
#[allow(clippy::too_many_arguments)]
pub async fn upload_multipart(
    store: &dyn ObjectStore,
    bucket: &str,
    s3_key: &str,
    local_path: &Path,
    headers: &ObjectHeaders,
    chunk_size: usize,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<u64> {
    let file_size = tokio::fs::metadata(local_path).await?.len();

    if cancel.is_cancelled() {
        return Err(DeployError::Cancelled);
    }

    info!(
        "Starting multipart upload for {} ({} bytes, {} parts)",
        local_path.display(),
        file_size,
        part_count(file_size, chunk_size as u64)
    );

    let operation = format!("CreateMultipartUpload s3://{}/{}", bucket, s3_key);
    let upload_id = retry(policy, &operation, move || {
        store.create_multipart_upload(bucket, s3_key, headers)
    })
    .await
    .map_err(|e| stage_error(s3_key, MultipartStage::Create, e))?;

    debug!("Multipart upload initiated with ID: {}", upload_id);

    let parts = PartSource {
        local_path,
        file_size,
        chunk_size,
    };
    let result = upload_parts(store, bucket, s3_key, &upload_id, &parts, policy, cancel).await;

    if result.is_err() {
        abort_multipart_upload(store, bucket, s3_key, &upload_id).await;
    } else {
        info!(
            "Successfully completed multipart upload: {} -> s3://{}/{}",
            local_path.display(),
            bucket,
            s3_key
        );
    }

    result
}

struct PartSource<'a> {
    local_path: &'a Path,
    file_size: u64,
    chunk_size: usize,
}

async fn upload_parts(
    store: &dyn ObjectStore,
    bucket: &str,
    s3_key: &str,
    upload_id: &str,
    source: &PartSource<'_>,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut file = tokio::fs::File::open(source.local_path)
        .await
        .map_err(|e| stage_error(s3_key, MultipartStage::UploadPart(1), e.into()))?;
    let mut buffer = vec![0u8; buffer_len(source.chunk_size, source.file_size)];
    let mut parts = Vec::new();
    let mut part_number = 1i32;
    let mut uploaded_bytes = 0u64;

    loop {
        let stage = MultipartStage::UploadPart(part_number);
        let bytes_read = read_chunk(&mut file, &mut buffer)
            .await
            .map_err(|e| stage_error(s3_key, stage, e))?;

        if bytes_read == 0 {
            break;
        }

        debug!("Uploading part {} ({} bytes)", part_number, bytes_read);

        let chunk = &buffer[..bytes_read];
        let operation = format!("UploadPart {} s3://{}/{}", part_number, bucket, s3_key);
        let e_tag = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Multipart upload {} cancelled at part {}", upload_id, part_number);
                return Err(DeployError::Cancelled);
            }
            e_tag = retry(policy, &operation, move || {
                store.upload_part(bucket, s3_key, upload_id, part_number, chunk)
            }) => e_tag.map_err(|e| stage_error(s3_key, stage, e))?,
        };

        parts.push(UploadedPart { part_number, e_tag });
        uploaded_bytes += bytes_read as u64;
        part_number += 1;
    }

    debug!(
        "All {} parts uploaded, completing multipart upload",
        parts.len()
    );

    let operation = format!("CompleteMultipartUpload s3://{}/{}", bucket, s3_key);
    let parts = parts.as_slice();
    retry(policy, &operation, move || {
        store.complete_multipart_upload(bucket, s3_key, upload_id, parts)
    })
    .await
    .map_err(|e| stage_error(s3_key, MultipartStage::Complete, e))?;

    Ok(uploaded_bytes)
}

/// Abort a multipart upload (for cleanup on error)
///
/// Best effort: a failed abort is logged, the stage error is what the
/// caller reports.
async fn abort_multipart_upload(
    store: &dyn ObjectStore,
    bucket: &str,
    s3_key: &str,
    upload_id: &str,
) {
    if let Err(e) = store.abort_multipart_upload(bucket, s3_key, upload_id).await {
        warn!(
            "Failed to abort multipart upload {} for s3://{}/{}: {}",
            upload_id, bucket, s3_key, e
        );
    }
}
