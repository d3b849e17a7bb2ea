//! In-memory [`ObjectStore`] with call counting and failure injection.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::compare::digest_bytes;
use super::store::{ObjectHeaders, ObjectStore, UploadedPart};
use crate::error::{DeployError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Head,
    Put,
    Create,
    UploadPart,
    Complete,
    Abort,
}

#[derive(Debug, Clone)]
pub(crate) struct StoredObject {
    pub body: Vec<u8>,
    pub e_tag: String,
    pub content_type: String,
    pub cache_control: String,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    headers: ObjectHeaders,
    parts: BTreeMap<i32, Vec<u8>>,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<(String, String), StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    calls: HashMap<Op, usize>,
    failures: HashMap<Op, u32>,
    delays: HashMap<Op, Duration>,
    last_part_sizes: Vec<usize>,
    next_upload_id: u64,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryObjectStore {
    state: Mutex<State>,
}

impl MemoryObjectStore {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `count` calls of `op` fail with a network error
    pub fn fail_next(&self, op: Op, count: u32) {
        self.lock().failures.insert(op, count);
    }

    pub fn fail_always(&self, op: Op) {
        self.fail_next(op, u32::MAX);
    }

    /// Stall every call of `op` for `delay` before it takes effect
    pub fn delay(&self, op: Op, delay: Duration) {
        self.lock().delays.insert(op, delay);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Seed an object as if it had been uploaded with a single PUT
    pub fn insert_object(&self, bucket: &str, key: &str, body: &[u8]) {
        let e_tag = format!("\"{}\"", digest_bytes(body, body.len()).md5_hex());
        self.lock().objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body: body.to_vec(),
                e_tag,
                content_type: "application/octet-stream".into(),
                cache_control: String::new(),
            },
        );
    }

    /// Sizes of the parts of the most recently completed multipart upload
    pub fn part_sizes(&self) -> Vec<usize> {
        self.lock().last_part_sizes.clone()
    }

    /// Upload ids that were created but neither completed nor aborted
    pub fn pending_uploads(&self) -> Vec<String> {
        self.lock().uploads.keys().cloned().collect()
    }

    async fn pause(&self, op: Op) {
        let delay = self.lock().delays.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn begin(&self, op: Op) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        if let Some(remaining) = state.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DeployError::Network {
                    message: format!("injected {:?} failure", op),
                });
            }
        }
        Ok(state)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<String>> {
        self.pause(Op::Head).await;
        let state = self.begin(Op::Head)?;
        Ok(state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.e_tag.clone()))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        headers: &ObjectHeaders,
    ) -> Result<()> {
        self.pause(Op::Put).await;
        let mut state = self.begin(Op::Put)?;
        let digest = digest_bytes(body, body.len());
        if let Some(expected) = &headers.content_md5 {
            if *expected != digest.content_md5() {
                return Err(DeployError::Network {
                    message: "BadDigest: Content-MD5 mismatch".into(),
                });
            }
        }
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body: body.to_vec(),
                e_tag: format!("\"{}\"", digest.md5_hex()),
                content_type: headers.content_type.clone(),
                cache_control: headers.cache_control.clone(),
            },
        );
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        headers: &ObjectHeaders,
    ) -> Result<String> {
        self.pause(Op::Create).await;
        let mut state = self.begin(Op::Create)?;
        state.next_upload_id += 1;
        let upload_id = format!("upload-{}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                headers: headers.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: &[u8],
    ) -> Result<String> {
        self.pause(Op::UploadPart).await;
        let mut state = self.begin(Op::UploadPart)?;
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| DeployError::Network {
                message: format!("NoSuchUpload: {}", upload_id),
            })?;
        upload.parts.insert(part_number, body.to_vec());
        Ok(format!("\"{}\"", digest_bytes(body, body.len()).md5_hex()))
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()> {
        self.pause(Op::Complete).await;
        let mut state = self.begin(Op::Complete)?;
        let upload = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| DeployError::Network {
                message: format!("NoSuchUpload: {}", upload_id),
            })?;

        let mut body = Vec::new();
        let mut sizes = Vec::new();
        for (index, part) in parts.iter().enumerate() {
            if part.part_number != index as i32 + 1 {
                return Err(DeployError::Network {
                    message: "InvalidPartOrder".into(),
                });
            }
            let data = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| DeployError::Network {
                    message: format!("InvalidPart: {}", part.part_number),
                })?;
            sizes.push(data.len());
            body.extend_from_slice(data);
        }

        let chunk_size = sizes.first().copied().unwrap_or(1);
        let e_tag = format!("\"{}\"", digest_bytes(&body, chunk_size).multipart_etag());
        let headers = upload.headers;
        state.last_part_sizes = sizes;
        state.objects.insert(
            (upload.bucket, upload.key),
            StoredObject {
                body,
                e_tag,
                content_type: headers.content_type,
                cache_control: headers.cache_control,
            },
        );
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<()> {
        self.pause(Op::Abort).await;
        let mut state = self.begin(Op::Abort)?;
        state.uploads.remove(upload_id);
        Ok(())
    }
}
