use base64::{Engine as _, engine::general_purpose};
use md5::{Digest, Md5};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::retry::{RetryPolicy, retry};
use super::store::ObjectStore;
use crate::error::Result;

#[derive(Debug, PartialEq)]
pub enum FileComparison {
    /// Object doesn't exist in the bucket
    NotFound,
    /// Remote ETag matches the local content
    Identical,
    /// Object exists with different content
    Different,
}

/// MD5 digests of a local file, both whole-file and per multipart chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    md5: [u8; 16],
    part_md5s: Vec<[u8; 16]>,
}

impl FileDigest {
    /// Hex MD5 of the whole content, the ETag of a single-shot upload
    pub fn md5_hex(&self) -> String {
        to_hex(&self.md5)
    }

    /// Base64 MD5, the value of a `Content-MD5` header
    pub fn content_md5(&self) -> String {
        general_purpose::STANDARD.encode(self.md5)
    }

    /// ETag S3 assigns when the file is uploaded in parts of the digest's chunk size
    pub fn multipart_etag(&self) -> String {
        let mut hasher = Md5::new();
        for part in &self.part_md5s {
            hasher.update(part);
        }
        format!("{}-{}", to_hex(&hasher.finalize()), self.part_md5s.len())
    }

    /// Compare against a remote ETag, quoted or not
    pub fn matches_etag(&self, remote_etag: &str) -> bool {
        let remote = strip_etag(remote_etag);
        if remote.contains('-') {
            remote.eq_ignore_ascii_case(&self.multipart_etag())
        } else {
            remote.eq_ignore_ascii_case(&self.md5_hex())
        }
    }
}

fn md5_of(bytes: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md5::digest(bytes));
    out
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Remove the surrounding quotes S3 puts around ETags
pub fn strip_etag(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}

/// Read from `reader` until `buffer` is full or EOF, returning bytes read
pub async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer: &mut [u8],
) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read buffer for `chunk_size` pieces of a file of `file_size` bytes
pub(crate) fn buffer_len(chunk_size: usize, file_size: u64) -> usize {
    let file_size = usize::try_from(file_size).unwrap_or(usize::MAX);
    chunk_size.min(file_size).max(1)
}

/// Digest in-memory content, splitting into `chunk_size` parts
pub fn digest_bytes(content: &[u8], chunk_size: usize) -> FileDigest {
    let chunk_size = chunk_size.max(1);
    FileDigest {
        md5: md5_of(content),
        part_md5s: content.chunks(chunk_size).map(md5_of).collect(),
    }
}

/// Stream a file once, computing the whole-file and per-chunk MD5s
pub async fn digest_file(path: &Path, chunk_size: usize) -> Result<FileDigest> {
    let mut file = File::open(path).await?;
    let file_size = file.metadata().await?.len();
    let mut buffer = vec![0u8; buffer_len(chunk_size, file_size)];
    let mut whole = Md5::new();
    let mut part_md5s = Vec::new();

    loop {
        let bytes_read = read_chunk(&mut file, &mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        let chunk = &buffer[..bytes_read];
        whole.update(chunk);
        part_md5s.push(md5_of(chunk));
    }

    let mut md5 = [0u8; 16];
    md5.copy_from_slice(&whole.finalize());
    Ok(FileDigest { md5, part_md5s })
}

/// Compare a local digest with the remote object, retrying the HEAD request
pub async fn compare_file(
    store: &dyn ObjectStore,
    bucket: &str,
    s3_key: &str,
    digest: &FileDigest,
    policy: &RetryPolicy,
) -> Result<FileComparison> {
    let operation = format!("HEAD s3://{}/{}", bucket, s3_key);
    let remote = retry(policy, &operation, move || store.head_object(bucket, s3_key)).await?;

    Ok(match remote {
        None => FileComparison::NotFound,
        Some(etag) if digest.matches_etag(&etag) => FileComparison::Identical,
        Some(_) => FileComparison::Different,
    })
}
