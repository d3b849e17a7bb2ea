pub mod client;
pub mod compare;
pub mod helpers;
#[cfg(test)]
pub(crate) mod memory;
pub mod multipart;
pub mod retry;
pub mod store;
pub mod upload;

pub use client::S3Client;
pub use compare::{FileComparison, FileDigest, compare_file, digest_file};
pub use helpers::{detect_cache_control, detect_content_type};
pub use multipart::upload_multipart;
pub use retry::{RetryPolicy, retry};
pub use store::{ObjectHeaders, ObjectStore, UploadedPart};
pub use upload::{UploadResult, upload_file};
