//! Incremental, parallel deployment of static sites to S3.
//!
//! A site is a directory of built files. [`uploader::S3Uploader`] mirrors one
//! site under a key prefix, skipping files whose remote ETag already matches,
//! and [`orchestrator::ParallelUploadManager`] deploys several sites at once.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod profile;
pub mod progress;
pub mod registry;
pub mod s3;
pub mod traverse;
pub mod uploader;

pub use config::UploadConfig;
pub use error::{DeployError, Result};
pub use orchestrator::{
    ObjectStoreFactory, ParallelUploadManager, ProgressCallback, S3ClientFactory, UploadOptions,
};
pub use profile::{ProfileCache, ProfileResolution, ProfileSource};
pub use progress::{
    ParallelUploadProgress, SiteOutcome, SiteUploadResult, UploadProgress, UploadStats,
    format_size,
};
pub use registry::{SiteDefinition, SiteRegistry, YamlSiteRegistry};
pub use traverse::{FileTraverser, TraversedFile};
pub use uploader::{FileEntry, S3Uploader};
