use futures::{StreamExt, stream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::UploadConfig;
use crate::error::{DeployError, Result};
use crate::progress::{UploadProgress, UploadStats};
use crate::s3::{
    FileComparison, ObjectHeaders, ObjectStore, UploadResult, compare_file, detect_content_type,
    digest_file, upload_file, upload_multipart,
};
use crate::traverse::{FileTraverser, TraversedFile};

/// A local file together with everything needed to store it remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub relative_path: String,
    pub s3_key: String,
    pub content_type: &'static str,
    pub cache_control: String,
    pub size: u64,
}

impl FileEntry {
    pub fn new(config: &UploadConfig, file: &TraversedFile) -> Self {
        Self {
            path: file.path.clone(),
            relative_path: file.relative_path.clone(),
            s3_key: config.build_s3_key(&file.relative_path),
            content_type: detect_content_type(&file.path),
            cache_control: config.cache_control_for(&file.path),
            size: file.size,
        }
    }

    fn headers(&self) -> ObjectHeaders {
        ObjectHeaders {
            content_type: self.content_type.to_string(),
            cache_control: self.cache_control.clone(),
            content_md5: None,
        }
    }
}

async fn traverse_blocking(traverser: &FileTraverser, root: &Path) -> Result<Vec<TraversedFile>> {
    let traverser = traverser.clone();
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || traverser.traverse(&root))
        .await
        .map_err(|e| DeployError::TaskAborted(e.to_string()))?
}

/// List what a deployment of `root` would store, without touching the network
pub async fn plan_files(
    config: &UploadConfig,
    traverser: &FileTraverser,
    root: &Path,
) -> Result<Vec<FileEntry>> {
    let files = traverse_blocking(traverser, root).await?;
    Ok(files.iter().map(|file| FileEntry::new(config, file)).collect())
}

/// Dry run: count every file as skipped and report the totals
pub async fn plan_directory(
    config: &UploadConfig,
    traverser: &FileTraverser,
    root: &Path,
    progress: &UploadProgress,
) -> Result<UploadStats> {
    let entries = plan_files(config, traverser, root).await?;

    progress.set_total_files(entries.len());
    progress.set_total_bytes(entries.iter().map(|e| e.size).sum());
    for entry in &entries {
        debug!(
            "[dry-run] {} -> s3://{}/{} ({}, {})",
            entry.relative_path, config.bucket, entry.s3_key, entry.content_type, entry.cache_control
        );
        progress.add_skipped_file(entry.size);
    }

    Ok(progress.stats())
}

/// Synchronizes one site directory with its bucket prefix
pub struct S3Uploader {
    store: Arc<dyn ObjectStore>,
    config: Arc<UploadConfig>,
    traverser: FileTraverser,
    cancel: CancellationToken,
}

impl S3Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, config: Arc<UploadConfig>, traverser: FileTraverser) -> Self {
        Self {
            store,
            config,
            traverser,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the upload when `cancel` fires; open multipart uploads are aborted
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Upload every non-excluded file under `root`.
    ///
    /// Stops at the first file that cannot be stored; that file is counted
    /// as failed and whatever was recorded in `progress` so far remains.
    /// Files already in flight are wound down before returning, so no
    /// multipart upload is left open.
    pub async fn upload_directory(&self, root: &Path, progress: &UploadProgress) -> Result<UploadStats> {
        let files = traverse_blocking(&self.traverser, root).await?;

        progress.set_total_files(files.len());
        progress.set_total_bytes(files.iter().map(|f| f.size).sum());

        info!(
            "Syncing {} files from {} to s3://{}/{}",
            files.len(),
            root.display(),
            self.config.bucket,
            self.config.key_prefix
        );

        // fires on shutdown or on the first failed file
        let stop = self.cancel.child_token();
        let tasks: Vec<_> = files
            .iter()
            .map(|file| self.process_file(FileEntry::new(&self.config, file), progress, &stop))
            .collect();
        let mut outcomes =
            stream::iter(tasks).buffer_unordered(self.config.file_concurrency.max(1));

        let mut first_error = None;
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Ok(()) => {}
                Err(DeployError::Cancelled) => {}
                Err(e) => {
                    stop.cancel();
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(progress.stats()),
        }
    }

    async fn process_file(
        &self,
        entry: FileEntry,
        progress: &UploadProgress,
        stop: &CancellationToken,
    ) -> Result<()> {
        if stop.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        match self.sync_entry(&entry, stop).await {
            Ok(UploadResult::Uploaded { bytes, .. }) => {
                progress.add_uploaded_file(bytes);
                Ok(())
            }
            Ok(UploadResult::Skipped) => {
                progress.add_skipped_file(entry.size);
                Ok(())
            }
            Err(DeployError::Cancelled) => {
                debug!("Cancelled {}", entry.relative_path);
                Err(DeployError::Cancelled)
            }
            Err(e) => {
                error!("Failed to upload {}: {}", entry.relative_path, e);
                progress.add_failed_file(entry.size);
                Err(e)
            }
        }
    }

    /// Store one file unless the remote copy is already identical
    pub async fn sync_file(&self, entry: &FileEntry) -> Result<UploadResult> {
        self.sync_entry(entry, &self.cancel).await
    }

    async fn sync_entry(&self, entry: &FileEntry, cancel: &CancellationToken) -> Result<UploadResult> {
        let store = self.store.as_ref();
        let bucket = self.config.bucket.as_str();
        let policy = self.config.retry_policy();

        if self.config.skip_unchanged_files {
            let digest = digest_file(&entry.path, self.config.chunk_size()).await?;
            match compare_file(store, bucket, &entry.s3_key, &digest, &policy).await? {
                FileComparison::Identical => {
                    debug!("Skipping unchanged {}", entry.s3_key);
                    return Ok(UploadResult::Skipped);
                }
                FileComparison::NotFound => debug!("New file {}", entry.s3_key),
                FileComparison::Different => debug!("Changed file {}", entry.s3_key),
            }
        }

        let headers = entry.headers();
        if self.config.uses_multipart(entry.size) {
            let bytes = upload_multipart(
                store,
                bucket,
                &entry.s3_key,
                &entry.path,
                &headers,
                self.config.chunk_size(),
                &policy,
                cancel,
            )
            .await?;
            Ok(UploadResult::Uploaded {
                bytes,
                multipart: true,
            })
        } else {
            let bytes = upload_file(store, bucket, &entry.s3_key, &entry.path, &headers, &policy).await?;
            Ok(UploadResult::Uploaded {
                bytes,
                multipart: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::helpers::{CACHE_CONTROL_HTML, CACHE_CONTROL_IMMUTABLE};
    use crate::s3::memory::{MemoryObjectStore, Op};
    use std::fs;
    use std::time::Duration;

    const BUCKET: &str = "site-bucket";

    fn site_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        fs::write(dir.path().join("css/app.css"), "body{}").unwrap();
        fs::write(dir.path().join("debug.log"), "noise").unwrap();
        dir
    }

    fn config() -> UploadConfig {
        UploadConfig::new(BUCKET)
            .with_key_prefix("docs")
            .with_multipart(true, 100)
            .with_retries(0, Duration::ZERO)
    }

    fn uploader(store: &Arc<MemoryObjectStore>, config: UploadConfig, patterns: &[&str]) -> S3Uploader {
        S3Uploader::new(
            store.clone(),
            Arc::new(config),
            FileTraverser::new(patterns).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_upload_directory_with_headers() {
        let dir = site_dir();
        let store = Arc::new(MemoryObjectStore::default());
        let progress = UploadProgress::new();

        let stats = uploader(&store, config(), &["*.log"])
            .upload_directory(dir.path(), &progress)
            .await
            .unwrap();

        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.uploaded_files, 2);
        assert_eq!(stats.uploaded_bytes, 19);
        assert_eq!(store.object_count(), 2);

        let index = store.object(BUCKET, "docs/index.html").unwrap();
        assert_eq!(index.content_type, "text/html; charset=utf-8");
        assert_eq!(index.cache_control, CACHE_CONTROL_HTML);

        let css = store.object(BUCKET, "docs/css/app.css").unwrap();
        assert_eq!(css.content_type, "text/css; charset=utf-8");
        assert_eq!(css.cache_control, CACHE_CONTROL_IMMUTABLE);
        assert!(store.object(BUCKET, "docs/debug.log").is_none());
    }

    #[tokio::test]
    async fn test_unchanged_files_are_skipped() {
        let dir = site_dir();
        let store = Arc::new(MemoryObjectStore::default());
        let uploader = uploader(&store, config(), &[]);

        uploader
            .upload_directory(dir.path(), &UploadProgress::new())
            .await
            .unwrap();
        let puts = store.calls(Op::Put);

        fs::write(dir.path().join("index.html"), "<h1>changed</h1>").unwrap();
        let progress = UploadProgress::new();
        let stats = uploader.upload_directory(dir.path(), &progress).await.unwrap();

        assert_eq!(stats.skipped_files, 2);
        assert_eq!(stats.uploaded_files, 1);
        assert_eq!(store.calls(Op::Put), puts + 1);
        assert_eq!(
            store.object(BUCKET, "docs/index.html").unwrap().body,
            b"<h1>changed</h1>"
        );
    }

    #[tokio::test]
    async fn test_skip_disabled_uploads_everything() {
        let dir = site_dir();
        let store = Arc::new(MemoryObjectStore::default());
        let uploader = uploader(&store, config().with_skip_unchanged(false), &[]);

        for _ in 0..2 {
            uploader
                .upload_directory(dir.path(), &UploadProgress::new())
                .await
                .unwrap();
        }

        assert_eq!(store.calls(Op::Head), 0);
        assert_eq!(store.calls(Op::Put), 6);
    }

    #[tokio::test]
    async fn test_large_file_uses_multipart_and_is_skipped_later() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bundle.wasm"), vec![7u8; 250]).unwrap();
        let store = Arc::new(MemoryObjectStore::default());
        let uploader = uploader(&store, config(), &[]);

        let stats = uploader
            .upload_directory(dir.path(), &UploadProgress::new())
            .await
            .unwrap();

        assert_eq!(stats.uploaded_bytes, 250);
        assert_eq!(store.calls(Op::Put), 0);
        assert_eq!(store.calls(Op::Create), 1);
        assert_eq!(store.calls(Op::Complete), 1);
        assert_eq!(store.part_sizes(), vec![100, 100, 50]);

        let stats = uploader
            .upload_directory(dir.path(), &UploadProgress::new())
            .await
            .unwrap();
        assert_eq!(stats.skipped_files, 1);
        assert_eq!(store.calls(Op::Create), 1);
    }

    #[tokio::test]
    async fn test_transient_head_failures_are_retried() {
        let dir = site_dir();
        let store = Arc::new(MemoryObjectStore::default());
        store.fail_next(Op::Head, 2);
        let config = config().with_retries(3, Duration::from_millis(1));

        let stats = uploader(&store, config, &[])
            .upload_directory(dir.path(), &UploadProgress::new())
            .await
            .unwrap();

        assert_eq!(stats.uploaded_files, 3);
        assert_eq!(store.calls(Op::Head), 5);
    }

    #[tokio::test]
    async fn test_fail_fast_keeps_progress() {
        let dir = site_dir();
        let store = Arc::new(MemoryObjectStore::default());
        store.fail_always(Op::Put);
        let progress = UploadProgress::new();

        let err = uploader(&store, config(), &[])
            .upload_directory(dir.path(), &progress)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::RetriesExhausted { attempts: 1, .. }));
        let stats = progress.stats();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.failed_files, 1);
        assert_eq!(
            stats.processed_files,
            stats.uploaded_files + stats.skipped_files + stats.failed_files
        );
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_head_failures_exhaust_retries() {
        let dir = site_dir();
        let store = Arc::new(MemoryObjectStore::default());
        store.fail_always(Op::Head);
        let progress = UploadProgress::new();
        let config = config().with_retries(1, Duration::from_millis(1));

        let err = uploader(&store, config, &[])
            .upload_directory(dir.path(), &progress)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(progress.stats().failed_files, 1);
        assert_eq!(store.calls(Op::Head), 2);
        assert_eq!(store.calls(Op::Put), 0);
    }

    #[tokio::test]
    async fn test_seeded_remote_object_is_skipped() {
        let dir = site_dir();
        let store = Arc::new(MemoryObjectStore::default());
        store.insert_object(BUCKET, "docs/index.html", b"<h1>home</h1>");

        let stats = uploader(&store, config(), &["*.log"])
            .upload_directory(dir.path(), &UploadProgress::new())
            .await
            .unwrap();

        assert_eq!(stats.skipped_files, 1);
        assert_eq!(stats.uploaded_files, 1);
        assert_eq!(store.calls(Op::Put), 1);
        assert!(store.object(BUCKET, "docs/css/app.css").is_some());
    }

    #[tokio::test]
    async fn test_failure_winds_down_open_multipart() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.bin"), vec![3u8; 250]).unwrap();
        fs::write(dir.path().join("b.html"), "<p>b</p>").unwrap();
        let store = Arc::new(MemoryObjectStore::default());
        store.delay(Op::UploadPart, Duration::from_millis(50));
        store.fail_always(Op::Put);
        let progress = UploadProgress::new();

        let err = uploader(&store, config().with_file_concurrency(2), &[])
            .upload_directory(dir.path(), &progress)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::RetriesExhausted { .. }));
        assert_eq!(progress.stats().failed_files, 1);
        assert_eq!(store.calls(Op::Create), store.calls(Op::Abort));
        assert_eq!(store.calls(Op::Complete), 0);
        assert!(store.pending_uploads().is_empty());
        assert!(store.object(BUCKET, "docs/a.bin").is_none());
    }

    #[tokio::test]
    async fn test_cancellation_aborts_open_multipart() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.bin"), vec![3u8; 250]).unwrap();
        let store = Arc::new(MemoryObjectStore::default());
        store.delay(Op::UploadPart, Duration::from_millis(200));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = uploader(&store, config(), &[])
            .with_cancellation(cancel)
            .upload_directory(dir.path(), &UploadProgress::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Cancelled));
        assert_eq!(store.calls(Op::Create), 1);
        assert_eq!(store.calls(Op::Abort), 1);
        assert!(store.pending_uploads().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_files() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..20 {
            fs::write(dir.path().join(format!("page-{}.html", i)), format!("page {}", i)).unwrap();
        }
        let store = Arc::new(MemoryObjectStore::default());
        let progress = UploadProgress::new();

        let stats = uploader(&store, config().with_file_concurrency(4), &[])
            .upload_directory(dir.path(), &progress)
            .await
            .unwrap();

        assert_eq!(stats.processed_files, 20);
        assert_eq!(stats.uploaded_files, 20);
        assert_eq!(store.object_count(), 20);
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let store = Arc::new(MemoryObjectStore::default());
        let err = uploader(&store, config(), &[])
            .upload_directory(Path::new("/definitely/not/here"), &UploadProgress::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::DirectoryNotFound { .. }));
    }

    #[tokio::test]
    async fn test_plan_directory() {
        let dir = site_dir();
        let progress = UploadProgress::new();
        let traverser = FileTraverser::new(&["*.log"]).unwrap();

        let stats = plan_directory(&config(), &traverser, dir.path(), &progress)
            .await
            .unwrap();

        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.skipped_files, 2);
        assert_eq!(stats.uploaded_files, 0);
        assert_eq!(stats.total_bytes, 19);

        let keys: Vec<_> = plan_files(&config(), &traverser, dir.path())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.s3_key)
            .collect();
        assert_eq!(keys, vec!["docs/css/app.css", "docs/index.html"]);
    }
}
