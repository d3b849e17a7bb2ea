use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::UploadConfig;
use crate::error::{DeployError, Result};
use crate::profile::{Environment, ProfileCache, ProfileResolution};
use crate::progress::{ParallelUploadProgress, SiteUploadResult, UploadProgress, UploadStats};
use crate::registry::{SiteDefinition, SiteRegistry};
use crate::s3::{ObjectStore, S3Client};
use crate::traverse::FileTraverser;
use crate::uploader::{S3Uploader, plan_directory};

/// Default number of sites deployed at the same time
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 3;

/// Invoked with a snapshot after every site reaches a terminal outcome
pub type ProgressCallback = Arc<dyn Fn(&ParallelUploadProgress) + Send + Sync>;

/// Creates the object store a site uploads through
#[async_trait]
pub trait ObjectStoreFactory: Send + Sync {
    async fn create(
        &self,
        resolution: &ProfileResolution,
        region: &str,
    ) -> Result<Arc<dyn ObjectStore>>;
}

/// Builds AWS clients, reusing one client per (profile, region)
#[derive(Default)]
pub struct S3ClientFactory {
    clients: Mutex<HashMap<(Option<String>, String), Arc<dyn ObjectStore>>>,
}

impl S3ClientFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStoreFactory for S3ClientFactory {
    async fn create(
        &self,
        resolution: &ProfileResolution,
        region: &str,
    ) -> Result<Arc<dyn ObjectStore>> {
        let key = (resolution.profile.clone(), region.to_string());
        let mut clients = self.clients.lock().await;

        if let Some(client) = clients.get(&key) {
            return Ok(Arc::clone(client));
        }

        let client: Arc<dyn ObjectStore> =
            Arc::new(S3Client::new(region, resolution.profile.as_deref()).await);
        clients.insert(key, Arc::clone(&client));
        Ok(client)
    }
}

/// Options for one [`ParallelUploadManager::upload_sites`] run
#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Explicit credential profile, overriding the environment
    pub profile: Option<String>,
    /// Environment snapshot; the process environment when `None`
    pub environment: Option<Environment>,
    /// Traverse and report only, no network
    pub dry_run: bool,
    /// Exclude globs applied to every site
    pub exclude_patterns: Vec<String>,
    pub progress_callback: Option<ProgressCallback>,
}

/// Everything a site task needs, validated before any task starts
struct SiteJob {
    site: SiteDefinition,
    config: Arc<UploadConfig>,
    traverser: FileTraverser,
    resolution: ProfileResolution,
    factory: Arc<dyn ObjectStoreFactory>,
    dry_run: bool,
    cancel: CancellationToken,
}

impl SiteJob {
    async fn run(self) -> Result<UploadStats> {
        let progress = UploadProgress::new();

        if self.dry_run {
            return plan_directory(&self.config, &self.traverser, &self.site.directory, &progress)
                .await;
        }

        let store = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DeployError::Cancelled),
            store = self.factory.create(&self.resolution, &self.config.region) => store?,
        };
        let uploader = S3Uploader::new(store, Arc::clone(&self.config), self.traverser)
            .with_cancellation(self.cancel.clone());
        uploader
            .upload_directory(&self.site.directory, &progress)
            .await
    }
}

/// Deploys several sites concurrently, bounded by a semaphore.
///
/// One site failing never affects the others: every requested site ends up
/// with exactly one [`SiteUploadResult`].
pub struct ParallelUploadManager {
    registry: Arc<dyn SiteRegistry>,
    factory: Arc<dyn ObjectStoreFactory>,
    base_config: Arc<UploadConfig>,
    profile_cache: Arc<ProfileCache>,
    max_concurrent_uploads: usize,
    cancel: CancellationToken,
}

impl ParallelUploadManager {
    pub fn new(
        registry: Arc<dyn SiteRegistry>,
        factory: Arc<dyn ObjectStoreFactory>,
        base_config: UploadConfig,
        profile_cache: Arc<ProfileCache>,
    ) -> Self {
        Self {
            registry,
            factory,
            base_config: Arc::new(base_config),
            profile_cache,
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_max_concurrent_uploads(mut self, max: usize) -> Self {
        self.max_concurrent_uploads = max.max(1);
        self
    }

    pub fn max_concurrent_uploads(&self) -> usize {
        self.max_concurrent_uploads
    }

    /// Cancel in-flight and queued sites; they finish as `Cancelled`
    pub fn shutdown(&self) {
        info!("Shutting down, cancelling pending site uploads");
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Reject unknown and duplicate names before anything else happens
    fn validate_names(&self, names: &[String]) -> Result<Vec<SiteDefinition>> {
        let mut unknown = Vec::new();
        for name in names {
            if !self.registry.contains(name) && !unknown.contains(name) {
                unknown.push(name.clone());
            }
        }
        if !unknown.is_empty() {
            return Err(DeployError::InvalidSites(unknown));
        }

        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for name in names {
            if !seen.insert(name.as_str()) && !duplicates.contains(name) {
                duplicates.push(name.clone());
            }
        }
        if !duplicates.is_empty() {
            return Err(DeployError::DuplicateSites(duplicates));
        }

        names
            .iter()
            .map(|name| {
                self.registry
                    .site(name)
                    .ok_or_else(|| DeployError::InvalidSites(vec![name.clone()]))
            })
            .collect()
    }

    fn prepare_jobs(
        &self,
        sites: Vec<SiteDefinition>,
        options: &UploadOptions,
        resolution: &ProfileResolution,
    ) -> Result<Vec<SiteJob>> {
        // surfaces a bad global pattern even when no site adds its own
        FileTraverser::new(options.exclude_patterns.as_slice())?;

        sites
            .into_iter()
            .map(|site| {
                let patterns: Vec<&str> = options
                    .exclude_patterns
                    .iter()
                    .chain(site.exclude.iter())
                    .map(String::as_str)
                    .collect();
                let traverser = FileTraverser::new(patterns.as_slice())?;

                let mut config = self.base_config.for_site(&site)?;
                if site.region.is_none() {
                    if let Some(region) = &resolution.region {
                        config.region = region.clone();
                    }
                }

                Ok(SiteJob {
                    site,
                    config: Arc::new(config),
                    traverser,
                    resolution: resolution.clone(),
                    factory: Arc::clone(&self.factory),
                    dry_run: options.dry_run,
                    cancel: self.cancel.clone(),
                })
            })
            .collect()
    }

    /// Deploy `names` concurrently and return one result per site, in
    /// input order.
    ///
    /// # Errors
    ///
    /// Only pre-flight problems are errors: unknown or duplicate site names,
    /// invalid exclude patterns or an invalid per-site configuration. Site
    /// failures are reported in the returned results.
    pub async fn upload_sites(
        &self,
        names: &[String],
        options: UploadOptions,
    ) -> Result<Vec<SiteUploadResult>> {
        let sites = self.validate_names(names)?;

        let environment = options
            .environment
            .clone()
            .unwrap_or_else(|| std::env::vars().collect());
        let cache = Arc::clone(&self.profile_cache);
        let explicit = options.profile.clone();
        let resolution = tokio::task::spawn_blocking(move || {
            cache.get_or_resolve(explicit.as_deref(), &environment)
        })
        .await
        .map_err(|e| DeployError::TaskAborted(e.to_string()))?;

        let jobs = self.prepare_jobs(sites, &options, &resolution)?;

        let mut progress = ParallelUploadProgress::new(jobs.len());
        let notify = |progress: &ParallelUploadProgress| {
            if let Some(callback) = &options.progress_callback {
                callback(progress);
            }
        };

        if jobs.is_empty() {
            notify(&progress);
            return Ok(Vec::new());
        }

        info!(
            "Deploying {} site(s) with up to {} in parallel (profile: {}, source: {}){}",
            jobs.len(),
            self.max_concurrent_uploads,
            resolution.profile.as_deref().unwrap_or("<default chain>"),
            resolution.source,
            if options.dry_run { " [dry run]" } else { "" }
        );

        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_uploads));
        let mut pending = FuturesUnordered::new();

        for (index, job) in jobs.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            let site_name = job.site.name.clone();

            let handle = tokio::spawn(async move {
                let site_started = Instant::now();
                let name = job.site.name.clone();

                // the job watches the token itself so it can abort open uploads
                let outcome: Result<UploadStats> = async {
                    let _permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(DeployError::Cancelled),
                        permit = semaphore.acquire_owned() => {
                            permit.map_err(|e| DeployError::TaskAborted(e.to_string()))?
                        }
                    };
                    debug!("Starting site {}", name);
                    job.run().await
                }
                .await;

                match outcome {
                    Ok(stats) => SiteUploadResult::success(name, stats, site_started.elapsed()),
                    Err(e) => SiteUploadResult::failure(name, e, site_started.elapsed()),
                }
            });

            pending.push(async move { (index, site_name, handle.await) });
        }

        let mut results: Vec<Option<SiteUploadResult>> = vec![None; names.len()];

        while let Some((index, site_name, joined)) = pending.next().await {
            let result = joined.unwrap_or_else(|e| {
                error!("Site task for {} did not finish: {}", site_name, e);
                SiteUploadResult::failure(
                    site_name,
                    DeployError::TaskAborted(e.to_string()),
                    started.elapsed(),
                )
            });

            match result.error() {
                None => info!(
                    "Site {} finished in {:.2?}",
                    result.site_name, result.duration
                ),
                Some(e) => warn!("Site {} failed: {}", result.site_name, e),
            }

            progress.record(&result);
            notify(&progress);
            results[index] = Some(result);
        }

        info!(
            "Deployment finished: {}/{} site(s) succeeded in {:.2?}",
            progress.completed_sites,
            progress.total_sites,
            started.elapsed()
        );

        Ok(results.into_iter().flatten().collect())
    }
}
