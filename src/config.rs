use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{DeployError, Result};
use crate::registry::SiteDefinition;
use crate::s3::{RetryPolicy, detect_cache_control};

/// Default size of a multipart chunk, also the multipart threshold
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// S3 rejects non-final parts smaller than this
pub const MIN_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// S3 rejects parts larger than this
pub const MAX_CHUNK_SIZE: u64 = 5 * 1024 * 1024 * 1024;

pub const DEFAULT_REGION: &str = "us-east-1";

/// Settings for uploading one site to one bucket
#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    pub bucket: String,
    /// Key prefix without leading or trailing slashes; empty for the bucket root
    pub key_prefix: String,
    pub region: String,
    pub skip_unchanged_files: bool,
    pub enable_multipart_upload: bool,
    pub multipart_chunk_size: u64,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Lowercase extension -> Cache-Control, consulted before the built-in tiers
    pub cache_control_overrides: HashMap<String, String>,
    /// Files in flight per site
    pub file_concurrency: usize,
}

impl UploadConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key_prefix: String::new(),
            region: DEFAULT_REGION.to_string(),
            skip_unchanged_files: true,
            enable_multipart_upload: true,
            multipart_chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            cache_control_overrides: HashMap::new(),
            file_concurrency: 1,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_skip_unchanged(mut self, enabled: bool) -> Self {
        self.skip_unchanged_files = enabled;
        self
    }

    pub fn with_multipart(mut self, enabled: bool, chunk_size: u64) -> Self {
        self.enable_multipart_upload = enabled;
        self.multipart_chunk_size = chunk_size;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    pub fn with_cache_control(
        mut self,
        extension: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Self {
        self.cache_control_overrides.insert(
            extension.as_ref().trim_start_matches('.').to_lowercase(),
            value.into(),
        );
        self
    }

    pub fn with_file_concurrency(mut self, concurrency: usize) -> Self {
        self.file_concurrency = concurrency;
        self
    }

    /// Load configuration from the process environment and .env file
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_env_map(&std::env::vars().collect())
    }

    /// Load configuration from an environment snapshot
    ///
    /// # Errors
    ///
    /// Returns an error if `S3_BUCKET` is missing or any value is invalid
    pub fn from_env_map(env: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let bucket = get("S3_BUCKET").ok_or_else(|| {
            DeployError::Config(
                "S3_BUCKET not found in environment. Please set it in .env file".into(),
            )
        })?;

        let mut config = Self::new(bucket)
            .with_region(
                get("AWS_REGION")
                    .or_else(|| get("AWS_DEFAULT_REGION"))
                    .unwrap_or(DEFAULT_REGION),
            )
            .with_key_prefix(get("S3_TARGET_PATH").unwrap_or_default());

        if let Some(value) = get("SITE_DEPLOY_SKIP_UNCHANGED") {
            config.skip_unchanged_files = parse_bool("SITE_DEPLOY_SKIP_UNCHANGED", value)?;
        }
        if let Some(value) = get("SITE_DEPLOY_MULTIPART") {
            config.enable_multipart_upload = parse_bool("SITE_DEPLOY_MULTIPART", value)?;
        }
        if let Some(value) = get("SITE_DEPLOY_CHUNK_SIZE") {
            let chunk_size: u64 = parse_number("SITE_DEPLOY_CHUNK_SIZE", value)?;
            if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
                return Err(DeployError::Config(format!(
                    "SITE_DEPLOY_CHUNK_SIZE must be between {} and {} bytes (got {})",
                    MIN_CHUNK_SIZE, MAX_CHUNK_SIZE, chunk_size
                )));
            }
            config.multipart_chunk_size = chunk_size;
        }
        if let Some(value) = get("SITE_DEPLOY_MAX_RETRIES") {
            config.max_retries = parse_number("SITE_DEPLOY_MAX_RETRIES", value)?;
        }
        if let Some(value) = get("SITE_DEPLOY_RETRY_DELAY_MS") {
            config.retry_base_delay =
                Duration::from_millis(parse_number("SITE_DEPLOY_RETRY_DELAY_MS", value)?);
        }
        if let Some(value) = get("SITE_DEPLOY_FILE_CONCURRENCY") {
            config.file_concurrency = parse_number("SITE_DEPLOY_FILE_CONCURRENCY", value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check bucket, region and prefix, plus the numeric tunables
    pub fn validate(&self) -> Result<()> {
        Self::validate_bucket_name(&self.bucket)?;
        Self::validate_region(&self.region)?;
        Self::validate_key_prefix(&self.key_prefix)?;

        if self.multipart_chunk_size == 0 {
            return Err(DeployError::Config(
                "multipart chunk size must be greater than zero".into(),
            ));
        }
        if self.multipart_chunk_size > MAX_CHUNK_SIZE {
            return Err(DeployError::Config(format!(
                "multipart chunk size {} exceeds the S3 part limit of {} bytes",
                self.multipart_chunk_size, MAX_CHUNK_SIZE
            )));
        }
        if self.file_concurrency == 0 {
            return Err(DeployError::Config(
                "file concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Layer a site's overrides on top of this base configuration.
    ///
    /// The site's prefix is nested under the base prefix, if any.
    pub fn for_site(&self, site: &SiteDefinition) -> Result<Self> {
        let site_prefix = site.key_prefix();
        let prefix = if self.key_prefix.is_empty() {
            site_prefix
        } else {
            format!("{}/{}", self.key_prefix, site_prefix)
        };
        let mut config = self.clone().with_key_prefix(prefix);
        if let Some(bucket) = &site.bucket {
            config.bucket = bucket.clone();
        }
        if let Some(region) = &site.region {
            config.region = region.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate AWS region format
    fn validate_region(region: &str) -> Result<()> {
        if region.is_empty() {
            return Err(DeployError::Config("AWS_REGION cannot be empty".into()));
        }

        // Basic validation - ensure it looks like a region (contains a dash)
        if !region.contains('-') {
            return Err(DeployError::Config(format!(
                "AWS_REGION '{}' doesn't look like a valid region (e.g., us-west-2, eu-west-1)",
                region
            )));
        }

        Ok(())
    }

    /// Validate S3 bucket name according to AWS rules
    fn validate_bucket_name(bucket: &str) -> Result<()> {
        let invalid = |reason: String| Err(DeployError::Config(reason));

        if bucket.len() < 3 || bucket.len() > 63 {
            return invalid(format!(
                "bucket '{}' must be between 3 and 63 characters (got {})",
                bucket,
                bucket.len()
            ));
        }

        let is_edge = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
        if !bucket.starts_with(is_edge) {
            return invalid(format!(
                "bucket '{}' must start with a lowercase letter or number",
                bucket
            ));
        }
        if !bucket.ends_with(is_edge) {
            return invalid(format!(
                "bucket '{}' must end with a lowercase letter or number",
                bucket
            ));
        }

        if let Some(c) = bucket
            .chars()
            .find(|&c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '.')
        {
            return invalid(format!(
                "bucket '{}' contains invalid character '{}'. Only lowercase letters, numbers, hyphens, and periods are allowed",
                bucket, c
            ));
        }

        if bucket.contains("..") {
            return invalid(format!("bucket '{}' cannot contain consecutive periods", bucket));
        }

        // Not allowed to look like an IP address
        if bucket.split('.').count() == 4 && bucket.split('.').all(|part| part.parse::<u8>().is_ok())
        {
            return invalid(format!(
                "bucket '{}' cannot be formatted as an IP address",
                bucket
            ));
        }

        Ok(())
    }

    /// Validate key prefix
    fn validate_key_prefix(prefix: &str) -> Result<()> {
        if prefix.is_empty() {
            return Ok(());
        }

        if prefix.contains("//") {
            return Err(DeployError::Config(format!(
                "key prefix '{}' contains consecutive slashes (not allowed)",
                prefix
            )));
        }

        if prefix.split('/').any(|segment| segment == "..") {
            return Err(DeployError::Config(format!(
                "key prefix '{}' contains '..' (not allowed for security)",
                prefix
            )));
        }

        if prefix.starts_with('/') {
            return Err(DeployError::Config(format!(
                "key prefix '{}' should not start with '/' (use relative path)",
                prefix
            )));
        }

        Ok(())
    }

    /// Construct the S3 key for a site-relative path
    pub fn build_s3_key(&self, relative_path: &str) -> String {
        let path = relative_path.trim_start_matches("./");
        if self.key_prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.key_prefix.trim_end_matches('/'), path)
        }
    }

    /// Cache-Control for a file, honoring per-extension overrides
    pub fn cache_control_for(&self, path: &Path) -> String {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.cache_control_overrides.get(&ext.to_lowercase()))
            .cloned()
            .unwrap_or_else(|| detect_cache_control(path).to_string())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_base_delay)
    }

    /// Whether a file of `size` bytes goes through the multipart protocol
    pub fn uses_multipart(&self, size: u64) -> bool {
        self.enable_multipart_upload && size > self.multipart_chunk_size
    }

    pub fn chunk_size(&self) -> usize {
        usize::try_from(self.multipart_chunk_size).unwrap_or(usize::MAX)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(DeployError::Config(format!(
            "{} must be a boolean (got '{}')",
            key, value
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        DeployError::Config(format!("{} must be a non-negative number (got '{}')", key, value))
    })
}
