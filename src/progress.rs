use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::DeployError;

/// Immutable snapshot of a site's upload counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    pub total_files: usize,
    pub processed_files: usize,
    pub uploaded_files: usize,
    pub skipped_files: usize,
    pub failed_files: usize,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
}

impl UploadStats {
    /// `100 * processed / total`, or 0 when there is nothing to do
    pub fn percentage_complete(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            100.0 * self.processed_files as f64 / self.total_files as f64
        }
    }
}

/// Thread-safe per-site counters, shared between concurrent file uploads
#[derive(Debug, Default)]
pub struct UploadProgress {
    total_files: AtomicUsize,
    uploaded: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    total_bytes: AtomicU64,
    uploaded_bytes: AtomicU64,
}

impl UploadProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_total_files(&self, count: usize) {
        self.total_files.store(count, Ordering::SeqCst);
    }

    pub fn set_total_bytes(&self, bytes: u64) {
        self.total_bytes.store(bytes, Ordering::SeqCst);
    }

    pub fn add_uploaded_file(&self, size: u64) {
        self.uploaded_bytes.fetch_add(size, Ordering::SeqCst);
        self.uploaded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn add_skipped_file(&self, _size: u64) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn add_failed_file(&self, _size: u64) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn stats(&self) -> UploadStats {
        let uploaded_files = self.uploaded.load(Ordering::SeqCst);
        let skipped_files = self.skipped.load(Ordering::SeqCst);
        let failed_files = self.failed.load(Ordering::SeqCst);

        UploadStats {
            total_files: self.total_files.load(Ordering::SeqCst),
            processed_files: uploaded_files + skipped_files + failed_files,
            uploaded_files,
            skipped_files,
            failed_files,
            total_bytes: self.total_bytes.load(Ordering::SeqCst),
            uploaded_bytes: self.uploaded_bytes.load(Ordering::SeqCst),
        }
    }
}

/// Terminal outcome of one site
#[derive(Debug, Clone)]
pub enum SiteOutcome {
    Success(UploadStats),
    Failure(Arc<DeployError>),
}

/// Result of deploying one site, created once the site is finished
#[derive(Debug, Clone)]
pub struct SiteUploadResult {
    pub site_name: String,
    pub outcome: SiteOutcome,
    pub duration: Duration,
}

impl SiteUploadResult {
    pub fn success(site_name: impl Into<String>, stats: UploadStats, duration: Duration) -> Self {
        Self {
            site_name: site_name.into(),
            outcome: SiteOutcome::Success(stats),
            duration,
        }
    }

    pub fn failure(site_name: impl Into<String>, error: DeployError, duration: Duration) -> Self {
        Self {
            site_name: site_name.into(),
            outcome: SiteOutcome::Failure(Arc::new(error)),
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SiteOutcome::Success(_))
    }

    pub fn stats(&self) -> Option<&UploadStats> {
        match &self.outcome {
            SiteOutcome::Success(stats) => Some(stats),
            SiteOutcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&DeployError> {
        match &self.outcome {
            SiteOutcome::Success(_) => None,
            SiteOutcome::Failure(e) => Some(e),
        }
    }
}

/// Aggregate progress across all sites of one orchestrator run
#[derive(Debug, Clone, Default)]
pub struct ParallelUploadProgress {
    pub total_sites: usize,
    pub site_outcomes: BTreeMap<String, SiteOutcome>,
    pub completed_sites: usize,
    pub failed_sites: usize,
}

impl ParallelUploadProgress {
    pub fn new(total_sites: usize) -> Self {
        Self {
            total_sites,
            ..Default::default()
        }
    }

    pub fn record(&mut self, result: &SiteUploadResult) {
        match &result.outcome {
            SiteOutcome::Success(_) => self.completed_sites += 1,
            SiteOutcome::Failure(_) => self.failed_sites += 1,
        }
        self.site_outcomes
            .insert(result.site_name.clone(), result.outcome.clone());
    }

    /// `100 * (completed + failed) / total`; an empty run is complete
    pub fn progress_percentage(&self) -> f64 {
        if self.total_sites == 0 {
            100.0
        } else {
            100.0 * (self.completed_sites + self.failed_sites) as f64 / self.total_sites as f64
        }
    }

    /// `completed / total`; 0 for an empty run
    pub fn success_rate(&self) -> f64 {
        if self.total_sites == 0 {
            0.0
        } else {
            self.completed_sites as f64 / self.total_sites as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_sites + self.failed_sites >= self.total_sites
    }
}

/// Format file size for display
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
