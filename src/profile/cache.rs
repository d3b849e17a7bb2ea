use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};
use tracing::debug;

use super::{Environment, ProfileConfigFile, ProfileFiles, ProfileResolution, resolve};

/// How long a resolution is trusted before it is recomputed
pub const DEFAULT_PROFILE_TTL: Duration = Duration::from_secs(300);

type MtimeProbe = Box<dyn Fn(&Path) -> Option<SystemTime> + Send + Sync>;

#[derive(Debug, Clone)]
struct CacheEntry {
    resolution: ProfileResolution,
    inserted_at: Instant,
    /// Tracked files and their mtimes at insertion; `None` means absent
    tracked: Vec<(PathBuf, Option<SystemTime>)>,
}

/// TTL-bounded memoization of [`resolve`].
///
/// Entries are keyed by a hash of the explicit profile and the sorted
/// environment snapshot. An entry is served only while it is younger than
/// the TTL and none of the tracked credentials/config files changed mtime.
pub struct ProfileCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
    probe: MtimeProbe,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for ProfileCache {
    fn default() -> Self {
        Self::new(DEFAULT_PROFILE_TTL)
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn hash_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Stable key for one (explicit, environment) pair
///
/// Every field is length-prefixed so distinct inputs never share a preimage.
pub fn cache_key(explicit: Option<&str>, environment: &Environment) -> String {
    let mut vars: Vec<_> = environment.iter().collect();
    vars.sort();

    let mut hasher = blake3::Hasher::new();
    match explicit {
        Some(profile) => {
            hasher.update(&[1]);
            hash_field(&mut hasher, profile.as_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }
    hasher.update(&(vars.len() as u64).to_le_bytes());
    for (key, value) in vars {
        hash_field(&mut hasher, key.as_bytes());
        hash_field(&mut hasher, value.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

impl ProfileCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_mtime_probe(ttl, file_mtime)
    }

    /// Use a custom mtime source instead of the filesystem
    pub fn with_mtime_probe<F>(ttl: Duration, probe: F) -> Self
    where
        F: Fn(&Path) -> Option<SystemTime> + Send + Sync + 'static,
    {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            probe: Box::new(probe),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self, files: &ProfileFiles) -> Vec<(PathBuf, Option<SystemTime>)> {
        files
            .paths()
            .map(|path| (path.to_path_buf(), (self.probe)(path)))
            .collect()
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        entry.inserted_at.elapsed() < self.ttl
            && entry
                .tracked
                .iter()
                .all(|(path, mtime)| (self.probe)(path) == *mtime)
    }

    /// Return the cached resolution, or resolve and cache it
    pub fn get_or_resolve(
        &self,
        explicit: Option<&str>,
        environment: &Environment,
    ) -> ProfileResolution {
        let key = cache_key(explicit, environment);

        if let Some(entry) = self.lock().get(&key) {
            if self.is_fresh(entry) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return entry.resolution.clone();
            }
            debug!("Profile cache entry expired or invalidated");
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let files = ProfileFiles::from_environment(environment);
        let tracked = self.snapshot(&files);
        let config_file = ProfileConfigFile::load(&files);
        let resolution = resolve(explicit, environment, Some(&config_file));

        debug!(
            "Resolved profile {} (source: {}, region: {})",
            resolution.profile.as_deref().unwrap_or("<none>"),
            resolution.source,
            resolution.region.as_deref().unwrap_or("<unset>")
        );

        self.lock().insert(
            key,
            CacheEntry {
                resolution: resolution.clone(),
                inserted_at: Instant::now(),
                tracked,
            },
        );
        resolution
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drop entries past their TTL or with changed files; returns how many
    pub fn cleanup_expired(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| self.is_fresh(entry));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
