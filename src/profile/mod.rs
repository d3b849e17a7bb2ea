//! Credential profile resolution.
//!
//! [`resolve`] decides which named AWS profile (if any) a deployment uses,
//! and [`ProfileCache`] memoizes that decision until its TTL runs out or the
//! credentials/config files change on disk.

pub mod cache;
pub mod resolver;

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

pub use cache::{DEFAULT_PROFILE_TTL, ProfileCache};
pub use resolver::resolve;

/// Environment variables as seen by one resolution
pub type Environment = HashMap<String, String>;

/// Where a resolved profile came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileSource {
    Explicit,
    Environment,
    DefaultChain,
}

impl fmt::Display for ProfileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::Environment => write!(f, "environment"),
            Self::DefaultChain => write!(f, "default-chain"),
        }
    }
}

/// Outcome of profile resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileResolution {
    /// `None` means: let the SDK's default credential chain decide
    pub profile: Option<String>,
    pub source: ProfileSource,
    pub region: Option<String>,
}

impl ProfileResolution {
    pub fn uses_default_chain(&self) -> bool {
        self.source == ProfileSource::DefaultChain
    }
}

/// Location of the shared credentials and config files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileFiles {
    pub credentials: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

impl ProfileFiles {
    /// Honor `AWS_SHARED_CREDENTIALS_FILE` / `AWS_CONFIG_FILE`, falling back
    /// to `~/.aws/credentials` and `~/.aws/config`
    pub fn from_environment(environment: &Environment) -> Self {
        let aws_dir = dirs::home_dir().map(|home| home.join(".aws"));
        let pick = |var: &str, default_name: &str| {
            environment
                .get(var)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .or_else(|| aws_dir.as_ref().map(|dir| dir.join(default_name)))
        };

        Self {
            credentials: pick("AWS_SHARED_CREDENTIALS_FILE", "credentials"),
            config: pick("AWS_CONFIG_FILE", "config"),
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.credentials
            .iter()
            .chain(self.config.iter())
            .map(PathBuf::as_path)
    }
}

/// Parsed AWS-style ini files: profile name -> settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileConfigFile {
    profiles: BTreeMap<String, BTreeMap<String, String>>,
}

impl ProfileConfigFile {
    /// Parse a config file, where sections are `[default]` or `[profile name]`
    pub fn parse(config: &str) -> Self {
        let mut file = Self::default();
        file.merge(config, true);
        file
    }

    /// Merge a credentials file, where sections are bare profile names
    pub fn merge_credentials(&mut self, credentials: &str) {
        self.merge(credentials, false);
    }

    /// Read both files; missing or unreadable files are treated as empty
    pub fn load(files: &ProfileFiles) -> Self {
        let mut file = Self::default();
        if let Some(text) = files.config.as_deref().and_then(read_optional) {
            file.merge(&text, true);
        }
        if let Some(text) = files.credentials.as_deref().and_then(read_optional) {
            file.merge(&text, false);
        }
        file
    }

    fn merge(&mut self, text: &str, is_config: bool) {
        let mut current: Option<String> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let section = section.trim();
                let name = if is_config {
                    match section.strip_prefix("profile ") {
                        Some(name) => name.trim(),
                        None if section == "default" => section,
                        // sso-session and services sections are not profiles
                        None => {
                            current = None;
                            continue;
                        }
                    }
                } else {
                    section
                };
                self.profiles.entry(name.to_string()).or_default();
                current = Some(name.to_string());
                continue;
            }

            if let (Some(profile), Some((key, value))) = (&current, line.split_once('=')) {
                self.profiles
                    .entry(profile.clone())
                    .or_default()
                    .insert(key.trim().to_lowercase(), value.trim().to_string());
            }
        }
    }

    pub fn contains(&self, profile: &str) -> bool {
        self.profiles.contains_key(profile)
    }

    pub fn region(&self, profile: &str) -> Option<&str> {
        self.profiles
            .get(profile)
            .and_then(|settings| settings.get("region"))
            .map(String::as_str)
            .filter(|r| !r.is_empty())
    }

    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}

fn read_optional(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) => {
            debug!("Not reading {}: {}", path.display(), e);
            None
        }
    }
}
