use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};

/// One deployable site as described in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteDefinition {
    pub name: String,
    /// Built site output; relative paths resolve against the registry file
    pub directory: PathBuf,
    /// Overrides the configured bucket
    #[serde(default)]
    pub bucket: Option<String>,
    /// Key prefix; defaults to the slugified site name
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Extra exclude patterns for this site only
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl SiteDefinition {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            bucket: None,
            prefix: None,
            region: None,
            exclude: Vec::new(),
        }
    }

    pub fn key_prefix(&self) -> String {
        match &self.prefix {
            Some(prefix) => prefix.trim_matches('/').to_string(),
            None => slug::slugify(&self.name),
        }
    }
}

/// Lookup of known sites by name
pub trait SiteRegistry: Send + Sync {
    fn site(&self, name: &str) -> Option<SiteDefinition>;

    fn site_names(&self) -> Vec<String>;

    fn contains(&self, name: &str) -> bool {
        self.site(name).is_some()
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    sites: Vec<SiteDefinition>,
}

/// Registry loaded from a `sites.yaml` file
///
/// ```yaml
/// sites:
///   - name: docs
///     directory: ./docs/dist
///     prefix: docs
///   - name: blog
///     directory: ./blog/public
///     exclude: ["drafts/**"]
/// ```
#[derive(Debug, Clone, Default)]
pub struct YamlSiteRegistry {
    sites: BTreeMap<String, SiteDefinition>,
}

impl YamlSiteRegistry {
    pub fn new(sites: impl IntoIterator<Item = SiteDefinition>) -> Self {
        Self {
            sites: sites.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    /// Parse registry YAML, resolving relative directories against `base_dir`
    pub fn parse(content: &str, base_dir: &Path) -> Result<Self> {
        let file: RegistryFile = serde_yaml::from_str(content)
            .map_err(|e| DeployError::Registry(format!("Failed to parse site registry: {}", e)))?;

        let mut sites = BTreeMap::new();
        for mut site in file.sites {
            if site.name.trim().is_empty() {
                return Err(DeployError::Registry("Site name cannot be empty".into()));
            }
            if site.directory.is_relative() {
                site.directory = base_dir.join(&site.directory);
            }
            if sites.contains_key(&site.name) {
                return Err(DeployError::Registry(format!(
                    "Site '{}' is defined more than once",
                    site.name
                )));
            }
            sites.insert(site.name.clone(), site);
        }

        Ok(Self { sites })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            DeployError::Registry(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&content, base_dir)
    }
}

impl SiteRegistry for YamlSiteRegistry {
    fn site(&self, name: &str) -> Option<SiteDefinition> {
        self.sites.get(name).cloned()
    }

    fn site_names(&self) -> Vec<String> {
        self.sites.keys().cloned().collect()
    }
}
