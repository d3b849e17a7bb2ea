use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{DeployError, Result};

/// A regular file found under a site root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversedFile {
    pub path: PathBuf,
    /// Path relative to the root, always `/`-separated
    pub relative_path: String,
    pub size: u64,
}

/// Walks a site directory and filters out excluded paths.
///
/// Exclude patterns are globs matched against the whole relative path:
/// `*` matches within one path segment, `**` matches across segments and
/// `?` matches a single non-separator character. Symlinks are neither
/// followed nor yielded.
#[derive(Debug, Clone, Default)]
pub struct FileTraverser {
    patterns: Vec<(String, Regex)>,
}

/// Translate a glob into an anchored regular expression
///
/// Besides `*`, `**` and `?`, bracket classes such as `[abc]`, `[a-z]` and
/// `[!x]` are supported; an unterminated class is an error.
pub fn glob_to_regex(pattern: &str) -> Result<String> {
    let mut regex = String::with_capacity(pattern.len() * 2 + 2);
    regex.push('^');

    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    // `**/` also matches zero directories
                    regex.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    regex.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                regex.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex.push_str("[^/]");
                i += 1;
            }
            '[' => {
                let negated = chars.get(i + 1) == Some(&'!');
                let start = if negated { i + 2 } else { i + 1 };
                // a `]` right after the opening bracket is a member, not the end
                let end = chars
                    .iter()
                    .enumerate()
                    .skip(start + 1)
                    .find(|(_, c)| **c == ']')
                    .map(|(j, _)| j)
                    .ok_or_else(|| DeployError::InvalidPattern {
                        pattern: pattern.to_string(),
                        message: "unterminated character class".to_string(),
                    })?;

                regex.push_str(if negated { "[^/" } else { "[" });
                for &c in &chars[start..end] {
                    if c == '-' {
                        regex.push('-');
                    } else {
                        regex.push_str(&regex::escape(&c.to_string()));
                    }
                }
                regex.push(']');
                i = end + 1;
            }
            c => {
                regex.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }

    regex.push('$');
    Ok(regex)
}

impl FileTraverser {
    /// Compile the exclude patterns once for this traverser
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .map(|pattern| {
                let source = glob_to_regex(pattern)?;
                Regex::new(&source)
                    .map(|regex| (pattern.to_string(), regex))
                    .map_err(|e| DeployError::InvalidPattern {
                        pattern: pattern.to_string(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|(p, _)| p.as_str())
    }

    /// Whether a `/`-separated relative path matches any exclude pattern
    pub fn should_exclude(&self, relative_path: &str) -> bool {
        self.patterns
            .iter()
            .any(|(_, regex)| regex.is_match(relative_path))
    }

    /// Enumerate all non-excluded regular files under `root`, sorted by path
    pub fn traverse(&self, root: &Path) -> Result<Vec<TraversedFile>> {
        if !root.exists() {
            return Err(DeployError::DirectoryNotFound {
                path: root.display().to_string(),
            });
        }
        if !root.is_dir() {
            return Err(DeployError::EnumeratorCreation {
                path: root.display().to_string(),
                message: "not a directory".to_string(),
            });
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(DeployError::EnumeratorCreation {
                        path: root.display().to_string(),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let relative_path = match entry.path().strip_prefix(root) {
                Ok(rel) => rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
                Err(_) => continue,
            };

            if self.should_exclude(&relative_path) {
                debug!("Excluded {}", relative_path);
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).map_err(|e| {
                DeployError::EnumeratorCreation {
                    path: entry.path().display().to_string(),
                    message: e.to_string(),
                }
            })?;

            files.push(TraversedFile {
                path: entry.into_path(),
                relative_path,
                size,
            });
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(files)
    }
}
