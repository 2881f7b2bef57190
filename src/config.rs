//! Configuration consumed by the core: watch groups and the store path.
//!
//! Deserialised from JSON via `serde` into plain structs - no builder
//! macros, explicit validation after deserialisation rather than
//! encoding every rule in the type.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exclusion patterns applied when a group does not specify its own.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "**/node_modules/**",
    "**/.git/**",
    "**/vendor/**",
    "**/dist/**",
    "**/build/**",
    "**/.next/**",
    "**/__pycache__/**",
    "**/target/**",
    "**/*.min.js",
    "**/*.min.css",
    "**/*.lock",
    "**/package-lock.json",
    "**/pnpm-lock.yaml",
];

pub const DEFAULT_DEBOUNCE_SEC: u64 = 2;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1_048_576;
pub const DEFAULT_MAX_SNAPSHOTS: u32 = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWatchGroup {
    pub name: String,
    pub dirs: Vec<PathBuf>,
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_patterns: Option<Vec<String>>,
    #[serde(default)]
    pub debounce_sec: Option<u64>,
    #[serde(default)]
    pub max_file_size: Option<u64>,
    #[serde(default)]
    pub max_snapshots: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfig {
    pub db_path: PathBuf,
    pub watch_groups: Vec<RawWatchGroup>,
}

/// A named bundle of monitoring policy, fully resolved and validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchGroup {
    pub name: String,
    pub dirs: Vec<PathBuf>,
    pub extensions: Option<HashSet<String>>,
    pub exclude_patterns: Vec<String>,
    pub debounce_sec: u64,
    pub max_file_size: u64,
    pub max_snapshots: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub groups: Vec<WatchGroup>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("watch group \"{0}\" has no dirs")]
    EmptyDirs(String),

    #[error("watch group \"{0}\" directory does not exist: {1}")]
    MissingDir(String, PathBuf),

    #[error("duplicate watch group name: {0}")]
    DuplicateGroupName(String),

    #[error("directory {0} is claimed by both \"{1}\" and \"{2}\"")]
    OverlappingDirs(PathBuf, String, String),

    #[error("watch group \"{0}\" has debounce_sec {1}, must be >= 1")]
    DebounceTooSmall(String, u64),
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let mut seen_names = HashSet::new();
        let mut claimed: Vec<(PathBuf, String)> = Vec::new();
        let mut groups = Vec::with_capacity(raw.watch_groups.len());

        for g in raw.watch_groups {
            if !seen_names.insert(g.name.clone()) {
                return Err(ConfigError::DuplicateGroupName(g.name));
            }
            if g.dirs.is_empty() {
                return Err(ConfigError::EmptyDirs(g.name));
            }
            for d in &g.dirs {
                if !d.is_dir() {
                    return Err(ConfigError::MissingDir(g.name.clone(), d.clone()));
                }
                for (existing, owner) in &claimed {
                    if existing == d {
                        return Err(ConfigError::OverlappingDirs(
                            d.clone(),
                            owner.clone(),
                            g.name.clone(),
                        ));
                    }
                }
                claimed.push((d.clone(), g.name.clone()));
            }

            let debounce_sec = g.debounce_sec.unwrap_or(DEFAULT_DEBOUNCE_SEC);
            if debounce_sec < 1 {
                return Err(ConfigError::DebounceTooSmall(g.name, debounce_sec));
            }

            groups.push(WatchGroup {
                name: g.name,
                dirs: g.dirs,
                extensions: g.extensions.map(|v| v.into_iter().collect()),
                exclude_patterns: g
                    .exclude_patterns
                    .unwrap_or_else(|| {
                        DEFAULT_EXCLUDE_PATTERNS
                            .iter()
                            .map(|s| s.to_string())
                            .collect()
                    }),
                debounce_sec,
                max_file_size: g.max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE),
                max_snapshots: g.max_snapshots.unwrap_or(DEFAULT_MAX_SNAPSHOTS),
            });
        }

        Ok(Config {
            db_path: raw.db_path,
            groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn group(name: &str, dirs: Vec<PathBuf>) -> RawWatchGroup {
        RawWatchGroup {
            name: name.to_string(),
            dirs,
            extensions: None,
            exclude_patterns: None,
            debounce_sec: None,
            max_file_size: None,
            max_snapshots: None,
        }
    }

    #[test]
    fn rejects_duplicate_group_names() {
        let t1 = TempDir::new().unwrap();
        let t2 = TempDir::new().unwrap();
        let raw = RawConfig {
            db_path: PathBuf::from("/tmp/db"),
            watch_groups: vec![
                group("a", vec![t1.path().to_path_buf()]),
                group("a", vec![t2.path().to_path_buf()]),
            ],
        };
        assert!(matches!(
            Config::from_raw(raw),
            Err(ConfigError::DuplicateGroupName(_))
        ));
    }

    #[test]
    fn rejects_overlapping_dirs() {
        let t1 = TempDir::new().unwrap();
        let raw = RawConfig {
            db_path: PathBuf::from("/tmp/db"),
            watch_groups: vec![
                group("a", vec![t1.path().to_path_buf()]),
                group("b", vec![t1.path().to_path_buf()]),
            ],
        };
        assert!(matches!(
            Config::from_raw(raw),
            Err(ConfigError::OverlappingDirs(_, _, _))
        ));
    }

    #[test]
    fn rejects_missing_dir() {
        let raw = RawConfig {
            db_path: PathBuf::from("/tmp/db"),
            watch_groups: vec![group("a", vec![PathBuf::from("/does/not/exist/xyz")])],
        };
        assert!(matches!(
            Config::from_raw(raw),
            Err(ConfigError::MissingDir(_, _))
        ));
    }

    #[test]
    fn applies_defaults() {
        let t1 = TempDir::new().unwrap();
        let raw = RawConfig {
            db_path: PathBuf::from("/tmp/db"),
            watch_groups: vec![group("a", vec![t1.path().to_path_buf()])],
        };
        let cfg = Config::from_raw(raw).unwrap();
        assert_eq!(cfg.groups[0].debounce_sec, DEFAULT_DEBOUNCE_SEC);
        assert_eq!(cfg.groups[0].max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert_eq!(cfg.groups[0].max_snapshots, DEFAULT_MAX_SNAPSHOTS);
        assert_eq!(
            cfg.groups[0].exclude_patterns.len(),
            DEFAULT_EXCLUDE_PATTERNS.len()
        );
    }

    #[test]
    fn rejects_debounce_below_one() {
        let t1 = TempDir::new().unwrap();
        let mut g = group("a", vec![t1.path().to_path_buf()]);
        g.debounce_sec = Some(0);
        let raw = RawConfig {
            db_path: PathBuf::from("/tmp/db"),
            watch_groups: vec![g],
        };
        assert!(matches!(
            Config::from_raw(raw),
            Err(ConfigError::DebounceTooSmall(_, 0))
        ));
    }
}
