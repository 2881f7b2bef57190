//! Filter & Classifier: pure decisions over a path and a byte buffer.
//!
//! Three entry points, all side-effect free: `group_of`, `should_track`,
//! `looks_binary`. Glob matching uses `globset`'s double-star semantics
//! plus a suffix-matching fallback for a platform quirk: some glob
//! libraries only match a directory-relative fragment against a
//! suffix of the path, not the full absolute form.

use std::path::{Component, Path};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::{Config, WatchGroup};

const BINARY_SNIFF_WINDOW: usize = 8192;

pub struct Filter {
    config: Config,
    compiled: Vec<GlobSet>,
}

impl Filter {
    pub fn new(config: Config) -> Self {
        let compiled = config
            .groups
            .iter()
            .map(|g| compile_patterns(&g.exclude_patterns))
            .collect();
        Self { config, compiled }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The group whose root is the longest proper prefix of `path` (the
    /// root itself also matches). `None` if no root covers the path.
    pub fn group_of(&self, path: &Path) -> Option<&WatchGroup> {
        let mut best: Option<(&WatchGroup, usize)> = None;
        for group in &self.config.groups {
            for root in &group.dirs {
                if path.starts_with(root) {
                    let len = root.as_os_str().len();
                    if best.map(|(_, best_len)| len > best_len).unwrap_or(true) {
                        best = Some((group, len));
                    }
                }
            }
        }
        best.map(|(g, _)| g)
    }

    fn group_index_of(&self, group: &WatchGroup) -> Option<usize> {
        self.config.groups.iter().position(|g| g.name == group.name)
    }

    /// `true` iff `path` belongs to a group, its suffix passes that
    /// group's allow-list (if any), and no exclusion pattern matches.
    pub fn should_track(&self, path: &Path) -> bool {
        let Some(group) = self.group_of(path) else {
            return false;
        };

        if let Some(allow) = &group.extensions {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("");
            if !allow.contains(ext) {
                return false;
            }
        }

        !self.is_excluded_by_group(group, path)
    }

    /// Whether `path` is excluded under `group`'s patterns, trying both
    /// the path as given and every OS-separator suffix of it: some glob
    /// matches only succeed against a path fragment, not the full
    /// absolute path.
    pub fn is_excluded_by_group(&self, group: &WatchGroup, path: &Path) -> bool {
        let Some(idx) = self.group_index_of(group) else {
            return true;
        };
        let set = &self.compiled[idx];

        if set.is_match(path) {
            return true;
        }
        for suffix in path_suffixes(path) {
            if set.is_match(&suffix) {
                return true;
            }
        }
        false
    }

    /// Whether `dir` should be excluded from recursive subscription / the
    /// new-directory scanner. A directory outside every group is treated
    /// as excluded.
    pub fn is_excluded_dir(&self, dir: &Path) -> bool {
        match self.group_of(dir) {
            None => true,
            Some(group) => self.is_excluded_by_group(group, dir),
        }
    }
}

fn compile_patterns(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

/// Every suffix of `path` split on the OS separator, longest first,
/// excluding the full path itself (already tried by the caller).
fn path_suffixes(path: &Path) -> Vec<std::path::PathBuf> {
    let components: Vec<Component> = path.components().collect();
    let mut out = Vec::with_capacity(components.len().saturating_sub(1));
    for start in 1..components.len() {
        let suffix: std::path::PathBuf = components[start..].iter().collect();
        out.push(suffix);
    }
    out
}

/// `true` iff a NUL byte appears in the first 8 KiB. Empty input is not
/// binary.
pub fn looks_binary(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(BINARY_SNIFF_WINDOW)];
    window.contains(&0u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RawConfig, RawWatchGroup};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn cfg_with_groups(groups: Vec<RawWatchGroup>) -> Config {
        Config::from_raw(RawConfig {
            db_path: PathBuf::from("/tmp/db"),
            watch_groups: groups,
        })
        .unwrap()
    }

    #[test]
    fn looks_binary_detects_nul() {
        assert!(!looks_binary(b""));
        assert!(!looks_binary(b"hello world"));
        assert!(looks_binary(b"hello\0world"));
    }

    #[test]
    fn looks_binary_boundary_at_8191_and_8192() {
        let mut at_8191 = vec![b'a'; 8192];
        at_8191[8191] = 0;
        assert!(looks_binary(&at_8191));

        let mut at_8192 = vec![b'a'; 8193];
        at_8192[8192] = 0;
        assert!(!looks_binary(&at_8192));
    }

    #[test]
    fn group_of_picks_longest_prefix() {
        let parent = TempDir::new().unwrap();
        let child = parent.path().join("sub");
        std::fs::create_dir(&child).unwrap();

        let cfg = cfg_with_groups(vec![
            RawWatchGroup {
                name: "parent".into(),
                dirs: vec![parent.path().to_path_buf()],
                extensions: None,
                exclude_patterns: None,
                debounce_sec: None,
                max_file_size: None,
                max_snapshots: None,
            },
            RawWatchGroup {
                name: "child".into(),
                dirs: vec![child.clone()],
                extensions: None,
                exclude_patterns: None,
                debounce_sec: None,
                max_file_size: None,
                max_snapshots: None,
            },
        ]);
        let filter = Filter::new(cfg);

        let g = filter.group_of(&child.join("c.txt")).unwrap();
        assert_eq!(g.name, "child");
        let g2 = filter.group_of(&parent.path().join("p.txt")).unwrap();
        assert_eq!(g2.name, "parent");
    }

    #[test]
    fn should_track_respects_extension_allowlist() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg_with_groups(vec![RawWatchGroup {
            name: "g".into(),
            dirs: vec![dir.path().to_path_buf()],
            extensions: Some(vec!["rs".into()]),
            exclude_patterns: None,
            debounce_sec: None,
            max_file_size: None,
            max_snapshots: None,
        }]);
        let filter = Filter::new(cfg);
        assert!(filter.should_track(&dir.path().join("a.rs")));
        assert!(!filter.should_track(&dir.path().join("a.txt")));
    }

    #[test]
    fn should_track_respects_exclude_patterns() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg_with_groups(vec![RawWatchGroup {
            name: "g".into(),
            dirs: vec![dir.path().to_path_buf()],
            extensions: None,
            exclude_patterns: Some(vec!["**/node_modules/**".into()]),
            debounce_sec: None,
            max_file_size: None,
            max_snapshots: None,
        }]);
        let filter = Filter::new(cfg);
        assert!(!filter.should_track(&dir.path().join("node_modules/pkg/index.js")));
        assert!(filter.should_track(&dir.path().join("src/main.rs")));
    }

    #[test]
    fn should_track_false_outside_any_group() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg_with_groups(vec![]);
        let filter = Filter::new(cfg);
        assert!(!filter.should_track(&dir.path().join("x.rs")));
    }
}
