//! Low-confidence path filtering and the corpus path universe.

use grounding_protocol::path_filters::{is_toolchain_path, is_within_root, normalize_slashes};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

static NUMERIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)?$").expect("static numeric regex"));

const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules"];
const INDEX_SUFFIXES: &[&str] = &[".parquet", ".faiss"];

/// Tokens that can never be a corpus path: empty, numeric, `.`/`..`, or containing
/// whitespace.
#[must_use]
pub fn is_low_confidence_path(path: &str) -> bool {
    let s = normalize_slashes(path);
    s.is_empty()
        || NUMERIC_RE.is_match(&s)
        || s == "."
        || s == ".."
        || s.chars().any(char::is_whitespace)
}

/// Known corpus paths, optionally backed by a repository root for existence checks.
#[derive(Debug, Clone, Default)]
pub struct PathUniverse {
    paths: BTreeSet<String>,
    root: Option<PathBuf>,
}

impl PathUniverse {
    /// Universe from an explicit path list.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|p| normalize_slashes(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
            root: None,
        }
    }

    /// Universe of every file under `root`, relative to it.
    ///
    /// VCS and build output directories are skipped. Unreadable entries are logged
    /// and skipped.
    pub fn walk(root: &Path) -> Self {
        let mut paths = BTreeSet::new();
        let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|entry| {
            entry.depth() == 0
                || !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name))
        });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("Skipping unreadable path under {}: {err}", root.display());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(root) {
                paths.insert(normalize_slashes(&rel.to_string_lossy()));
            }
        }
        log::debug!("Path universe: {} files under {}", paths.len(), root.display());
        Self {
            paths,
            root: Some(root.to_path_buf()),
        }
    }

    /// Attach a repository root used for existence checks.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn exists_under_root(&self, path: &str) -> bool {
        self.root
            .as_ref()
            .is_some_and(|root| root.join(path).exists())
    }

    /// Strict corpus filter: true when `path` should not count as a corpus path.
    #[must_use]
    pub fn is_low_confidence(&self, path: &str) -> bool {
        let norm = normalize_slashes(path);
        if is_low_confidence_path(&norm) {
            return true;
        }
        let lower = norm.to_ascii_lowercase();
        if INDEX_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
            return true;
        }
        if norm.starts_with('/') {
            match &self.root {
                Some(root) => {
                    if !is_within_root(&norm, &root.to_string_lossy()) {
                        return true;
                    }
                }
                None => return true,
            }
        }
        if is_toolchain_path(&norm) {
            return true;
        }
        if !norm.contains('/') && !self.contains(&norm) && !self.exists_under_root(&norm) {
            return true;
        }
        if norm.starts_with("src/") && !self.contains(&norm) && !self.exists_under_root(&norm) {
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn basic_filter_rejects_noise() {
        for noise in ["", "42", "3.14", ".", "..", "a b.rs"] {
            assert!(is_low_confidence_path(noise), "{noise:?}");
        }
        assert!(!is_low_confidence_path("Q1_unsafe.json"));
        assert!(!is_low_confidence_path("src/lib.rs"));
    }

    #[test]
    fn strict_filter_uses_universe_and_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        let universe = PathUniverse::walk(dir.path());

        assert!(universe.contains("src/lib.rs"));
        assert!(!universe.is_low_confidence("src/lib.rs"));
        assert!(!universe.is_low_confidence("Cargo.toml"));
        assert!(universe.is_low_confidence("foo.json"));
        assert!(universe.is_low_confidence("src/missing.rs"));
        assert!(universe.is_low_confidence("RSQT.parquet"));
        assert!(universe.is_low_confidence("/etc/passwd"));
        assert!(universe.is_low_confidence("/home/u/.cargo/registry/src/x/lib.rs"));
        assert!(!universe.is_low_confidence("crates/other/src/lib.rs"));
    }

    #[test]
    fn universe_without_root_rejects_absolute_paths() {
        let universe = PathUniverse::from_paths(["src/lib.rs", "README.md"]);
        assert!(!universe.is_low_confidence("README.md"));
        assert!(universe.is_low_confidence("/abs/src/lib.rs"));
    }

    #[test]
    fn walk_skips_build_output() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        std::fs::write(dir.path().join("target/debug/out.rs"), "").unwrap();
        std::fs::write(dir.path().join("main.rs"), "").unwrap();
        let universe = PathUniverse::walk(dir.path());
        assert_eq!(universe.len(), 1);
        assert!(universe.contains("main.rs"));
    }
}
