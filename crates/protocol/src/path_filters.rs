//! Lexical path helpers shared by key discovery, rendering and the path gates.
//!
//! Nothing here touches the filesystem; callers that need existence checks do them
//! separately so these stay deterministic.

const TOOLCHAIN_MARKERS: &[&str] = &["/.cargo/", "/.rustup/"];

/// Trim and convert Windows separators to `/`.
#[must_use]
pub fn normalize_slashes(raw: &str) -> String {
    raw.trim().replace('\\', "/")
}

/// Segment-aware prefix test: `src` matches `src/lib.rs` but not `src2/lib.rs`.
#[must_use]
pub fn path_prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() {
        return false;
    }
    if path == prefix {
        return true;
    }
    if !path.starts_with(prefix) {
        return false;
    }
    path.as_bytes().get(prefix.len()) == Some(&b'/')
}

/// Whether an absolute `path` lies lexically under `root`.
#[must_use]
pub fn is_within_root(path: &str, root: &str) -> bool {
    let path = normalize_slashes(path);
    let root = normalize_slashes(root);
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return path.starts_with('/');
    }
    path_prefix_matches(root, &path)
}

/// Paths that belong to a local toolchain install rather than the corpus.
#[must_use]
pub fn is_toolchain_path(path: &str) -> bool {
    let path = normalize_slashes(path);
    TOOLCHAIN_MARKERS.iter().any(|m| path.contains(m))
}
