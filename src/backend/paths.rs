//! Shared path resolution and safety for filesystem backends.
//!
//! Every path presented to a backend is absolute. Normalization collapses
//! `.` segments and repeated separators and preserves case; `..` is never
//! resolved: climbing above the root is reported as escaping it, any other
//! traversal is rejected as such.

use std::path::{Path, PathBuf};

use crate::error::PathError;

/// Normalize an absolute path: collapse `.` segments and repeated `/`,
/// strip any trailing separator (except for the root itself).
pub fn normalize(path: &str) -> Result<String, PathError> {
    let trimmed = path.trim();
    if !trimmed.starts_with('/') {
        return Err(PathError::NotAbsolute(trimmed.to_string()));
    }
    let mut segments: Vec<&str> = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                // climbing above the root escapes it; any other traversal
                // is rejected as such
                if segments.is_empty() {
                    return Err(PathError::PathOutsideRoot(trimmed.to_string()));
                }
                return Err(PathError::Traversal(trimmed.to_string()));
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(format!("/{}", segments.join("/")))
    }
}

/// Join a normalized absolute path onto an OS root directory, rejecting
/// escapes. The leading `/` of `path` is interpreted as `root`.
pub fn safe_join(root: &Path, path: &str) -> Result<PathBuf, PathError> {
    let normalized = normalize(path)?;
    let relative = normalized.trim_start_matches('/');
    if relative.is_empty() {
        return Ok(root.to_path_buf());
    }
    Ok(root.join(relative))
}

/// Resolve symlinks under `root` and require the realpath to stay beneath it.
/// Non-existent paths are checked lexically (they cannot escape because `..`
/// was already rejected), so writes to new files pass.
pub fn confine_to_root(root: &Path, full: &Path) -> Result<PathBuf, PathError> {
    let canonical_root = root
        .canonicalize()
        .unwrap_or_else(|_| root.to_path_buf());
    if full.exists() {
        let canonical = full
            .canonicalize()
            .map_err(|_| PathError::NotFound(full.display().to_string()))?;
        if !canonical.starts_with(&canonical_root) {
            return Err(PathError::PathOutsideRoot(canonical.display().to_string()));
        }
        Ok(canonical)
    } else {
        if !full.starts_with(root) && !full.starts_with(&canonical_root) {
            return Err(PathError::PathOutsideRoot(full.display().to_string()));
        }
        Ok(full.to_path_buf())
    }
}

/// Doublestar match: `**` spans zero or more segments, `*` matches within a
/// segment, `?` matches one character.
pub fn doublestar_match(pattern: &str, path: &str) -> bool {
    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    match glob::Pattern::new(pattern) {
        Ok(p) => {
            if p.matches_with(path, options) {
                return true;
            }
            // "/**/x" must also match "/x" (zero segments); glob::Pattern
            // requires at least the separator, so retry with "**/" elided.
            if pattern.contains("**/") {
                let collapsed = pattern.replace("**/", "");
                glob::Pattern::new(&collapsed)
                    .map(|p| p.matches_with(path, options))
                    .unwrap_or(false)
            } else {
                false
            }
        }
        Err(_) => false,
    }
}

/// Resolve a glob pattern against its root: patterns without a leading `/`
/// are interpreted relative to `root`.
pub fn anchored_pattern(pattern: &str, root: &str) -> Result<String, PathError> {
    if pattern.starts_with('/') {
        Ok(pattern.to_string())
    } else {
        let root = normalize(root)?;
        if root == "/" {
            Ok(format!("/{}", pattern))
        } else {
            Ok(format!("{}/{}", root, pattern))
        }
    }
}

/// True when `path` equals `prefix` or lies beneath it. Both must be
/// normalized absolute paths.
pub fn is_under(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    path == prefix || path.starts_with(&format!("{}/", prefix))
}
