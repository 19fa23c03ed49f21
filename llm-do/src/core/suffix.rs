//! Suffix allow/deny list checks.
//!
//! Suffixes are compared case-insensitively and include the leading dot
//! (`.png`). A file without an extension has the empty suffix.

use std::path::Path;

/// Lowercased suffix of `path`, including the dot, or `""`.
pub fn suffix_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Lowercase every entry of a configured suffix list.
pub fn normalize_suffixes(suffixes: &[String]) -> Vec<String> {
    suffixes.iter().map(|s| s.trim().to_lowercase()).collect()
}

/// An empty allow-list allows everything.
pub fn allowed_by(allow_list: &[String], suffix: &str) -> bool {
    allow_list.is_empty() || allow_list.iter().any(|s| s.eq_ignore_ascii_case(suffix))
}

pub fn denied_by(deny_list: &[String], suffix: &str) -> bool {
    deny_list.iter().any(|s| s.eq_ignore_ascii_case(suffix))
}
