//! Helpers for sanitizing data before it enters tracing span attributes and
//! for turning provider-supplied titles into file names.

use std::path::Path;

const MAX_TITLE_CHARS: usize = 100;

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: reveals the file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Strips the query string from a URL. Signed download URLs carry their
/// credentials there.
pub fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?****", base),
        None => url.to_string(),
    }
}

/// Keeps alphanumerics, space, `-` and `_`, trimmed and capped at 100
/// characters. Returns `None` when nothing usable is left.
pub fn safe_title(title: &str) -> Option<String> {
    let kept: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let trimmed: String = kept.trim().chars().take(MAX_TITLE_CHARS).collect();
    let trimmed = trimmed.trim_end();

    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// `NNN - <safe title>` for the 1-based chapter `index`.
pub fn chapter_file_stem(index: usize, title: &str) -> String {
    let title = safe_title(title).unwrap_or_else(|| format!("Chapter {}", index));
    format!("{:03} - {}", index, title)
}
