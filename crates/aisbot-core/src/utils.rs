//! Small shared helpers: paths, filenames, string truncation.

use std::path::PathBuf;

/// The aisbot data directory (`~/.aisbot/`).
pub fn get_data_path() -> PathBuf {
    home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".aisbot")
}

/// Default workspace path (`~/.aisbot/workspace/`).
pub fn get_default_workspace_path() -> PathBuf {
    get_data_path().join("workspace")
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else if let Some(rest) = path.strip_prefix("~/") {
        home_dir().unwrap_or_else(|| PathBuf::from(".")).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// Sanitize a string for use as a filename; anything outside
/// `[A-Za-z0-9._-]` becomes `_`.
pub fn safe_filename(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Truncate to `max_len` characters, appending `...` when shortened.
/// Unicode-safe.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .or_else(|| std::env::var("USERPROFILE").ok())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_path_under_home() {
        assert!(get_data_path().ends_with(".aisbot"));
        assert!(get_default_workspace_path().ends_with("workspace"));
    }

    #[test]
    fn expand_home_handles_tilde() {
        let expanded = expand_home("~/notes");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.ends_with("notes"));
        assert_eq!(expand_home("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn safe_filename_replaces_separators() {
        assert_eq!(safe_filename("telegram:42"), "telegram_42");
        assert_eq!(safe_filename("a/b c!d"), "a_b_c_d");
        assert_eq!(safe_filename("keep-this_v2.jsonl"), "keep-this_v2.jsonl");
    }

    #[test]
    fn truncate_is_unicode_safe() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("hello world", 8), "hello...");
        assert_eq!(truncate_string("こんにちは世界", 5), "こん...");
    }
}
