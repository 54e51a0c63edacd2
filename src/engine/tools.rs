//! Path and filter utilities

use std::path::{Path, PathBuf};

/// Convert absolute path to relative path from base
pub fn path_relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Relative path as a portable resource id (`/` separators on every platform).
pub fn path_to_id_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Check if a file should be excluded based on OS-specific hidden files
pub fn is_os_hidden_file(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        match name {
            // macOS
            ".DS_Store" | ".AppleDouble" | ".LSOverride" => true,
            // Windows
            "Thumbs.db" | "ehthumbs.db" | "Desktop.ini" | "$RECYCLE.BIN" => true,
            // Linux
            ".directory" => true,
            // macOS resource forks, Linux trash dirs
            _ => name.starts_with("._") || name.starts_with(".Trash-"),
        }
    } else {
        false
    }
}

/// Returns true if the walk should hand `path` to the crawler.
/// Skips the root itself, anything under `exclude_dir` (extraction output), and OS clutter.
pub fn should_include_in_walk(path: &Path, root: &Path, exclude_dir: &Option<PathBuf>) -> bool {
    if path == root {
        return false;
    }
    if let Some(dir) = exclude_dir
        && path.starts_with(dir)
    {
        return false;
    }
    !is_os_hidden_file(path)
}

/// Simple glob pattern matching (supports * and ?)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_chars(&pattern, &text)
}

fn glob_match_chars(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => {
            if rest.is_empty() {
                return true; // trailing * matches everything
            }
            (0..=text.len()).any(|skip| glob_match_chars(rest, &text[skip..]))
        }
        Some(('?', rest)) => !text.is_empty() && glob_match_chars(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && glob_match_chars(rest, &text[1..]),
    }
}

/// Expand `{input}` / `{output}` placeholders in one argv element.
pub fn expand_placeholders(arg: &str, input: &Path, output: &Path) -> String {
    arg.replace("{input}", &input.to_string_lossy())
        .replace("{output}", &output.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_both_placeholders() {
        let s = expand_placeholders(
            "--in={input} --out={output}",
            Path::new("/a/b.pdf"),
            Path::new("/o/b.pdf.txt"),
        );
        assert_eq!(s, "--in=/a/b.pdf --out=/o/b.pdf.txt");
    }

    #[test]
    fn star_matches_empty_run() {
        assert!(glob_match("a*b", "ab"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("?", ""));
    }
}
