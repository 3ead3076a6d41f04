//! File-name sanitizing for track titles.

use once_cell::sync::Lazy;
use regex::Regex;

/// Characters that are unsafe in a file name on at least one supported platform.
static FORBIDDEN_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[/\\:*?".<>|]"#).unwrap());

/// Map an arbitrary title to a file-system-safe name.
///
/// Every forbidden character becomes a single space, the result is trimmed and
/// one trailing `.` is dropped.
pub fn sanitize(name: &str) -> String {
    let replaced = FORBIDDEN_CHARS.replace_all(name, " ");
    let trimmed = replaced.trim();
    trimmed.strip_suffix('.').unwrap_or(trimmed).to_string()
}
