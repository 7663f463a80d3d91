//! Filename sanitisation for user supplied labels.

use time::OffsetDateTime;

/// Maximum number of characters kept from a label.
pub const MAX_LABEL_CHARS: usize = 100;

/// Turn a user supplied label into a path component.
///
/// Blank labels map to the current Unix time in seconds. Everything outside
/// ASCII letters, digits, `_`, `-` and `.` becomes `_`, and the result is cut
/// to [`MAX_LABEL_CHARS`]. Since only ASCII survives, the character bound is
/// also a byte bound.
pub fn sanitize(label: &str) -> String {
    if label.trim().is_empty() {
        return OffsetDateTime::now_utc().unix_timestamp().to_string();
    }

    label
        .chars()
        .map(|ch| if is_safe_char(ch) { ch } else { '_' })
        .take(MAX_LABEL_CHARS)
        .collect()
}

/// True when `ch` may appear unchanged in a sanitised label.
pub fn is_safe_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.')
}

/// True when `name` could have been produced by [`sanitize`] and is safe to
/// join onto the store root.
pub fn is_safe_component(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && name.chars().all(is_safe_char)
}
