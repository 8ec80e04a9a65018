//! Portable filename sanitization for titles coming from video sources.

/// Longest file stem we produce, in bytes. Leaves room for a ` (NNNN)`
/// suffix and an extension under the usual 255-byte name limit.
pub const MAX_STEM_BYTES: usize = 200;

/// Stem used when a title sanitizes to nothing.
pub const FALLBACK_STEM: &str = "untitled";

/// Turns an arbitrary title into a file stem that is valid on common
/// filesystems.
///
/// - Replaces `< > : " / \ | ? *` and control characters with `_`
/// - Trims leading/trailing whitespace and dots
/// - Truncates to [`MAX_STEM_BYTES`] on a char boundary
/// - Falls back to [`FALLBACK_STEM`] when nothing is left
pub fn sanitize_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c: char| c.is_whitespace() || c == '.');

    let mut take = trimmed.len().min(MAX_STEM_BYTES);
    while !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    let stem = trimmed[..take].trim_end();

    if stem.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        stem.to_string()
    }
}
