//! UTF-8 safe truncation.

/// At most `max_bytes` of `s`, cut back to a char boundary.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    s[..cutoff].to_string()
}

/// Like [`truncate_utf8`], with a trailing note when anything was cut.
pub fn truncate_with_note(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut out = truncate_utf8(s, max_bytes);
    out.push_str("\n... (truncated)");
    out
}
