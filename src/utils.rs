//! Helpers shared by the HTTP, secret-store and config layers
//!
//! The string helpers respect UTF-8 boundaries so that response bodies and
//! secret values can be cut without panicking on multi-byte characters.

use std::io::Write;
use std::path::Path;

/// Safely truncate a string at a UTF-8 character boundary.
///
/// Returns a slice of at most `max_bytes` bytes, ensuring the result
/// is valid UTF-8 by finding the last valid character boundary.
///
/// # Example
/// ```
/// use tenant_auth::utils::safe_truncate;
///
/// // 'é' is 2 bytes - truncating at byte 4 would cut it in half
/// assert_eq!(safe_truncate("Café", 4), "Caf");
/// ```
#[inline]
#[must_use]
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut boundary = max_bytes;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }

    &s[..boundary]
}

/// Truncate a string for display with ellipsis.
///
/// Used when echoing raw server responses back in error messages.
///
/// # Example
/// ```
/// use tenant_auth::utils::truncate_for_display;
///
/// let body = r#"{"error":"access_denied","error_description":"Unauthorized"}"#;
/// assert_eq!(truncate_for_display(body, 10), r#"{"error":"..."#);
/// ```
#[must_use]
pub fn truncate_for_display(s: &str, max_bytes: usize) -> String {
    let truncated = safe_truncate(s, max_bytes);
    if truncated.len() < s.len() {
        format!("{truncated}...")
    } else {
        truncated.to_string()
    }
}

/// Split a string into consecutive pieces of at most `max_bytes` bytes.
///
/// Pieces never split a character, so concatenating them reproduces the
/// input exactly. An empty input yields no pieces. A `max_bytes` smaller
/// than a single character still makes progress by emitting that character
/// on its own.
///
/// # Example
/// ```
/// use tenant_auth::utils::chunk_str;
///
/// assert_eq!(chunk_str("abcdefg", 3), vec!["abc", "def", "g"]);
/// ```
#[must_use]
pub fn chunk_str(s: &str, max_bytes: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = s;

    while !rest.is_empty() {
        let mut piece = safe_truncate(rest, max_bytes.max(1));
        if piece.is_empty() {
            let width = rest.chars().next().map_or(rest.len(), char::len_utf8);
            piece = &rest[..width];
        }
        chunks.push(piece);
        rest = &rest[piece.len()..];
    }

    chunks
}

/// Replace `path` with `contents` atomically, readable by the owner only.
///
/// The data goes to a temporary file in the same directory, which is then
/// renamed over `path`; readers see either the old or the new file. Missing
/// parent directories are created (0700 on Unix).
///
/// # Errors
///
/// Returns an error if the directory, temporary file, or rename fails.
pub fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(parent)?;

    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;

    // Set restrictive permissions on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
