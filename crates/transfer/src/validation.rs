use std::path::Path;

use crate::TransferError;

/// Longest accepted name in bytes (common filesystem limit).
const MAX_NAME_LEN: usize = 255;

/// Sanitizes an untrusted payload name before it is used in any path or URL.
///
/// Surrounding whitespace is trimmed. Rejects:
/// - Empty names
/// - Path separators (`/`, `\`) and drive/stream separators (`:`)
/// - `.` and `..`, and any name starting with `.` (hidden files)
/// - NUL and other control characters
/// - Names longer than 255 bytes
///
/// Returns the trimmed name, which is always a single path component.
pub fn sanitize_name(name: &str) -> Result<String, TransferError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }

    if trimmed.len() > MAX_NAME_LEN {
        return Err(TransferError::InvalidName(format!(
            "name longer than {MAX_NAME_LEN} bytes"
        )));
    }

    if trimmed.starts_with('.') {
        return Err(TransferError::InvalidName(format!(
            "hidden or relative name not allowed: {trimmed}"
        )));
    }

    if let Some(c) = trimmed
        .chars()
        .find(|c| matches!(c, '/' | '\\' | ':') || c.is_control())
    {
        return Err(TransferError::InvalidName(format!(
            "character {c:?} not allowed: {}",
            trimmed.escape_debug()
        )));
    }

    Ok(trimmed.to_string())
}

/// Checks the name's extension against an allow-list (case-insensitive).
///
/// An empty allow-list accepts every name.
pub fn validate_extension(name: &str, allowed: &[String]) -> Result<(), TransferError> {
    if allowed.is_empty() {
        return Ok(());
    }

    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    if allowed
        .iter()
        .any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(ext))
    {
        Ok(())
    } else {
        Err(TransferError::InvalidName(format!(
            "extension of {name} not in [{}]",
            allowed.join(", ")
        )))
    }
}

/// The package's display name: the file name without its extension.
pub fn package_stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}
