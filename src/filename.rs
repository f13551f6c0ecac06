//! Filename Validator / Sanitizer. See spec §4.10.
//!
//! Applied before any `write`, `mkdir`, or `rename` that introduces a new
//! name. Does not know about paths or separators; callers validate one
//! path segment at a time.

use crate::error::{Result, SmSysexError};

const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];
const MAX_NAME_BYTES: usize = 255;

/// Non-fatal observations from [`validate`]. An empty vector means the name
/// was accepted without caveats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

/// Validates one filename segment. Returns `Ok` (possibly with warnings)
/// or `Err(InvalidFilename)`/`Err(PathTooLong)`.
pub fn validate(name: &str) -> Result<ValidationReport> {
    if name.len() > MAX_NAME_BYTES {
        return Err(SmSysexError::PathTooLong(name.len()));
    }
    if name.trim().is_empty() {
        return Err(SmSysexError::InvalidFilename(
            "name is empty or whitespace-only".into(),
        ));
    }
    if let Some(bad) = name.chars().find(|&c| (c as u32) < 0x20) {
        return Err(SmSysexError::InvalidFilename(format!(
            "control byte {:#04x} not allowed",
            bad as u32
        )));
    }
    if let Some(bad) = name.chars().find(|c| RESERVED_CHARS.contains(c)) {
        return Err(SmSysexError::InvalidFilename(format!(
            "character '{bad}' is reserved"
        )));
    }
    if is_reserved_name(name) {
        return Err(SmSysexError::InvalidFilename(format!(
            "'{name}' is a reserved device name"
        )));
    }

    let mut warnings = Vec::new();
    if name.ends_with('.') || name.ends_with(' ') {
        warnings.push("trailing '.' or space may be stripped by the device".into());
    }
    Ok(ValidationReport { warnings })
}

/// Deterministically rewrites `name` into something [`validate`] accepts:
/// each illegal byte becomes `_`, and a reserved name is prefixed with `_`.
/// `sanitize(sanitize(x)) == sanitize(x)` for every `x`.
pub fn sanitize(name: &str) -> String {
    let truncated: String = if name.len() > MAX_NAME_BYTES {
        truncate_to_byte_limit(name, MAX_NAME_BYTES)
    } else {
        name.to_string()
    };

    let cleaned: String = truncated
        .chars()
        .map(|c| {
            if (c as u32) < 0x20 || RESERVED_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let cleaned = if cleaned.trim().is_empty() {
        "_".to_string()
    } else {
        cleaned
    };

    if is_reserved_name(&cleaned) {
        format!("_{cleaned}")
    } else {
        cleaned
    }
}

fn is_reserved_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name);
    RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(stem))
}

fn truncate_to_byte_limit(name: &str, limit: usize) -> String {
    let mut end = limit;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}
