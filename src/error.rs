//! Error taxonomy for the smSysex client core.
//!
//! Every fallible operation in this crate returns [`SmSysexError`]. Errors
//! are plain values, not exceptions: callers match on [`SmSysexError::category`]
//! for UI decisions and on the human string for display.

use thiserror::Error;

/// A stable, machine-comparable category string for a given error, e.g.
/// `device.file_not_found`. Mirrors §7: "each error carries a short, stable
/// category plus a human string."
pub type Category = &'static str;

/// Errors produced by the transport, session, filesystem command, and
/// chunked I/O layers.
#[derive(Debug, Error)]
pub enum SmSysexError {
    /// The MIDI output is not attached.
    #[error("no MIDI output attached")]
    NoOutput,

    /// A request did not receive a matching reply before its deadline.
    #[error("request timed out")]
    Timeout,

    /// A SysEx frame could not be parsed (bad bracketing, malformed JSON,
    /// missing separator before a binary blob, etc).
    #[error("malformed SysEx frame: {0}")]
    FrameFormat(String),

    /// A reply arrived whose `msg_id` did not match any pending request, or
    /// whose shape didn't match what the command expected.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// No session has been established yet.
    #[error("no session open")]
    SessionNotOpened,

    /// The session was transparently renewed; surfaced only to internal
    /// retry logic, never expected to escape the executor.
    #[error("session renewed")]
    SessionRenewed,

    /// The session was reset due to an error condition.
    #[error("session reset")]
    SessionReset,

    /// The device rejected a command with a FAT-style error code.
    #[error("device error {code}: {text}")]
    Device {
        /// Raw FAT error code, 1..=18.
        code: u8,
        /// Fixed human text for the code.
        text: &'static str,
    },

    /// A filename failed validation before being sent to the device.
    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    /// A path exceeded the 255-byte UTF-8 limit after sanitization.
    #[error("path too long: {0} bytes")]
    PathTooLong(usize),

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// JSON encoding/decoding failure at the codec boundary.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SmSysexError {
    /// Stable category string for UI keying. See §7.
    pub fn category(&self) -> Category {
        match self {
            SmSysexError::NoOutput => "transport.no_output",
            SmSysexError::Timeout => "transport.timeout",
            SmSysexError::FrameFormat(_) => "transport.frame_format",
            SmSysexError::UnexpectedReply(_) => "transport.unexpected_reply",
            SmSysexError::SessionNotOpened => "session.not_opened",
            SmSysexError::SessionRenewed => "session.renewed",
            SmSysexError::SessionReset => "session.reset",
            SmSysexError::Device { code, .. } => device_category(*code),
            SmSysexError::InvalidFilename(_) => "client.invalid_filename",
            SmSysexError::PathTooLong(_) => "client.path_too_long",
            SmSysexError::Cancelled => "client.cancelled",
            SmSysexError::Json(_) => "transport.frame_format",
        }
    }

    /// True for the errors that §4.3/§7 classify as session-corrupting and
    /// which must trigger `reset_session()` before they are surfaced.
    pub fn resets_session(&self) -> bool {
        matches!(
            self,
            SmSysexError::Timeout | SmSysexError::UnexpectedReply(_) | SmSysexError::FrameFormat(_)
        )
    }

    /// Build a device error from a raw FAT code, looking up its fixed text.
    pub fn device(code: u8) -> Self {
        SmSysexError::Device {
            code,
            text: fat_error_text(code),
        }
    }
}

/// The 18 FAT-style error codes the device can return, per §4.9.
fn fat_error_text(code: u8) -> &'static str {
    match code {
        0 => "OK",
        1 => "Disk error",
        2 => "Internal error",
        3 => "Drive not ready",
        4 => "File not found",
        5 => "Path not found",
        6 => "Invalid path name",
        7 => "Access denied",
        8 => "File exists",
        9 => "Directory is not empty",
        10 => "Invalid object",
        11 => "Write-protected",
        12 => "Invalid drive",
        13 => "No filesystem",
        14 => "Format aborted",
        15 => "No more files",
        16 => "Cannot allocate memory",
        17 => "Too many open files",
        18 => "Invalid parameter",
        _ => "Unknown device error",
    }
}

fn device_category(code: u8) -> Category {
    match code {
        4 => "device.file_not_found",
        5 => "device.path_not_found",
        6 => "device.invalid_path_name",
        7 => "device.access_denied",
        8 => "device.file_exists",
        9 => "device.directory_not_empty",
        10 => "device.invalid_object",
        11 => "device.write_protected",
        13 => "device.no_filesystem",
        16 => "device.no_memory",
        17 => "device.too_many_open_files",
        18 => "device.invalid_parameter",
        _ => "device.other",
    }
}

/// Per-command allowlist of device error codes that are treated as success.
/// Per §4.9: "delete: 0, 4". Every other command only tolerates `err == 0`.
pub fn is_tolerated_error(command: &str, code: u8) -> bool {
    if code == 0 {
        return true;
    }
    matches!(command, "delete") && code == 4
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SmSysexError>;
