//! SysEx frame build/parse. See spec §3/§4.1.
//!
//! `0xF0 | <mfr> | command | msg_id | json_bytes | (0x00 | pack7(binary))? | 0xF7`

use super::pack7::{pack7, unpack7};
use crate::error::{Result, SmSysexError};

const START: u8 = 0xF0;
const END: u8 = 0xF7;

/// Synthstrom Audible's registered three-byte manufacturer ID.
pub const SYNTHSTROM_MFR_ID: [u8; 3] = [0x00, 0x21, 0x7B];

/// The single-byte "developer" manufacturer ID, used as a fallback when the
/// registered prefix is rejected by the device. See §4.4 capability
/// detection.
pub const DEVELOPER_MFR_ID: u8 = 0x7D;

/// Which manufacturer-ID form the transport currently addresses the device
/// with. Sticky for the lifetime of a transport once chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManufacturerMode {
    /// The registered three-byte Synthstrom prefix.
    Synthstrom,
    /// The single developer byte, `0x7D`.
    Developer,
}

impl ManufacturerMode {
    fn write_prefix(self, out: &mut Vec<u8>) {
        match self {
            ManufacturerMode::Synthstrom => out.extend_from_slice(&SYNTHSTROM_MFR_ID),
            ManufacturerMode::Developer => out.push(DEVELOPER_MFR_ID),
        }
    }

    fn prefix_len(self) -> usize {
        match self {
            ManufacturerMode::Synthstrom => SYNTHSTROM_MFR_ID.len(),
            ManufacturerMode::Developer => 1,
        }
    }

    /// Matches a prefix at the start of `bytes`, returning the remainder.
    /// Exposed crate-wide so the fragment reassembler can peek at the
    /// command byte without fully parsing a (possibly incomplete) frame.
    pub(crate) fn strip_prefix<'a>(self, bytes: &'a [u8]) -> Option<&'a [u8]> {
        match self {
            ManufacturerMode::Synthstrom => bytes.strip_prefix(&SYNTHSTROM_MFR_ID[..]),
            ManufacturerMode::Developer => {
                if bytes.first() == Some(&DEVELOPER_MFR_ID) {
                    Some(&bytes[1..])
                } else {
                    None
                }
            }
        }
    }
}

/// A SysEx command byte. Only `Json` carries the filesystem protocol;
/// `Display`/`Debug` are pass-through status traffic (see the fragment
/// reassembler's selective buffering).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Display,
    Debug,
    Json,
}

impl Command {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Command::Ping => 0x00,
            Command::Display => 0x02,
            Command::Debug => 0x03,
            Command::Json => 0x04,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(Command::Ping),
            0x02 => Ok(Command::Display),
            0x03 => Ok(Command::Debug),
            0x04 => Ok(Command::Json),
            other => Err(SmSysexError::FrameFormat(format!(
                "unknown command byte {other:#04x}"
            ))),
        }
    }
}

/// A decoded frame payload ready for (or recovered from) the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub msg_id: u8,
    pub json_text: String,
    pub binary: Option<Vec<u8>>,
}

/// Serializes `frame` to a complete, bracketed SysEx byte sequence.
pub fn build_frame(frame: &Frame, mfr: ManufacturerMode) -> Result<Vec<u8>> {
    if frame.msg_id > 0x7F {
        return Err(SmSysexError::FrameFormat(format!(
            "msg_id {} out of 7-bit range",
            frame.msg_id
        )));
    }
    let json_bytes = frame.json_text.as_bytes();
    if json_bytes.iter().any(|&b| b == END) {
        return Err(SmSysexError::FrameFormat(
            "json payload contains a literal 0xF7 byte".into(),
        ));
    }

    let mut out = Vec::with_capacity(json_bytes.len() + mfr.prefix_len() + 16);
    out.push(START);
    mfr.write_prefix(&mut out);
    out.push(frame.command.to_byte());
    out.push(frame.msg_id);
    out.extend_from_slice(json_bytes);
    if let Some(binary) = &frame.binary {
        out.push(0x00);
        out.extend_from_slice(&pack7(binary));
    }
    out.push(END);
    Ok(out)
}

/// Parses a complete, bracketed SysEx byte sequence into a [`Frame`].
pub fn parse_frame(bytes: &[u8], mfr: ManufacturerMode) -> Result<Frame> {
    let Some((&first, rest)) = bytes.split_first() else {
        return Err(SmSysexError::FrameFormat("empty frame".into()));
    };
    if first != START {
        return Err(SmSysexError::FrameFormat("missing 0xF0 start byte".into()));
    }
    let Some((&last, body)) = rest.split_last() else {
        return Err(SmSysexError::FrameFormat("frame has no body".into()));
    };
    if last != END {
        return Err(SmSysexError::FrameFormat("missing 0xF7 end byte".into()));
    }

    let Some(after_mfr) = mfr.strip_prefix(body) else {
        return Err(SmSysexError::FrameFormat(
            "manufacturer ID did not match current mode".into(),
        ));
    };
    let [command_byte, msg_id, payload @ ..] = after_mfr else {
        return Err(SmSysexError::FrameFormat(
            "frame missing command/msg_id bytes".into(),
        ));
    };
    let command = Command::from_byte(*command_byte)?;
    if *msg_id > 0x7F {
        return Err(SmSysexError::FrameFormat(format!(
            "msg_id {msg_id} out of 7-bit range"
        )));
    }

    if command != Command::Json {
        return Ok(Frame {
            command,
            msg_id: *msg_id,
            json_text: String::from_utf8_lossy(payload).into_owned(),
            binary: None,
        });
    }

    let (json_bytes, binary) = split_json_and_binary(payload)?;
    let json_text = String::from_utf8(json_bytes.to_vec())
        .map_err(|e| SmSysexError::FrameFormat(format!("payload is not valid UTF-8: {e}")))?;
    Ok(Frame {
        command,
        msg_id: *msg_id,
        json_text,
        binary,
    })
}

/// Splits a JSON payload at the first `0x00` separator following a
/// matched-brace JSON object. Bytes after the separator are 7-bit-unpacked.
fn split_json_and_binary(payload: &[u8]) -> Result<(&[u8], Option<Vec<u8>>)> {
    let json_end = find_json_object_end(payload)?;
    let (json_bytes, tail) = payload.split_at(json_end);
    match tail.split_first() {
        None => Ok((json_bytes, None)),
        Some((&0x00, packed)) => Ok((json_bytes, Some(unpack7(packed)))),
        Some(_) => Err(SmSysexError::FrameFormat(
            "expected 0x00 separator before binary payload".into(),
        )),
    }
}

/// Scans `payload` for the index one past the closing brace of the leading
/// JSON object, honoring string escaping and nesting.
fn find_json_object_end(payload: &[u8]) -> Result<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut started = false;
    for (i, &b) in payload.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                depth += 1;
                started = true;
            }
            b'}' => {
                depth -= 1;
                if started && depth == 0 {
                    return Ok(i + 1);
                }
            }
            _ => {}
        }
    }
    Err(SmSysexError::FrameFormat(
        "no matched-brace JSON object found in payload".into(),
    ))
}
