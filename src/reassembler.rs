//! Fragment Reassembler. See spec §4.2.
//!
//! The MIDI stack may deliver one logical SysEx message as several
//! callback deliveries. This module coalesces fragments that belong
//! together and passes everything else straight through, so that
//! UI-facing status traffic (display/debug) never waits on a timer meant
//! for large JSON transfers.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::codec::{Command, ManufacturerMode};
use crate::midi::MidiEvent;

const END: u8 = 0xF7;

/// Tunables for [`Reassembler`]. Defaults match spec §4.2.
#[derive(Debug, Clone, Copy)]
pub struct ReassemblerConfig {
    /// Safety cap on accumulated bytes before a partial buffer is flushed
    /// regardless of a terminator. Default 64 KiB.
    pub cap_bytes: usize,
    /// How long to wait for the next fragment before flushing a partial
    /// buffer. Default ~16 ms.
    pub inactivity_timeout: Duration,
    /// When `false`, every event passes through immediately (feature-flag
    /// gate named in §4.2).
    pub enabled: bool,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            cap_bytes: 64 * 1024,
            inactivity_timeout: Duration::from_millis(16),
            enabled: true,
        }
    }
}

struct Pending {
    buffer: Vec<u8>,
    last_update: Instant,
}

/// Coalesces SysEx fragments into complete frames for the transport.
///
/// Pending buffers are indexed by message ID (§4.2): a header-bearing
/// delivery establishes the key, and bare continuation deliveries (which
/// carry no header of their own) are appended to whichever single entry is
/// still open. The MIDI link is one serial byte stream, so in practice at
/// most one message is ever mid-assembly at a time, but keying by ID keeps
/// this module honest about what it's actually correlating on rather than
/// leaning on that invariant.
pub struct Reassembler {
    config: ReassemblerConfig,
    mfr: ManufacturerMode,
    pending: HashMap<u8, Pending>,
}

impl Reassembler {
    pub fn new(config: ReassemblerConfig, mfr: ManufacturerMode) -> Self {
        Self {
            config,
            mfr,
            pending: HashMap::new(),
        }
    }

    /// Updates the manufacturer-ID mode used to locate the command byte.
    /// Called once, after capability detection settles (§4.4).
    pub fn set_manufacturer_mode(&mut self, mfr: ManufacturerMode) {
        self.mfr = mfr;
    }

    /// Feeds one inbound delivery. Returns a complete, bracketed frame when
    /// one is ready; `None` while still accumulating.
    pub fn feed(&mut self, event: MidiEvent) -> Option<Vec<u8>> {
        if !self.config.enabled {
            return Some(event.bytes);
        }

        if let Some(msg_id) = self.active_msg_id() {
            let pending = self
                .pending
                .get_mut(&msg_id)
                .expect("active_msg_id only returns keys present in the map");
            pending.buffer.extend_from_slice(&event.bytes);
            pending.last_update = event.timestamp;
            return self.flush_if_ready(msg_id);
        }

        if let Some(msg_id) = Self::should_buffer(&event.bytes, self.mfr) {
            if event.bytes.last() == Some(&END) {
                return Some(event.bytes);
            }
            self.pending.insert(
                msg_id,
                Pending {
                    buffer: event.bytes,
                    last_update: event.timestamp,
                },
            );
            None
        } else {
            Some(event.bytes)
        }
    }

    /// The message ID of the one buffer currently being assembled, if any.
    fn active_msg_id(&self) -> Option<u8> {
        self.pending.keys().copied().next()
    }

    /// Flushes whichever pending buffer's inactivity timer has elapsed.
    /// Callers poll this on a short interval (the transport's event loop).
    pub fn poll_inactivity(&mut self, now: Instant) -> Option<Vec<u8>> {
        let timeout = self.config.inactivity_timeout;
        let expired = self
            .pending
            .iter()
            .find(|(_, p)| now.duration_since(p.last_update) >= timeout)
            .map(|(id, _)| *id)?;
        self.pending.remove(&expired).map(|p| p.buffer)
    }

    fn flush_if_ready(&mut self, msg_id: u8) -> Option<Vec<u8>> {
        let pending = self.pending.get(&msg_id)?;
        let terminated = pending.buffer.last() == Some(&END);
        let oversized = pending.buffer.len() > self.config.cap_bytes;
        if oversized {
            log::warn!(
                "fragment reassembler: {} bytes exceeded cap, flushing partial buffer for msg {msg_id}",
                pending.buffer.len()
            );
        }
        if terminated || oversized {
            self.pending.remove(&msg_id).map(|p| p.buffer)
        } else {
            None
        }
    }

    /// Selective buffering rule: only `JSON` frames whose payload starts
    /// with `{` are coalesced, keyed by their message ID. Everything else
    /// (ping/display/debug, or a frame we can't yet classify because too
    /// few bytes have arrived) is passed straight through.
    fn should_buffer(bytes: &[u8], mfr: ManufacturerMode) -> Option<u8> {
        let rest = bytes.first().filter(|&&b| b == 0xF0).and(Some(&bytes[1..]))?;
        let after_mfr = mfr.strip_prefix(rest)?;
        let [command_byte, msg_id, payload @ ..] = after_mfr else {
            return None;
        };
        (*command_byte == Command::Json.to_byte() && payload.first() == Some(&b'{')).then_some(*msg_id)
    }
}
