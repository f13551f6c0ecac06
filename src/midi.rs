//! The lower boundary described in spec §6: a byte-oriented, bidirectional
//! SysEx channel supplied by the environment. Port enumeration and OS MIDI
//! access are out of scope (§1); this module only names the narrow contract
//! the transport depends on.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::{Result, SmSysexError};

/// One inbound delivery from the MIDI stack. A single logical SysEx message
/// may arrive as several of these; the fragment reassembler coalesces them.
#[derive(Debug, Clone)]
pub struct MidiEvent {
    pub timestamp: Instant,
    pub bytes: Vec<u8>,
}

/// Outbound half of the lower boundary. Implementations transmit a complete,
/// already-bracketed SysEx frame.
pub trait MidiOutput: Send + Sync {
    /// Transmits `bytes` (a complete `0xF0..0xF7` frame) to the device.
    fn send(&self, bytes: &[u8]) -> Result<()>;

    /// Whether the underlying port currently reports a connection. Default
    /// implementation always reports connected, matching environments with
    /// no separate connection-state signal.
    fn is_connected(&self) -> bool {
        true
    }
}

/// An in-memory [`MidiOutput`] that records every frame it is asked to send
/// and lets tests inject inbound events. Used by the integration tests and
/// by any host that wants to smoke-test the client without real hardware.
#[derive(Clone, Default)]
pub struct MockMidiChannel {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    connected: Arc<Mutex<bool>>,
}

impl MockMidiChannel {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Every frame sent so far, in send order.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    /// Clears recorded frames without affecting connection state.
    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    /// Simulates a disconnect; subsequent `send` calls return `NoOutput`.
    pub fn disconnect(&self) {
        *self.connected.lock() = false;
    }
}

impl MidiOutput for MockMidiChannel {
    fn send(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(SmSysexError::NoOutput);
        }
        self.sent.lock().push(bytes.to_vec());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }
}
