//! Transport: owns the MIDI output, correlates requests with replies by
//! message ID, and enforces timeouts and cancellation. See spec §4.3/§5.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex as StdMutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

use crate::cancel::CancelToken;
use crate::codec::{build_frame, parse_frame, Command, Frame, ManufacturerMode, MessageIdGenerator};
use crate::error::{Result, SmSysexError};
use crate::midi::{MidiEvent, MidiOutput};
use crate::reassembler::{Reassembler, ReassemblerConfig};

/// Tunables for a [`Transport`]. Mirrors the defaults named in §4.3/§4.2.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Deadline for a JSON-only request. Default 3 s.
    pub json_timeout: Duration,
    /// Deadline for a request that carries (or expects) a binary payload.
    /// Default 10 s.
    pub binary_timeout: Duration,
    /// How often the background task checks the reassembler's inactivity
    /// timer.
    pub reassembler_poll_interval: Duration,
    pub reassembler: ReassemblerConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            json_timeout: Duration::from_secs(3),
            binary_timeout: Duration::from_secs(10),
            reassembler_poll_interval: Duration::from_millis(8),
            reassembler: ReassemblerConfig::default(),
        }
    }
}

struct PendingRequest {
    sink: oneshot::Sender<Result<Frame>>,
}

type Listener = Arc<dyn Fn(Frame) + Send + Sync>;

struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// A handle returned by [`Transport::subscribe`]; call [`unsubscribe`] to
/// stop receiving events.
///
/// [`unsubscribe`]: SubscriptionHandle::unsubscribe
pub struct SubscriptionHandle {
    id: u64,
    listeners: Arc<StdMutex<Listeners>>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(self) {
        let mut listeners = self.listeners.lock();
        listeners.entries.retain(|(id, _)| *id != self.id);
    }
}

/// Single owner of the MIDI link. Construct with [`Transport::new`], which
/// spawns the background task draining inbound [`MidiEvent`]s.
pub struct Transport {
    output: Arc<dyn MidiOutput>,
    config: TransportConfig,
    mfr: StdMutex<ManufacturerMode>,
    id_gen: StdMutex<MessageIdGenerator>,
    pending: StdMutex<HashMap<u8, PendingRequest>>,
    send_lock: AsyncMutex<()>,
    listeners: Arc<StdMutex<Listeners>>,
    session_epoch: AtomicU64,
}

impl Transport {
    /// Builds a transport around `output` and spawns a background task that
    /// reassembles and dispatches events from `incoming`.
    pub fn new(
        output: Arc<dyn MidiOutput>,
        incoming: mpsc::UnboundedReceiver<MidiEvent>,
        config: TransportConfig,
    ) -> Arc<Self> {
        let transport = Arc::new(Self {
            output,
            mfr: StdMutex::new(ManufacturerMode::Synthstrom),
            id_gen: StdMutex::new(MessageIdGenerator::new()),
            pending: StdMutex::new(HashMap::new()),
            send_lock: AsyncMutex::new(()),
            listeners: Arc::new(StdMutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
            session_epoch: AtomicU64::new(0),
            config,
        });
        tokio::spawn(Self::run_receiver(Arc::clone(&transport), incoming));
        transport
    }

    async fn run_receiver(self: Arc<Self>, mut incoming: mpsc::UnboundedReceiver<MidiEvent>) {
        let mfr = *self.mfr.lock();
        let mut reassembler = Reassembler::new(self.config.reassembler, mfr);
        let mut ticker = tokio::time::interval(self.config.reassembler_poll_interval);
        loop {
            tokio::select! {
                event = incoming.recv() => {
                    let Some(event) = event else { break };
                    {
                        let mfr = *self.mfr.lock();
                        reassembler.set_manufacturer_mode(mfr);
                    }
                    if let Some(bytes) = reassembler.feed(event) {
                        self.dispatch(bytes);
                    }
                }
                _ = ticker.tick() => {
                    if let Some(bytes) = reassembler.poll_inactivity(Instant::now()) {
                        self.dispatch(bytes);
                    }
                }
            }
        }
    }

    fn dispatch(&self, bytes: Vec<u8>) {
        let mfr = *self.mfr.lock();
        let outcome = parse_frame(&bytes, mfr);
        let msg_id = match &outcome {
            Ok(frame) => Some(frame.msg_id),
            Err(_) => None,
        };

        if let Some(msg_id) = msg_id {
            let pending = self.pending.lock().remove(&msg_id);
            if let Some(pending) = pending {
                let _ = pending.sink.send(outcome);
                return;
            }
        }

        match outcome {
            Ok(frame) => {
                log::warn!("dropping unmatched reply for msg_id {}", frame.msg_id);
                self.notify_listeners(frame);
            }
            Err(err) => log::warn!("dropping unparsable frame: {err}"),
        }
    }

    fn notify_listeners(&self, frame: Frame) {
        let listeners = self.listeners.lock();
        for (_, listener) in &listeners.entries {
            listener(frame.clone());
        }
    }

    /// Registers a callback invoked for every frame that doesn't correlate
    /// to a pending request (status/display traffic, or stray replies).
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(Frame) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));
        SubscriptionHandle {
            id,
            listeners: Arc::clone(&self.listeners),
        }
    }

    /// Transmits `bytes` verbatim; used by the custom-SysEx escape hatch.
    pub fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        if !self.output.is_connected() {
            return Err(SmSysexError::NoOutput);
        }
        self.output.send(bytes)
    }

    /// The manufacturer-ID mode currently in effect.
    pub fn manufacturer_mode(&self) -> ManufacturerMode {
        *self.mfr.lock()
    }

    /// Switches the sticky manufacturer-ID mode. Called once by capability
    /// detection (§4.4).
    pub fn set_manufacturer_mode(&self, mfr: ManufacturerMode) {
        *self.mfr.lock() = mfr;
    }

    /// Monotonically increasing counter bumped by [`reset_session`]. The
    /// Session Manager compares this against the epoch a session was
    /// opened under to know whether it must reopen.
    ///
    /// [`reset_session`]: Transport::reset_session
    pub fn session_epoch(&self) -> u64 {
        self.session_epoch.load(Ordering::SeqCst)
    }

    /// Marks the current session as no longer trustworthy. Does not itself
    /// send `closeSession`; the Session Manager decides whether the device
    /// side needs cleanup.
    pub fn reset_session(&self) {
        self.session_epoch.fetch_add(1, Ordering::SeqCst);
        log::warn!("transport: session reset");
    }

    /// Sends a JSON command and awaits the matching reply. Allocates a
    /// message ID, registers the pending record, serializes against
    /// concurrent senders, and enforces the timeout policy.
    ///
    /// `expects_binary_reply` is set by callers (e.g. `read`) whose *reply*
    /// carries a packed binary chunk even though the outbound `binary` is
    /// `None`; either direction carrying binary selects the 10 s deadline
    /// (§4.3).
    pub async fn send_json(
        &self,
        request: &Value,
        binary: Option<Vec<u8>>,
        expects_binary_reply: bool,
        cancel: &CancelToken,
    ) -> Result<(Value, Option<Vec<u8>>)> {
        if cancel.is_cancelled() {
            return Err(SmSysexError::Cancelled);
        }
        let _send_guard = self.send_lock.lock().await;
        if cancel.is_cancelled() {
            return Err(SmSysexError::Cancelled);
        }

        let msg_id = self.id_gen.lock().next_id();
        let json_text = serde_json::to_string(request)?;
        let carries_binary = binary.is_some() || expects_binary_reply;
        let frame = Frame {
            command: Command::Json,
            msg_id,
            json_text,
            binary,
        };
        let mfr = self.manufacturer_mode();
        let bytes = build_frame(&frame, mfr)?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .insert(msg_id, PendingRequest { sink: tx });

        if let Err(err) = self.send_raw(&bytes) {
            self.pending.lock().remove(&msg_id);
            return Err(err);
        }

        let timeout = if carries_binary {
            self.config.binary_timeout
        } else {
            self.config.json_timeout
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.pending.lock().remove(&msg_id);
                Err(SmSysexError::Cancelled)
            }
            outcome = tokio::time::timeout(timeout, rx) => {
                match outcome {
                    Ok(Ok(Ok(reply))) => self.decode_reply(reply),
                    Ok(Ok(Err(err))) => Err(err),
                    Ok(Err(_canceled)) => Err(SmSysexError::UnexpectedReply(
                        "reply channel dropped".into(),
                    )),
                    Err(_elapsed) => {
                        self.pending.lock().remove(&msg_id);
                        Err(SmSysexError::Timeout)
                    }
                }
            }
        };

        if let Err(err) = &result {
            if err.resets_session() {
                self.reset_session();
            }
        }
        result
    }

    fn decode_reply(&self, frame: Frame) -> Result<(Value, Option<Vec<u8>>)> {
        let value: Value = serde_json::from_str(&frame.json_text)?;
        Ok((value, frame.binary))
    }
}
