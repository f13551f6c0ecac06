//! smSysex client core: a request/response protocol engine over MIDI
//! SysEx that lets a host exchange structured JSON (optionally with binary
//! payloads) with a Synthstrom Deluge device, plus a complete remote
//! filesystem client built on top of it.
//!
//! Port enumeration, OS MIDI access, and anything GUI-facing are out of
//! scope; see [`midi::MidiOutput`] for the narrow contract this crate
//! depends on from its environment.

pub mod cancel;
pub mod client;
pub mod codec;
pub mod commands;
pub mod error;
pub mod executor;
pub mod fileio;
pub mod filename;
pub mod midi;
pub mod reassembler;
pub mod session;
pub mod transport;
pub mod walker;

pub use client::{Client, UploadFile, UploadOptions};
pub use error::{Result, SmSysexError};
