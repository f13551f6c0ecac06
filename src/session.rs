//! Session Manager. See spec §4.4.
//!
//! A session is required before any filesystem command. This module opens
//! one lazily, renews it transparently before it grows stale enough to
//! exhaust the device's message-ID pool, and detects which manufacturer-ID
//! form the device accepts.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use crate::cancel::CancelToken;
use crate::codec::ManufacturerMode;
use crate::error::{Result, SmSysexError};
use crate::transport::Transport;

/// Number of commands a session tolerates before this client proactively
/// renews it. Default from §4.4.
pub const RENEW_THRESHOLD: u32 = 20;

/// A session's identifying fields, as returned by `^session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub sid: u8,
    pub mid_min: u8,
    pub mid_max: u8,
}

#[derive(Debug, Deserialize)]
struct SessionReplyBody {
    sid: u8,
    #[serde(rename = "midMin")]
    mid_min: u8,
    #[serde(rename = "midMax")]
    mid_max: u8,
}

struct OpenSession {
    info: SessionInfo,
    tag: Option<String>,
    messages_since_open: u32,
    /// The transport's session epoch at the moment this session was opened.
    /// If the transport bumps its epoch (an error reset), this session is
    /// considered gone without the device having been told.
    opened_epoch: u64,
}

/// Owns the lifecycle of the single session this client holds against the
/// device.
pub struct SessionManager {
    transport: Arc<Transport>,
    state: Mutex<Option<OpenSession>>,
    capability_checked: Mutex<bool>,
    renew_threshold: u32,
}

impl SessionManager {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self {
            transport,
            state: Mutex::new(None),
            capability_checked: Mutex::new(false),
            renew_threshold: RENEW_THRESHOLD,
        }
    }

    #[cfg(test)]
    fn with_renew_threshold(transport: Arc<Transport>, renew_threshold: u32) -> Self {
        Self {
            renew_threshold,
            ..Self::new(transport)
        }
    }

    /// Ensures a session exists and is fresh enough to use, opening or
    /// renewing it as needed. Every command passes through this first.
    pub async fn ensure_session(&self, cancel: &CancelToken) -> Result<()> {
        self.detect_capability(cancel).await?;

        let mut state = self.state.lock().await;
        let needs_open = match state.as_ref() {
            None => true,
            Some(open) => open.opened_epoch != self.transport.session_epoch(),
        };
        if needs_open {
            let tag = state.as_ref().and_then(|s| s.tag.clone());
            *state = Some(self.open_locked(tag, cancel).await?);
            return Ok(());
        }

        let stale = state
            .as_ref()
            .map(|s| s.messages_since_open >= self.renew_threshold)
            .unwrap_or(false);
        if stale {
            let tag = state.as_ref().and_then(|s| s.tag.clone());
            let _ = self.close_locked(&mut state, cancel).await;
            *state = Some(self.open_locked(tag, cancel).await?);
        }
        Ok(())
    }

    /// Records that a command-carrying `send_json` just happened, per
    /// §4.4 step 3.
    pub async fn note_command_sent(&self) {
        if let Some(open) = self.state.lock().await.as_mut() {
            open.messages_since_open += 1;
        }
    }

    /// Explicit session open, honoring an optional client tag.
    pub async fn open_session(&self, tag: Option<String>, cancel: &CancelToken) -> Result<SessionInfo> {
        self.detect_capability(cancel).await?;
        let mut state = self.state.lock().await;
        let opened = self.open_locked(tag, cancel).await?;
        let info = opened.info;
        *state = Some(opened);
        Ok(info)
    }

    /// Explicit session close.
    pub async fn close_session(&self, cancel: &CancelToken) -> Result<()> {
        let mut state = self.state.lock().await;
        self.close_locked(&mut state, cancel).await
    }

    async fn open_locked(&self, tag: Option<String>, cancel: &CancelToken) -> Result<OpenSession> {
        let request = json!({ "session": { "tag": tag } });
        let (reply, _binary) = self.transport.send_json(&request, None, false, cancel).await?;
        let body = reply
            .get("^session")
            .ok_or_else(|| SmSysexError::UnexpectedReply("missing ^session key".into()))?;
        let parsed: SessionReplyBody = serde_json::from_value(body.clone())?;
        Ok(OpenSession {
            info: SessionInfo {
                sid: parsed.sid,
                mid_min: parsed.mid_min,
                mid_max: parsed.mid_max,
            },
            tag,
            messages_since_open: 0,
            opened_epoch: self.transport.session_epoch(),
        })
    }

    async fn close_locked(
        &self,
        state: &mut Option<OpenSession>,
        cancel: &CancelToken,
    ) -> Result<()> {
        if state.is_none() {
            return Ok(());
        }
        let request = json!({ "closeSession": {} });
        let result = self.transport.send_json(&request, None, false, cancel).await;
        *state = None;
        result.map(|_| ())
    }

    /// First call attempts the registered Synthstrom prefix; on failure,
    /// falls back to the single developer byte and retries once. Sticky
    /// thereafter.
    async fn detect_capability(&self, cancel: &CancelToken) -> Result<()> {
        let mut checked = self.capability_checked.lock().await;
        if *checked {
            return Ok(());
        }
        let ping = json!({ "ping": {} });
        if self.transport.send_json(&ping, None, false, cancel).await.is_ok() {
            *checked = true;
            return Ok(());
        }
        self.transport.set_manufacturer_mode(ManufacturerMode::Developer);
        self.transport.send_json(&ping, None, false, cancel).await?;
        *checked = true;
        Ok(())
    }
}
