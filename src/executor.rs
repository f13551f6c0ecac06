//! Command Executor. See spec §4.5.
//!
//! The single funnel every filesystem command passes through:
//! ensure-session, send, parse. Retry is deliberately not handled here —
//! per §9 it's a caller concern.

use std::sync::Arc;

use serde_json::Value;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::session::SessionManager;
use crate::transport::Transport;

pub struct CommandExecutor {
    transport: Arc<Transport>,
    session: Arc<SessionManager>,
}

impl CommandExecutor {
    pub fn new(transport: Arc<Transport>, session: Arc<SessionManager>) -> Self {
        Self { transport, session }
    }

    /// Runs one command: ensures a session, sends `request` (with optional
    /// outbound binary), and hands the reply to `parse`. `expects_binary_reply`
    /// must be set by callers (e.g. `read`) whose *reply* carries a packed
    /// binary chunk, so the transport picks the 10 s binary deadline instead
    /// of the 3 s JSON-only one (§4.3).
    pub async fn execute<T>(
        &self,
        command_name: &str,
        request: Value,
        binary: Option<Vec<u8>>,
        expects_binary_reply: bool,
        parse: impl FnOnce(Value, Option<Vec<u8>>) -> Result<T>,
        cancel: &CancelToken,
    ) -> Result<T> {
        self.session.ensure_session(cancel).await?;
        log::debug!("executing command {command_name}");
        let result = self
            .transport
            .send_json(&request, binary, expects_binary_reply, cancel)
            .await;
        self.session.note_command_sent().await;
        let (reply, reply_binary) = match result {
            Ok(ok) => ok,
            Err(err) => {
                log::warn!("command {command_name} failed: {err}");
                return Err(err);
            }
        };
        parse(reply, reply_binary)
    }
}
