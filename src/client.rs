//! The public filesystem API described in spec §6 (upper boundary). This is
//! the single entry point a UI collaborator talks to; everything below it
//! (transport, session, codec) is an implementation detail.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::cancel::CancelToken;
use crate::codec::Timestamp;
use crate::commands::{self, FileEntry};
use crate::error::{Result, SmSysexError};
use crate::executor::CommandExecutor;
use crate::fileio::{self, ProgressFn};
use crate::filename;
use crate::midi::{MidiEvent, MidiOutput};
use crate::session::{SessionInfo, SessionManager};
use crate::transport::{SubscriptionHandle, Transport, TransportConfig};
use crate::walker;

/// One file to push during [`Client::upload_files`].
pub struct UploadFile {
    /// Destination name, relative to `dest_dir`.
    pub name: String,
    pub data: Vec<u8>,
}

/// Options for [`Client::upload_files`].
pub struct UploadOptions {
    pub dest_dir: String,
    /// How many files may be in flight logically at once. Real wire
    /// concurrency is still one request at a time (the transport's send
    /// lock serializes everything); this only lets independent `open`
    /// waits overlap.
    pub max_concurrent: usize,
    /// If false, files whose name already exists in `dest_dir` are skipped.
    pub overwrite: bool,
    /// If true, illegal filenames are rewritten via [`filename::sanitize`]
    /// instead of failing with `InvalidFilename`.
    pub force_sanitize: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            dest_dir: "/".to_string(),
            max_concurrent: 1,
            overwrite: true,
            force_sanitize: false,
        }
    }
}

/// Top-level client. Owns the transport, session manager, and command
/// executor; every method here ensures a session before touching the wire.
pub struct Client {
    transport: Arc<Transport>,
    session: Arc<SessionManager>,
    executor: Arc<CommandExecutor>,
}

impl Client {
    /// Builds a client around a MIDI output and its inbound event stream.
    pub fn new(
        output: Arc<dyn MidiOutput>,
        incoming: tokio::sync::mpsc::UnboundedReceiver<MidiEvent>,
        config: TransportConfig,
    ) -> Self {
        let transport = Transport::new(output, incoming, config);
        let session = Arc::new(SessionManager::new(Arc::clone(&transport)));
        let executor = Arc::new(CommandExecutor::new(Arc::clone(&transport), Arc::clone(&session)));
        Self {
            transport,
            session,
            executor,
        }
    }

    /// Subscribes to frames the transport couldn't correlate to a pending
    /// request (status/display traffic).
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(crate::codec::Frame) + Send + Sync + 'static,
    {
        self.transport.subscribe(listener)
    }

    pub async fn ping(&self, cancel: &CancelToken) -> Result<()> {
        commands::ping(&self.executor, cancel).await
    }

    pub async fn open_session(&self, tag: Option<String>, cancel: &CancelToken) -> Result<SessionInfo> {
        self.session.open_session(tag, cancel).await
    }

    pub async fn close_session(&self, cancel: &CancelToken) -> Result<()> {
        self.session.close_session(cancel).await
    }

    pub async fn read_file(
        &self,
        path: &str,
        on_progress: Option<&ProgressFn<'_>>,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        fileio::read_file(&self.executor, path, on_progress, cancel).await
    }

    pub async fn write_file(
        &self,
        path: &str,
        data: &[u8],
        on_progress: Option<&ProgressFn<'_>>,
        cancel: &CancelToken,
    ) -> Result<()> {
        filename::validate(last_segment(path))?;
        let modified = Timestamp::from_system_time(std::time::SystemTime::now());
        fileio::write_file(&self.executor, path, data, modified, on_progress, cancel).await
    }

    /// Uploads several files into `options.dest_dir`, bounding logical
    /// concurrency at `options.max_concurrent` (§6).
    pub async fn upload_files(
        &self,
        files: Vec<UploadFile>,
        options: UploadOptions,
        cancel: &CancelToken,
    ) -> Result<()> {
        let existing = if options.overwrite {
            None
        } else {
            Some(
                walker::list_directory_complete(&self.executor, &options.dest_dir, false, cancel)
                    .await?,
            )
        };

        let semaphore = Arc::new(Semaphore::new(options.max_concurrent.max(1)));
        let mut handles = Vec::with_capacity(files.len());

        for file in files {
            if let Some(existing) = &existing {
                if existing.iter().any(|e| e.name == file.name) {
                    continue;
                }
            }
            let name = if options.force_sanitize {
                filename::sanitize(&file.name)
            } else {
                filename::validate(&file.name)?;
                file.name.clone()
            };
            let dest_path = join_dir(&options.dest_dir, &name);
            let permit = Arc::clone(&semaphore);
            let modified = Timestamp::from_system_time(std::time::SystemTime::now());
            let data = file.data;
            let executor = Arc::clone(&self.executor);
            let cancel = cancel.clone();
            // Each task spends most of its time waiting on the semaphore or
            // on a reply; the transport's send lock still serializes the
            // actual wire traffic underneath.
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                fileio::write_file(&executor, &dest_path, &data, modified, None, &cancel).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(result) => result?,
                Err(join_err) => {
                    return Err(SmSysexError::UnexpectedReply(format!(
                        "upload task panicked: {join_err}"
                    )))
                }
            }
        }
        Ok(())
    }

    pub async fn list_directory(
        &self,
        path: &str,
        offset: u32,
        lines: u32,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<Vec<FileEntry>> {
        commands::dir(&self.executor, path, offset, lines, force, cancel).await
    }

    pub async fn list_directory_complete(
        &self,
        path: &str,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<Vec<FileEntry>> {
        walker::list_directory_complete(&self.executor, path, force, cancel).await
    }

    pub async fn delete(&self, path: &str, cancel: &CancelToken) -> Result<()> {
        walker::delete(&self.executor, path, cancel).await
    }

    pub async fn rename(&self, old_path: &str, new_path: &str, cancel: &CancelToken) -> Result<()> {
        filename::validate(last_segment(new_path))?;
        commands::rename(&self.executor, old_path, new_path, cancel).await
    }

    pub async fn move_(
        &self,
        from: &str,
        to: &str,
        update_paths: Option<bool>,
        cancel: &CancelToken,
    ) -> Result<()> {
        commands::move_(&self.executor, from, to, update_paths, cancel).await
    }

    pub async fn copy(&self, from: &str, to: &str, cancel: &CancelToken) -> Result<()> {
        commands::copy(&self.executor, from, to, cancel).await
    }

    pub async fn mkdir(&self, path: &str, cancel: &CancelToken) -> Result<()> {
        filename::validate(last_segment(path))?;
        let modified = Timestamp::from_system_time(std::time::SystemTime::now());
        let (date, time) = crate::codec::pack_fat_datetime(modified);
        commands::mkdir(&self.executor, path, date, time, cancel).await
    }

    /// Power-user escape hatch: parses and transmits a raw SysEx string.
    /// Returns `false` instead of an error for any validation failure, per
    /// scenario S6.
    pub fn send_custom_sysex(&self, hex_string: &str) -> bool {
        match parse_custom_sysex(hex_string) {
            Ok(bytes) => self.transport.send_raw(&bytes).is_ok(),
            Err(_) => false,
        }
    }
}

/// The final path segment, i.e. the name a `write`/`mkdir`/`rename` would
/// introduce into its parent directory (§4.10).
fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn join_dir(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Parses a whitespace-separated hex byte string (each token optionally
/// `0x`-prefixed) into raw bytes, validating it is a complete `F0..F7`
/// bracketed SysEx message.
fn parse_custom_sysex(input: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for token in input.split_whitespace() {
        let token = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")).unwrap_or(token);
        let byte = u8::from_str_radix(token, 16)
            .map_err(|e| SmSysexError::FrameFormat(format!("bad hex token '{token}': {e}")))?;
        bytes.push(byte);
    }
    if bytes.first() != Some(&0xF0) {
        return Err(SmSysexError::FrameFormat("must start with F0".into()));
    }
    if bytes.last() != Some(&0xF7) {
        return Err(SmSysexError::FrameFormat("must end with F7".into()));
    }
    Ok(bytes)
}
