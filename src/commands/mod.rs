//! Filesystem Command schemas. See spec §4.6.
//!
//! Every request is a single top-level JSON key naming the operation; the
//! reply's top-level key is the same name prefixed with `^` (§6 wire
//! protocol). Each function here builds the request, sends it through the
//! [`CommandExecutor`], and parses the typed reply.

mod entry;

pub use entry::FileEntry;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::cancel::CancelToken;
use crate::error::{is_tolerated_error, Result, SmSysexError};
use crate::executor::CommandExecutor;

/// Looks up the `^<key>` object in a reply and deserializes it.
fn reply_body<T: for<'de> Deserialize<'de>>(reply: Value, key: &str) -> Result<T> {
    let wrapped_key = format!("^{key}");
    let body = reply
        .get(&wrapped_key)
        .ok_or_else(|| SmSysexError::UnexpectedReply(format!("missing {wrapped_key} key")))?;
    serde_json::from_value(body.clone())
        .map_err(|e| SmSysexError::UnexpectedReply(format!("malformed {wrapped_key} body: {e}")))
}

/// Turns a non-zero, non-tolerated `err` into a `Device` error.
fn check_err(command: &str, err: u8) -> Result<()> {
    if is_tolerated_error(command, err) {
        Ok(())
    } else {
        Err(SmSysexError::device(err))
    }
}

#[derive(Debug, Deserialize)]
struct ErrOnly {
    err: u8,
}

/// `ping` — liveness / capability detection (§4.4 also issues this
/// directly against the transport; this wrapper is for callers that just
/// want a liveness check through the normal executor path).
pub async fn ping(executor: &CommandExecutor, cancel: &CancelToken) -> Result<()> {
    executor
        .execute(
            "ping",
            json!({ "ping": {} }),
            None,
            false,
            |reply, _binary| {
                reply_body::<Value>(reply, "ping")?;
                Ok(())
            },
            cancel,
        )
        .await
}

pub struct OpenResult {
    pub fid: u32,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct OpenReplyBody {
    fid: u32,
    size: u64,
    err: u8,
}

/// `open` — `write = Some((fat_date, fat_time))` creates/truncates for
/// writing; `write = None` opens for reading.
pub async fn open(
    executor: &CommandExecutor,
    path: &str,
    write: Option<(u16, u16)>,
    cancel: &CancelToken,
) -> Result<OpenResult> {
    let write_flag = if write.is_some() { 1 } else { 0 };
    let mut body = json!({ "path": path, "write": write_flag });
    if let Some((date, time)) = write {
        body["date"] = json!(date);
        body["time"] = json!(time);
    }
    let request = json!({ "open": body });
    executor
        .execute(
            "open",
            request,
            None,
            false,
            |reply, _binary| {
                let body: OpenReplyBody = reply_body(reply, "open")?;
                check_err("open", body.err)?;
                Ok(OpenResult {
                    fid: body.fid,
                    size: body.size,
                })
            },
            cancel,
        )
        .await
}

#[derive(Debug, Deserialize)]
struct ReadReplyBody {
    err: u8,
}

/// `read` — returns the unpacked binary chunk. `size` must be `<= 1024`
/// (§4.7 `CHUNK`).
pub async fn read(
    executor: &CommandExecutor,
    fid: u32,
    addr: u64,
    size: u32,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    let request = json!({ "read": { "fid": fid, "addr": addr, "size": size } });
    executor
        .execute(
            "read",
            request,
            None,
            true,
            |reply, binary| {
                let body: ReadReplyBody = reply_body(reply, "read")?;
                check_err("read", body.err)?;
                Ok(binary.unwrap_or_default())
            },
            cancel,
        )
        .await
}

pub struct WriteResult {
    pub accepted: u32,
}

#[derive(Debug, Deserialize)]
struct WriteReplyBody {
    size: u32,
    err: u8,
}

/// `write` — `chunk` must be `<= 256` bytes (§4.7 `CHUNK`). The device may
/// accept fewer bytes than sent; the accepted count is returned so the
/// caller can advance its cursor accordingly.
pub async fn write(
    executor: &CommandExecutor,
    fid: u32,
    addr: u64,
    chunk: &[u8],
    cancel: &CancelToken,
) -> Result<WriteResult> {
    let request = json!({ "write": { "fid": fid, "addr": addr, "size": chunk.len() } });
    executor
        .execute(
            "write",
            request,
            Some(chunk.to_vec()),
            false,
            |reply, _binary| {
                let body: WriteReplyBody = reply_body(reply, "write")?;
                check_err("write", body.err)?;
                Ok(WriteResult {
                    accepted: body.size,
                })
            },
            cancel,
        )
        .await
}

/// `close` — always issued on every exit path of a chunked I/O operation.
pub async fn close(executor: &CommandExecutor, fid: u32, cancel: &CancelToken) -> Result<()> {
    let request = json!({ "close": { "fid": fid } });
    executor
        .execute(
            "close",
            request,
            None,
            false,
            |reply, _binary| {
                let body: ErrOnly = reply_body(reply, "close")?;
                check_err("close", body.err)
            },
            cancel,
        )
        .await
}

#[derive(Debug, Deserialize)]
struct DirReplyBody {
    list: Vec<FileEntry>,
    err: u8,
}

/// `dir` — one page of a directory listing. See [`super::walker`] for
/// pagination.
pub async fn dir(
    executor: &CommandExecutor,
    path: &str,
    offset: u32,
    lines: u32,
    force: bool,
    cancel: &CancelToken,
) -> Result<Vec<FileEntry>> {
    let request = json!({
        "dir": { "path": path, "offset": offset, "lines": lines, "force": force }
    });
    executor
        .execute(
            "dir",
            request,
            None,
            false,
            |reply, _binary| {
                let body: DirReplyBody = reply_body(reply, "dir")?;
                check_err("dir", body.err)?;
                Ok(body.list)
            },
            cancel,
        )
        .await
}

/// `delete` — `err ∈ {0, 4}` both count as success (§4.9).
pub async fn delete(executor: &CommandExecutor, path: &str, cancel: &CancelToken) -> Result<()> {
    let request = json!({ "delete": { "path": path } });
    executor
        .execute(
            "delete",
            request,
            None,
            false,
            |reply, _binary| {
                let body: ErrOnly = reply_body(reply, "delete")?;
                check_err("delete", body.err)
            },
            cancel,
        )
        .await
}

/// `rename` — also used for move-within-filesystem.
pub async fn rename(
    executor: &CommandExecutor,
    from: &str,
    to: &str,
    cancel: &CancelToken,
) -> Result<()> {
    let request = json!({ "rename": { "from": from, "to": to } });
    executor
        .execute(
            "rename",
            request,
            None,
            false,
            |reply, _binary| {
                let body: ErrOnly = reply_body(reply, "rename")?;
                check_err("rename", body.err)
            },
            cancel,
        )
        .await
}

/// `move` — `update_paths`, when set, instructs the device to rewrite XML
/// references; treated as an opaque pass-through (§9 open question).
pub async fn move_(
    executor: &CommandExecutor,
    from: &str,
    to: &str,
    update_paths: Option<bool>,
    cancel: &CancelToken,
) -> Result<()> {
    let mut body = json!({ "from": from, "to": to });
    if let Some(update_paths) = update_paths {
        body["update_paths"] = json!(update_paths);
    }
    let request = json!({ "move": body });
    executor
        .execute(
            "move",
            request,
            None,
            false,
            |reply, _binary| {
                let body: ErrOnly = reply_body(reply, "move")?;
                check_err("move", body.err)
            },
            cancel,
        )
        .await
}

/// `copy`
pub async fn copy(
    executor: &CommandExecutor,
    from: &str,
    to: &str,
    cancel: &CancelToken,
) -> Result<()> {
    let request = json!({ "copy": { "from": from, "to": to } });
    executor
        .execute(
            "copy",
            request,
            None,
            false,
            |reply, _binary| {
                let body: ErrOnly = reply_body(reply, "copy")?;
                check_err("copy", body.err)
            },
            cancel,
        )
        .await
}

/// `mkdir`
pub async fn mkdir(
    executor: &CommandExecutor,
    path: &str,
    date: u16,
    time: u16,
    cancel: &CancelToken,
) -> Result<()> {
    let request = json!({ "mkdir": { "path": path, "date": date, "time": time } });
    executor
        .execute(
            "mkdir",
            request,
            None,
            false,
            |reply, _binary| {
                let body: ErrOnly = reply_body(reply, "mkdir")?;
                check_err("mkdir", body.err)
            },
            cancel,
        )
        .await
}
