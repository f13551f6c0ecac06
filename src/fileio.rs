//! Chunked File I/O. See spec §4.7.
//!
//! Orchestrates the multi-frame `open`→N×`read`/`write`→`close` state
//! machines. Both directions guarantee a best-effort `close` on every exit
//! path once `open` has succeeded.

use crate::cancel::CancelToken;
use crate::codec::Timestamp;
use crate::commands::{self};
use crate::error::{Result, SmSysexError};
use crate::executor::CommandExecutor;

/// Maximum bytes requested per `read`.
pub const READ_CHUNK: u64 = 1024;
/// Maximum bytes sent per `write`.
pub const WRITE_CHUNK: usize = 256;

/// Called after each chunk with `(bytes_so_far, total)`. Strictly
/// non-decreasing; at most one call per chunk (§4.7 invariants).
pub type ProgressFn<'a> = dyn Fn(u64, u64) + Send + Sync + 'a;

/// Reads the whole contents of `path`. Mirrors scenario S1: a 2500-byte
/// file is read in three 1024/1024/452-byte chunks.
pub async fn read_file(
    executor: &CommandExecutor,
    path: &str,
    on_progress: Option<&ProgressFn<'_>>,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    let opened = commands::open(executor, path, None, cancel).await?;
    let fid = opened.fid;
    let size = opened.size;

    let body = async {
        let mut buffer = Vec::with_capacity(size as usize);
        let mut offset = 0u64;
        while offset < size {
            if cancel.is_cancelled() {
                return Err(SmSysexError::Cancelled);
            }
            let remaining = size - offset;
            let chunk_size = remaining.min(READ_CHUNK) as u32;
            let data = commands::read(executor, fid, offset, chunk_size, cancel).await?;
            buffer.extend_from_slice(&data);
            offset += data.len() as u64;
            if let Some(cb) = on_progress {
                cb(offset, size);
            }
            if data.is_empty() {
                // Device returned nothing for a non-empty request; avoid spinning forever.
                break;
            }
        }
        Ok(buffer)
    }
    .await;

    finish_with_close(executor, fid, body, cancel).await
}

/// Writes `data` to `path`, creating or truncating it. Mirrors scenario S2:
/// a 600-byte source with a short accept on the final chunk still ends
/// with `written_so_far == 600`.
pub async fn write_file(
    executor: &CommandExecutor,
    path: &str,
    data: &[u8],
    modified: Timestamp,
    on_progress: Option<&ProgressFn<'_>>,
    cancel: &CancelToken,
) -> Result<()> {
    let (fat_date, fat_time) = crate::codec::pack_fat_datetime(modified);
    let opened = commands::open(executor, path, Some((fat_date, fat_time)), cancel).await?;
    let fid = opened.fid;
    let total = data.len() as u64;

    let body = async {
        let mut written_so_far = 0u64;
        let mut cursor = 0usize;
        while cursor < data.len() {
            if cancel.is_cancelled() {
                return Err(SmSysexError::Cancelled);
            }
            let end = (cursor + WRITE_CHUNK).min(data.len());
            let chunk = &data[cursor..end];
            let result = commands::write(executor, fid, written_so_far, chunk, cancel).await;
            let accepted = match result {
                Ok(r) => r.accepted,
                Err(err) => {
                    if matches!(
                        err,
                        SmSysexError::Timeout | SmSysexError::UnexpectedReply(_)
                    ) {
                        executor_reset_hint(&err);
                    }
                    return Err(err);
                }
            };
            written_so_far += accepted as u64;
            cursor = end;
            if let Some(cb) = on_progress {
                cb(written_so_far, total);
            }
        }
        Ok(())
    }
    .await;

    finish_with_close(executor, fid, body, cancel).await.map(|_| ())
}

/// `resets_session()` is already applied by the transport for
/// session-corrupting errors (§4.3); this is just a log breadcrumb for the
/// write-specific wording in §4.7 step 4.
fn executor_reset_hint(err: &SmSysexError) {
    log::warn!("write_file: session-corrupting error, transport has reset the session: {err}");
}

/// Runs `close(fid)` regardless of whether `body` succeeded, then returns
/// `body`'s result (or the close error, if body succeeded but close
/// didn't).
async fn finish_with_close<T>(
    executor: &CommandExecutor,
    fid: u32,
    body: Result<T>,
    cancel: &CancelToken,
) -> Result<T> {
    let close_result = commands::close(executor, fid, cancel).await;
    match body {
        Ok(value) => close_result.map(|()| value),
        Err(err) => {
            if let Err(close_err) = close_result {
                log::warn!("close after error also failed: {close_err}");
            }
            Err(err)
        }
    }
}
