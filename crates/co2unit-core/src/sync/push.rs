use alloc::{format, vec};

use log::{debug, info, warn};

use super::{
    SyncError,
    cursor::{AckFile, PushSequentialState, SyncCursor},
};
use crate::{
    board::Platform,
    fs::{FileSystem, split_parent},
    http::{HttpClient, Method},
    state_file,
};

/// What to push and where.
#[derive(Clone, Copy, Debug)]
pub struct PushTarget<'a> {
    /// Server base URL without trailing slash.
    pub server: &'a str,
    pub local_dir: &'a str,
    pub remote_dir: &'a str,
    /// JSON file holding the persisted cursor.
    pub state_path: &'a str,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PushLimits {
    pub chunk_size: u32,
    /// Wall-clock budget for the whole directory in this episode.
    pub budget_ms: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PushOutcome {
    DirComplete,
    /// Ran out of time. The cursor is kept where it stopped.
    BudgetExhausted,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PushReport {
    pub outcome: PushOutcome,
    pub chunks_sent: u32,
    pub bytes_sent: u64,
}

/// Pushes every file of `target.local_dir` to
/// `PUT {server}/push-sequential/{remote_dir}/{file}?offset={n}`.
///
/// The cursor is written back on every exit path, and after every accepted
/// chunk, so nothing the server acknowledged is sent again after a reset.
pub async fn push_sequential<F, H, P>(
    fs: &mut F,
    http: &mut H,
    platform: &mut P,
    target: &PushTarget<'_>,
    limits: PushLimits,
) -> Result<PushReport, SyncError>
where
    F: FileSystem + ?Sized,
    H: HttpClient + ?Sized,
    P: Platform + ?Sized,
{
    let state: PushSequentialState = state_file::load_or_default(fs, target.state_path);
    let mut cursor = SyncCursor::resume(fs, target.local_dir, &state)?;
    info!(
        "push: start dir={} file={:?} offset={}",
        target.local_dir,
        cursor.current_file(),
        cursor.offset()
    );

    let result = push_loop(fs, http, platform, target, limits, &mut cursor).await;

    let saved = save_cursor(fs, target.state_path, &cursor);
    match (&result, saved) {
        (Ok(report), Ok(())) => info!(
            "push: done dir={} outcome={:?} chunks={} bytes={}",
            target.local_dir, report.outcome, report.chunks_sent, report.bytes_sent
        ),
        (Ok(_), Err(err)) => return Err(SyncError::Fs(err)),
        (Err(err), saved) => warn!(
            "push: aborted dir={} err={:?} file={:?} offset={} cursor_saved={}",
            target.local_dir,
            err,
            cursor.current_file(),
            cursor.offset(),
            saved.is_ok()
        ),
    }
    result
}

fn save_cursor<F: FileSystem + ?Sized>(
    fs: &mut F,
    path: &str,
    cursor: &SyncCursor,
) -> Result<(), crate::fs::FsError> {
    let (parent, _) = split_parent(path);
    fs.create_dir_all(parent)?;
    state_file::save(fs, path, &cursor.to_state())
}

async fn push_loop<F, H, P>(
    fs: &mut F,
    http: &mut H,
    platform: &mut P,
    target: &PushTarget<'_>,
    limits: PushLimits,
    cursor: &mut SyncCursor,
) -> Result<PushReport, SyncError>
where
    F: FileSystem + ?Sized,
    H: HttpClient + ?Sized,
    P: Platform + ?Sized,
{
    let started_ms = platform.uptime_ms();
    let mut report = PushReport {
        outcome: PushOutcome::DirComplete,
        chunks_sent: 0,
        bytes_sent: 0,
    };
    let mut buf = vec![0u8; limits.chunk_size.max(1) as usize];

    loop {
        cursor.skip_completed(fs)?;
        if cursor.dir_complete() {
            return Ok(report);
        }

        platform.feed_watchdog();
        if platform.cancel_requested() {
            return Err(SyncError::Cancelled);
        }
        if platform.uptime_ms().saturating_sub(started_ms) >= limits.budget_ms {
            report.outcome = PushOutcome::BudgetExhausted;
            return Ok(report);
        }

        let path = cursor.current_path();
        let want = (cursor.remaining_in_file() as usize).min(buf.len());
        let read = fs.read_at(&path, cursor.offset(), &mut buf[..want])?;
        if read == 0 {
            warn!("push: file shorter than expected path={} offset={}", path, cursor.offset());
            cursor.truncate_here();
            continue;
        }

        let url = format!(
            "{}/push-sequential/{}/{}?offset={}",
            target.server,
            target.remote_dir,
            cursor.current_file().unwrap_or_default(),
            cursor.offset()
        );
        let response = http.request(Method::Put, &url, &buf[..read]).await?;

        match response.status {
            200 => {
                cursor.advance(read as u32);
                report.chunks_sent += 1;
                report.bytes_sent += read as u64;
                debug!("push: chunk accepted path={} offset={}", path, cursor.offset());
                if let Some(ack) = AckFile::from_body(&response.body)
                    && cursor.apply_ack(fs, &ack)?
                {
                    info!("push: server ack override file={} offset={}", ack.0, ack.1);
                }
                save_cursor(fs, target.state_path, cursor)?;
            }
            416 => {
                let moved = match AckFile::from_body(&response.body) {
                    Some(ack) => {
                        let moved = cursor.apply_ack(fs, &ack)?;
                        if moved {
                            info!("push: 416 resync file={} offset={}", ack.0, ack.1);
                        }
                        moved
                    }
                    None => false,
                };
                if !moved {
                    return Err(SyncError::OffsetRejected);
                }
            }
            status => return Err(SyncError::Status(status)),
        }
    }
}
