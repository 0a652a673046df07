//! Resumable file sync with a server.
//!
//! Push walks a local directory in sorted order and uploads each file in
//! chunks, keeping a byte cursor on the card so an interrupted upload
//! resumes at the last acknowledged byte. Pull fetches the newest remote
//! directory into a temporary path and renames it into place as the last step.

mod cursor;
mod pull;
mod push;

pub use cursor::{AckFile, PushSequentialState, SyncCursor};
pub use pull::{PullOutcome, PullTarget, pull_last_dir};
pub use push::{PushLimits, PushOutcome, PushReport, PushTarget, push_sequential};

use alloc::{format, string::String};

use crate::{fs::FsError, http::HttpError, poll::PollError};

/// File stem of the push cursor kept for `local_dir` on `server`. It depends
/// only on the pair, never on where either sits in the config, and fits an
/// 8.3 name.
pub fn push_state_stem(server: &str, local_dir: &str) -> String {
    let server = server.trim_end_matches('/');
    let hash = server
        .bytes()
        .chain(core::iter::once(0))
        .chain(local_dir.bytes())
        .fold(0x811c_9dc5_u32, |hash, byte| (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193));
    format!("{:08x}", hash)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncError {
    Fs(FsError),
    Http(HttpError),
    /// The server answered with a status that aborts this attempt.
    Status(u16),
    /// 416 without an acknowledgment that moves the cursor.
    OffsetRejected,
    /// A listing could not be parsed or named an unsafe path.
    BadListing,
    Cancelled,
}

impl From<FsError> for SyncError {
    fn from(err: FsError) -> Self {
        SyncError::Fs(err)
    }
}

impl From<HttpError> for SyncError {
    fn from(err: HttpError) -> Self {
        SyncError::Http(err)
    }
}

impl From<PollError> for SyncError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Cancelled => SyncError::Cancelled,
            PollError::Timeout { .. } => SyncError::Http(HttpError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests;
