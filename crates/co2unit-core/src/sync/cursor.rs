use alloc::{string::String, vec::Vec};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::fs::{FileSystem, FsError, join, sorted_files};

/// Persisted form of a [`SyncCursor`].
///
/// After a directory is complete the last file stays recorded with
/// `offset == size`, so bytes appended to it later are still picked up.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushSequentialState {
    pub current_file: Option<String>,
    pub current_offset: Option<u32>,
    pub current_size: Option<u32>,
}

/// Server acknowledgment: `[name, offset, size]`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AckFile(pub String, pub u32, pub u32);

#[derive(Debug, Deserialize)]
struct AckBody {
    ack_file: Option<AckFile>,
}

impl AckFile {
    /// Extracts `ack_file` from a response body. Anything else yields `None`.
    pub fn from_body(body: &[u8]) -> Option<Self> {
        if body.is_empty() {
            return None;
        }
        serde_json::from_slice::<AckBody>(body).ok()?.ack_file
    }
}

/// Position of a push within one directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncCursor {
    dir: String,
    listing: Vec<String>,
    index: usize,
    offset: u32,
    size: u32,
}

impl SyncCursor {
    /// Rebuilds the cursor from the directory contents and the persisted state.
    pub fn resume<F: FileSystem + ?Sized>(
        fs: &mut F,
        dir: &str,
        state: &PushSequentialState,
    ) -> Result<Self, FsError> {
        let listing = sorted_files(fs, dir)?;
        let mut cursor = Self {
            dir: String::from(dir),
            listing,
            index: 0,
            offset: 0,
            size: 0,
        };

        match state.current_file.as_deref() {
            Some(name) => match cursor.position(name) {
                Some(index) => {
                    cursor.index = index;
                    cursor.size = fs.file_size(&cursor.current_path())?;
                    cursor.offset = state.current_offset.unwrap_or(0).min(cursor.size);
                }
                None => {
                    warn!("sync: cursor file vanished dir={} file={}", dir, name);
                    cursor.index = cursor.listing.partition_point(|n| n.as_str() <= name);
                    cursor.load_current(fs)?;
                }
            },
            None => cursor.load_current(fs)?,
        }

        cursor.skip_completed(fs)?;
        Ok(cursor)
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn current_file(&self) -> Option<&str> {
        self.listing.get(self.index).map(String::as_str)
    }

    pub fn current_path(&self) -> String {
        join(&self.dir, self.current_file().unwrap_or_default())
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn file_complete(&self) -> bool {
        self.offset == self.size
    }

    pub fn dir_complete(&self) -> bool {
        self.index >= self.listing.len()
    }

    pub fn remaining_in_file(&self) -> u32 {
        self.size.saturating_sub(self.offset)
    }

    /// Moves past completed files. Leaves the cursor on the first file with
    /// bytes left, or past the end of the listing.
    pub fn skip_completed<F: FileSystem + ?Sized>(&mut self, fs: &mut F) -> Result<(), FsError> {
        while !self.dir_complete() && self.file_complete() {
            if self.index + 1 < self.listing.len() {
                self.index += 1;
                self.load_current(fs)?;
            } else {
                self.index = self.listing.len();
            }
        }
        Ok(())
    }

    /// Records `sent` bytes as accepted by the server.
    pub fn advance(&mut self, sent: u32) {
        self.offset = self.offset.saturating_add(sent).min(self.size);
    }

    /// Treats the current file as ending at the current offset.
    pub fn truncate_here(&mut self) {
        self.size = self.offset;
    }

    /// Overwrites the cursor from a server acknowledgment when it disagrees.
    /// Returns whether the cursor moved.
    pub fn apply_ack<F: FileSystem + ?Sized>(&mut self, fs: &mut F, ack: &AckFile) -> Result<bool, FsError> {
        let AckFile(name, offset, _) = ack;
        let Some(index) = self.position(name) else {
            warn!("sync: ack for unknown file dir={} file={}", self.dir, name);
            return Ok(false);
        };
        if index == self.index && *offset == self.offset {
            return Ok(false);
        }

        if index != self.index {
            self.index = index;
            self.size = fs.file_size(&self.current_path())?;
        }
        if *offset > self.size {
            warn!(
                "sync: ack beyond local size file={} ack={} size={}",
                name, offset, self.size
            );
        }
        self.offset = (*offset).min(self.size);
        Ok(true)
    }

    pub fn to_state(&self) -> PushSequentialState {
        let Some(last) = self.listing.len().checked_sub(1) else {
            return PushSequentialState::default();
        };
        let index = self.index.min(last);
        PushSequentialState {
            current_file: Some(self.listing[index].clone()),
            current_offset: Some(self.offset),
            current_size: Some(self.size),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.listing.iter().position(|n| n == name)
    }

    fn load_current<F: FileSystem + ?Sized>(&mut self, fs: &mut F) -> Result<(), FsError> {
        if !self.dir_complete() {
            self.offset = 0;
            self.size = fs.file_size(&self.current_path())?;
            return Ok(());
        }
        // Past the end: every listed file is done, park on the last one.
        let size = match self.listing.last() {
            Some(last) => fs.file_size(&join(&self.dir, last))?,
            None => 0,
        };
        self.offset = size;
        self.size = size;
        Ok(())
    }
}
