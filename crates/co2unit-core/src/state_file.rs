//! JSON state and config files with default-on-missing semantics.
//!
//! A missing file or a missing key yields the default value. A file that
//! does not parse is replaced by the full default and a warning is logged.

use log::warn;
use serde::{Serialize, de::DeserializeOwned};

use crate::fs::{FileSystem, FsError};

pub fn load_or_default<F, T>(fs: &mut F, path: &str) -> T
where
    F: FileSystem + ?Sized,
    T: DeserializeOwned + Default,
{
    let bytes = match fs.read_to_vec(path) {
        Ok(bytes) => bytes,
        Err(FsError::NotFound) => return T::default(),
        Err(err) => {
            warn!("state: read failed path={} err={:?}; using defaults", path, err);
            return T::default();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            warn!("state: corrupt json path={} err={}; using defaults", path, err);
            T::default()
        }
    }
}

pub fn save<F, T>(fs: &mut F, path: &str, value: &T) -> Result<(), FsError>
where
    F: FileSystem + ?Sized,
    T: Serialize,
{
    let bytes = serde_json::to_vec(value).map_err(|_| FsError::Io)?;
    fs.write_file(path, &bytes)
}
