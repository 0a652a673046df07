//! SD-card filesystem abstraction.
//!
//! Paths are relative to the card root and use `/` as separator. Listings
//! are returned in the backend's order; use [`sorted_files`] when the
//! sequence matters.

use alloc::{
    collections::{BTreeMap, BTreeSet},
    format,
    string::{String, ToString},
    vec,
    vec::Vec,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FsError {
    NotFound,
    /// No card inserted or the card did not answer.
    NoCard,
    /// Operation not available on this backend.
    Unsupported,
    Io,
}

pub trait FileSystem {
    /// Names of the direct children of `dir`, files and directories alike.
    fn list_dir(&mut self, dir: &str) -> Result<Vec<String>, FsError>;
    fn is_dir(&mut self, path: &str) -> Result<bool, FsError>;
    fn file_size(&mut self, path: &str) -> Result<u32, FsError>;
    /// Reads up to `buf.len()` bytes starting at `offset`. Returns the count read.
    fn read_at(&mut self, path: &str, offset: u32, buf: &mut [u8]) -> Result<usize, FsError>;
    /// Creates or truncates `path`. The parent directory must exist.
    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), FsError>;
    /// Appends to `path`, creating it when missing. The parent directory must exist.
    fn append(&mut self, path: &str, data: &[u8]) -> Result<(), FsError>;
    fn create_dir_all(&mut self, path: &str) -> Result<(), FsError>;
    fn remove_file(&mut self, path: &str) -> Result<(), FsError>;
    fn remove_dir_all(&mut self, path: &str) -> Result<(), FsError>;
    /// Moves a file or a whole directory tree.
    fn rename(&mut self, from: &str, to: &str) -> Result<(), FsError>;

    fn exists(&mut self, path: &str) -> Result<bool, FsError> {
        match self.is_dir(path) {
            Ok(_) => Ok(true),
            Err(FsError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn read_to_vec(&mut self, path: &str) -> Result<Vec<u8>, FsError> {
        let size = self.file_size(path)? as usize;
        let mut out = vec![0u8; size];
        let mut filled = 0usize;
        while filled < size {
            let n = self.read_at(path, filled as u32, &mut out[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.truncate(filled);
        Ok(out)
    }
}

pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        dir.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

/// Regular files of `dir`, sorted lexicographically. A missing directory lists as empty.
pub fn sorted_files<F: FileSystem + ?Sized>(fs: &mut F, dir: &str) -> Result<Vec<String>, FsError> {
    let names = match fs.list_dir(dir) {
        Ok(names) => names,
        Err(FsError::NotFound) => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut files = Vec::with_capacity(names.len());
    for name in names {
        if !fs.is_dir(&join(dir, &name))? {
            files.push(name);
        }
    }
    files.sort();
    Ok(files)
}

/// In-memory filesystem used during bring-up and in tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryFs {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    card_missing: bool,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation fails with [`FsError::NoCard`] afterwards.
    pub fn eject(&mut self) {
        self.card_missing = true;
    }

    /// Test helper: writes `data` to `path`, creating parent directories.
    pub fn put(&mut self, path: &str, data: &[u8]) {
        let (parent, _) = split_parent(path);
        let _ = self.create_dir_all(parent);
        self.files.insert(path.to_string(), data.to_vec());
    }

    pub fn contents(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    fn check_card(&self) -> Result<(), FsError> {
        if self.card_missing {
            Err(FsError::NoCard)
        } else {
            Ok(())
        }
    }

    fn dir_exists(&self, path: &str) -> bool {
        path.is_empty() || self.dirs.contains(path)
    }

    fn require_parent(&self, path: &str) -> Result<(), FsError> {
        let (parent, _) = split_parent(path);
        if self.dir_exists(parent) {
            Ok(())
        } else {
            Err(FsError::NotFound)
        }
    }
}

fn is_under(path: &str, dir: &str) -> bool {
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

impl FileSystem for MemoryFs {
    fn list_dir(&mut self, dir: &str) -> Result<Vec<String>, FsError> {
        self.check_card()?;
        let dir = dir.trim_end_matches('/');
        if !self.dir_exists(dir) {
            return Err(FsError::NotFound);
        }
        let children = self
            .files
            .keys()
            .chain(self.dirs.iter())
            .filter(|path| split_parent(path).0 == dir)
            .map(|path| split_parent(path).1.to_string());
        Ok(children.collect())
    }

    fn is_dir(&mut self, path: &str) -> Result<bool, FsError> {
        self.check_card()?;
        let path = path.trim_end_matches('/');
        if self.dir_exists(path) {
            Ok(true)
        } else if self.files.contains_key(path) {
            Ok(false)
        } else {
            Err(FsError::NotFound)
        }
    }

    fn file_size(&mut self, path: &str) -> Result<u32, FsError> {
        self.check_card()?;
        self.files
            .get(path)
            .map(|data| data.len() as u32)
            .ok_or(FsError::NotFound)
    }

    fn read_at(&mut self, path: &str, offset: u32, buf: &mut [u8]) -> Result<usize, FsError> {
        self.check_card()?;
        let data = self.files.get(path).ok_or(FsError::NotFound)?;
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), FsError> {
        self.check_card()?;
        self.require_parent(path)?;
        self.files.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn append(&mut self, path: &str, data: &[u8]) -> Result<(), FsError> {
        self.check_card()?;
        self.require_parent(path)?;
        self.files
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn create_dir_all(&mut self, path: &str) -> Result<(), FsError> {
        self.check_card()?;
        let mut current = String::new();
        for part in path.split('/').filter(|part| !part.is_empty()) {
            current = join(&current, part);
            if self.files.contains_key(&current) {
                return Err(FsError::Io);
            }
            self.dirs.insert(current.clone());
        }
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> Result<(), FsError> {
        self.check_card()?;
        self.files.remove(path).map(|_| ()).ok_or(FsError::NotFound)
    }

    fn remove_dir_all(&mut self, path: &str) -> Result<(), FsError> {
        self.check_card()?;
        let path = path.trim_end_matches('/');
        if !self.dirs.remove(path) {
            return Err(FsError::NotFound);
        }
        self.files.retain(|file, _| !is_under(file, path));
        self.dirs.retain(|dir| !is_under(dir, path));
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), FsError> {
        self.check_card()?;
        self.require_parent(to)?;
        if self.exists(to)? {
            return Err(FsError::Io);
        }
        if let Some(data) = self.files.remove(from) {
            self.files.insert(to.to_string(), data);
            return Ok(());
        }
        if !self.dirs.remove(from) {
            return Err(FsError::NotFound);
        }
        self.dirs.insert(to.to_string());

        let moved_files: Vec<String> = self
            .files
            .keys()
            .filter(|file| is_under(file, from))
            .cloned()
            .collect();
        for old in moved_files {
            if let Some(data) = self.files.remove(&old) {
                self.files.insert(format!("{}{}", to, &old[from.len()..]), data);
            }
        }
        let moved_dirs: Vec<String> = self
            .dirs
            .iter()
            .filter(|dir| is_under(dir, from))
            .cloned()
            .collect();
        for old in moved_dirs {
            self.dirs.remove(&old);
            self.dirs.insert(format!("{}{}", to, &old[from.len()..]));
        }
        Ok(())
    }
}
