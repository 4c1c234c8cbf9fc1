//! In-memory virtual filesystem.

use crate::{FileMetadata, Vfs};
use anyhow::{Result, anyhow};
use rustc_hash::FxHashMap;
use std::{
    path::{Path, PathBuf},
    sync::RwLock,
};

/// A fully in-memory [`Vfs`] implementation.
///
/// Files are stored with an explicit layer priority and modification time,
/// which makes cache-validity and hotloading scenarios straightforward to
/// set up in tests and headless tools.
#[derive(Debug, Default)]
pub struct MemoryVfs {
    files: RwLock<FxHashMap<PathBuf, MemoryFile>>,
}

#[derive(Clone, Debug)]
struct MemoryFile {
    contents: Vec<u8>,
    priority: u32,
    mtime_secs: u64,
}

impl MemoryVfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a file at priority 0 with modification time 0, replacing any
    /// existing file at the same path.
    pub fn insert_file(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.insert_file_with(path, contents, 0, 0);
    }

    /// Inserts a file with the given layer priority and modification time,
    /// replacing any existing file at the same path.
    pub fn insert_file_with(
        &self,
        path: impl Into<PathBuf>,
        contents: impl Into<Vec<u8>>,
        priority: u32,
        mtime_secs: u64,
    ) {
        self.files.write().unwrap().insert(
            path.into(),
            MemoryFile {
                contents: contents.into(),
                priority,
                mtime_secs,
            },
        );
    }

    /// Removes the file at the given path if it exists.
    pub fn remove_file(&self, path: &Path) {
        self.files.write().unwrap().remove(path);
    }

    /// Updates the modification time of an existing file.
    pub fn set_mtime(&self, path: &Path, mtime_secs: u64) {
        if let Some(file) = self.files.write().unwrap().get_mut(path) {
            file.mtime_secs = mtime_secs;
        }
    }
}

impl Vfs for MemoryVfs {
    fn file_priority(&self, path: &Path) -> Option<u32> {
        self.files.read().unwrap().get(path).map(|file| file.priority)
    }

    fn metadata(&self, path: &Path) -> Option<FileMetadata> {
        self.files.read().unwrap().get(path).map(|file| FileMetadata {
            size: file.contents.len() as u64,
            mtime_secs: file.mtime_secs,
        })
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .read()
            .unwrap()
            .get(path)
            .map(|file| file.contents.clone())
            .ok_or_else(|| anyhow!("File not found: {}", path.display()))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.insert_file_with(path, contents, 0, 0);
        Ok(())
    }
}
