//! Virtual filesystem interface.

mod memory;

pub use memory::MemoryVfs;

use anyhow::Result;
use std::{fmt, path::Path};

/// Size and modification time of a file in the virtual filesystem.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileMetadata {
    /// Size of the file contents in bytes.
    pub size: u64,
    /// Modification time in whole seconds since the Unix epoch. Storage
    /// formats with coarser timestamp resolution round or truncate this
    /// value, which consumers must tolerate.
    pub mtime_secs: u64,
}

/// A virtual filesystem resolving logical paths against a priority-ordered
/// set of content layers. Higher-priority layers (user overrides, mods)
/// shadow lower-priority ones for the same logical path.
///
/// Implementations must be safe to share with background worker threads.
pub trait Vfs: fmt::Debug + Send + Sync {
    /// Returns the priority of the layer the given path resolves to, or
    /// [`None`] if the path does not exist.
    fn file_priority(&self, path: &Path) -> Option<u32>;

    /// Returns the metadata of the file at the given path, or [`None`] if
    /// the path does not exist.
    fn metadata(&self, path: &Path) -> Option<FileMetadata>;

    /// Reads the full contents of the file at the given path.
    ///
    /// # Errors
    /// Returns an error if the path does not exist or the underlying read
    /// fails.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Writes the given contents to the writable layer under the given
    /// path, replacing any previous generated file at that path.
    ///
    /// # Errors
    /// Returns an error if the underlying write fails.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
}
