//! Cache-validity decisions and loose-cache path derivation.

use crate::{TextureManagerConfig, settings::ConversionSettings};
use std::{
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
};
use tephra_vfs::{FileMetadata, Vfs};
use xxhash_rust::xxh3::Xxh3;

/// Returns the path of the archive-packaged cache file for the given source
/// path: the converted file shipped alongside the source, with the cache
/// extension appended to the full source name.
pub(crate) fn archive_cache_path(source_path: &Path, config: &TextureManagerConfig) -> PathBuf {
    let mut name = source_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(&config.cache_extension);
    source_path.with_file_name(name)
}

/// Decides whether the archive-packaged cache file can be used in place of
/// re-converting the source file.
///
/// The archive cache is used whenever possible, unless it is superseded by
/// a source file the user has overridden or edited:
/// - without an archive cache there is nothing to use;
/// - without a source file the archive cache is authoritative;
/// - a source from a higher-priority layer than the archive cache must not
///   be shadowed by it;
/// - a source modified more than the configured tolerance after the archive
///   cache has been edited since the cache was packaged.
pub(crate) fn can_use_archive_cache(
    vfs: &dyn Vfs,
    source_path: &Path,
    archive_cache_path: &Path,
    config: &TextureManagerConfig,
) -> bool {
    let source_priority = vfs.file_priority(source_path);
    let Some(archive_priority) = vfs.file_priority(archive_cache_path) else {
        return false;
    };
    let Some(source_priority) = source_priority else {
        return true;
    };

    if archive_priority < source_priority {
        return false;
    }

    if let (Some(source), Some(archive)) = (
        vfs.metadata(source_path),
        vfs.metadata(archive_cache_path),
    ) && source.mtime_secs > archive.mtime_secs
    {
        let how_much_newer = source.mtime_secs - archive.mtime_secs;
        if how_much_newer > config.archive_mtime_tolerance_secs {
            return false;
        }
    }

    true
}

/// Returns the path for storing a loose cache file generated from the given
/// source file, fingerprinted over the source metadata and the conversion
/// settings: `<cacheDir>/<sourceDir>/<sourceName>.<digest>.<ext>`.
///
/// Any edit to the source file or change to the resolved settings yields a
/// different path. The digest is a 64-bit xxh3 in hex; these are local
/// cache files, so low collision-resistance is acceptable.
pub(crate) fn loose_cache_path(
    source_path: &Path,
    source_metadata: &FileMetadata,
    settings: &ConversionSettings,
    config: &TextureManagerConfig,
) -> PathBuf {
    // Skip the lowest mtime bit, since zip and FAT timestamps don't
    // preserve it
    let mtime = source_metadata.mtime_secs & !1;

    let mut hasher = Xxh3::new();
    mtime.hash(&mut hasher);
    source_metadata.size.hash(&mut hasher);
    config.cache_format_version.hash(&mut hasher);
    settings.hash(&mut hasher);
    let digest = hasher.finish();

    let mut name = source_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(&format!(".{digest:016x}.{}", config.cache_extension));

    let mut path = config.loose_cache_dir.clone();
    if let Some(source_dir) = source_path.parent() {
        path.push(source_dir);
    }
    path.push(name);
    path
}
