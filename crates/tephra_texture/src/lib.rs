//! Texture management.

pub mod gpu_resource;
pub mod manager;
pub mod settings;
pub mod texture;

mod cache;
mod hotload;
mod scheduler;

pub use manager::TextureManager;
pub use texture::{Texture, TexturePtr, TextureState};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The properties identifying a logical texture: the source path together
/// with the sampling configuration it should be presented with.
///
/// Immutable after construction. The derived ordering is lexicographic by
/// field with the path first, giving the total order the texture cache is
/// keyed by: two properties are equivalent exactly when all fields are
/// equal.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextureProperties {
    /// Virtual filesystem path of the source image.
    pub path: PathBuf,
    /// Filter mode to sample the texture with.
    pub filter: TextureFilter,
    /// Wrap mode to sample the texture with.
    pub wrap: TextureWrap,
    /// Maximum number of samples for anisotropic filtering.
    pub anisotropy: u32,
}

/// How a texture should be filtered when sampled.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TextureFilter {
    Nearest,
    Linear,
    NearestMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapNearest,
    #[default]
    LinearMipmapLinear,
}

/// How texture coordinates outside the [0, 1] range should be handled.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TextureWrap {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

/// Configuration parameters for the [`TextureManager`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureManagerConfig {
    /// Name of the per-directory conversion settings files.
    pub settings_file_name: String,
    /// Root directory for locally generated loose cache files.
    pub loose_cache_dir: PathBuf,
    /// File extension of converted texture files, both archive-packaged and
    /// loose.
    pub cache_extension: String,
    /// Version constant mixed into loose cache fingerprints. Bumping it
    /// invalidates every previously generated loose cache file.
    pub cache_format_version: u32,
    /// How many seconds newer than its archive cache a source file must be
    /// before the cache is considered stale. Absorbs coarse filesystem
    /// timestamp resolution.
    pub archive_mtime_tolerance_secs: u64,
}

impl Default for TextureManagerConfig {
    fn default() -> Self {
        Self {
            settings_file_name: "textures.xml".to_string(),
            loose_cache_dir: PathBuf::from("cache"),
            cache_extension: "dds".to_string(),
            cache_format_version: 1,
            archive_mtime_tolerance_secs: 2,
        }
    }
}

impl TextureProperties {
    /// Creates properties for the given source path with default sampling
    /// configuration.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            filter: TextureFilter::default(),
            wrap: TextureWrap::default(),
            anisotropy: 1,
        }
    }
}

impl TextureFilter {
    /// Returns the equivalent filter that does not sample mipmap levels.
    ///
    /// Used when the loaded resource carries no mipmaps, so that sampling
    /// never addresses levels that do not exist.
    pub fn without_mipmaps(self) -> Self {
        match self {
            Self::Nearest | Self::NearestMipmapNearest | Self::NearestMipmapLinear => Self::Nearest,
            Self::Linear | Self::LinearMipmapNearest | Self::LinearMipmapLinear => Self::Linear,
        }
    }
}
