//! Conversion settings and the interface to the conversion collaborator.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Concrete settings for converting one source image into a cached texture
/// file.
///
/// Hashed field by field into the loose-cache fingerprint, so any change
/// here invalidates previously generated caches for affected textures.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversionSettings {
    /// Compression format of the converted file.
    pub format: CompressionFormat,
    /// Whether mipmap levels are generated during conversion.
    pub generate_mipmaps: bool,
    /// Whether the image is treated as a normal map (affects channel
    /// weighting during compression).
    pub normal_map: bool,
}

/// Compression format for converted texture files.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionFormat {
    #[default]
    Dxt1,
    Dxt3,
    Dxt5,
    Uncompressed,
}

/// Settings overrides from a single per-directory settings file. Rules are
/// applied in file order; rules from files closer to the source image are
/// applied later and therefore win.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsFile {
    pub rules: Vec<SettingsRule>,
}

/// A single override rule in a [`SettingsFile`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsRule {
    /// File-name suffix the rule applies to, or [`None`] to apply to every
    /// file in the directory tree below the settings file.
    pub pattern: Option<String>,
    pub settings: PartialSettings,
}

/// A partial settings value; unset fields leave the folded settings
/// untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSettings {
    pub format: Option<CompressionFormat>,
    pub generate_mipmaps: Option<bool>,
    pub normal_map: Option<bool>,
}

impl SettingsRule {
    fn applies_to(&self, file_name: &str) -> bool {
        self.pattern
            .as_ref()
            .is_none_or(|pattern| file_name.ends_with(pattern.as_str()))
    }
}

impl PartialSettings {
    /// Applies every set field onto the given settings.
    pub fn apply_to(&self, settings: &mut ConversionSettings) {
        if let Some(format) = self.format {
            settings.format = format;
        }
        if let Some(generate_mipmaps) = self.generate_mipmaps {
            settings.generate_mipmaps = generate_mipmaps;
        }
        if let Some(normal_map) = self.normal_map {
            settings.normal_map = normal_map;
        }
    }
}

/// The conversion collaborator: parses settings files, folds them into
/// concrete settings and performs the actual pixel re-encoding.
///
/// [`convert`](Self::convert) is executed on the conversion scheduler's
/// worker thread; the remaining methods are called on the owner thread.
pub trait TextureConverter: Send + Sync {
    /// Parses the contents of a per-directory settings file.
    ///
    /// # Errors
    /// Returns an error if the contents are malformed.
    fn load_settings_file(&self, contents: &[u8]) -> Result<SettingsFile>;

    /// Folds the given settings files, ordered root-to-leaf, into concrete
    /// settings for the named file. Files closer to the source win.
    fn compute_settings(&self, file_name: &str, files: &[&SettingsFile]) -> ConversionSettings {
        let mut settings = ConversionSettings::default();
        for file in files {
            for rule in &file.rules {
                if rule.applies_to(file_name) {
                    rule.settings.apply_to(&mut settings);
                }
            }
        }
        settings
    }

    /// Converts the given source image contents into the cached texture
    /// format.
    ///
    /// # Errors
    /// Returns an error if the source cannot be decoded or re-encoded.
    fn convert(&self, file_name: &str, source: &[u8], settings: &ConversionSettings)
    -> Result<Vec<u8>>;
}
