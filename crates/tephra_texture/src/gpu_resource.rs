//! Interface to the GPU-resource collaborator.

use crate::{TextureFilter, TextureWrap};
use anyhow::Result;
use bitflags::bitflags;
use std::rc::Rc;

bitflags! {
    /// Properties of the pixel data held by a GPU texture resource.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct TextureFormatFlags: u8 {
        /// The resource carries an alpha channel.
        const ALPHA = 1 << 0;
        /// The resource carries precomputed mipmap levels.
        const MIPMAPS = 1 << 1;
    }
}

/// A shared reference to a GPU texture resource. The resource is released
/// when the last reference is dropped, so replacing the only handle to a
/// resource releases it.
pub type GpuTextureHandle = Rc<dyn GpuTexture>;

/// A GPU texture resource created by a [`RenderDevice`].
///
/// All methods are driven from the thread owning the render device.
pub trait GpuTexture {
    /// Returns the width and height of the resource in pixels.
    fn size(&self) -> (u32, u32);

    /// Returns the format flags of the resource.
    fn format_flags(&self) -> TextureFormatFlags;

    /// Returns the average color of the pixel data as RGBA.
    fn average_color(&self) -> [u8; 4];

    /// Configures how the resource is sampled.
    fn set_sampler(&self, filter: TextureFilter, wrap: TextureWrap, anisotropy: u32);

    /// Uploads the pixel data to the device.
    ///
    /// # Errors
    /// Returns an error if the device rejects the upload.
    fn upload(&self) -> Result<()>;

    /// Binds the resource to the given texture unit.
    fn bind(&self, unit: u32);
}

/// The device-side collaborator creating GPU texture resources.
pub trait RenderDevice {
    /// Wraps the given raw RGBA pixel data in a new resource.
    fn wrap_raw_pixels(&self, width: u32, height: u32, pixels: &[u8], label: &str)
    -> GpuTextureHandle;

    /// Decodes the given encoded texture file contents into a new resource.
    ///
    /// # Errors
    /// Returns an error if the data is corrupt or in an unsupported format.
    fn load_encoded(&self, contents: &[u8], label: &str) -> Result<GpuTextureHandle>;
}
