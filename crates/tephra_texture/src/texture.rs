//! Texture entries and their loading states.

use crate::{TextureProperties, gpu_resource::GpuTextureHandle};
use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

/// A shared reference to a [`Texture`] entry. The entry lives as long as
/// any external owner or the texture cache holds a reference to it.
pub type TexturePtr = Rc<Texture>;

/// Loading state of a [`Texture`] entry.
///
/// Only [`Unloaded`](Self::Unloaded) and [`Loaded`](Self::Loaded) are
/// externally meaningful; the remaining states are internal scheduling
/// states of the manager's loading pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TextureState {
    /// Loading has not been requested.
    Unloaded,
    /// Prefetch requested; a cache load attempt is pending.
    PrefetchNeedsLoading,
    /// Prefetch cache load missed; conversion submission is pending.
    PrefetchNeedsConverting,
    /// A prefetch-priority conversion job is in flight.
    PrefetchIsConverting,
    /// Demanded on-demand with no usable cache; conversion submission is
    /// pending and preempts prefetch submissions.
    HighNeedsConverting,
    /// A high-priority conversion job is in flight.
    HighIsConverting,
    /// The entry holds its final resource. Terminal for a load attempt,
    /// including failed ones resolved to the error placeholder.
    Loaded,
}

/// A texture entry managed by the
/// [`TextureManager`](crate::manager::TextureManager).
///
/// The entry holds the only lasting reference to its GPU resource apart
/// from transient clones handed out for binding; replacing the handle drops
/// the previous one first, so at most one resource is ever kept alive per
/// entry.
pub struct Texture {
    properties: TextureProperties,
    state: Cell<TextureState>,
    handle: RefCell<GpuTextureHandle>,
    base_color: Cell<[u8; 4]>,
    self_ref: Weak<Texture>,
}

impl Texture {
    /// Creates a new entry with the given properties, starting out
    /// [`Unloaded`](TextureState::Unloaded) with the given (typically
    /// shared placeholder) handle.
    pub(crate) fn new(properties: TextureProperties, handle: GpuTextureHandle) -> TexturePtr {
        Rc::new_cyclic(|self_ref| Self {
            properties,
            state: Cell::new(TextureState::Unloaded),
            handle: RefCell::new(handle),
            base_color: Cell::new([0; 4]),
            self_ref: self_ref.clone(),
        })
    }

    /// Returns the properties identifying this texture.
    pub fn properties(&self) -> &TextureProperties {
        &self.properties
    }

    /// Returns the current loading state.
    pub fn state(&self) -> TextureState {
        self.state.get()
    }

    /// Whether the entry has finished loading (successfully or resolved to
    /// the error placeholder).
    pub fn is_loaded(&self) -> bool {
        self.state.get() == TextureState::Loaded
    }

    /// Returns the width in pixels of the currently held resource (the
    /// placeholder's until loading completes).
    pub fn width(&self) -> u32 {
        self.handle.borrow().size().0
    }

    /// Returns the height in pixels of the currently held resource (the
    /// placeholder's until loading completes).
    pub fn height(&self) -> u32 {
        self.handle.borrow().size().1
    }

    /// Whether the currently held resource carries an alpha channel.
    pub fn has_alpha(&self) -> bool {
        self.handle
            .borrow()
            .format_flags()
            .contains(crate::gpu_resource::TextureFormatFlags::ALPHA)
    }

    /// Returns the average color of the loaded pixel data as RGBA, or black
    /// until loading completes.
    pub fn base_color(&self) -> [u8; 4] {
        self.base_color.get()
    }

    /// Returns a reference to the currently held GPU resource.
    pub fn handle(&self) -> GpuTextureHandle {
        Rc::clone(&*self.handle.borrow())
    }

    pub(crate) fn set_state(&self, state: TextureState) {
        self.state.set(state);
    }

    /// Replaces the held resource. The previous handle is dropped first, so
    /// a resource this entry exclusively owned is released.
    pub(crate) fn set_handle(&self, handle: GpuTextureHandle) {
        *self.handle.borrow_mut() = handle;
    }

    pub(crate) fn set_base_color(&self, color: [u8; 4]) {
        self.base_color.set(color);
    }

    /// Returns a weak reference to this entry, for registrations that must
    /// not keep it alive.
    pub(crate) fn self_ref(&self) -> Weak<Texture> {
        self.self_ref.clone()
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("properties", &self.properties)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}
