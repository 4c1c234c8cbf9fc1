//! Index of file dependencies for hotload invalidation.

use crate::texture::{Texture, TexturePtr};
use rustc_hash::FxHashMap;
use std::{
    path::{Path, PathBuf},
    rc::{Rc, Weak},
};

/// Maps filesystem paths to the texture entries whose loaded state depends
/// on them (source images and every ancestor directory's settings file).
///
/// Entries are held weakly so registration never keeps a texture alive;
/// dead references are pruned lazily when a path's dependents are looked
/// up.
#[derive(Debug, Default)]
pub(crate) struct HotloadIndex {
    dependents: FxHashMap<PathBuf, Vec<Weak<Texture>>>,
}

impl HotloadIndex {
    /// Registers the given entry as depending on the given path. Repeated
    /// registrations of the same entry are collapsed.
    pub(crate) fn register(&mut self, path: &Path, texture: &TexturePtr) {
        let dependents = self.dependents.entry(path.to_path_buf()).or_default();
        if !dependents
            .iter()
            .any(|registered| registered.as_ptr() == Rc::as_ptr(texture))
        {
            dependents.push(texture.self_ref());
        }
    }

    /// Returns the live entries registered under the given path, pruning
    /// any that have been destroyed in the meantime.
    pub(crate) fn live_dependents_of(&mut self, path: &Path) -> Vec<TexturePtr> {
        let Some(dependents) = self.dependents.get_mut(path) else {
            return Vec::new();
        };
        let mut live = Vec::with_capacity(dependents.len());
        dependents.retain(|registered| match registered.upgrade() {
            Some(texture) => {
                live.push(texture);
                true
            }
            None => false,
        });
        live
    }
}
