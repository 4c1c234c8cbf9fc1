//! The texture cache and its loading pipeline.

use crate::{
    TextureManagerConfig, TextureProperties, cache,
    gpu_resource::{GpuTextureHandle, RenderDevice, TextureFormatFlags},
    hotload::HotloadIndex,
    scheduler::{CompletedConversion, ConversionRequest, ConversionScheduler},
    settings::{ConversionSettings, SettingsFile, TextureConverter},
    texture::{Texture, TexturePtr, TextureState},
};
use rustc_hash::FxHashMap;
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    rc::Rc,
    sync::Arc,
};
use tephra_vfs::Vfs;

/// The central texture registry: deduplicates entries by their properties,
/// drives every entry through its loading state machine and invalidates
/// entries when files they depend on change.
///
/// Driven by a single owner thread; no method blocks on the conversion
/// worker. Entries are never evicted: the cache holds them for its own
/// lifetime.
pub struct TextureManager {
    vfs: Arc<dyn Vfs>,
    device: Box<dyn RenderDevice>,
    converter: Arc<dyn TextureConverter>,
    config: TextureManagerConfig,
    scheduler: ConversionScheduler,
    /// Shared placeholder every entry holds until its own resource is
    /// ready, and again after hotload invalidation.
    default_handle: GpuTextureHandle,
    /// Shared visually-obvious placeholder substituted on any load or
    /// conversion failure.
    error_handle: GpuTextureHandle,
    error_texture: TexturePtr,
    cache: BTreeMap<TextureProperties, TexturePtr>,
    hotload: HotloadIndex,
    /// Memoized per-directory settings files, with [`None`] recording that
    /// the file does not exist so absence is not re-probed every load.
    settings_files: FxHashMap<PathBuf, Option<Rc<SettingsFile>>>,
}

impl TextureManager {
    /// Creates a texture manager over the given collaborators, creating the
    /// default (grey) and error (magenta) placeholder resources up front so
    /// they are available without any file access.
    pub fn new(
        vfs: Arc<dyn Vfs>,
        device: Box<dyn RenderDevice>,
        converter: Arc<dyn TextureConverter>,
        config: TextureManagerConfig,
    ) -> Self {
        let default_handle =
            device.wrap_raw_pixels(1, 1, &[64, 64, 64, 255], "(default texture)");
        let error_handle = device.wrap_raw_pixels(1, 1, &[255, 0, 255, 255], "(error texture)");

        let error_texture = Texture::new(
            TextureProperties::new("(error texture)"),
            Rc::clone(&error_handle),
        );
        error_texture.set_state(TextureState::Loaded);
        error_texture.set_base_color([255, 0, 255, 255]);

        let scheduler = ConversionScheduler::new(Arc::clone(&vfs), Arc::clone(&converter));

        Self {
            vfs,
            device,
            converter,
            config,
            scheduler,
            default_handle,
            error_handle,
            error_texture,
            cache: BTreeMap::new(),
            hotload: HotloadIndex::default(),
            settings_files: FxHashMap::default(),
        }
    }

    /// Returns the entry for the given properties, creating it in the
    /// [`Unloaded`](TextureState::Unloaded) state if no equivalent entry
    /// exists yet.
    ///
    /// Never returns two distinct entries for equal properties.
    pub fn create_texture(&mut self, properties: TextureProperties) -> TexturePtr {
        if let Some(existing) = self.cache.get(&properties) {
            return Rc::clone(existing);
        }

        let texture = Texture::new(properties.clone(), Rc::clone(&self.default_handle));
        self.hotload.register(&properties.path, &texture);
        self.cache.insert(properties, Rc::clone(&texture));
        texture
    }

    /// Returns the shared entry representing a failed texture: a flat
    /// magenta resource, already loaded.
    pub fn error_texture(&self) -> TexturePtr {
        Rc::clone(&self.error_texture)
    }

    /// Attempts to bring the given entry to the
    /// [`Loaded`](TextureState::Loaded) state from a cached file, requesting
    /// high-priority conversion on a cache miss. An entry waiting in the
    /// prefetch pipeline is escalated. Returns whether the entry is loaded.
    pub fn try_load(&mut self, texture: &TexturePtr) -> bool {
        match texture.state() {
            TextureState::Unloaded | TextureState::PrefetchNeedsLoading => {
                if self.try_loading_cached(texture) {
                    texture.set_state(TextureState::Loaded);
                } else {
                    texture.set_state(TextureState::HighNeedsConverting);
                }
            }
            // The prefetch cache attempt already missed; go straight to
            // high-priority conversion
            TextureState::PrefetchNeedsConverting => {
                texture.set_state(TextureState::HighNeedsConverting);
            }
            _ => {}
        }

        texture.is_loaded()
    }

    /// Requests that the given entry is loaded in the background before it
    /// is needed for rendering. Has no effect unless the entry is
    /// [`Unloaded`](TextureState::Unloaded).
    pub fn prefetch(&mut self, texture: &TexturePtr) {
        if texture.state() == TextureState::Unloaded {
            texture.set_state(TextureState::PrefetchNeedsLoading);
        }
    }

    /// Binds the entry's current resource to the given texture unit,
    /// attempting to load it first. If loading has not completed (or
    /// failed), the bound resource is the corresponding placeholder.
    pub fn bind(&mut self, texture: &TexturePtr, unit: u32) {
        self.try_load(texture);
        texture.handle().bind(unit);
    }

    /// Advances the loading pipeline by at most one step. Called once per
    /// engine tick. Returns whether any work happened.
    ///
    /// Render-triggered loads preempt speculative prefetch work, and at
    /// most one conversion job is in flight at a time. Finding the next
    /// entry to service scans the whole cache; iterating over all textures
    /// isn't optimally efficient, but it is simpler than maintaining
    /// separate queues and has not shown up in profiles.
    pub fn make_progress(&mut self) -> bool {
        // Apply any completed conversion task
        if let Some(CompletedConversion {
            texture,
            dest_path,
            success,
        }) = self.scheduler.poll()
        {
            if success {
                self.load_into(&texture, &dest_path);
            } else {
                log::error!(
                    "Texture failed to convert: {}",
                    texture.properties().path.display()
                );
                texture.set_handle(Rc::clone(&self.error_handle));
            }
            // Terminal either way; failed conversions are not retried
            texture.set_state(TextureState::Loaded);
            return true;
        }

        // Only push new conversion requests if none is already in flight
        let converter_busy = self.scheduler.is_busy();

        if !converter_busy
            && let Some(texture) = self.find_in_state(TextureState::HighNeedsConverting)
        {
            texture.set_state(TextureState::HighIsConverting);
            self.request_conversion(&texture);
            return true;
        }

        // Try loading prefetched textures from their cache
        if let Some(texture) = self.find_in_state(TextureState::PrefetchNeedsLoading) {
            if self.try_loading_cached(&texture) {
                texture.set_state(TextureState::Loaded);
            } else {
                texture.set_state(TextureState::PrefetchNeedsConverting);
            }
            return true;
        }

        // With nothing better to do, start converting prefetched textures
        if !converter_busy
            && let Some(texture) = self.find_in_state(TextureState::PrefetchNeedsConverting)
        {
            texture.set_state(TextureState::PrefetchIsConverting);
            self.request_conversion(&texture);
            return true;
        }

        false
    }

    /// Notifies the manager that the file at the given path changed on
    /// disk. Any memoized settings file for the path is discarded and every
    /// live entry depending on the path is reset to
    /// [`Unloaded`](TextureState::Unloaded) with the default placeholder,
    /// so its next use reloads it.
    pub fn on_file_changed(&mut self, path: &Path) {
        self.settings_files.remove(path);

        for texture in self.hotload.live_dependents_of(path) {
            texture.set_state(TextureState::Unloaded);
            texture.set_handle(Rc::clone(&self.default_handle));
        }
    }

    fn find_in_state(&self, state: TextureState) -> Option<TexturePtr> {
        self.cache
            .values()
            .find(|texture| texture.state() == state)
            .cloned()
    }

    /// Attempts to load a cached version of the texture. Returns `true` if
    /// the entry reached its terminal resource (including the error
    /// placeholder), or `false` if a loose cache must be generated first.
    fn try_loading_cached(&mut self, texture: &TexturePtr) -> bool {
        let source_path = texture.properties().path.clone();
        let archive_cache_path = cache::archive_cache_path(&source_path, &self.config);

        // The archive cache file is preferred whenever it is still valid
        if cache::can_use_archive_cache(
            self.vfs.as_ref(),
            &source_path,
            &archive_cache_path,
            &self.config,
        ) {
            self.load_into(texture, &archive_cache_path);
            return true;
        }

        // Fail if there is neither a source nor an archive cache
        if self.vfs.metadata(&source_path).is_none() {
            log::error!(
                "Texture failed to find source file: {}",
                source_path.display()
            );
            texture.set_handle(Rc::clone(&self.error_handle));
            return true;
        }

        // Look for a loose cache of the source file
        let Some(loose_cache_path) = self.loose_cache_path(texture) else {
            texture.set_handle(Rc::clone(&self.error_handle));
            return true;
        };
        if self.vfs.metadata(&loose_cache_path).is_some() {
            self.load_into(texture, &loose_cache_path);
            return true;
        }

        // No cache; it has to be generated
        false
    }

    /// Loads the cached texture file at the given path into the entry,
    /// substituting the error placeholder on any failure. Failures are
    /// logged, never propagated: rendering continues with an
    /// obviously-wrong texture.
    fn load_into(&mut self, texture: &TexturePtr, path: &Path) {
        let label = texture.properties().path.display().to_string();

        let handle = match self
            .vfs
            .read(path)
            .and_then(|contents| self.device.load_encoded(&contents, &label))
        {
            Ok(handle) => handle,
            Err(error) => {
                log::error!("Texture failed to load: {label}: {error:#}");
                texture.set_handle(Rc::clone(&self.error_handle));
                return;
            }
        };

        let flags = handle.format_flags();

        texture.set_base_color(handle.average_color());

        // Avoid mipmapped filters unless the resource already has mipmaps,
        // so sampling never addresses missing levels
        let mut filter = texture.properties().filter;
        if !flags.contains(TextureFormatFlags::MIPMAPS) {
            filter = filter.without_mipmaps();
        }
        handle.set_sampler(filter, texture.properties().wrap, texture.properties().anisotropy);

        if let Err(error) = handle.upload() {
            log::error!("Texture failed to upload: {label}: {error:#}");
            // Dropping the handle releases the partially-uploaded resource
            texture.set_handle(Rc::clone(&self.error_handle));
            return;
        }

        texture.set_handle(handle);
    }

    /// Submits an asynchronous conversion from the entry's source file to
    /// its loose cache path. If the source has disappeared since the cache
    /// miss was decided, the entry resolves directly to the error
    /// placeholder.
    fn request_conversion(&mut self, texture: &TexturePtr) {
        let Some(dest_path) = self.loose_cache_path(texture) else {
            log::error!(
                "Texture source file disappeared before conversion: {}",
                texture.properties().path.display()
            );
            texture.set_handle(Rc::clone(&self.error_handle));
            texture.set_state(TextureState::Loaded);
            return;
        };

        let settings = self.converter_settings(texture);

        self.scheduler.submit(
            Rc::clone(texture),
            ConversionRequest {
                source_path: texture.properties().path.clone(),
                dest_path,
                settings,
            },
        );
    }

    /// Returns the loose cache path for the entry, fingerprinted over the
    /// source metadata and the resolved conversion settings, or [`None`] if
    /// the source file no longer exists.
    fn loose_cache_path(&mut self, texture: &TexturePtr) -> Option<PathBuf> {
        let source_path = texture.properties().path.clone();

        let Some(metadata) = self.vfs.metadata(&source_path) else {
            log::warn!("Texture source file disappeared: {}", source_path.display());
            return None;
        };

        let settings = self.converter_settings(texture);

        Some(cache::loose_cache_path(
            &source_path,
            &metadata,
            &settings,
            &self.config,
        ))
    }

    /// Computes the conversion settings applying to the entry by folding
    /// the settings files of its directory and all ancestor directories,
    /// closest-to-source last. Every settings file path involved (present
    /// or not) becomes a hotload dependency of the entry.
    fn converter_settings(&mut self, texture: &TexturePtr) -> ConversionSettings {
        let source_path = texture.properties().path.clone();

        let mut files = Vec::new();
        let mut dir = PathBuf::new();
        for component in source_path.components() {
            let settings_path = dir.join(&self.config.settings_file_name);
            self.hotload.register(&settings_path, texture);
            if let Some(file) = self.settings_file(&settings_path) {
                files.push(file);
            }
            dir.push(component);
        }

        let file_name = source_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_refs: Vec<&SettingsFile> = files.iter().map(Rc::as_ref).collect();
        self.converter.compute_settings(&file_name, &file_refs)
    }

    /// Returns the memoized settings file at the given path, or [`None`] if
    /// it does not exist or fails to parse. Absence is memoized too, so
    /// missing files cost one probe until they change.
    fn settings_file(&mut self, path: &Path) -> Option<Rc<SettingsFile>> {
        if let Some(memoized) = self.settings_files.get(path) {
            return memoized.clone();
        }

        let loaded = if self.vfs.metadata(path).is_some() {
            match self
                .vfs
                .read(path)
                .and_then(|contents| self.converter.load_settings_file(&contents))
            {
                Ok(file) => Some(Rc::new(file)),
                Err(error) => {
                    log::error!(
                        "Failed to load texture settings file {}: {:#}",
                        path.display(),
                        error
                    );
                    None
                }
            }
        } else {
            None
        };

        self.settings_files.insert(path.to_path_buf(), loaded.clone());
        loaded
    }
}

impl fmt::Debug for TextureManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureManager")
            .field("config", &self.config)
            .field("n_textures", &self.cache.len())
            .field("converter_busy", &self.scheduler.is_busy())
            .finish_non_exhaustive()
    }
}
