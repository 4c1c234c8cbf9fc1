//! Integration tests for the texture loading lifecycle, using stub GPU and
//! conversion collaborators over an in-memory filesystem.

use anyhow::{Result, bail};
use std::{
    cell::Cell,
    path::Path,
    rc::Rc,
    sync::Arc,
    thread,
    time::Duration,
};
use tephra_texture::{
    TextureManager, TextureManagerConfig, TextureProperties, TexturePtr, TextureState,
    gpu_resource::{GpuTexture, GpuTextureHandle, RenderDevice, TextureFormatFlags},
    settings::{
        CompressionFormat, ConversionSettings, PartialSettings, SettingsFile, SettingsRule,
        TextureConverter,
    },
};
use tephra_vfs::MemoryVfs;

/// GPU resource stub whose behavior is driven by the decoded contents:
/// contents starting with `corrupt` fail decoding, contents containing
/// `failupload` fail uploading, and `alpha`/`mips` markers set the
/// corresponding format flags.
struct StubResource {
    size: (u32, u32),
    flags: TextureFormatFlags,
    average_color: [u8; 4],
    fail_upload: bool,
    last_bound_unit: Cell<Option<u32>>,
}

impl GpuTexture for StubResource {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn format_flags(&self) -> TextureFormatFlags {
        self.flags
    }

    fn average_color(&self) -> [u8; 4] {
        self.average_color
    }

    fn set_sampler(
        &self,
        _filter: tephra_texture::TextureFilter,
        _wrap: tephra_texture::TextureWrap,
        _anisotropy: u32,
    ) {
    }

    fn upload(&self) -> Result<()> {
        if self.fail_upload {
            bail!("Device rejected upload");
        }
        Ok(())
    }

    fn bind(&self, unit: u32) {
        self.last_bound_unit.set(Some(unit));
    }
}

struct StubDevice;

impl RenderDevice for StubDevice {
    fn wrap_raw_pixels(
        &self,
        width: u32,
        height: u32,
        pixels: &[u8],
        _label: &str,
    ) -> GpuTextureHandle {
        Rc::new(StubResource {
            size: (width, height),
            flags: TextureFormatFlags::empty(),
            average_color: [pixels[0], pixels[1], pixels[2], pixels[3]],
            fail_upload: false,
            last_bound_unit: Cell::new(None),
        })
    }

    fn load_encoded(&self, contents: &[u8], _label: &str) -> Result<GpuTextureHandle> {
        if contents.starts_with(b"corrupt") {
            bail!("Unrecognized texture file format");
        }
        let contains = |marker: &[u8]| {
            contents
                .windows(marker.len())
                .any(|window| window == marker)
        };
        let mut flags = TextureFormatFlags::empty();
        if contains(b"alpha") {
            flags |= TextureFormatFlags::ALPHA;
        }
        if contains(b"mips") {
            flags |= TextureFormatFlags::MIPMAPS;
        }
        Ok(Rc::new(StubResource {
            size: (4, 4),
            flags,
            average_color: [10, 20, 30, 40],
            fail_upload: contains(b"failupload"),
            last_bound_unit: Cell::new(None),
        }))
    }
}

/// Converter stub: conversion prefixes the source bytes with `converted:`,
/// and settings files hold one `key=value` override per line (optionally
/// `suffix|key=value` to restrict the rule to matching file names).
struct StubConverter;

impl TextureConverter for StubConverter {
    fn load_settings_file(&self, contents: &[u8]) -> Result<SettingsFile> {
        let text = std::str::from_utf8(contents)?;
        let mut rules = Vec::new();
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            let (pattern, assignment) = match line.split_once('|') {
                Some((pattern, assignment)) => (Some(pattern.to_string()), assignment),
                None => (None, line),
            };
            let Some((key, value)) = assignment.split_once('=') else {
                bail!("Malformed settings line: {line}");
            };
            let mut settings = PartialSettings::default();
            match key.trim() {
                "format" => {
                    settings.format = Some(match value.trim() {
                        "dxt1" => CompressionFormat::Dxt1,
                        "dxt3" => CompressionFormat::Dxt3,
                        "dxt5" => CompressionFormat::Dxt5,
                        "uncompressed" => CompressionFormat::Uncompressed,
                        other => bail!("Unknown format: {other}"),
                    });
                }
                "mipmaps" => settings.generate_mipmaps = Some(value.trim() == "true"),
                "normal_map" => settings.normal_map = Some(value.trim() == "true"),
                other => bail!("Unknown settings key: {other}"),
            }
            rules.push(SettingsRule { pattern, settings });
        }
        Ok(SettingsFile { rules })
    }

    fn convert(
        &self,
        _file_name: &str,
        source: &[u8],
        _settings: &ConversionSettings,
    ) -> Result<Vec<u8>> {
        if source.starts_with(b"unconvertible") {
            bail!("Unsupported source data");
        }
        let mut converted = b"converted:".to_vec();
        converted.extend_from_slice(source);
        Ok(converted)
    }
}

fn create_manager(vfs: Arc<MemoryVfs>) -> TextureManager {
    TextureManager::new(
        vfs,
        Box::new(StubDevice),
        Arc::new(StubConverter),
        TextureManagerConfig::default(),
    )
}

/// Drives `make_progress` until the texture finishes loading, with a bound
/// so a stuck pipeline fails the test instead of hanging it.
fn pump_until_loaded(manager: &mut TextureManager, texture: &TexturePtr) {
    for _ in 0..5000 {
        if texture.is_loaded() {
            return;
        }
        if !manager.make_progress() {
            thread::sleep(Duration::from_millis(1));
        }
    }
    panic!(
        "texture {} did not finish loading",
        texture.properties().path.display()
    );
}

fn is_error_placeholder(manager: &TextureManager, texture: &TexturePtr) -> bool {
    Rc::ptr_eq(&texture.handle(), &manager.error_texture().handle())
}

#[test]
fn equal_properties_give_the_same_entry() {
    let vfs = Arc::new(MemoryVfs::new());
    let mut manager = create_manager(vfs);

    let first = manager.create_texture(TextureProperties::new("art/tree.png"));
    let second = manager.create_texture(TextureProperties::new("art/tree.png"));

    assert!(Rc::ptr_eq(&first, &second));
}

#[test]
fn properties_differing_in_any_field_give_distinct_entries() {
    let vfs = Arc::new(MemoryVfs::new());
    let mut manager = create_manager(vfs);

    let base = TextureProperties::new("art/tree.png");
    let entry = manager.create_texture(base.clone());

    let mut other_filter = base.clone();
    other_filter.filter = tephra_texture::TextureFilter::Nearest;
    let mut other_wrap = base.clone();
    other_wrap.wrap = tephra_texture::TextureWrap::ClampToEdge;
    let mut other_aniso = base.clone();
    other_aniso.anisotropy = 16;

    assert!(!Rc::ptr_eq(
        &entry,
        &manager.create_texture(TextureProperties::new("art/oak.png"))
    ));
    assert!(!Rc::ptr_eq(&entry, &manager.create_texture(other_filter)));
    assert!(!Rc::ptr_eq(&entry, &manager.create_texture(other_wrap)));
    assert!(!Rc::ptr_eq(&entry, &manager.create_texture(other_aniso)));
}

#[test]
fn error_texture_is_loaded_and_magenta() {
    let vfs = Arc::new(MemoryVfs::new());
    let manager = create_manager(vfs);

    let error = manager.error_texture();

    assert!(error.is_loaded());
    assert_eq!(error.base_color(), [255, 0, 255, 255]);
}

#[test]
fn try_load_uses_valid_archive_cache() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.insert_file("art/tree.png", b"pixels".to_vec());
    vfs.insert_file("art/tree.png.dds", b"converted:pixels".to_vec());
    let mut manager = create_manager(vfs);

    let tex = manager.create_texture(TextureProperties::new("art/tree.png"));
    assert_eq!(tex.width(), 1); // placeholder until loaded

    assert!(manager.try_load(&tex));

    assert_eq!(tex.state(), TextureState::Loaded);
    assert!(!is_error_placeholder(&manager, &tex));
    assert_eq!(tex.width(), 4);
    assert_eq!(tex.height(), 4);
    assert_eq!(tex.base_color(), [10, 20, 30, 40]);
}

#[test]
fn loaded_resource_reports_alpha_flag() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.insert_file("art/leaf.png", b"pixels".to_vec());
    vfs.insert_file("art/leaf.png.dds", b"converted:alpha".to_vec());
    let mut manager = create_manager(vfs);

    let tex = manager.create_texture(TextureProperties::new("art/leaf.png"));
    manager.try_load(&tex);

    assert!(tex.has_alpha());
}

#[test]
fn missing_source_resolves_to_error_placeholder() {
    let vfs = Arc::new(MemoryVfs::new());
    let mut manager = create_manager(vfs);

    let tex = manager.create_texture(TextureProperties::new("art/missing.png"));

    // The failure is terminal but safe: the entry counts as loaded
    assert!(manager.try_load(&tex));
    assert_eq!(tex.state(), TextureState::Loaded);
    assert!(is_error_placeholder(&manager, &tex));
}

#[test]
fn corrupt_cached_file_resolves_to_error_placeholder() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.insert_file("art/tree.png", b"pixels".to_vec());
    vfs.insert_file("art/tree.png.dds", b"corrupt data".to_vec());
    let mut manager = create_manager(vfs);

    let tex = manager.create_texture(TextureProperties::new("art/tree.png"));

    assert!(manager.try_load(&tex));
    assert_eq!(tex.state(), TextureState::Loaded);
    assert!(is_error_placeholder(&manager, &tex));
}

#[test]
fn upload_failure_resolves_to_error_placeholder() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.insert_file("art/tree.png", b"pixels".to_vec());
    vfs.insert_file("art/tree.png.dds", b"converted:failupload".to_vec());
    let mut manager = create_manager(vfs);

    let tex = manager.create_texture(TextureProperties::new("art/tree.png"));

    assert!(manager.try_load(&tex));
    assert!(is_error_placeholder(&manager, &tex));
}

#[test]
fn cache_miss_converts_in_background_until_loaded() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.insert_file("art/tree.png", b"pixels".to_vec());
    let mut manager = create_manager(vfs);

    let tex = manager.create_texture(TextureProperties::new("art/tree.png"));

    assert!(!manager.try_load(&tex));
    assert_eq!(tex.state(), TextureState::HighNeedsConverting);

    pump_until_loaded(&mut manager, &tex);

    assert!(tex.is_loaded());
    assert!(!is_error_placeholder(&manager, &tex));
    assert_eq!(tex.base_color(), [10, 20, 30, 40]);
}

#[test]
fn second_load_hits_the_generated_loose_cache() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.insert_file("art/tree.png", b"pixels".to_vec());

    {
        let mut manager = create_manager(Arc::clone(&vfs));
        let tex = manager.create_texture(TextureProperties::new("art/tree.png"));
        manager.try_load(&tex);
        pump_until_loaded(&mut manager, &tex);
    }

    // A fresh manager over the same filesystem finds the loose cache
    // without converting
    let mut manager = create_manager(vfs);
    let tex = manager.create_texture(TextureProperties::new("art/tree.png"));

    assert!(manager.try_load(&tex));
    assert!(!is_error_placeholder(&manager, &tex));
}

#[test]
fn unconvertible_source_resolves_to_error_placeholder() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.insert_file("art/bad.png", b"unconvertible".to_vec());
    let mut manager = create_manager(vfs);

    let tex = manager.create_texture(TextureProperties::new("art/bad.png"));

    assert!(!manager.try_load(&tex));
    pump_until_loaded(&mut manager, &tex);

    assert!(is_error_placeholder(&manager, &tex));
    // Failed conversions are terminal, not retried
    assert_eq!(tex.state(), TextureState::Loaded);
}

#[test]
fn prefetched_texture_with_cache_hit_loads_in_one_step() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.insert_file("art/tree.png", b"pixels".to_vec());
    vfs.insert_file("art/tree.png.dds", b"converted:pixels".to_vec());
    let mut manager = create_manager(vfs);

    let tex = manager.create_texture(TextureProperties::new("art/tree.png"));
    manager.prefetch(&tex);
    assert_eq!(tex.state(), TextureState::PrefetchNeedsLoading);

    assert!(manager.make_progress());

    assert!(tex.is_loaded());
    assert!(!is_error_placeholder(&manager, &tex));
}

#[test]
fn prefetched_texture_without_cache_converts_in_background() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.insert_file("art/tree.png", b"pixels".to_vec());
    let mut manager = create_manager(vfs);

    let tex = manager.create_texture(TextureProperties::new("art/tree.png"));
    manager.prefetch(&tex);

    assert!(manager.make_progress());
    assert_eq!(tex.state(), TextureState::PrefetchNeedsConverting);
    assert!(manager.make_progress());
    assert_eq!(tex.state(), TextureState::PrefetchIsConverting);

    pump_until_loaded(&mut manager, &tex);
    assert!(!is_error_placeholder(&manager, &tex));
}

#[test]
fn demanded_texture_preempts_prefetched_conversions() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.insert_file("art/a.png", b"pixels a".to_vec());
    vfs.insert_file("art/b.png", b"pixels b".to_vec());
    let mut manager = create_manager(vfs);

    let a = manager.create_texture(TextureProperties::new("art/a.png"));
    let b = manager.create_texture(TextureProperties::new("art/b.png"));
    manager.prefetch(&a);
    manager.prefetch(&b);

    // Both prefetch cache attempts miss
    assert!(manager.make_progress());
    assert!(manager.make_progress());
    assert_eq!(a.state(), TextureState::PrefetchNeedsConverting);
    assert_eq!(b.state(), TextureState::PrefetchNeedsConverting);

    // Demanding `b` escalates it past `a`
    assert!(!manager.try_load(&b));
    assert_eq!(b.state(), TextureState::HighNeedsConverting);

    assert!(manager.make_progress());
    assert_eq!(b.state(), TextureState::HighIsConverting);
    assert_eq!(a.state(), TextureState::PrefetchNeedsConverting);

    pump_until_loaded(&mut manager, &b);
    pump_until_loaded(&mut manager, &a);
    assert!(!is_error_placeholder(&manager, &a));
    assert!(!is_error_placeholder(&manager, &b));
}

#[test]
fn make_progress_reports_idleness() {
    let vfs = Arc::new(MemoryVfs::new());
    let mut manager = create_manager(vfs);
    let _tex = manager.create_texture(TextureProperties::new("art/tree.png"));

    assert!(!manager.make_progress());
}

#[test]
fn changed_source_file_resets_entry_to_placeholder() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.insert_file("art/tree.png", b"pixels".to_vec());
    vfs.insert_file("art/tree.png.dds", b"converted:pixels".to_vec());
    let mut manager = create_manager(Arc::clone(&vfs));

    let tex = manager.create_texture(TextureProperties::new("art/tree.png"));
    manager.try_load(&tex);
    assert!(tex.is_loaded());

    manager.on_file_changed(Path::new("art/tree.png"));

    assert_eq!(tex.state(), TextureState::Unloaded);
    // The handle is rebound to the shared default placeholder, which fresh
    // entries also start out with
    let fresh = manager.create_texture(TextureProperties::new("art/fresh.png"));
    assert!(Rc::ptr_eq(&tex.handle(), &fresh.handle()));

    // The entry re-enters the normal pipeline on the next use
    assert!(manager.try_load(&tex));
    assert!(tex.is_loaded());
    assert!(!is_error_placeholder(&manager, &tex));
}

#[test]
fn changed_settings_file_invalidates_dependent_entries() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.insert_file("art/rock.png", b"pixels".to_vec());
    let mut manager = create_manager(Arc::clone(&vfs));

    let tex = manager.create_texture(TextureProperties::new("art/rock.png"));
    manager.try_load(&tex);
    pump_until_loaded(&mut manager, &tex);

    // Introduce a settings override in an ancestor directory
    vfs.insert_file("art/textures.xml", b"format=uncompressed".to_vec());
    manager.on_file_changed(Path::new("art/textures.xml"));

    assert_eq!(tex.state(), TextureState::Unloaded);

    // The new settings change the fingerprint, so the old loose cache no
    // longer matches and the texture is reconverted
    assert!(!manager.try_load(&tex));
    pump_until_loaded(&mut manager, &tex);
    assert!(!is_error_placeholder(&manager, &tex));
}

#[test]
fn bind_loads_the_texture_first() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.insert_file("art/tree.png", b"pixels".to_vec());
    vfs.insert_file("art/tree.png.dds", b"converted:pixels".to_vec());
    let mut manager = create_manager(vfs);

    let tex = manager.create_texture(TextureProperties::new("art/tree.png"));
    manager.bind(&tex, 2);

    assert!(tex.is_loaded());
}
