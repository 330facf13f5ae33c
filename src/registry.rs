//! Loaded-image registry keyed by image-base range.
//!
//! The emulator reports DLL loads as `(name, base, size)` plus the
//! image's export table. The registry answers "which image, and which
//! exported symbol, is this address in?" with a floor lookup over an
//! ordered map: greatest base at or below the address, bounds-checked
//! against the image size. Populating the registry from PE files on disk
//! is the caller's concern.

use std::collections::BTreeMap;

/// One image mapped into the traced process.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    name: String,
    base: u32,
    size: u32,
    /// Exported symbols keyed by absolute virtual address.
    exports: BTreeMap<u32, String>,
}

impl LoadedImage {
    pub fn new(name: impl Into<String>, base: u32, size: u32) -> Self {
        LoadedImage {
            name: name.into(),
            base,
            size,
            exports: BTreeMap::new(),
        }
    }

    /// Add an exported symbol at `rva` bytes past the image base.
    pub fn with_export(mut self, rva: u32, symbol: impl Into<String>) -> Self {
        self.exports.insert(self.base.wrapping_add(rva), symbol.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Whether `address` falls inside this image's mapped range.
    pub fn contains(&self, address: u32) -> bool {
        address >= self.base && address - self.base < self.size
    }

    /// Exported symbol mapped exactly at `address`, if any.
    pub fn export_at(&self, address: u32) -> Option<&str> {
        self.exports.get(&address).map(String::as_str)
    }
}

/// Address-to-image lookup over the images observed so far.
pub trait ImageRegistry {
    /// The image covering `address`, if any.
    fn image_at(&self, address: u32) -> Option<&LoadedImage>;

    /// The exported symbol mapped exactly at `address`, if any.
    fn symbol_at(&self, address: u32) -> Option<&str> {
        self.image_at(address).and_then(|image| image.export_at(address))
    }
}

/// Ordered-map registry of loaded images.
#[derive(Debug, Default)]
pub struct ExportRegistry {
    images: BTreeMap<u32, LoadedImage>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image. The first load of a given (case-insensitive)
    /// name wins; later loads of the same name are ignored.
    pub fn register(&mut self, image: LoadedImage) -> bool {
        let name = image.name.to_lowercase();
        if self
            .images
            .values()
            .any(|known| known.name.to_lowercase() == name)
        {
            return false;
        }
        self.images.insert(image.base, image);
        true
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl ImageRegistry for ExportRegistry {
    fn image_at(&self, address: u32) -> Option<&LoadedImage> {
        self.images
            .range(..=address)
            .next_back()
            .map(|(_, image)| image)
            .filter(|image| image.contains(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry() -> ExportRegistry {
        let mut registry = ExportRegistry::new();
        registry.register(
            LoadedImage::new("kernel32.dll", 0x7c80_0000, 0x10_0000)
                .with_export(0x1a2b, "LoadLibraryA"),
        );
        registry.register(LoadedImage::new("ntdll.dll", 0x7c90_0000, 0x8_0000));
        registry
    }

    #[test]
    fn test_floor_lookup_hits_covering_image() {
        let registry = registry();
        let image = registry.image_at(0x7c85_0000).unwrap();
        assert_eq!(image.name(), "kernel32.dll");
        let image = registry.image_at(0x7c90_0000).unwrap();
        assert_eq!(image.name(), "ntdll.dll");
    }

    #[test]
    fn test_gap_between_images_misses() {
        let mut registry = ExportRegistry::new();
        registry.register(LoadedImage::new("a.dll", 0x1000, 0x100));
        assert!(registry.image_at(0x0fff).is_none());
        assert!(registry.image_at(0x1100).is_none());
        assert!(registry.image_at(0x10ff).is_some());
    }

    #[test]
    fn test_symbol_lookup() {
        let registry = registry();
        assert_eq!(registry.symbol_at(0x7c80_1a2b), Some("LoadLibraryA"));
        assert_eq!(registry.symbol_at(0x7c80_1a2c), None);
    }

    #[test]
    fn test_first_load_of_name_wins() {
        let mut registry = registry();
        assert!(!registry.register(LoadedImage::new("KERNEL32.DLL", 0x1000_0000, 0x1000)));
        assert_eq!(registry.len(), 2);
        assert!(registry.image_at(0x1000_0000).is_none());
    }
}
