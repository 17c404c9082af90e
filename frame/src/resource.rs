//! Typed resource handles and descriptors.
//!
//! Every GPU object the frame core reasons about lives in a [`ResourceArena`]
//! and is addressed by a [`ResourceId`]. Handles are resolved once when the
//! frame resources are (re)built, so nothing is looked up by name at record
//! time.

use std::fmt;

/// Handle to a resource in a [`ResourceArena`].
///
/// `ResourceId` is `Copy` and only valid for the arena that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u32);

impl ResourceId {
    fn new(index: u32) -> Self {
        Self(index)
    }

    /// Dense index into the arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 2D pixel extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Extent2d {
    /// Create a new extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether either dimension is zero (minimized window).
    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Pixel formats of the images the frame core allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// 8-bit RGBA, used for albedo.
    Rgba8Unorm,
    /// 16-bit float RGBA, used for normals and positions.
    Rgba16Float,
    /// 32-bit float depth.
    Depth32Float,
}

impl ImageFormat {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
        }
    }
}

/// What kind of GPU object a resource is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A buffer of `size` bytes.
    Buffer {
        /// Size in bytes.
        size: u64,
    },
    /// A 2D image.
    Image {
        /// Pixel extent.
        extent: Extent2d,
        /// Pixel format.
        format: ImageFormat,
    },
}

/// Descriptor of a resource in the arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDesc {
    /// Debug name.
    pub name: &'static str,
    /// Buffer or image.
    pub kind: ResourceKind,
    /// Host-visible staging memory. Host-visible resources are owned by the
    /// host thread, never by an execution domain.
    pub host_visible: bool,
}

impl ResourceDesc {
    /// Device-local buffer.
    pub fn buffer(name: &'static str, size: u64) -> Self {
        Self {
            name,
            kind: ResourceKind::Buffer { size },
            host_visible: false,
        }
    }

    /// Host-visible staging buffer.
    pub fn staging(name: &'static str, size: u64) -> Self {
        Self {
            name,
            kind: ResourceKind::Buffer { size },
            host_visible: true,
        }
    }

    /// Device-local image.
    pub fn image(name: &'static str, extent: Extent2d, format: ImageFormat) -> Self {
        Self {
            name,
            kind: ResourceKind::Image { extent, format },
            host_visible: false,
        }
    }

    /// Size in bytes (images: tightly packed).
    pub fn size(&self) -> u64 {
        match self.kind {
            ResourceKind::Buffer { size } => size,
            ResourceKind::Image { extent, format } => {
                extent.area() * format.bytes_per_pixel() as u64
            }
        }
    }

    /// Whether this is an image.
    pub fn is_image(&self) -> bool {
        matches!(self.kind, ResourceKind::Image { .. })
    }
}

/// Arena of resource descriptors.
#[derive(Debug, Default, Clone)]
pub struct ResourceArena {
    entries: Vec<ResourceDesc>,
}

impl ResourceArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource and return its handle.
    pub fn add(&mut self, desc: ResourceDesc) -> ResourceId {
        let id = ResourceId::new(self.entries.len() as u32);
        log::trace!("Resource {} '{}' ({} bytes)", id, desc.name, desc.size());
        self.entries.push(desc);
        id
    }

    /// Descriptor of a resource.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not created by this arena.
    pub fn get(&self, id: ResourceId) -> &ResourceDesc {
        assert!(id.index() < self.entries.len(), "Invalid resource handle");
        &self.entries[id.index()]
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all resources with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, &ResourceDesc)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, desc)| (ResourceId::new(i as u32), desc))
    }

    /// Total bytes across all resources.
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(ResourceDesc::size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_handles_are_dense() {
        let mut arena = ResourceArena::new();
        let a = arena.add(ResourceDesc::buffer("a", 16));
        let b = arena.add(ResourceDesc::staging("b", 32));
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena.len(), 2);
        assert!(arena.get(b).host_visible);
        assert_eq!(arena.total_bytes(), 48);
    }

    #[test]
    fn test_image_size() {
        let desc = ResourceDesc::image("depth", Extent2d::new(4, 2), ImageFormat::Depth32Float);
        assert!(desc.is_image());
        assert_eq!(desc.size(), 32);
    }

    #[test]
    fn test_zero_area() {
        assert!(Extent2d::new(0, 720).is_zero_area());
        assert!(Extent2d::new(1280, 0).is_zero_area());
        assert!(!Extent2d::new(1, 1).is_zero_area());
    }

    #[test]
    #[should_panic(expected = "Invalid resource handle")]
    fn test_invalid_handle_panics() {
        let arena = ResourceArena::new();
        arena.get(ResourceId::new(3));
    }
}
