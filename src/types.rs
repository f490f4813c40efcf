// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Plain value types shared by every part of the API.
//!
//! These mirror the small structs and enumerations of the native API.  Geometry types are
//! `#[repr(C)]` so they can be passed by value; the C boundary in [`crate::ffi`] has its own
//! `unsigned long` variants and converts into these.

use std::fmt::{Display, Formatter};

/// Dimensions of a 3D region, in pixels or threads.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Size {
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Size {
            width,
            height,
            depth,
        }
    }

    /// Total number of elements covered, saturating on overflow.
    pub fn product(&self) -> usize {
        self.width
            .saturating_mul(self.height)
            .saturating_mul(self.depth)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }
}

impl Display for Size {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// A position in a 3D grid.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Origin {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Origin {
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Origin { x, y, z }
    }
}

/// A rectangular block of pixels.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region {
    pub origin: Origin,
    pub size: Size,
}

impl Region {
    /// A 2D region with depth 1.
    pub const fn make_2d(x: usize, y: usize, width: usize, height: usize) -> Self {
        Region {
            origin: Origin { x, y, z: 0 },
            size: Size {
                width,
                height,
                depth: 1,
            },
        }
    }

    /**
    Whether the region lies within a level of the given dimensions.

    Arithmetic is checked, so regions whose far corner overflows are reported as outside.
    */
    pub fn fits_within(&self, width: usize, height: usize, depth: usize) -> bool {
        fn axis(start: usize, len: usize, limit: usize) -> bool {
            start.checked_add(len).is_some_and(|end| end <= limit)
        }
        axis(self.origin.x, self.size.width, width)
            && axis(self.origin.y, self.size.height, height)
            && axis(self.origin.z, self.size.depth, depth)
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({},{},{}) {}",
            self.origin.x, self.origin.y, self.origin.z, self.size
        )
    }
}

/// Clear color for a render pass attachment, in linear space.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClearColor {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub alpha: f64,
}

impl ClearColor {
    pub const fn new(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        ClearColor {
            red,
            green,
            blue,
            alpha,
        }
    }

    pub(crate) fn as_f32x4(&self) -> [f32; 4] {
        [
            self.red as f32,
            self.green as f32,
            self.blue as f32,
            self.alpha as f32,
        ]
    }
}

/**
An opaque GPU capability family code.

The values are the platform's own; this crate only compares them.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuFamily(pub u16);

impl GpuFamily {
    pub const APPLE1: GpuFamily = GpuFamily(1001);
    pub const APPLE2: GpuFamily = GpuFamily(1002);
    pub const APPLE3: GpuFamily = GpuFamily(1003);
    pub const APPLE4: GpuFamily = GpuFamily(1004);
    pub const APPLE5: GpuFamily = GpuFamily(1005);
    pub const APPLE6: GpuFamily = GpuFamily(1006);
    pub const APPLE7: GpuFamily = GpuFamily(1007);
    pub const APPLE8: GpuFamily = GpuFamily(1008);
    pub const MAC2: GpuFamily = GpuFamily(2002);
    pub const COMMON1: GpuFamily = GpuFamily(3001);
    pub const COMMON2: GpuFamily = GpuFamily(3002);
    pub const COMMON3: GpuFamily = GpuFamily(3003);
    pub const METAL3: GpuFamily = GpuFamily(5001);
}

/// Where a resource's memory lives and who may touch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum StorageMode {
    /// One allocation visible to CPU and GPU.
    #[default]
    Shared = 0,
    /// Separate CPU and GPU copies on non-unified devices, kept in sync explicitly.
    Managed = 1,
    /// GPU only.
    Private = 2,
    /// Transient render-target memory; GPU only.
    Memoryless = 3,
}

impl StorageMode {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(StorageMode::Shared),
            1 => Some(StorageMode::Managed),
            2 => Some(StorageMode::Private),
            3 => Some(StorageMode::Memoryless),
            _ => None,
        }
    }

    pub fn is_cpu_accessible(self) -> bool {
        matches!(self, StorageMode::Shared | StorageMode::Managed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CpuCacheMode {
    #[default]
    DefaultCache = 0,
    WriteCombined = 1,
}

/**
Packed resource options, bit-compatible with the native `MTLResourceOptions`.

| bits  | meaning                               |
|-------|---------------------------------------|
| 0..4  | [`CpuCacheMode`]                      |
| 4..8  | [`StorageMode`]                       |
| 8     | hazard tracking disabled (untracked)  |
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResourceOptions(pub u16);

impl ResourceOptions {
    const CPU_CACHE_MODE_SHIFT: u16 = 0;
    const STORAGE_MODE_SHIFT: u16 = 4;
    const HAZARD_TRACKING_SHIFT: u16 = 8;

    pub const STORAGE_MODE_SHARED: ResourceOptions =
        ResourceOptions((StorageMode::Shared as u16) << Self::STORAGE_MODE_SHIFT);
    pub const STORAGE_MODE_MANAGED: ResourceOptions =
        ResourceOptions((StorageMode::Managed as u16) << Self::STORAGE_MODE_SHIFT);
    pub const STORAGE_MODE_PRIVATE: ResourceOptions =
        ResourceOptions((StorageMode::Private as u16) << Self::STORAGE_MODE_SHIFT);
    pub const STORAGE_MODE_MEMORYLESS: ResourceOptions =
        ResourceOptions((StorageMode::Memoryless as u16) << Self::STORAGE_MODE_SHIFT);
    pub const CPU_CACHE_MODE_WRITE_COMBINED: ResourceOptions =
        ResourceOptions((CpuCacheMode::WriteCombined as u16) << Self::CPU_CACHE_MODE_SHIFT);
    pub const HAZARD_TRACKING_MODE_UNTRACKED: ResourceOptions =
        ResourceOptions(1 << Self::HAZARD_TRACKING_SHIFT);

    const KNOWN_BITS: u16 = 0x1ff;

    pub fn storage_mode(self) -> Option<StorageMode> {
        StorageMode::from_raw(((self.0 >> Self::STORAGE_MODE_SHIFT) & 0xf) as u8)
    }

    pub fn cpu_cache_mode(self) -> Option<CpuCacheMode> {
        match (self.0 >> Self::CPU_CACHE_MODE_SHIFT) & 0xf {
            0 => Some(CpuCacheMode::DefaultCache),
            1 => Some(CpuCacheMode::WriteCombined),
            _ => None,
        }
    }

    pub fn hazard_tracking_untracked(self) -> bool {
        self.0 & (1 << Self::HAZARD_TRACKING_SHIFT) != 0
    }

    /// True when every field decodes and no unknown bits are set.
    pub fn is_valid(self) -> bool {
        self.0 & !Self::KNOWN_BITS == 0
            && self.storage_mode().is_some()
            && self.cpu_cache_mode().is_some()
    }
}

impl std::ops::BitOr for ResourceOptions {
    type Output = ResourceOptions;
    fn bitor(self, rhs: Self) -> Self::Output {
        ResourceOptions(self.0 | rhs.0)
    }
}

impl From<StorageMode> for ResourceOptions {
    fn from(mode: StorageMode) -> Self {
        ResourceOptions((mode as u16) << Self::STORAGE_MODE_SHIFT)
    }
}

/// What happens to an attachment's contents when a render pass begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum LoadAction {
    #[default]
    DontCare = 0,
    Load = 1,
    Clear = 2,
}

impl LoadAction {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(LoadAction::DontCare),
            1 => Some(LoadAction::Load),
            2 => Some(LoadAction::Clear),
            _ => None,
        }
    }
}

/// What happens to an attachment's contents when a render pass ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum StoreAction {
    #[default]
    DontCare = 0,
    Store = 1,
}

impl StoreAction {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(StoreAction::DontCare),
            1 => Some(StoreAction::Store),
            _ => None,
        }
    }
}

/// Geometric primitive assembled from consecutive vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PrimitiveType {
    Point = 0,
    Line = 1,
    LineStrip = 2,
    Triangle = 3,
    TriangleStrip = 4,
}

impl PrimitiveType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(PrimitiveType::Point),
            1 => Some(PrimitiveType::Line),
            2 => Some(PrimitiveType::LineStrip),
            3 => Some(PrimitiveType::Triangle),
            4 => Some(PrimitiveType::TriangleStrip),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_options_decode() {
        let opts = ResourceOptions::STORAGE_MODE_MANAGED
            | ResourceOptions::CPU_CACHE_MODE_WRITE_COMBINED
            | ResourceOptions::HAZARD_TRACKING_MODE_UNTRACKED;
        assert_eq!(opts.storage_mode(), Some(StorageMode::Managed));
        assert_eq!(opts.cpu_cache_mode(), Some(CpuCacheMode::WriteCombined));
        assert!(opts.hazard_tracking_untracked());
        assert!(opts.is_valid());
        assert_eq!(ResourceOptions::STORAGE_MODE_PRIVATE.0, 0x20);
        assert!(!ResourceOptions(0x50).is_valid());
        assert!(!ResourceOptions(0x1000).is_valid());
    }

    #[test]
    fn region_bounds() {
        let r = Region::make_2d(8, 8, 8, 8);
        assert!(r.fits_within(16, 16, 1));
        assert!(!r.fits_within(15, 16, 1));
        let huge = Region::make_2d(usize::MAX, 0, 2, 1);
        assert!(!huge.fits_within(16, 16, 1));
    }
}
