// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Buffers and textures.

Resources hold a weak reference to the device that made them; dropping the last device
handle does not keep resources' memory accounting alive, and a resource never keeps its
device alive.

CPU access follows the storage mode.  Shared resources have one copy.  Managed resources
on a device without unified memory have a CPU copy and a device copy: CPU writes reach the
device through [`Buffer::did_modify_range`], and device writes reach the CPU through a blit
`synchronize_resource`.  Private resources have no CPU view.
*/

use crate::device::{Device, DeviceShared};
use crate::error::ResourceError;
use crate::imp::{self, SoftBuffer, SoftTexture, Storage};
use crate::pixel_formats::PixelFormat;
use crate::types::{Region, ResourceOptions, StorageMode};
use std::fmt::{Debug, Formatter};
use std::ops::Range;
use std::sync::{Arc, Weak};

fn checked_range(
    offset: usize,
    len: usize,
    capacity: usize,
) -> Result<Range<usize>, ResourceError> {
    offset
        .checked_add(len)
        .filter(|end| *end <= capacity)
        .map(|end| offset..end)
        .ok_or(ResourceError::RangeOutOfBounds {
            offset,
            length: len,
            capacity,
        })
}

/// Linear device memory.
#[derive(Clone)]
pub struct Buffer {
    imp: Arc<SoftBuffer>,
    device: Weak<DeviceShared>,
    device_id: u64,
    options: ResourceOptions,
}

impl Debug for Buffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("length", &self.length())
            .field("storage_mode", &self.storage_mode())
            .finish()
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.imp, &other.imp)
    }
}

impl Buffer {
    pub(crate) fn new(
        device: &Device,
        length: usize,
        options: ResourceOptions,
    ) -> Result<Self, ResourceError> {
        let mode = options
            .storage_mode()
            .filter(|_| options.is_valid())
            .ok_or(ResourceError::InvalidOptions(options.0))?;
        let max = device.max_buffer_length();
        if length > max {
            return Err(ResourceError::TooLarge { length, max });
        }
        let storage = Storage::new(
            length,
            mode,
            device.has_unified_memory(),
            device.account(),
        )?;
        Ok(Buffer {
            imp: Arc::new(SoftBuffer { storage }),
            device: device.downgrade(),
            device_id: device.id(),
            options,
        })
    }

    pub(crate) fn with_bytes(
        device: &Device,
        bytes: &[u8],
        options: ResourceOptions,
    ) -> Result<Self, ResourceError> {
        let buffer = Buffer::new(device, bytes.len(), options)?;
        //initial contents land in every copy, including private storage
        buffer
            .imp
            .storage
            .write_through(0, bytes)
            .ok_or(ResourceError::RangeOutOfBounds {
                offset: 0,
                length: bytes.len(),
                capacity: buffer.length(),
            })?;
        Ok(buffer)
    }

    pub(crate) fn imp(&self) -> &Arc<SoftBuffer> {
        &self.imp
    }

    pub(crate) fn device_id(&self) -> u64 {
        self.device_id
    }

    /// The creating device, if it is still alive.
    pub fn device(&self) -> Option<Device> {
        Device::upgrade(&self.device)
    }

    pub fn length(&self) -> usize {
        self.imp.storage.len()
    }

    pub fn options(&self) -> ResourceOptions {
        self.options
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.imp.storage.mode()
    }

    /**
    Pointer to the CPU copy of the buffer, or null for storage with no CPU view.

    The pointer stays valid while any clone of this buffer lives.  Writes through it to a
    managed buffer must be followed by [`Buffer::did_modify_range`] before device work
    reads them.
    */
    pub fn contents(&self) -> *mut u8 {
        match self.imp.storage.cpu() {
            Ok(memory) => memory.as_ptr(),
            Err(_) => std::ptr::null_mut(),
        }
    }

    /// Copies `len` bytes starting at `offset` out of the CPU copy.
    pub fn read_contents(&self, offset: usize, len: usize) -> Result<Vec<u8>, ResourceError> {
        let cpu = self.imp.storage.cpu()?;
        let range = checked_range(offset, len, self.length())?;
        let mut out = vec![0; len];
        cpu.read(range.start, &mut out)
            .ok_or(ResourceError::RangeOutOfBounds {
                offset,
                length: len,
                capacity: self.length(),
            })?;
        Ok(out)
    }

    /// Copies `bytes` into the CPU copy at `offset`.
    pub fn write_contents(&self, offset: usize, bytes: &[u8]) -> Result<(), ResourceError> {
        let cpu = self.imp.storage.cpu()?;
        let range = checked_range(offset, bytes.len(), self.length())?;
        cpu.write(range.start, bytes)
            .ok_or(ResourceError::RangeOutOfBounds {
                offset,
                length: bytes.len(),
                capacity: self.length(),
            })
    }

    /// Tells the device that the CPU wrote `range`.  Only managed buffers on devices
    /// without unified memory copy anything.
    pub fn did_modify_range(&self, range: Range<usize>) -> Result<(), ResourceError> {
        self.imp.storage.cpu()?;
        checked_range(range.start, range.end.saturating_sub(range.start), self.length())?;
        self.imp
            .storage
            .did_modify(range.clone())
            .ok_or(ResourceError::RangeOutOfBounds {
                offset: range.start,
                length: range.len(),
                capacity: self.length(),
            })
    }
}

/// Describes a 2D texture to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub pixel_format: PixelFormat,
    pub width: usize,
    pub height: usize,
    pub mipmap_level_count: usize,
    pub storage_mode: StorageMode,
}

impl TextureDescriptor {
    /// A single-level, shared-storage 2D texture.  With `mipmapped`, the full chain down to
    /// 1x1 is allocated.
    pub fn texture_2d(
        pixel_format: PixelFormat,
        width: usize,
        height: usize,
        mipmapped: bool,
    ) -> Self {
        TextureDescriptor {
            pixel_format,
            width,
            height,
            mipmap_level_count: if mipmapped {
                full_mip_count(width, height)
            } else {
                1
            },
            storage_mode: StorageMode::Shared,
        }
    }

    fn validate(&self, max_dimension: usize) -> Result<usize, ResourceError> {
        let bpp = self.pixel_format.bytes_per_pixel().ok_or_else(|| {
            ResourceError::InvalidDescriptor(format!(
                "unsupported pixel format {:?}",
                self.pixel_format
            ))
        })?;
        for (axis, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value > max_dimension {
                return Err(ResourceError::InvalidDescriptor(format!(
                    "{axis} {value} is outside 1..={max_dimension}"
                )));
            }
        }
        let full = full_mip_count(self.width, self.height);
        if self.mipmap_level_count == 0 || self.mipmap_level_count > full {
            return Err(ResourceError::InvalidDescriptor(format!(
                "mipmap level count {} is outside 1..={full}",
                self.mipmap_level_count
            )));
        }
        Ok(bpp)
    }
}

/// Levels in a complete mip chain for a `width` x `height` texture.
pub fn full_mip_count(width: usize, height: usize) -> usize {
    let largest = width.max(height).max(1);
    (usize::BITS - largest.leading_zeros()) as usize
}

/// A 2D image with an optional mip chain.  Slices other than 0 do not exist.
#[derive(Clone)]
pub struct Texture {
    imp: Arc<SoftTexture>,
    device: Weak<DeviceShared>,
    device_id: u64,
    descriptor: TextureDescriptor,
}

impl Debug for Texture {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.imp, &other.imp)
    }
}

impl Texture {
    pub(crate) fn new(
        device: &Device,
        descriptor: &TextureDescriptor,
    ) -> Result<Self, ResourceError> {
        let bpp = descriptor.validate(device.adapter().max_texture_dimension)?;
        let levels = imp::mip_chain(
            descriptor.width,
            descriptor.height,
            descriptor.mipmap_level_count,
            bpp,
        );
        let imp = SoftTexture::new(descriptor.pixel_format, levels, |len| {
            Storage::new(
                len,
                descriptor.storage_mode,
                device.has_unified_memory(),
                device.account(),
            )
        })?;
        Ok(Texture {
            imp: Arc::new(imp),
            device: device.downgrade(),
            device_id: device.id(),
            descriptor: *descriptor,
        })
    }

    pub(crate) fn imp(&self) -> &Arc<SoftTexture> {
        &self.imp
    }

    pub(crate) fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn device(&self) -> Option<Device> {
        Device::upgrade(&self.device)
    }

    pub fn width(&self) -> usize {
        self.descriptor.width
    }

    pub fn height(&self) -> usize {
        self.descriptor.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.descriptor.pixel_format
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.descriptor.storage_mode
    }

    pub fn mipmap_level_count(&self) -> usize {
        self.descriptor.mipmap_level_count
    }

    /// Uploads `bytes` into `region` of `level`.  Rows are `bytes_per_row` apart in `bytes`.
    pub fn replace_region(
        &self,
        region: Region,
        level: usize,
        bytes: &[u8],
        bytes_per_row: usize,
    ) -> Result<(), ResourceError> {
        self.imp.replace_region(&region, level, bytes, bytes_per_row)
    }

    /// Downloads `region` of `level` into `out`, `bytes_per_row` apart.
    pub fn get_bytes(
        &self,
        out: &mut [u8],
        bytes_per_row: usize,
        region: Region,
        level: usize,
    ) -> Result<(), ResourceError> {
        self.imp.get_bytes(out, bytes_per_row, &region, level)
    }
}

/// Either kind of resource, for calls that accept both.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    Buffer(&'a Buffer),
    Texture(&'a Texture),
}

impl<'a> From<&'a Buffer> for Resource<'a> {
    fn from(buffer: &'a Buffer) -> Self {
        Resource::Buffer(buffer)
    }
}

impl<'a> From<&'a Texture> for Resource<'a> {
    fn from(texture: &'a Texture) -> Self {
        Resource::Texture(texture)
    }
}

impl Resource<'_> {
    pub(crate) fn device_id(&self) -> u64 {
        match self {
            Resource::Buffer(b) => b.device_id(),
            Resource::Texture(t) => t.device_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdapterConfig, SystemConfig};
    use crate::System;

    fn devices() -> (Device, Device) {
        let system = System::with_config(SystemConfig::with_adapters(vec![
            AdapterConfig::integrated(),
            AdapterConfig::discrete(),
        ]));
        let d = system.devices();
        (d[0].clone(), d[1].clone())
    }

    #[test]
    fn buffer_creation_failures() {
        let (device, _) = devices();
        assert_eq!(
            device.new_buffer_with_length(0, ResourceOptions::default()),
            Err(ResourceError::ZeroLength)
        );
        assert_eq!(
            device.new_buffer_with_length(16, ResourceOptions::STORAGE_MODE_MEMORYLESS),
            Err(ResourceError::UnsupportedStorageMode(StorageMode::Memoryless))
        );
        assert_eq!(
            device.new_buffer_with_length(16, ResourceOptions(0x1000)),
            Err(ResourceError::InvalidOptions(0x1000))
        );
        let max = device.max_buffer_length();
        assert_eq!(
            device.new_buffer_with_length(max + 1, ResourceOptions::default()),
            Err(ResourceError::TooLarge {
                length: max + 1,
                max
            })
        );
    }

    #[test]
    fn contents_and_checked_copies() {
        let (device, _) = devices();
        let buffer = device
            .new_buffer_with_bytes(&[1, 2, 3, 4], ResourceOptions::STORAGE_MODE_SHARED)
            .unwrap();
        assert!(!buffer.contents().is_null());
        buffer.write_contents(2, &[9]).unwrap();
        assert_eq!(buffer.read_contents(0, 4).unwrap(), [1, 2, 9, 4]);
        assert!(matches!(
            buffer.read_contents(3, 2),
            Err(ResourceError::RangeOutOfBounds { .. })
        ));
        assert!(buffer.device().is_some());

        let private = device
            .new_buffer_with_length(4, ResourceOptions::STORAGE_MODE_PRIVATE)
            .unwrap();
        assert!(private.contents().is_null());
        assert_eq!(
            private.read_contents(0, 1),
            Err(ResourceError::NotCpuAccessible(StorageMode::Private))
        );
    }

    #[test]
    fn managed_on_discrete_keeps_two_copies() {
        let (_, discrete) = devices();
        let before = discrete.current_allocated_size();
        let buffer = discrete
            .new_buffer_with_length(64, ResourceOptions::STORAGE_MODE_MANAGED)
            .unwrap();
        assert_eq!(discrete.current_allocated_size(), before + 128);
        buffer.write_contents(0, &[7; 8]).unwrap();
        assert_eq!(buffer.imp().storage.gpu().len(), 64);
        let mut gpu = [0u8; 8];
        buffer.imp().storage.gpu().read(0, &mut gpu).unwrap();
        assert_eq!(gpu, [0; 8]);
        buffer.did_modify_range(0..8).unwrap();
        buffer.imp().storage.gpu().read(0, &mut gpu).unwrap();
        assert_eq!(gpu, [7; 8]);
    }

    #[test]
    fn texture_descriptor_validation() {
        let (device, _) = devices();
        assert_eq!(full_mip_count(8, 3), 4);
        assert_eq!(full_mip_count(1, 1), 1);
        let mut descriptor = TextureDescriptor::texture_2d(PixelFormat::RGBA8_UNORM, 8, 8, true);
        let texture = device.new_texture_with_descriptor(&descriptor).unwrap();
        assert_eq!(texture.mipmap_level_count(), 4);

        descriptor.mipmap_level_count = 5;
        assert!(matches!(
            device.new_texture_with_descriptor(&descriptor),
            Err(ResourceError::InvalidDescriptor(_))
        ));
        descriptor = TextureDescriptor::texture_2d(PixelFormat(9999), 8, 8, false);
        assert!(matches!(
            device.new_texture_with_descriptor(&descriptor),
            Err(ResourceError::InvalidDescriptor(_))
        ));
        descriptor = TextureDescriptor::texture_2d(PixelFormat::R8_UNORM, 0, 8, false);
        assert!(matches!(
            device.new_texture_with_descriptor(&descriptor),
            Err(ResourceError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn private_textures_reject_cpu_access() {
        let (device, _) = devices();
        let mut descriptor = TextureDescriptor::texture_2d(PixelFormat::R8_UNORM, 2, 2, false);
        descriptor.storage_mode = StorageMode::Private;
        let texture = device.new_texture_with_descriptor(&descriptor).unwrap();
        assert_eq!(
            texture.replace_region(Region::make_2d(0, 0, 1, 1), 0, &[1], 1),
            Err(ResourceError::NotCpuAccessible(StorageMode::Private))
        );
    }
}
