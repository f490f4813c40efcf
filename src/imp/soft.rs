// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The software device.

Resources live in [`memory::Storage`], programs are checked shader modules run by the
interpreter, and recorded passes execute on the queue's [`timeline::Timeline`] thread.

The public API types wrap the objects here; nothing in this module knows about command
buffer state, which is the front end's business.
*/

mod execute;
mod memory;
mod raster;
mod timeline;

pub(crate) use execute::run_pass;
pub(crate) use memory::{MemoryAccount, Storage};
pub(crate) use timeline::{Job, Timeline};

use crate::error::ResourceError;
use crate::pixel_formats::PixelFormat;
use crate::shader::ast::Module;
use crate::types::{ClearColor, LoadAction, Origin, PrimitiveType, Region, Size, StoreAction};
use std::ops::Range;
use std::sync::Arc;

/// Maximum bytes accepted by the `set_*_bytes` family.
pub(crate) const MAX_INLINE_BYTES: usize = 4096;

#[derive(Debug)]
pub(crate) struct SoftBuffer {
    pub(crate) storage: Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Level {
    pub(crate) offset: usize,
    pub(crate) width: usize,
    pub(crate) height: usize,
    pub(crate) bytes_per_row: usize,
}

impl Level {
    fn len(&self) -> usize {
        self.bytes_per_row * self.height
    }

    pub(crate) fn contains(&self, region: &Region) -> bool {
        region.fits_within(self.width, self.height, 1)
    }
}

/// Mip chain of a 2D texture, tightly packed level after level.
pub(crate) fn mip_chain(
    width: usize,
    height: usize,
    levels: usize,
    bytes_per_pixel: usize,
) -> Vec<Level> {
    let mut offset = 0;
    (0..levels)
        .map(|i| {
            let w = (width >> i).max(1);
            let h = (height >> i).max(1);
            let level = Level {
                offset,
                width: w,
                height: h,
                bytes_per_row: w * bytes_per_pixel,
            };
            offset += level.len();
            level
        })
        .collect()
}

#[derive(Debug)]
pub(crate) struct SoftTexture {
    pub(crate) storage: Storage,
    pub(crate) format: PixelFormat,
    pub(crate) levels: Vec<Level>,
}

impl SoftTexture {
    pub(crate) fn new(
        format: PixelFormat,
        levels: Vec<Level>,
        storage: impl FnOnce(usize) -> Result<Storage, ResourceError>,
    ) -> Result<Self, ResourceError> {
        let len = levels.last().map_or(0, |l| l.offset + l.len());
        Ok(SoftTexture {
            storage: storage(len)?,
            format,
            levels,
        })
    }

    fn bytes_per_pixel(&self) -> usize {
        self.format.bytes_per_pixel().unwrap_or(0)
    }

    pub(crate) fn level(&self, level: usize) -> Option<&Level> {
        self.levels.get(level)
    }

    /// Byte range of the row `y` of `region`, relative to the allocation start.
    fn row(&self, level: &Level, origin: Origin, width: usize, y: usize) -> Range<usize> {
        let bpp = self.bytes_per_pixel();
        let start = level.offset + (origin.y + y) * level.bytes_per_row + origin.x * bpp;
        start..start + width * bpp
    }

    fn check_upload(
        &self,
        region: &Region,
        level: usize,
        len: usize,
        bytes_per_row: usize,
    ) -> Result<Level, ResourceError> {
        let lvl = *self
            .level(level)
            .ok_or(ResourceError::RegionOutOfBounds { region: *region, level })?;
        if !lvl.contains(region) || region.size.depth != 1 {
            return Err(ResourceError::RegionOutOfBounds { region: *region, level });
        }
        let row_len = region.size.width * self.bytes_per_pixel();
        if bytes_per_row < row_len {
            return Err(ResourceError::BytesPerRow {
                bytes_per_row,
                width: region.size.width,
                format: self.format,
            });
        }
        let needed = bytes_per_row * region.size.height.saturating_sub(1) + row_len;
        if region.size.height > 0 && len < needed {
            return Err(ResourceError::RangeOutOfBounds {
                offset: 0,
                length: needed,
                capacity: len,
            });
        }
        Ok(lvl)
    }

    /// CPU upload into `region` of `level`.  Both copies of a mirrored texture see the write.
    pub(crate) fn replace_region(
        &self,
        region: &Region,
        level: usize,
        bytes: &[u8],
        bytes_per_row: usize,
    ) -> Result<(), ResourceError> {
        self.storage.cpu()?;
        let lvl = self.check_upload(region, level, bytes.len(), bytes_per_row)?;
        for y in 0..region.size.height {
            let dst = self.row(&lvl, region.origin, region.size.width, y);
            let src = &bytes[y * bytes_per_row..y * bytes_per_row + dst.len()];
            self.storage
                .write_through(dst.start, src)
                .ok_or(ResourceError::RegionOutOfBounds { region: *region, level })?;
        }
        Ok(())
    }

    /// CPU download of `region` of `level` into `out`.
    pub(crate) fn get_bytes(
        &self,
        out: &mut [u8],
        bytes_per_row: usize,
        region: &Region,
        level: usize,
    ) -> Result<(), ResourceError> {
        let cpu = self.storage.cpu()?;
        let lvl = self.check_upload(region, level, out.len(), bytes_per_row)?;
        for y in 0..region.size.height {
            let src = self.row(&lvl, region.origin, region.size.width, y);
            let len = src.len();
            cpu.read(src.start, &mut out[y * bytes_per_row..y * bytes_per_row + len])
                .ok_or(ResourceError::RegionOutOfBounds { region: *region, level })?;
        }
        Ok(())
    }

    pub(crate) fn write_pixel(&self, x: usize, y: usize, rgba: [f32; 4]) {
        let level = &self.levels[0];
        let bpp = self.bytes_per_pixel();
        let mut texel = [0u8; 16];
        self.format.encode(rgba, &mut texel[..bpp]);
        let at = level.offset + y * level.bytes_per_row + x * bpp;
        // in range by construction of the rasterizer's bounds
        let _ = self.storage.gpu().write(at, &texel[..bpp]);
    }

    pub(crate) fn read_pixel(&self, x: usize, y: usize) -> [f32; 4] {
        let level = &self.levels[0];
        let bpp = self.bytes_per_pixel();
        let mut texel = [0u8; 16];
        let at = level.offset + y * level.bytes_per_row + x * bpp;
        let _ = self.storage.gpu().read(at, &mut texel[..bpp]);
        self.format.decode(&texel[..bpp])
    }

    /// Fills level 0 with `rgba`.
    pub(crate) fn clear(&self, rgba: [f32; 4]) {
        let level = &self.levels[0];
        let bpp = self.bytes_per_pixel();
        let mut texel = [0u8; 16];
        self.format.encode(rgba, &mut texel[..bpp]);
        let row: Vec<u8> = texel[..bpp]
            .iter()
            .copied()
            .cycle()
            .take(level.bytes_per_row)
            .collect();
        for y in 0..level.height {
            let _ = self
                .storage
                .gpu()
                .write(level.offset + y * level.bytes_per_row, &row);
        }
    }

    /// Device-side copy of `size` pixels between two textures of equal texel size.
    pub(crate) fn copy_region(
        &self,
        level: usize,
        origin: Origin,
        size: Size,
        dst: &SoftTexture,
        dst_level: usize,
        dst_origin: Origin,
    ) -> Option<()> {
        let src_level = *self.level(level)?;
        let dst_lvl = *dst.level(dst_level)?;
        for y in 0..size.height {
            let from = self.row(&src_level, origin, size.width, y);
            let to = dst.row(&dst_lvl, dst_origin, size.width, y);
            dst.storage
                .gpu()
                .copy_from(to.start, self.storage.gpu(), from.start, from.len())?;
        }
        Some(())
    }
}

/// A checked kernel and its reflected limits.
#[derive(Debug)]
pub(crate) struct ComputeProgram {
    pub(crate) module: Arc<Module>,
    pub(crate) entry: usize,
    pub(crate) name: String,
    pub(crate) max_total_threads: usize,
}

impl ComputeProgram {
    pub(crate) fn buffer_indices(&self) -> Vec<usize> {
        self.module.functions[self.entry].buffer_indices().collect()
    }
}

#[derive(Debug)]
pub(crate) struct Stage {
    pub(crate) module: Arc<Module>,
    pub(crate) entry: usize,
    pub(crate) name: String,
}

impl Stage {
    pub(crate) fn buffer_indices(&self) -> Vec<usize> {
        self.module.functions[self.entry].buffer_indices().collect()
    }
}

#[derive(Debug)]
pub(crate) struct RenderProgram {
    pub(crate) vertex: Stage,
    pub(crate) fragment: Option<Stage>,
    pub(crate) format: PixelFormat,
}

/// What one argument-table slot is bound to.
#[derive(Debug, Clone)]
pub(crate) enum Binding {
    Buffer { buffer: Arc<SoftBuffer>, offset: usize },
    Bytes(Arc<[u8]>),
}

pub(crate) type BindingTable = Vec<Option<Binding>>;

pub(crate) fn empty_bindings() -> BindingTable {
    vec![None; crate::shader::MAX_BUFFER_INDEX]
}

#[derive(Debug)]
pub(crate) struct Dispatch {
    pub(crate) program: Arc<ComputeProgram>,
    pub(crate) bindings: BindingTable,
    pub(crate) threadgroups: Size,
    pub(crate) threads_per_threadgroup: Size,
    /// Threads outside the grid are never run.
    pub(crate) grid: Size,
}

#[derive(Debug)]
pub(crate) struct Draw {
    pub(crate) program: Arc<RenderProgram>,
    pub(crate) primitive: PrimitiveType,
    pub(crate) vertex_start: usize,
    pub(crate) vertex_count: usize,
    pub(crate) vertex_bindings: BindingTable,
    pub(crate) fragment_bindings: BindingTable,
}

#[derive(Debug)]
pub(crate) struct RenderTarget {
    pub(crate) texture: Arc<SoftTexture>,
    pub(crate) load: LoadAction,
    pub(crate) store: StoreAction,
    pub(crate) clear: ClearColor,
}

#[derive(Debug)]
pub(crate) enum Synchronizable {
    Buffer(Arc<SoftBuffer>),
    Texture(Arc<SoftTexture>),
}

#[derive(Debug)]
pub(crate) enum BlitCommand {
    CopyTexture {
        src: Arc<SoftTexture>,
        src_level: usize,
        src_origin: Origin,
        size: Size,
        dst: Arc<SoftTexture>,
        dst_level: usize,
        dst_origin: Origin,
    },
    CopyBuffer {
        src: Arc<SoftBuffer>,
        src_offset: usize,
        dst: Arc<SoftBuffer>,
        dst_offset: usize,
        len: usize,
    },
    FillBuffer {
        buffer: Arc<SoftBuffer>,
        range: Range<usize>,
        value: u8,
    },
    Synchronize(Synchronizable),
}

#[derive(Debug)]
pub(crate) enum PassKind {
    Compute(Vec<Dispatch>),
    Render { target: RenderTarget, draws: Vec<Draw> },
    Blit(Vec<BlitCommand>),
}

/// One ended encoder.
#[derive(Debug)]
pub(crate) struct Pass {
    pub(crate) label: String,
    pub(crate) kind: PassKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StorageMode;

    fn texture(format: PixelFormat, w: usize, h: usize, levels: usize) -> SoftTexture {
        let account = MemoryAccount::new(1 << 20);
        let chain = mip_chain(w, h, levels, format.bytes_per_pixel().unwrap());
        SoftTexture::new(format, chain, |len| {
            Storage::new(len, StorageMode::Shared, true, &account)
        })
        .unwrap()
    }

    #[test]
    fn mip_chain_packs_levels() {
        let chain = mip_chain(8, 4, 4, 4);
        let sizes: Vec<_> = chain.iter().map(|l| (l.width, l.height, l.offset)).collect();
        assert_eq!(sizes, [(8, 4, 0), (4, 2, 128), (2, 1, 160), (1, 1, 168)]);
    }

    #[test]
    fn replace_and_get_bytes_honor_row_pitch() {
        let t = texture(PixelFormat::R8_UNORM, 4, 4, 1);
        let region = Region::make_2d(1, 1, 2, 2);
        t.replace_region(&region, 0, &[1, 2, 0xff, 3, 4], 3).unwrap();
        let mut all = [0u8; 16];
        t.get_bytes(&mut all, 4, &Region::make_2d(0, 0, 4, 4), 0).unwrap();
        assert_eq!(all, [0, 0, 0, 0, 0, 1, 2, 0, 0, 3, 4, 0, 0, 0, 0, 0]);
        assert!(matches!(
            t.replace_region(&Region::make_2d(3, 3, 2, 1), 0, &[0, 0], 2),
            Err(ResourceError::RegionOutOfBounds { .. })
        ));
    }

    #[test]
    fn clear_and_pixels() {
        let t = texture(PixelFormat::RGBA8_UNORM, 2, 2, 1);
        t.clear([1.0, 0.0, 0.0, 1.0]);
        t.write_pixel(1, 1, [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(t.read_pixel(0, 0), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(t.read_pixel(1, 1), [0.0, 0.0, 1.0, 1.0]);
    }
}
