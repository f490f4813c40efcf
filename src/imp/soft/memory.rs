// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Device memory for the software backend.
//!
//! A [`DeviceMemory`] is a zeroed, 16-byte aligned heap allocation whose address never
//! changes, so the raw `contents` pointer handed to callers stays valid for the life of the
//! resource.  Access from the timeline thread and from the CPU side is not synchronized,
//! matching the hazard model of the API: callers order CPU writes against GPU work
//! themselves.

use crate::error::ResourceError;
use crate::shader::interp::Fault;
use crate::types::StorageMode;
use std::alloc::Layout;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const ALIGN: usize = 16;

/// Byte budget of one device.
#[derive(Debug)]
pub(crate) struct MemoryAccount {
    allocated: AtomicUsize,
    budget: usize,
}

impl MemoryAccount {
    pub(crate) fn new(budget: usize) -> Arc<Self> {
        Arc::new(MemoryAccount {
            allocated: AtomicUsize::new(0),
            budget,
        })
    }

    pub(crate) fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub(crate) fn budget(&self) -> usize {
        self.budget
    }

    fn reserve(&self, bytes: usize) -> Result<(), ResourceError> {
        let mut current = self.allocated.load(Ordering::Relaxed);
        loop {
            let available = self.budget.saturating_sub(current);
            if bytes > available {
                return Err(ResourceError::OutOfMemory {
                    requested: bytes,
                    available,
                });
            }
            match self.allocated.compare_exchange_weak(
                current,
                current + bytes,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, bytes: usize) {
        self.allocated.fetch_sub(bytes, Ordering::Relaxed);
    }
}

/// One zeroed allocation.
#[derive(Debug)]
pub(crate) struct DeviceMemory {
    ptr: NonNull<u8>,
    len: usize,
}

//safety: the allocation is plain bytes with no thread affinity; concurrent access follows
//the API's hazard rules, and every safe accessor bounds-checks.
unsafe impl Send for DeviceMemory {}
unsafe impl Sync for DeviceMemory {}

impl DeviceMemory {
    fn layout(len: usize) -> Result<Layout, ResourceError> {
        Layout::from_size_align(len, ALIGN).map_err(|_| ResourceError::TooLarge {
            length: len,
            max: isize::MAX as usize,
        })
    }

    fn new(len: usize) -> Result<Self, ResourceError> {
        let layout = Self::layout(len)?;
        //safety: len is non-zero, checked by the callers
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(ResourceError::OutOfMemory {
            requested: len,
            available: 0,
        })?;
        Ok(DeviceMemory { ptr, len })
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn check(&self, offset: usize, len: usize) -> Option<()> {
        let end = offset.checked_add(len)?;
        (end <= self.len).then_some(())
    }

    /// Copies `out.len()` bytes starting at `offset`.  `None` when out of bounds.
    pub(crate) fn read(&self, offset: usize, out: &mut [u8]) -> Option<()> {
        self.check(offset, out.len())?;
        //safety: bounds checked above; the source is our live allocation
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.ptr.as_ptr().add(offset),
                out.as_mut_ptr(),
                out.len(),
            );
        }
        Some(())
    }

    pub(crate) fn write(&self, offset: usize, bytes: &[u8]) -> Option<()> {
        self.check(offset, bytes.len())?;
        //safety: bounds checked above; `bytes` cannot alias our allocation through safe code
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.ptr.as_ptr().add(offset),
                bytes.len(),
            );
        }
        Some(())
    }

    pub(crate) fn fill(&self, range: Range<usize>, value: u8) -> Option<()> {
        self.check(range.start, range.len())?;
        //safety: bounds checked above
        unsafe {
            std::ptr::write_bytes(self.ptr.as_ptr().add(range.start), value, range.len());
        }
        Some(())
    }

    /// Copies `len` bytes from `src` at `src_offset` to `self` at `dst_offset`.  The two may be
    /// the same allocation.
    pub(crate) fn copy_from(
        &self,
        dst_offset: usize,
        src: &DeviceMemory,
        src_offset: usize,
        len: usize,
    ) -> Option<()> {
        self.check(dst_offset, len)?;
        src.check(src_offset, len)?;
        //safety: both ranges are bounds checked; `copy` tolerates overlap
        unsafe {
            std::ptr::copy(
                src.ptr.as_ptr().add(src_offset),
                self.ptr.as_ptr().add(dst_offset),
                len,
            );
        }
        Some(())
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        if let Ok(layout) = Self::layout(self.len) {
            //safety: allocated in `new` with this layout
            unsafe { std::alloc::dealloc(self.ptr.as_ptr(), layout) }
        }
    }
}

/// Backing store of a buffer or texture.
///
/// Shared storage is one allocation seen by both sides.  Managed storage on a device without
/// unified memory keeps a separate CPU mirror that is reconciled explicitly, with
/// `did_modify_range` in one direction and `synchronize_resource` in the other.  Private
/// storage has no CPU view at all.
#[derive(Debug)]
pub(crate) struct Storage {
    gpu: DeviceMemory,
    mirror: Option<DeviceMemory>,
    mode: StorageMode,
    account: Arc<MemoryAccount>,
}

impl Storage {
    pub(crate) fn new(
        len: usize,
        mode: StorageMode,
        unified_memory: bool,
        account: &Arc<MemoryAccount>,
    ) -> Result<Self, ResourceError> {
        if len == 0 {
            return Err(ResourceError::ZeroLength);
        }
        if mode == StorageMode::Memoryless {
            return Err(ResourceError::UnsupportedStorageMode(mode));
        }
        let mirrored = mode == StorageMode::Managed && !unified_memory;
        let charge = if mirrored { len.saturating_mul(2) } else { len };
        account.reserve(charge)?;
        let allocate = || -> Result<Storage, ResourceError> {
            let gpu = DeviceMemory::new(len)?;
            let mirror = if mirrored {
                Some(DeviceMemory::new(len)?)
            } else {
                None
            };
            Ok(Storage {
                gpu,
                mirror,
                mode,
                account: account.clone(),
            })
        };
        allocate().inspect_err(|_| account.release(charge))
    }

    pub(crate) fn len(&self) -> usize {
        self.gpu.len()
    }

    pub(crate) fn mode(&self) -> StorageMode {
        self.mode
    }

    pub(crate) fn is_mirrored(&self) -> bool {
        self.mirror.is_some()
    }

    /// The copy device work reads and writes.
    pub(crate) fn gpu(&self) -> &DeviceMemory {
        &self.gpu
    }

    /// The copy the CPU sees, if any.
    pub(crate) fn cpu(&self) -> Result<&DeviceMemory, ResourceError> {
        if !self.mode.is_cpu_accessible() {
            return Err(ResourceError::NotCpuAccessible(self.mode));
        }
        Ok(self.mirror.as_ref().unwrap_or(&self.gpu))
    }

    /// CPU write that both copies observe, for `replace_region`-style uploads.
    pub(crate) fn write_through(&self, offset: usize, bytes: &[u8]) -> Option<()> {
        if let Some(mirror) = &self.mirror {
            mirror.write(offset, bytes)?;
        }
        self.gpu.write(offset, bytes)
    }

    /// Pushes CPU writes in `range` to the device copy.
    pub(crate) fn did_modify(&self, range: Range<usize>) -> Option<()> {
        match &self.mirror {
            Some(mirror) => self.gpu.copy_from(range.start, mirror, range.start, range.len()),
            None => (range.end <= self.len()).then_some(()),
        }
    }

    /// Refreshes the CPU copy from the device copy.
    pub(crate) fn synchronize(&self) {
        if let Some(mirror) = &self.mirror {
            mirror.copy_from(0, &self.gpu, 0, self.gpu.len());
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        let charge = self.gpu.len() + self.mirror.as_ref().map_or(0, DeviceMemory::len);
        self.account.release(charge);
    }
}

fn out_of_bounds(index: u32, offset: usize, len: usize) -> Fault {
    Fault::OutOfBounds {
        index,
        offset: offset as i64,
        len,
    }
}

/// Reads through a buffer binding that starts `base` bytes into `memory`.
pub(crate) fn read_bound(
    memory: &DeviceMemory,
    base: usize,
    index: u32,
    offset: usize,
    out: &mut [u8],
) -> Result<(), Fault> {
    base.checked_add(offset)
        .and_then(|at| memory.read(at, out))
        .ok_or_else(|| out_of_bounds(index, offset, out.len()))
}

pub(crate) fn write_bound(
    memory: &DeviceMemory,
    base: usize,
    index: u32,
    offset: usize,
    bytes: &[u8],
) -> Result<(), Fault> {
    base.checked_add(offset)
        .and_then(|at| memory.write(at, bytes))
        .ok_or_else(|| out_of_bounds(index, offset, bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounting_and_budget() {
        let account = MemoryAccount::new(100);
        let a = Storage::new(60, StorageMode::Shared, true, &account).unwrap();
        assert_eq!(account.allocated(), 60);
        assert_eq!(
            Storage::new(60, StorageMode::Shared, true, &account).unwrap_err(),
            ResourceError::OutOfMemory {
                requested: 60,
                available: 40
            }
        );
        drop(a);
        assert_eq!(account.allocated(), 0);
        assert_eq!(
            Storage::new(8, StorageMode::Memoryless, true, &account).unwrap_err(),
            ResourceError::UnsupportedStorageMode(StorageMode::Memoryless)
        );
    }

    #[test]
    fn managed_mirror_is_explicit() {
        let account = MemoryAccount::new(1 << 20);
        let storage = Storage::new(8, StorageMode::Managed, false, &account).unwrap();
        assert!(storage.is_mirrored());
        storage.cpu().unwrap().write(0, &[1, 2, 3, 4]).unwrap();
        let mut seen = [0u8; 4];
        storage.gpu().read(0, &mut seen).unwrap();
        assert_eq!(seen, [0; 4]);
        storage.did_modify(0..2).unwrap();
        storage.gpu().read(0, &mut seen).unwrap();
        assert_eq!(seen, [1, 2, 0, 0]);

        storage.gpu().write(4, &[9, 9]).unwrap();
        storage.synchronize();
        let mut cpu = [0u8; 8];
        storage.cpu().unwrap().read(0, &mut cpu).unwrap();
        assert_eq!(cpu, [1, 2, 0, 0, 9, 9, 0, 0]);
    }

    #[test]
    fn private_has_no_cpu_view() {
        let account = MemoryAccount::new(1 << 20);
        let storage = Storage::new(8, StorageMode::Private, true, &account).unwrap();
        assert_eq!(
            storage.cpu().unwrap_err(),
            ResourceError::NotCpuAccessible(StorageMode::Private)
        );
        assert!(storage.gpu().read(4, &mut [0; 8]).is_none());
    }
}
