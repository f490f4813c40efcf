// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The process-wide handle table.

A handle is a slot index and the slot's generation packed into a pointer-sized integer, so
C code sees an opaque `void *`.  Lookups check both halves: a released handle, a handle
whose slot has been reused, or a made-up value is simply not found.  Nothing is ever
dereferenced through a handle.
*/

use crate::drawable::OffscreenDrawable;
use crate::{
    BlitCommandEncoder, Buffer, CommandBuffer, CommandQueue, ComputeCommandEncoder,
    ComputePipelineState, Device, Function, Library, RenderCommandEncoder,
    RenderPipelineState, Texture,
};
use std::ffi::{CString, c_void};
use std::sync::{Arc, Mutex};

const INDEX_BITS: u32 = usize::BITS / 2;
const INDEX_MASK: usize = (1 << INDEX_BITS) - 1;

pub(crate) enum Object {
    /// The name backs the `Name` field handed out with the handle.
    Device(Device, CString),
    CommandQueue(CommandQueue),
    CommandBuffer(CommandBuffer),
    ComputeEncoder(Mutex<ComputeCommandEncoder>),
    RenderEncoder(Mutex<RenderCommandEncoder>),
    BlitEncoder(Mutex<BlitCommandEncoder>),
    Library(Library),
    Function(Function),
    ComputePipeline(ComputePipelineState),
    RenderPipeline(RenderPipelineState),
    Buffer(Buffer),
    Texture(Texture),
    Drawable(Arc<OffscreenDrawable>),
}

struct Slot {
    generation: usize,
    object: Option<Arc<Object>>,
}

struct Table {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

static TABLE: Mutex<Table> = Mutex::new(Table {
    slots: Vec::new(),
    free: Vec::new(),
});

fn encode(index: usize, generation: usize) -> *mut c_void {
    // index + 1 keeps every handle non-null
    std::ptr::without_provenance_mut((generation << INDEX_BITS) | (index + 1))
}

fn decode(handle: *mut c_void) -> Option<(usize, usize)> {
    let raw = handle.addr();
    let index = (raw & INDEX_MASK).checked_sub(1)?;
    Some((index, raw >> INDEX_BITS))
}

pub(crate) fn insert(object: Object) -> *mut c_void {
    let mut table = TABLE.lock().unwrap();
    let object = Some(Arc::new(object));
    match table.free.pop() {
        Some(index) => {
            let slot = &mut table.slots[index];
            slot.object = object;
            encode(index, slot.generation)
        }
        None => {
            let index = table.slots.len();
            table.slots.push(Slot {
                generation: 1,
                object,
            });
            encode(index, 1)
        }
    }
}

pub(crate) fn get(handle: *mut c_void) -> Option<Arc<Object>> {
    let (index, generation) = decode(handle)?;
    let table = TABLE.lock().unwrap();
    let slot = table.slots.get(index)?;
    if slot.generation != generation {
        return None;
    }
    slot.object.clone()
}

/// Empties the slot behind `handle`.  The object itself drops once no call is using it.
pub(crate) fn remove(handle: *mut c_void) -> Option<Arc<Object>> {
    let (index, generation) = decode(handle)?;
    let mut table = TABLE.lock().unwrap();
    let slot = table.slots.get_mut(index)?;
    if slot.generation != generation {
        return None;
    }
    let object = slot.object.take()?;
    slot.generation = match (slot.generation + 1) & (usize::MAX >> INDEX_BITS) {
        0 => 1,
        next => next,
    };
    table.free.push(index);
    Some(object)
}
