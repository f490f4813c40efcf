/*! mtl_bindings is a Metal-style GPU command submission layer with a C ABI.

It models the Metal object graph (devices, queues, command buffers, encoders, pipelines,
buffers and textures) with Rust ownership and typed errors, and exports the same graph as
plain C functions over opaque handles for callers in other languages.

Work executes on a software device: shaders written in a subset of the Metal Shading
Language are compiled into a checked module at library creation and interpreted on each
queue's timeline thread.

# Object model

| Object                 | Created by                       | Notes                                            |
|------------------------|----------------------------------|--------------------------------------------------|
| [`Device`]             | [`create_system_default_device`] | cheap handle; factory for everything below       |
| [`CommandQueue`]       | [`Device::new_command_queue`]    | one timeline thread, FIFO execution              |
| [`CommandBuffer`]      | [`CommandQueue::command_buffer`] | Recording → Committed → Completed or Error       |
| encoders               | [`CommandBuffer`]                | one open at a time; record compute/render/blit   |
| [`Library`]            | [`Device::new_library_with_source`] | compile errors are data                       |
| pipeline states        | [`Device`]                       | immutable once built                             |
| [`Buffer`], [`Texture`]| [`Device`]                       | weak back-reference to their device              |

# Errors

Construction failures come back as `Result`s.  Protocol violations (opening a second
encoder, committing twice, dispatching without a pipeline, ...) are rejected synchronously
with a [`UsageError`] and change nothing.  Faults raised while the device runs a command
buffer, such as an out-of-bounds store in a kernel, are stored in the buffer and reported by
[`CommandBuffer::wait_until_completed`].

```
use mtl_bindings::*;

let device = create_system_default_device().unwrap();
let library = device
    .new_library_with_source(
        "kernel void twice(device float* v [[buffer(0)]], uint i [[thread_position_in_grid]]) { v[i] = v[i] * 2.0; }",
        &CompileOptions::default(),
    )
    .unwrap();
let pipeline = device
    .new_compute_pipeline_state_with_function(&library.new_function_with_name("twice").unwrap())
    .unwrap();
let data = device
    .new_buffer_with_bytes(&1.5f32.to_le_bytes(), ResourceOptions::STORAGE_MODE_SHARED)
    .unwrap();

let queue = device.new_command_queue();
let command_buffer = queue.command_buffer();
let mut encoder = command_buffer.compute_command_encoder().unwrap();
encoder.set_compute_pipeline_state(&pipeline).unwrap();
encoder.set_buffer(&data, 0, 0).unwrap();
encoder.dispatch_threads(Size::new(1, 1, 1), Size::new(1, 1, 1)).unwrap();
encoder.end_encoding().unwrap();
command_buffer.commit().unwrap();
command_buffer.wait_until_completed().unwrap();

assert_eq!(data.read_contents(0, 4).unwrap(), 3.0f32.to_le_bytes());
```

# Configuration

Which adapters exist, and their limits, come from [`config::SystemConfig`].  See that
module for the environment variables it reads.
*/

mod command_buffer;
mod command_encoder;
mod command_queue;
pub mod config;
mod device;
mod drawable;
pub mod error;
pub mod ffi;
mod imp;
mod library;
mod pipeline;
pub mod pixel_formats;
mod resource;
mod shader;
pub mod sys;
pub mod types;

pub use command_buffer::{
    ColorAttachment, CommandBuffer, CommandBufferStatus, RenderPassDescriptor,
};
pub use command_encoder::{BlitCommandEncoder, ComputeCommandEncoder, RenderCommandEncoder};
pub use command_queue::CommandQueue;
pub use device::{Device, System, copy_all_devices, create_system_default_device};
pub use drawable::{Drawable, OffscreenDrawable};
pub use error::{
    CompileError, DeviceError, Error, ExecutionError, FunctionError, PipelineError,
    ResourceError, UsageError, WaitError,
};
pub use library::{CompileOptions, Function, FunctionType, LanguageVersion, Library};
pub use pipeline::{ComputePipelineState, RenderPipelineDescriptor, RenderPipelineState};
pub use pixel_formats::PixelFormat;
pub use resource::{Buffer, Resource, Texture, TextureDescriptor, full_mip_count};
pub use types::{
    ClearColor, CpuCacheMode, GpuFamily, LoadAction, Origin, PrimitiveType, Region,
    ResourceOptions, Size, StorageMode, StoreAction,
};
