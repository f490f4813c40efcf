// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The C ABI.

Every object crosses the boundary as an opaque handle from a process-wide, generation-checked
table; see `include/mtl_bindings.h` for the C declarations.  Handles are released with
[`Object_Release`].

Failures are reported in one of three ways, following the shape of each call:

* structs with an `Error` field carry the message there, with a null handle;
* calls that would otherwise return nothing return `const char *`: null on success, the
  message on failure;
* calls that return a bare handle return null, with the message available from
  [`LastError`].

Messages belong to the calling thread and stay valid until that thread's next failing call.
*/
#![allow(non_snake_case)]

mod handles;
mod structs;

pub use structs::*;

use crate::drawable::OffscreenDrawable;
use crate::error::{
    CompileError, DeviceError, FunctionError, PipelineError, ResourceError, UsageError,
    WaitError,
};
use crate::{
    Buffer, ColorAttachment, CommandBuffer, CommandQueue, CompileOptions, ComputePipelineState,
    Device, Drawable, Function, LanguageVersion, Library, LoadAction, PixelFormat,
    PrimitiveType, RenderPassDescriptor, RenderPipelineDescriptor, RenderPipelineState,
    Resource, ResourceOptions, StorageMode, StoreAction, Texture, TextureDescriptor,
};
use handles::Object;
use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::fmt::Display;
use std::ptr;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
enum FfiError {
    #[error("invalid {0} handle")]
    InvalidHandle(&'static str),
    #[error("{0} must not be null")]
    NullPointer(&'static str),
    #[error("invalid {what} {value}")]
    InvalidValue { what: &'static str, value: u64 },
    #[error("source is not valid UTF-8")]
    NotUtf8,
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Function(#[from] FunctionError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Wait(#[from] WaitError),
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Stores `message` as this thread's last error and returns it.
fn record_error(message: impl Display) -> *const c_char {
    let text = CString::new(message.to_string().replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|slot| {
        let mut slot = slot.borrow_mut();
        *slot = Some(text);
        slot.as_ref().map_or(ptr::null(), |s| s.as_ptr())
    })
}

fn status(result: Result<(), FfiError>) -> *const c_char {
    match result {
        Ok(()) => ptr::null(),
        Err(err) => record_error(err),
    }
}

fn handle_or_null(result: Result<Object, FfiError>) -> *mut c_void {
    match result {
        Ok(object) => handles::insert(object),
        Err(err) => {
            record_error(err);
            ptr::null_mut()
        }
    }
}

fn object(handle: *mut c_void, what: &'static str) -> Result<Arc<Object>, FfiError> {
    handles::get(handle).ok_or(FfiError::InvalidHandle(what))
}

fn device(handle: *mut c_void) -> Result<Device, FfiError> {
    match &*object(handle, "device")? {
        Object::Device(device, _) => Ok(device.clone()),
        _ => Err(FfiError::InvalidHandle("device")),
    }
}

fn command_queue(handle: *mut c_void) -> Result<CommandQueue, FfiError> {
    match &*object(handle, "command queue")? {
        Object::CommandQueue(queue) => Ok(queue.clone()),
        _ => Err(FfiError::InvalidHandle("command queue")),
    }
}

fn command_buffer(handle: *mut c_void) -> Result<CommandBuffer, FfiError> {
    match &*object(handle, "command buffer")? {
        Object::CommandBuffer(buffer) => Ok(buffer.clone()),
        _ => Err(FfiError::InvalidHandle("command buffer")),
    }
}

fn library(handle: *mut c_void) -> Result<Library, FfiError> {
    match &*object(handle, "library")? {
        Object::Library(library) => Ok(library.clone()),
        _ => Err(FfiError::InvalidHandle("library")),
    }
}

fn function(handle: *mut c_void) -> Result<Function, FfiError> {
    match &*object(handle, "function")? {
        Object::Function(function) => Ok(function.clone()),
        _ => Err(FfiError::InvalidHandle("function")),
    }
}

fn compute_pipeline(handle: *mut c_void) -> Result<ComputePipelineState, FfiError> {
    match &*object(handle, "compute pipeline state")? {
        Object::ComputePipeline(state) => Ok(state.clone()),
        _ => Err(FfiError::InvalidHandle("compute pipeline state")),
    }
}

fn render_pipeline(handle: *mut c_void) -> Result<RenderPipelineState, FfiError> {
    match &*object(handle, "render pipeline state")? {
        Object::RenderPipeline(state) => Ok(state.clone()),
        _ => Err(FfiError::InvalidHandle("render pipeline state")),
    }
}

fn buffer(handle: *mut c_void) -> Result<Buffer, FfiError> {
    match &*object(handle, "buffer")? {
        Object::Buffer(buffer) => Ok(buffer.clone()),
        _ => Err(FfiError::InvalidHandle("buffer")),
    }
}

fn texture(handle: *mut c_void) -> Result<Texture, FfiError> {
    match &*object(handle, "texture")? {
        Object::Texture(texture) => Ok(texture.clone()),
        _ => Err(FfiError::InvalidHandle("texture")),
    }
}

fn drawable(handle: *mut c_void) -> Result<Arc<OffscreenDrawable>, FfiError> {
    match &*object(handle, "drawable")? {
        Object::Drawable(drawable) => Ok(drawable.clone()),
        _ => Err(FfiError::InvalidHandle("drawable")),
    }
}

fn with_compute_encoder(
    handle: *mut c_void,
    f: impl FnOnce(&mut crate::ComputeCommandEncoder) -> Result<(), FfiError>,
) -> Result<(), FfiError> {
    match &*object(handle, "compute command encoder")? {
        Object::ComputeEncoder(encoder) => f(&mut encoder.lock().unwrap()),
        _ => Err(FfiError::InvalidHandle("compute command encoder")),
    }
}

fn with_render_encoder(
    handle: *mut c_void,
    f: impl FnOnce(&mut crate::RenderCommandEncoder) -> Result<(), FfiError>,
) -> Result<(), FfiError> {
    match &*object(handle, "render command encoder")? {
        Object::RenderEncoder(encoder) => f(&mut encoder.lock().unwrap()),
        _ => Err(FfiError::InvalidHandle("render command encoder")),
    }
}

fn with_blit_encoder(
    handle: *mut c_void,
    f: impl FnOnce(&mut crate::BlitCommandEncoder) -> Result<(), FfiError>,
) -> Result<(), FfiError> {
    match &*object(handle, "blit command encoder")? {
        Object::BlitEncoder(encoder) => f(&mut encoder.lock().unwrap()),
        _ => Err(FfiError::InvalidHandle("blit command encoder")),
    }
}

/// # Safety
/// `bytes` must be null with `length` 0, or point to `length` readable bytes.
unsafe fn byte_slice<'a>(bytes: *const c_void, length: usize) -> Result<&'a [u8], FfiError> {
    if length == 0 {
        return Ok(&[]);
    }
    if bytes.is_null() {
        return Err(FfiError::NullPointer("bytes"));
    }
    Ok(unsafe { std::slice::from_raw_parts(bytes.cast::<u8>(), length) })
}

/// Bytes a tightly described pixel upload of `region` touches.
fn pixel_span(texture: &Texture, region: &crate::Region, bytes_per_row: usize) -> usize {
    let row = region.size.width * texture.pixel_format().bytes_per_pixel().unwrap_or(0);
    match region.size.height {
        0 => 0,
        h => bytes_per_row.saturating_mul(h - 1).saturating_add(row),
    }
}

fn device_struct(device: Device) -> CDevice {
    let name = CString::new(device.name().replace('\0', " ")).unwrap_or_default();
    // the heap buffer does not move when the CString moves into the table
    let name_ptr = name.as_ptr();
    CDevice {
        headless: device.is_headless(),
        low_power: device.is_low_power(),
        removable: device.is_removable(),
        registry_id: device.registry_id(),
        device: handles::insert(Object::Device(device, name)),
        name: name_ptr,
    }
}

/// The last error message recorded on this thread, or null.
#[unsafe(no_mangle)]
pub extern "C" fn LastError() -> *const c_char {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(ptr::null(), |s| s.as_ptr()))
}

/// Releases any handle.  Releasing a handle twice is an error.
#[unsafe(no_mangle)]
pub extern "C" fn Object_Release(handle: *mut c_void) -> *const c_char {
    match handles::remove(handle) {
        Some(_) => ptr::null(),
        None => record_error(FfiError::InvalidHandle("object")),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn CreateSystemDefaultDevice() -> CDevice {
    match crate::create_system_default_device() {
        Ok(device) => device_struct(device),
        Err(err) => {
            record_error(err);
            CDevice {
                device: ptr::null_mut(),
                headless: false,
                low_power: false,
                removable: false,
                registry_id: 0,
                name: ptr::null(),
            }
        }
    }
}

/// Every device, in adapter order.  Free the result with [`Devices_Free`].
#[unsafe(no_mangle)]
pub extern "C" fn CopyAllDevices() -> CDevices {
    let devices: Box<[CDevice]> = crate::copy_all_devices()
        .into_iter()
        .map(device_struct)
        .collect();
    let length = devices.len() as c_int;
    CDevices {
        devices: Box::into_raw(devices).cast::<CDevice>(),
        length,
    }
}

/// Releases every device handle in `devices` and frees the array.
///
/// # Safety
/// `devices` must come from [`CopyAllDevices`] and not have been freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Devices_Free(devices: CDevices) {
    if devices.devices.is_null() {
        return;
    }
    let slice = ptr::slice_from_raw_parts_mut(devices.devices, devices.length.max(0) as usize);
    let owned = unsafe { Box::from_raw(slice) };
    for device in owned.iter() {
        handles::remove(device.device);
    }
}

/// The device's name, valid until the handle is released.  Null for an invalid handle.
#[unsafe(no_mangle)]
pub extern "C" fn Device_Name(device_handle: *mut c_void) -> *const c_char {
    match handles::get(device_handle).as_deref() {
        Some(Object::Device(_, name)) => name.as_ptr(),
        _ => {
            record_error(FfiError::InvalidHandle("device"));
            ptr::null()
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn Device_SupportsFamily(device_handle: *mut c_void, gpu_family: u16) -> bool {
    device(device_handle).is_ok_and(|d| d.supports_family(crate::GpuFamily(gpu_family)))
}

#[unsafe(no_mangle)]
pub extern "C" fn Device_HasUnifiedMemory(device_handle: *mut c_void) -> bool {
    device(device_handle).is_ok_and(|d| d.has_unified_memory())
}

#[unsafe(no_mangle)]
pub extern "C" fn Device_MaxThreadsPerThreadgroup(device_handle: *mut c_void) -> CSize {
    device(device_handle).map_or(CSize::default(), |d| d.max_threads_per_threadgroup().into())
}

#[unsafe(no_mangle)]
pub extern "C" fn Device_CurrentAllocatedSize(device_handle: *mut c_void) -> usize {
    device(device_handle).map_or(0, |d| d.current_allocated_size())
}

#[unsafe(no_mangle)]
pub extern "C" fn Device_NewCommandQueue(device_handle: *mut c_void) -> *mut c_void {
    handle_or_null(device(device_handle).map(|d| Object::CommandQueue(d.new_command_queue())))
}

#[unsafe(no_mangle)]
pub extern "C" fn Device_NewBufferWithLength(
    device_handle: *mut c_void,
    length: usize,
    options: u16,
) -> *mut c_void {
    handle_or_null((|| -> Result<_, FfiError> {
        let buffer =
            device(device_handle)?.new_buffer_with_length(length, ResourceOptions(options))?;
        Ok(Object::Buffer(buffer))
    })())
}

/// # Safety
/// `bytes` must point to `length` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Device_NewBufferWithBytes(
    device_handle: *mut c_void,
    bytes: *const c_void,
    length: usize,
    options: u16,
) -> *mut c_void {
    handle_or_null((|| -> Result<_, FfiError> {
        let bytes = unsafe { byte_slice(bytes, length)? };
        let buffer =
            device(device_handle)?.new_buffer_with_bytes(bytes, ResourceOptions(options))?;
        Ok(Object::Buffer(buffer))
    })())
}

#[unsafe(no_mangle)]
pub extern "C" fn Device_NewTextureWithDescriptor(
    device_handle: *mut c_void,
    descriptor: CTextureDescriptor,
) -> *mut c_void {
    handle_or_null((|| -> Result<_, FfiError> {
        let storage_mode =
            StorageMode::from_raw(descriptor.storage_mode).ok_or(FfiError::InvalidValue {
                what: "storage mode",
                value: descriptor.storage_mode.into(),
            })?;
        let mut rust = TextureDescriptor::texture_2d(
            PixelFormat(descriptor.pixel_format),
            descriptor.width as usize,
            descriptor.height as usize,
            false,
        );
        rust.storage_mode = storage_mode;
        Ok(Object::Texture(device(device_handle)?.new_texture_with_descriptor(&rust)?))
    })())
}

fn compile_options(options: CCompileOptions) -> Result<CompileOptions, FfiError> {
    if options == CCompileOptions::default() {
        return Ok(CompileOptions::default());
    }
    let language_version = match options.language_version {
        0 => None,
        raw => Some(LanguageVersion::from_raw(raw as u64).ok_or_else(|| CompileError {
            diagnostics: format!("program_source: error: unsupported language version {raw:#x}"),
        })?),
    };
    Ok(CompileOptions {
        fast_math_enabled: options.fast_math_enabled,
        preserve_invariance: options.preserve_invariance,
        language_version,
    })
}

/// Compiles `source_length` bytes of `source`.  A zeroed `options` means the defaults.
///
/// # Safety
/// `source` must point to `source_length` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Device_NewLibraryWithSource(
    device_handle: *mut c_void,
    source: *const c_char,
    source_length: usize,
    options: CCompileOptions,
) -> CLibrary {
    let result = (|| -> Result<_, FfiError> {
        let bytes = unsafe { byte_slice(source.cast(), source_length)? };
        let source = std::str::from_utf8(bytes).map_err(|_| FfiError::NotUtf8)?;
        let options = compile_options(options)?;
        Ok(device(device_handle)?.new_library_with_source(source, &options)?)
    })();
    match result {
        Ok(library) => CLibrary {
            library: handles::insert(Object::Library(library)),
            error: ptr::null(),
        },
        Err(err) => CLibrary {
            library: ptr::null_mut(),
            error: record_error(err),
        },
    }
}

/// # Safety
/// `name` must be a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Library_NewFunctionWithName(
    library_handle: *mut c_void,
    name: *const c_char,
) -> *mut c_void {
    handle_or_null((|| -> Result<_, FfiError> {
        if name.is_null() {
            return Err(FfiError::NullPointer("name"));
        }
        let name = unsafe { CStr::from_ptr(name) }.to_string_lossy();
        Ok(Object::Function(library(library_handle)?.new_function_with_name(&name)?))
    })())
}

#[unsafe(no_mangle)]
pub extern "C" fn Device_NewComputePipelineStateWithFunction(
    device_handle: *mut c_void,
    function_handle: *mut c_void,
) -> CComputePipelineState {
    let result = (|| -> Result<_, FfiError> {
        let function = function(function_handle)?;
        Ok(device(device_handle)?.new_compute_pipeline_state_with_function(&function)?)
    })();
    match result {
        Ok(state) => CComputePipelineState {
            max_total_threads_per_threadgroup: state.max_total_threads_per_threadgroup() as uint_t,
            compute_pipeline_state: handles::insert(Object::ComputePipeline(state)),
            error: ptr::null(),
        },
        Err(err) => CComputePipelineState {
            compute_pipeline_state: ptr::null_mut(),
            max_total_threads_per_threadgroup: 0,
            error: record_error(err),
        },
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn Device_NewRenderPipelineStateWithDescriptor(
    device_handle: *mut c_void,
    descriptor: CRenderPipelineDescriptor,
) -> CRenderPipelineState {
    let result = (|| -> Result<_, FfiError> {
        let optional = |handle: *mut c_void| -> Result<Option<Function>, FfiError> {
            if handle.is_null() {
                Ok(None)
            } else {
                function(handle).map(Some)
            }
        };
        let rust = RenderPipelineDescriptor {
            vertex_function: optional(descriptor.vertex_function)?,
            fragment_function: optional(descriptor.fragment_function)?,
            color_attachment0_pixel_format: PixelFormat(descriptor.color_attachment0_pixel_format),
        };
        Ok(device(device_handle)?.new_render_pipeline_state_with_descriptor(&rust)?)
    })();
    match result {
        Ok(state) => CRenderPipelineState {
            render_pipeline_state: handles::insert(Object::RenderPipeline(state)),
            error: ptr::null(),
        },
        Err(err) => CRenderPipelineState {
            render_pipeline_state: ptr::null_mut(),
            error: record_error(err),
        },
    }
}

/// The CPU view of a buffer, or null for private storage.
#[unsafe(no_mangle)]
pub extern "C" fn Buffer_Contents(buffer_handle: *mut c_void) -> *mut c_void {
    match buffer(buffer_handle) {
        Ok(buffer) => buffer.contents().cast(),
        Err(err) => {
            record_error(err);
            ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn Buffer_Length(buffer_handle: *mut c_void) -> usize {
    buffer(buffer_handle).map_or(0, |b| b.length())
}

#[unsafe(no_mangle)]
pub extern "C" fn Buffer_DidModifyRange(
    buffer_handle: *mut c_void,
    location: uint_t,
    length: uint_t,
) -> *const c_char {
    status((|| -> Result<_, FfiError> {
        let start = location as usize;
        let range = start..start.saturating_add(length as usize);
        Ok(buffer(buffer_handle)?.did_modify_range(range)?)
    })())
}

/// # Safety
/// `pixel_bytes` must cover `region` laid out `bytes_per_row` apart.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Texture_ReplaceRegion(
    texture_handle: *mut c_void,
    region: CRegion,
    level: uint_t,
    pixel_bytes: *const c_void,
    bytes_per_row: usize,
) -> *const c_char {
    status((|| -> Result<_, FfiError> {
        let texture = texture(texture_handle)?;
        let region = crate::Region::from(region);
        let span = pixel_span(&texture, &region, bytes_per_row);
        let bytes = unsafe { byte_slice(pixel_bytes, span)? };
        Ok(texture.replace_region(region, level as usize, bytes, bytes_per_row)?)
    })())
}

/// # Safety
/// `pixel_bytes` must have room for `region` laid out `bytes_per_row` apart.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Texture_GetBytes(
    texture_handle: *mut c_void,
    pixel_bytes: *mut c_void,
    bytes_per_row: usize,
    region: CRegion,
    level: uint_t,
) -> *const c_char {
    status((|| -> Result<_, FfiError> {
        let texture = texture(texture_handle)?;
        let region = crate::Region::from(region);
        let length = pixel_span(&texture, &region, bytes_per_row);
        let out: &mut [u8] = if length == 0 {
            &mut []
        } else if pixel_bytes.is_null() {
            return Err(FfiError::NullPointer("pixel bytes"));
        } else {
            unsafe { std::slice::from_raw_parts_mut(pixel_bytes.cast::<u8>(), length) }
        };
        Ok(texture.get_bytes(out, bytes_per_row, region, level as usize)?)
    })())
}

#[unsafe(no_mangle)]
pub extern "C" fn Texture_Width(texture_handle: *mut c_void) -> uint_t {
    texture(texture_handle).map_or(0, |t| t.width() as uint_t)
}

#[unsafe(no_mangle)]
pub extern "C" fn Texture_Height(texture_handle: *mut c_void) -> uint_t {
    texture(texture_handle).map_or(0, |t| t.height() as uint_t)
}

#[unsafe(no_mangle)]
pub extern "C" fn Drawable_NewWithTexture(texture_handle: *mut c_void) -> *mut c_void {
    handle_or_null(
        texture(texture_handle).map(|t| Object::Drawable(Arc::new(OffscreenDrawable::new(t)))),
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn Drawable_PresentCount(drawable_handle: *mut c_void) -> uint_t {
    drawable(drawable_handle).map_or(0, |d| d.present_count() as uint_t)
}

#[unsafe(no_mangle)]
pub extern "C" fn CommandQueue_CommandBuffer(queue_handle: *mut c_void) -> *mut c_void {
    handle_or_null(command_queue(queue_handle).map(|q| Object::CommandBuffer(q.command_buffer())))
}

#[unsafe(no_mangle)]
pub extern "C" fn CommandBuffer_Enqueue(buffer_handle: *mut c_void) -> *const c_char {
    status((|| -> Result<_, FfiError> {
        Ok(command_buffer(buffer_handle)?.enqueue()?)
    })())
}

#[unsafe(no_mangle)]
pub extern "C" fn CommandBuffer_Commit(buffer_handle: *mut c_void) -> *const c_char {
    status((|| -> Result<_, FfiError> {
        Ok(command_buffer(buffer_handle)?.commit()?)
    })())
}

/// Blocks until the buffer finishes.  Returns the execution fault, or the usage error for
/// a buffer that was never committed.
#[unsafe(no_mangle)]
pub extern "C" fn CommandBuffer_WaitUntilCompleted(buffer_handle: *mut c_void) -> *const c_char {
    status((|| -> Result<_, FfiError> {
        Ok(command_buffer(buffer_handle)?.wait_until_completed()?)
    })())
}

/// The buffer's status code, or -1 for an invalid handle.
#[unsafe(no_mangle)]
pub extern "C" fn CommandBuffer_Status(buffer_handle: *mut c_void) -> c_int {
    match command_buffer(buffer_handle) {
        Ok(buffer) => buffer.status() as c_int,
        Err(err) => {
            record_error(err);
            -1
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn CommandBuffer_PresentDrawable(
    buffer_handle: *mut c_void,
    drawable_handle: *mut c_void,
) -> *const c_char {
    status((|| -> Result<_, FfiError> {
        let drawable: Arc<dyn Drawable> = drawable(drawable_handle)?;
        Ok(command_buffer(buffer_handle)?.present_drawable(drawable)?)
    })())
}

#[unsafe(no_mangle)]
pub extern "C" fn CommandBuffer_ComputeCommandEncoder(buffer_handle: *mut c_void) -> *mut c_void {
    handle_or_null((|| -> Result<_, FfiError> {
        let encoder = command_buffer(buffer_handle)?.compute_command_encoder()?;
        Ok(Object::ComputeEncoder(encoder.into()))
    })())
}

#[unsafe(no_mangle)]
pub extern "C" fn CommandBuffer_BlitCommandEncoder(buffer_handle: *mut c_void) -> *mut c_void {
    handle_or_null((|| -> Result<_, FfiError> {
        let encoder = command_buffer(buffer_handle)?.blit_command_encoder()?;
        Ok(Object::BlitEncoder(encoder.into()))
    })())
}

#[unsafe(no_mangle)]
pub extern "C" fn CommandBuffer_RenderCommandEncoderWithDescriptor(
    buffer_handle: *mut c_void,
    descriptor: CRenderPassDescriptor,
) -> *mut c_void {
    handle_or_null((|| -> Result<_, FfiError> {
        let load_action = LoadAction::from_raw(descriptor.color_attachment0_load_action)
            .ok_or(FfiError::InvalidValue {
                what: "load action",
                value: descriptor.color_attachment0_load_action.into(),
            })?;
        let store_action = StoreAction::from_raw(descriptor.color_attachment0_store_action)
            .ok_or(FfiError::InvalidValue {
                what: "store action",
                value: descriptor.color_attachment0_store_action.into(),
            })?;
        let texture = match descriptor.color_attachment0_texture {
            t if t.is_null() => None,
            t => Some(texture(t)?),
        };
        let rust = RenderPassDescriptor {
            color_attachment0: ColorAttachment {
                texture,
                load_action,
                store_action,
                clear_color: descriptor.color_attachment0_clear_color.into(),
            },
        };
        let encoder =
            command_buffer(buffer_handle)?.render_command_encoder_with_descriptor(&rust)?;
        Ok(Object::RenderEncoder(encoder.into()))
    })())
}

/// Ends any kind of encoder.
#[unsafe(no_mangle)]
pub extern "C" fn CommandEncoder_EndEncoding(encoder_handle: *mut c_void) -> *const c_char {
    status((|| -> Result<(), FfiError> {
        match &*object(encoder_handle, "command encoder")? {
            Object::ComputeEncoder(e) => Ok(e.lock().unwrap().end_encoding()?),
            Object::RenderEncoder(e) => Ok(e.lock().unwrap().end_encoding()?),
            Object::BlitEncoder(e) => Ok(e.lock().unwrap().end_encoding()?),
            _ => Err(FfiError::InvalidHandle("command encoder")),
        }
    })())
}

#[unsafe(no_mangle)]
pub extern "C" fn ComputeCommandEncoder_SetComputePipelineState(
    encoder_handle: *mut c_void,
    state_handle: *mut c_void,
) -> *const c_char {
    status(with_compute_encoder(encoder_handle, |encoder| {
        Ok(encoder.set_compute_pipeline_state(&compute_pipeline(state_handle)?)?)
    }))
}

#[unsafe(no_mangle)]
pub extern "C" fn ComputeCommandEncoder_SetBuffer(
    encoder_handle: *mut c_void,
    buffer_handle: *mut c_void,
    offset: uint_t,
    index: uint_t,
) -> *const c_char {
    status(with_compute_encoder(encoder_handle, |encoder| {
        Ok(encoder.set_buffer(&buffer(buffer_handle)?, offset as usize, index as usize)?)
    }))
}

/// # Safety
/// `bytes` must point to `length` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ComputeCommandEncoder_SetBytes(
    encoder_handle: *mut c_void,
    bytes: *const c_void,
    length: usize,
    index: uint_t,
) -> *const c_char {
    status(with_compute_encoder(encoder_handle, |encoder| {
        let bytes = unsafe { byte_slice(bytes, length)? };
        Ok(encoder.set_bytes(bytes, index as usize)?)
    }))
}

#[unsafe(no_mangle)]
pub extern "C" fn ComputeCommandEncoder_DispatchThreads(
    encoder_handle: *mut c_void,
    grid_size: CSize,
    threadgroup_size: CSize,
) -> *const c_char {
    status(with_compute_encoder(encoder_handle, |encoder| {
        Ok(encoder.dispatch_threads(grid_size.into(), threadgroup_size.into())?)
    }))
}

#[unsafe(no_mangle)]
pub extern "C" fn ComputeCommandEncoder_DispatchThreadgroups(
    encoder_handle: *mut c_void,
    threadgroups: CSize,
    threadgroup_size: CSize,
) -> *const c_char {
    status(with_compute_encoder(encoder_handle, |encoder| {
        Ok(encoder.dispatch_threadgroups(threadgroups.into(), threadgroup_size.into())?)
    }))
}

#[unsafe(no_mangle)]
pub extern "C" fn RenderCommandEncoder_SetRenderPipelineState(
    encoder_handle: *mut c_void,
    state_handle: *mut c_void,
) -> *const c_char {
    status(with_render_encoder(encoder_handle, |encoder| {
        Ok(encoder.set_render_pipeline_state(&render_pipeline(state_handle)?)?)
    }))
}

#[unsafe(no_mangle)]
pub extern "C" fn RenderCommandEncoder_SetVertexBuffer(
    encoder_handle: *mut c_void,
    buffer_handle: *mut c_void,
    offset: uint_t,
    index: uint_t,
) -> *const c_char {
    status(with_render_encoder(encoder_handle, |encoder| {
        Ok(encoder.set_vertex_buffer(&buffer(buffer_handle)?, offset as usize, index as usize)?)
    }))
}

/// # Safety
/// `bytes` must point to `length` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn RenderCommandEncoder_SetVertexBytes(
    encoder_handle: *mut c_void,
    bytes: *const c_void,
    length: usize,
    index: uint_t,
) -> *const c_char {
    status(with_render_encoder(encoder_handle, |encoder| {
        let bytes = unsafe { byte_slice(bytes, length)? };
        Ok(encoder.set_vertex_bytes(bytes, index as usize)?)
    }))
}

#[unsafe(no_mangle)]
pub extern "C" fn RenderCommandEncoder_SetFragmentBuffer(
    encoder_handle: *mut c_void,
    buffer_handle: *mut c_void,
    offset: uint_t,
    index: uint_t,
) -> *const c_char {
    status(with_render_encoder(encoder_handle, |encoder| {
        Ok(encoder.set_fragment_buffer(&buffer(buffer_handle)?, offset as usize, index as usize)?)
    }))
}

/// # Safety
/// `bytes` must point to `length` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn RenderCommandEncoder_SetFragmentBytes(
    encoder_handle: *mut c_void,
    bytes: *const c_void,
    length: usize,
    index: uint_t,
) -> *const c_char {
    status(with_render_encoder(encoder_handle, |encoder| {
        let bytes = unsafe { byte_slice(bytes, length)? };
        Ok(encoder.set_fragment_bytes(bytes, index as usize)?)
    }))
}

#[unsafe(no_mangle)]
pub extern "C" fn RenderCommandEncoder_DrawPrimitives(
    encoder_handle: *mut c_void,
    primitive_type: u8,
    vertex_start: uint_t,
    vertex_count: uint_t,
) -> *const c_char {
    status(with_render_encoder(encoder_handle, |encoder| {
        let primitive = PrimitiveType::from_raw(primitive_type).ok_or(FfiError::InvalidValue {
            what: "primitive type",
            value: primitive_type.into(),
        })?;
        Ok(encoder.draw_primitives(primitive, vertex_start as usize, vertex_count as usize)?)
    }))
}

#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn BlitCommandEncoder_CopyFromTexture(
    encoder_handle: *mut c_void,
    src_texture: *mut c_void,
    src_slice: uint_t,
    src_level: uint_t,
    src_origin: COrigin,
    src_size: CSize,
    dst_texture: *mut c_void,
    dst_slice: uint_t,
    dst_level: uint_t,
    dst_origin: COrigin,
) -> *const c_char {
    status(with_blit_encoder(encoder_handle, |encoder| {
        let src = texture(src_texture)?;
        let dst = texture(dst_texture)?;
        Ok(encoder.copy_from_texture(
            &src,
            src_slice as usize,
            src_level as usize,
            src_origin.into(),
            src_size.into(),
            &dst,
            dst_slice as usize,
            dst_level as usize,
            dst_origin.into(),
        )?)
    }))
}

#[unsafe(no_mangle)]
pub extern "C" fn BlitCommandEncoder_CopyFromBuffer(
    encoder_handle: *mut c_void,
    src_buffer: *mut c_void,
    src_offset: uint_t,
    dst_buffer: *mut c_void,
    dst_offset: uint_t,
    size: uint_t,
) -> *const c_char {
    status(with_blit_encoder(encoder_handle, |encoder| {
        let src = buffer(src_buffer)?;
        let dst = buffer(dst_buffer)?;
        Ok(encoder.copy_from_buffer(
            &src,
            src_offset as usize,
            &dst,
            dst_offset as usize,
            size as usize,
        )?)
    }))
}

#[unsafe(no_mangle)]
pub extern "C" fn BlitCommandEncoder_FillBuffer(
    encoder_handle: *mut c_void,
    buffer_handle: *mut c_void,
    location: uint_t,
    length: uint_t,
    value: u8,
) -> *const c_char {
    status(with_blit_encoder(encoder_handle, |encoder| {
        let start = location as usize;
        let range = start..start.saturating_add(length as usize);
        Ok(encoder.fill_buffer(&buffer(buffer_handle)?, range, value)?)
    }))
}

/// `resource` may be a buffer or a texture handle.
#[unsafe(no_mangle)]
pub extern "C" fn BlitCommandEncoder_SynchronizeResource(
    encoder_handle: *mut c_void,
    resource: *mut c_void,
) -> *const c_char {
    status(with_blit_encoder(encoder_handle, |encoder| {
        match &*object(resource, "resource")? {
            Object::Buffer(buffer) => Ok(encoder.synchronize_resource(Resource::Buffer(buffer))?),
            Object::Texture(texture) => {
                Ok(encoder.synchronize_resource(Resource::Texture(texture))?)
            }
            _ => Err(FfiError::InvalidHandle("resource")),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(ptr: *const c_char) -> Option<String> {
        (!ptr.is_null()).then(|| unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    #[test]
    fn protocol_violations_come_back_as_strings() {
        let device = CreateSystemDefaultDevice();
        assert!(!device.device.is_null());
        let queue = Device_NewCommandQueue(device.device);
        let buffer = CommandQueue_CommandBuffer(queue);
        let encoder = CommandBuffer_ComputeCommandEncoder(buffer);
        assert!(!encoder.is_null());
        assert!(CommandBuffer_BlitCommandEncoder(buffer).is_null());
        assert_eq!(
            message(LastError()).as_deref(),
            Some("an encoder is already open on this command buffer")
        );
        assert_eq!(
            message(CommandBuffer_Commit(buffer)).as_deref(),
            Some("an encoder is still open; call end_encoding first")
        );
        assert_eq!(message(CommandEncoder_EndEncoding(encoder)), None);
        assert_eq!(message(CommandBuffer_Commit(buffer)), None);
        assert_eq!(message(CommandBuffer_WaitUntilCompleted(buffer)), None);
        assert_eq!(CommandBuffer_Status(buffer), 4);
        for handle in [encoder, buffer, queue, device.device] {
            assert_eq!(message(Object_Release(handle)), None);
        }
        assert_eq!(
            message(Object_Release(queue)).as_deref(),
            Some("invalid object handle")
        );
        assert_eq!(CommandBuffer_Status(buffer), -1);
    }

    #[test]
    fn zeroed_compile_options_are_defaults() {
        assert_eq!(
            compile_options(CCompileOptions::default()).unwrap(),
            CompileOptions::default()
        );
        assert!(compile_options(CCompileOptions {
            fast_math_enabled: true,
            preserve_invariance: false,
            language_version: 0x1234,
        })
        .is_err());
    }
}
