// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The C ABI, called the way a C program would.

use mtl_bindings::ffi::*;
use std::ffi::{CStr, c_char, c_void};
use std::ptr;

const SHARED: u16 = 0;
const RGBA8_UNORM: u16 = 70;

const SOURCE: &str = r#"
kernel void square(device float* v [[buffer(0)]], uint i [[thread_position_in_grid]]) {
    v[i] = v[i] * v[i];
}
vertex float4 vs(uint id [[vertex_id]]) { return float4(0.0, 0.0, 0.0, 1.0); }
"#;

fn message(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

#[track_caller]
fn ok(ptr: *const c_char) {
    assert_eq!(message(ptr), None);
}

fn library(device: *mut c_void, source: &str) -> CLibrary {
    unsafe {
        Device_NewLibraryWithSource(
            device,
            source.as_ptr().cast(),
            source.len(),
            CCompileOptions::default(),
        )
    }
}

fn function(library: *mut c_void, name: &str) -> *mut c_void {
    let name = std::ffi::CString::new(name).unwrap();
    unsafe { Library_NewFunctionWithName(library, name.as_ptr()) }
}

#[test]
fn compute_round_trip() {
    let device = CreateSystemDefaultDevice();
    assert!(!device.device.is_null());
    assert_eq!(message(Device_Name(device.device)), message(device.name));
    assert!(Device_SupportsFamily(device.device, 1001));
    assert!(Device_HasUnifiedMemory(device.device));
    assert_eq!(Device_MaxThreadsPerThreadgroup(device.device).width, 1024);

    let lib = library(device.device, SOURCE);
    assert_eq!(message(lib.error), None);
    let square = function(lib.library, "square");
    let state = Device_NewComputePipelineStateWithFunction(device.device, square);
    assert_eq!(message(state.error), None);
    assert_eq!(state.max_total_threads_per_threadgroup, 1024);

    let values: Vec<u8> = [1.0f32, 2.0, 3.0].iter().flat_map(|f| f.to_le_bytes()).collect();
    let buffer = unsafe {
        Device_NewBufferWithBytes(device.device, values.as_ptr().cast(), values.len(), SHARED)
    };
    assert_eq!(Buffer_Length(buffer), 12);

    let queue = Device_NewCommandQueue(device.device);
    let command_buffer = CommandQueue_CommandBuffer(queue);
    let encoder = CommandBuffer_ComputeCommandEncoder(command_buffer);
    ok(ComputeCommandEncoder_SetComputePipelineState(encoder, state.compute_pipeline_state));
    ok(ComputeCommandEncoder_SetBuffer(encoder, buffer, 0, 0));
    let grid = CSize { width: 3, height: 1, depth: 1 };
    ok(ComputeCommandEncoder_DispatchThreads(encoder, grid, grid));
    ok(CommandEncoder_EndEncoding(encoder));
    ok(CommandBuffer_Commit(command_buffer));
    ok(CommandBuffer_WaitUntilCompleted(command_buffer));
    assert_eq!(CommandBuffer_Status(command_buffer), 4);

    let contents = Buffer_Contents(buffer).cast::<f32>();
    let out = unsafe { std::slice::from_raw_parts(contents, 3) };
    assert_eq!(out, [1.0, 4.0, 9.0]);

    for handle in [
        encoder,
        command_buffer,
        queue,
        buffer,
        state.compute_pipeline_state,
        square,
        lib.library,
        device.device,
    ] {
        ok(Object_Release(handle));
    }
}

#[test]
fn errors_come_back_as_strings() {
    let device = CreateSystemDefaultDevice();

    let broken = library(device.device, "kernel void k( {");
    assert!(broken.library.is_null());
    assert!(message(broken.error).unwrap().contains("error"));

    let lib = library(device.device, SOURCE);
    assert!(function(lib.library, "missing").is_null());
    assert_eq!(
        message(LastError()).as_deref(),
        Some("function \"missing\" not found")
    );

    let vs = function(lib.library, "vs");
    let wrong = Device_NewComputePipelineStateWithFunction(device.device, vs);
    assert!(wrong.compute_pipeline_state.is_null());
    assert_eq!(
        message(wrong.error).as_deref(),
        Some("function \"vs\" is not a kernel function")
    );

    assert!(Device_NewBufferWithLength(device.device, 0, SHARED).is_null());
    assert_eq!(
        message(LastError()).as_deref(),
        Some("resource length must be greater than zero")
    );

    // a handle of the wrong kind
    assert_eq!(
        message(CommandBuffer_Commit(lib.library)).as_deref(),
        Some("invalid command buffer handle")
    );

    ok(Object_Release(vs));
    ok(Object_Release(lib.library));
    ok(Object_Release(device.device));
}

#[test]
fn released_handles_are_rejected() {
    let device = CreateSystemDefaultDevice();
    let queue = Device_NewCommandQueue(device.device);
    ok(Object_Release(queue));
    assert!(CommandQueue_CommandBuffer(queue).is_null());
    assert_eq!(
        message(LastError()).as_deref(),
        Some("invalid command queue handle")
    );
    assert_eq!(
        message(Object_Release(queue)).as_deref(),
        Some("invalid object handle")
    );
    assert_eq!(
        message(Object_Release(ptr::null_mut())).as_deref(),
        Some("invalid object handle")
    );
    ok(Object_Release(device.device));
    assert!(!Device_HasUnifiedMemory(device.device));
}

#[test]
fn every_device_is_listed_and_freed() {
    let devices = CopyAllDevices();
    assert!(devices.length >= 1);
    let list = unsafe { std::slice::from_raw_parts(devices.devices, devices.length as usize) };
    let first = list[0];
    assert_eq!(
        unsafe { CStr::from_ptr(first.name) }.to_str().unwrap(),
        "Software Unified GPU"
    );
    assert!(Device_SupportsFamily(first.device, 1001));
    unsafe { Devices_Free(devices) };
    assert!(!Device_SupportsFamily(first.device, 1001));
}

#[test]
fn textures_and_render_passes() {
    let device = CreateSystemDefaultDevice();
    let texture = Device_NewTextureWithDescriptor(
        device.device,
        CTextureDescriptor {
            pixel_format: RGBA8_UNORM,
            width: 4,
            height: 2,
            storage_mode: 0,
        },
    );
    assert_eq!((Texture_Width(texture), Texture_Height(texture)), (4, 2));

    let region = CRegion {
        origin: COrigin { x: 1, y: 1, z: 0 },
        size: CSize { width: 2, height: 1, depth: 1 },
    };
    let upload = [1u8, 2, 3, 4, 5, 6, 7, 8];
    ok(unsafe { Texture_ReplaceRegion(texture, region, 0, upload.as_ptr().cast(), 8) });
    let mut download = [0u8; 8];
    ok(unsafe { Texture_GetBytes(texture, download.as_mut_ptr().cast(), 8, region, 0) });
    assert_eq!(download, upload);

    let drawable = Drawable_NewWithTexture(texture);
    let queue = Device_NewCommandQueue(device.device);
    let command_buffer = CommandQueue_CommandBuffer(queue);
    let encoder = CommandBuffer_RenderCommandEncoderWithDescriptor(
        command_buffer,
        CRenderPassDescriptor {
            color_attachment0_load_action: 2,
            color_attachment0_store_action: 1,
            color_attachment0_clear_color: CClearColor {
                red: 1.0,
                green: 0.0,
                blue: 0.0,
                alpha: 1.0,
            },
            color_attachment0_texture: texture,
        },
    );
    assert!(!encoder.is_null(), "{:?}", message(LastError()));
    ok(CommandEncoder_EndEncoding(encoder));
    ok(CommandBuffer_PresentDrawable(command_buffer, drawable));
    ok(CommandBuffer_Commit(command_buffer));
    ok(CommandBuffer_WaitUntilCompleted(command_buffer));
    assert_eq!(Drawable_PresentCount(drawable), 1);

    ok(unsafe { Texture_GetBytes(texture, download.as_mut_ptr().cast(), 8, region, 0) });
    assert_eq!(download, [255, 0, 0, 255, 255, 0, 0, 255]);

    let bad = CommandBuffer_RenderCommandEncoderWithDescriptor(
        CommandQueue_CommandBuffer(queue),
        CRenderPassDescriptor {
            color_attachment0_load_action: 9,
            color_attachment0_store_action: 1,
            color_attachment0_clear_color: CClearColor::default(),
            color_attachment0_texture: texture,
        },
    );
    assert!(bad.is_null());
    assert_eq!(message(LastError()).as_deref(), Some("invalid load action 9"));

    for handle in [encoder, command_buffer, queue, drawable, texture, device.device] {
        ok(Object_Release(handle));
    }
}
