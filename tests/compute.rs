// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Compute work end to end: compile, bind, dispatch, read back.

use mtl_bindings::config::{AdapterConfig, SystemConfig};
use mtl_bindings::*;

const KERNELS: &str = r#"
kernel void add_arrays(device const float* a [[buffer(0)]],
                       device const float* b [[buffer(1)]],
                       device float* result [[buffer(2)]],
                       uint index [[thread_position_in_grid]]) {
    result[index] = a[index] + b[index];
}

kernel void scale(device float* data [[buffer(0)]],
                  constant float& factor [[buffer(1)]],
                  uint index [[thread_position_in_grid]]) {
    data[index] = data[index] * factor;
}

kernel void grid_ids(device uint* out [[buffer(0)]],
                     uint2 gid [[thread_position_in_grid]],
                     uint2 grid [[threads_per_grid]]) {
    out[gid.y * grid.x + gid.x] = gid.y * 100u + gid.x;
}

[[max_total_threads_per_threadgroup(32)]]
kernel void capped(device uint* out [[buffer(0)]], uint index [[thread_position_in_grid]]) {
    out[index] = index;
}

kernel void overrun(device uint* out [[buffer(0)]], uint index [[thread_position_in_grid]]) {
    out[index + 1000u] = 1u;
}
"#;

fn floats(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn read_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

fn read_uints(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

fn pipeline(device: &Device, name: &str) -> ComputePipelineState {
    let library = device
        .new_library_with_source(KERNELS, &CompileOptions::default())
        .unwrap();
    let function = library.new_function_with_name(name).unwrap();
    device.new_compute_pipeline_state_with_function(&function).unwrap()
}

#[test]
fn adds_arrays() {
    let device = create_system_default_device().unwrap();
    let state = pipeline(&device, "add_arrays");
    let count = 1000;
    let a: Vec<f32> = (0..count).map(|i| i as f32).collect();
    let b: Vec<f32> = (0..count).map(|i| (i * 2) as f32).collect();
    let shared = ResourceOptions::STORAGE_MODE_SHARED;
    let a_buffer = device.new_buffer_with_bytes(&floats(&a), shared).unwrap();
    let b_buffer = device.new_buffer_with_bytes(&floats(&b), shared).unwrap();
    let result = device.new_buffer_with_length(count * 4, shared).unwrap();

    let queue = device.new_command_queue();
    let command_buffer = queue.command_buffer();
    let mut encoder = command_buffer.compute_command_encoder().unwrap();
    encoder.set_compute_pipeline_state(&state).unwrap();
    encoder.set_buffer(&a_buffer, 0, 0).unwrap();
    encoder.set_buffer(&b_buffer, 0, 1).unwrap();
    encoder.set_buffer(&result, 0, 2).unwrap();
    // the grid is not a multiple of the threadgroup; the edge group is trimmed
    encoder
        .dispatch_threads(Size::new(count, 1, 1), Size::new(64, 1, 1))
        .unwrap();
    encoder.end_encoding().unwrap();
    command_buffer.commit().unwrap();
    command_buffer.wait_until_completed().unwrap();
    assert_eq!(command_buffer.status(), CommandBufferStatus::Completed);

    let out = read_floats(&result.read_contents(0, count * 4).unwrap());
    for (i, value) in out.iter().enumerate() {
        assert_eq!(*value, (i * 3) as f32);
    }
}

#[test]
fn inline_bytes_and_buffer_offsets() {
    let device = create_system_default_device().unwrap();
    let state = pipeline(&device, "scale");
    let data = device
        .new_buffer_with_bytes(&floats(&[1.0, 2.0, 3.0, 4.0]), ResourceOptions::STORAGE_MODE_SHARED)
        .unwrap();

    let queue = device.new_command_queue();
    let command_buffer = queue.command_buffer();
    let mut encoder = command_buffer.compute_command_encoder().unwrap();
    encoder.set_compute_pipeline_state(&state).unwrap();
    // skip the first element
    encoder.set_buffer(&data, 4, 0).unwrap();
    encoder.set_bytes(&10.0f32.to_le_bytes(), 1).unwrap();
    encoder
        .dispatch_threads(Size::new(3, 1, 1), Size::new(3, 1, 1))
        .unwrap();
    encoder.end_encoding().unwrap();
    command_buffer.commit().unwrap();
    command_buffer.wait_until_completed().unwrap();

    assert_eq!(
        read_floats(&data.read_contents(0, 16).unwrap()),
        [1.0, 20.0, 30.0, 40.0]
    );
}

#[test]
fn threadgroup_dispatch_covers_a_2d_grid() {
    let device = create_system_default_device().unwrap();
    let state = pipeline(&device, "grid_ids");
    let out = device
        .new_buffer_with_length(4 * 4 * 3, ResourceOptions::STORAGE_MODE_SHARED)
        .unwrap();

    let queue = device.new_command_queue();
    let command_buffer = queue.command_buffer();
    let mut encoder = command_buffer.compute_command_encoder().unwrap();
    encoder.set_compute_pipeline_state(&state).unwrap();
    encoder.set_buffer(&out, 0, 0).unwrap();
    encoder
        .dispatch_threadgroups(Size::new(2, 3, 1), Size::new(2, 1, 1))
        .unwrap();
    encoder.end_encoding().unwrap();
    command_buffer.commit().unwrap();
    command_buffer.wait_until_completed().unwrap();

    let ids = read_uints(&out.read_contents(0, 48).unwrap());
    assert_eq!(ids, [0, 1, 2, 3, 100, 101, 102, 103, 200, 201, 202, 203]);
}

#[test]
fn out_of_bounds_store_fails_the_buffer() {
    let device = create_system_default_device().unwrap();
    let state = pipeline(&device, "overrun");
    let out = device
        .new_buffer_with_length(16, ResourceOptions::STORAGE_MODE_SHARED)
        .unwrap();

    let queue = device.new_command_queue();
    let command_buffer = queue.command_buffer();
    let mut encoder = command_buffer.compute_command_encoder().unwrap();
    encoder.set_label("overrun pass");
    encoder.set_compute_pipeline_state(&state).unwrap();
    encoder.set_buffer(&out, 0, 0).unwrap();
    encoder
        .dispatch_threads(Size::new(4, 1, 1), Size::new(4, 1, 1))
        .unwrap();
    encoder.end_encoding().unwrap();
    command_buffer.commit().unwrap();

    let err = command_buffer.wait_until_completed().unwrap_err();
    assert!(matches!(err, WaitError::Execution(_)), "{err}");
    assert_eq!(command_buffer.status(), CommandBufferStatus::Error);
    assert_eq!(command_buffer.error().unwrap().pass, "overrun pass");
    assert_eq!(out.read_contents(0, 16).unwrap(), [0; 16]);
}

#[test]
fn pipeline_limits() {
    let device = create_system_default_device().unwrap();
    let state = pipeline(&device, "add_arrays");
    assert_eq!(state.function_name(), "add_arrays");
    assert_eq!(state.max_total_threads_per_threadgroup(), 1024);
    assert!(state.thread_execution_width() <= state.max_total_threads_per_threadgroup());

    let queue = device.new_command_queue();
    let command_buffer = queue.command_buffer();
    let mut encoder = command_buffer.compute_command_encoder().unwrap();
    assert_eq!(
        encoder.dispatch_threads(Size::new(1, 1, 1), Size::new(1, 1, 1)),
        Err(UsageError::NoPipelineBound)
    );
    encoder.set_compute_pipeline_state(&state).unwrap();
    assert_eq!(
        encoder.dispatch_threads(Size::new(4096, 1, 1), Size::new(2048, 1, 1)),
        Err(UsageError::ThreadgroupTooLarge {
            requested: 2048,
            max: 1024
        })
    );
    encoder.end_encoding().unwrap();
}

#[test]
fn threadgroup_cap_from_the_source() {
    let device = create_system_default_device().unwrap();
    let state = pipeline(&device, "capped");
    assert_eq!(state.max_total_threads_per_threadgroup(), 32);
    let out = device
        .new_buffer_with_length(64 * 4, ResourceOptions::STORAGE_MODE_SHARED)
        .unwrap();

    let queue = device.new_command_queue();
    let command_buffer = queue.command_buffer();
    let mut encoder = command_buffer.compute_command_encoder().unwrap();
    encoder.set_compute_pipeline_state(&state).unwrap();
    encoder.set_buffer(&out, 0, 0).unwrap();
    assert_eq!(
        encoder.dispatch_threads(Size::new(64, 1, 1), Size::new(64, 1, 1)),
        Err(UsageError::ThreadgroupTooLarge {
            requested: 64,
            max: 32
        })
    );
    encoder
        .dispatch_threads(Size::new(64, 1, 1), Size::new(32, 1, 1))
        .unwrap();
    encoder.end_encoding().unwrap();
    command_buffer.commit().unwrap();
    command_buffer.wait_until_completed().unwrap();
    assert_eq!(
        read_uints(&out.read_contents(0, 64 * 4).unwrap()),
        (0..64).collect::<Vec<u32>>()
    );
}

#[test]
fn deeply_nested_source_is_a_compile_error() {
    let device = create_system_default_device().unwrap();
    for depth in [1000, 20000] {
        let source = format!(
            "kernel void k(device uint* o [[buffer(0)]]) {{ o[0] = {}1u{}; }}",
            "(".repeat(depth),
            ")".repeat(depth)
        );
        let err = device
            .new_library_with_source(&source, &CompileOptions::default())
            .unwrap_err();
        assert!(
            err.diagnostics.contains("expression nested too deeply"),
            "{}",
            err.diagnostics
        );
    }
}

#[test]
fn managed_buffers_synchronize_explicitly() {
    let device = System::with_config(SystemConfig::with_adapters(vec![AdapterConfig::discrete()]))
        .default_device()
        .unwrap();
    assert!(!device.has_unified_memory());
    let state = pipeline(&device, "scale");
    let data = device
        .new_buffer_with_bytes(&floats(&[1.0, 2.0]), ResourceOptions::STORAGE_MODE_MANAGED)
        .unwrap();
    data.write_contents(4, &5.0f32.to_le_bytes()).unwrap();
    data.did_modify_range(4..8).unwrap();

    let queue = device.new_command_queue();
    let command_buffer = queue.command_buffer();
    let mut encoder = command_buffer.compute_command_encoder().unwrap();
    encoder.set_compute_pipeline_state(&state).unwrap();
    encoder.set_buffer(&data, 0, 0).unwrap();
    encoder.set_bytes(&3.0f32.to_le_bytes(), 1).unwrap();
    encoder
        .dispatch_threads(Size::new(2, 1, 1), Size::new(2, 1, 1))
        .unwrap();
    encoder.end_encoding().unwrap();
    let mut blit = command_buffer.blit_command_encoder().unwrap();
    blit.synchronize_resource(&data).unwrap();
    blit.end_encoding().unwrap();
    command_buffer.commit().unwrap();
    command_buffer.wait_until_completed().unwrap();

    assert_eq!(read_floats(&data.read_contents(0, 8).unwrap()), [3.0, 15.0]);
}

#[test]
fn blits_copy_and_fill() {
    let device = create_system_default_device().unwrap();
    let shared = ResourceOptions::STORAGE_MODE_SHARED;
    let src = device.new_buffer_with_bytes(&[1, 2, 3, 4, 5, 6, 7, 8], shared).unwrap();
    let private = device
        .new_buffer_with_length(8, ResourceOptions::STORAGE_MODE_PRIVATE)
        .unwrap();
    let dst = device.new_buffer_with_length(8, shared).unwrap();
    assert!(private.contents().is_null());

    let queue = device.new_command_queue();
    let command_buffer = queue.command_buffer();
    let mut blit = command_buffer.blit_command_encoder().unwrap();
    blit.copy_from_buffer(&src, 0, &private, 0, 8).unwrap();
    blit.fill_buffer(&private, 0..2, 0xff).unwrap();
    blit.copy_from_buffer(&private, 0, &dst, 0, 8).unwrap();
    blit.end_encoding().unwrap();
    command_buffer.commit().unwrap();
    command_buffer.wait_until_completed().unwrap();

    assert_eq!(dst.read_contents(0, 8).unwrap(), [0xff, 0xff, 3, 4, 5, 6, 7, 8]);
}
