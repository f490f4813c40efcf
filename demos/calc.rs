// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Adds two arrays on the device and checks the result on the CPU.
//!
//! ```bash
//! cargo run --example calc
//! ```

use mtl_bindings::{
    CompileOptions, ResourceOptions, Size, create_system_default_device,
};
use std::error::Error;

const SOURCE: &str = r#"
kernel void add_arrays(device const float* a [[buffer(0)]],
                       device const float* b [[buffer(1)]],
                       device float* result [[buffer(2)]],
                       uint index [[thread_position_in_grid]]) {
    result[index] = a[index] + b[index];
}
"#;

const COUNT: usize = 1 << 12;

fn to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn main() -> Result<(), Box<dyn Error>> {
    let device = create_system_default_device()?;
    let library = device.new_library_with_source(SOURCE, &CompileOptions::default())?;
    let function = library.new_function_with_name("add_arrays")?;
    let pipeline = device.new_compute_pipeline_state_with_function(&function)?;

    let a: Vec<f32> = (0..COUNT).map(|i| i as f32 * 0.5).collect();
    let b: Vec<f32> = (0..COUNT).map(|i| (COUNT - i) as f32).collect();
    let options = ResourceOptions::STORAGE_MODE_SHARED;
    let a_buffer = device.new_buffer_with_bytes(&to_bytes(&a), options)?;
    let b_buffer = device.new_buffer_with_bytes(&to_bytes(&b), options)?;
    let result = device.new_buffer_with_length(COUNT * 4, options)?;

    let queue = device.new_command_queue();
    let command_buffer = queue.command_buffer();
    let mut encoder = command_buffer.compute_command_encoder()?;
    encoder.set_compute_pipeline_state(&pipeline)?;
    encoder.set_buffer(&a_buffer, 0, 0)?;
    encoder.set_buffer(&b_buffer, 0, 1)?;
    encoder.set_buffer(&result, 0, 2)?;
    let group = pipeline.max_total_threads_per_threadgroup().min(COUNT);
    encoder.dispatch_threads(Size::new(COUNT, 1, 1), Size::new(group, 1, 1))?;
    encoder.end_encoding()?;
    command_buffer.commit()?;
    command_buffer.wait_until_completed()?;

    let out = result.read_contents(0, COUNT * 4)?;
    let mismatches = out
        .chunks_exact(4)
        .zip(a.iter().zip(&b))
        .filter(|(bytes, (x, y))| {
            f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) != *x + *y
        })
        .count();
    let elapsed = match (command_buffer.gpu_start_time(), command_buffer.gpu_end_time()) {
        (Some(start), Some(end)) => end - start,
        _ => 0.0,
    };
    println!(
        "{COUNT} additions in {:.3} ms on {}, {mismatches} mismatches",
        elapsed * 1000.0,
        device.name()
    );
    if mismatches != 0 {
        return Err("device results disagree with the CPU".into());
    }
    Ok(())
}
