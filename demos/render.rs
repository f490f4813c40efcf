// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Renders a colored triangle offscreen and writes it to a PNG.
//!
//! ```bash
//! cargo run --example render -- triangle.png
//! ```

use mtl_bindings::{
    ClearColor, ColorAttachment, CompileOptions, Drawable, LoadAction, OffscreenDrawable,
    PixelFormat, PrimitiveType, Region, RenderPassDescriptor, RenderPipelineDescriptor,
    StoreAction, TextureDescriptor, create_system_default_device,
};
use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

const SOURCE: &str = r#"
struct VertexOut {
    float4 position [[position]];
    float4 color;
};

vertex VertexOut vertex_main(constant float4* vertices [[buffer(0)]], uint vid [[vertex_id]]) {
    VertexOut out;
    out.position = vertices[vid * 2u];
    out.color = vertices[vid * 2u + 1u];
    return out;
}

fragment float4 fragment_main(VertexOut in [[stage_in]]) {
    return in.color;
}
"#;

const WIDTH: usize = 256;
const HEIGHT: usize = 256;

#[rustfmt::skip]
const TRIANGLE: [f32; 24] = [
     0.0,  0.8, 0.0, 1.0,   1.0, 0.0, 0.0, 1.0,
    -0.8, -0.8, 0.0, 1.0,   0.0, 1.0, 0.0, 1.0,
     0.8, -0.8, 0.0, 1.0,   0.0, 0.0, 1.0, 1.0,
];

fn main() -> Result<(), Box<dyn Error>> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "triangle.png".to_string());

    let device = create_system_default_device()?;
    let library = device.new_library_with_source(SOURCE, &CompileOptions::default())?;
    let pipeline = device.new_render_pipeline_state_with_descriptor(&RenderPipelineDescriptor {
        vertex_function: Some(library.new_function_with_name("vertex_main")?),
        fragment_function: Some(library.new_function_with_name("fragment_main")?),
        color_attachment0_pixel_format: PixelFormat::RGBA8_UNORM,
    })?;
    let texture = device.new_texture_with_descriptor(&TextureDescriptor::texture_2d(
        PixelFormat::RGBA8_UNORM,
        WIDTH,
        HEIGHT,
        false,
    ))?;
    let drawable = Arc::new(OffscreenDrawable::new(texture));

    let queue = device.new_command_queue();
    let command_buffer = queue.command_buffer();
    let mut encoder = command_buffer.render_command_encoder_with_descriptor(&RenderPassDescriptor {
        color_attachment0: ColorAttachment {
            texture: Some(drawable.texture().clone()),
            load_action: LoadAction::Clear,
            store_action: StoreAction::Store,
            clear_color: ClearColor::new(0.1, 0.1, 0.12, 1.0),
        },
    })?;
    encoder.set_render_pipeline_state(&pipeline)?;
    let bytes: Vec<u8> = TRIANGLE.iter().flat_map(|f| f.to_le_bytes()).collect();
    encoder.set_vertex_bytes(&bytes, 0)?;
    encoder.draw_primitives(PrimitiveType::Triangle, 0, 3)?;
    encoder.end_encoding()?;
    command_buffer.present_drawable(drawable.clone())?;
    command_buffer.commit()?;
    command_buffer.wait_until_completed()?;

    let mut pixels = vec![0; WIDTH * HEIGHT * 4];
    drawable.texture().get_bytes(
        &mut pixels,
        WIDTH * 4,
        Region::make_2d(0, 0, WIDTH, HEIGHT),
        0,
    )?;
    let file = BufWriter::new(File::create(&path)?);
    let mut png = png::Encoder::new(file, WIDTH as u32, HEIGHT as u32);
    png.set_color(png::ColorType::Rgba);
    png.set_depth(png::BitDepth::Eight);
    png.write_header()?.write_image_data(&pixels)?;
    println!("wrote {path} (presented {} time)", drawable.present_count());
    Ok(())
}
