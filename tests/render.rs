// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Render passes drawn into offscreen textures and read back.

use mtl_bindings::*;
use std::sync::Arc;

const SHADERS: &str = r#"
struct VertexIn {
    float4 position;
    float4 color;
};

struct VertexOut {
    float4 position [[position]];
    float4 color;
};

vertex VertexOut vertex_colors(device const VertexIn* vertices [[buffer(0)]],
                               uint vid [[vertex_id]]) {
    VertexOut out;
    out.position = vertices[vid].position;
    out.color = vertices[vid].color;
    return out;
}

fragment float4 interpolated(VertexOut in [[stage_in]]) {
    return in.color;
}

fragment float4 tinted(VertexOut in [[stage_in]], constant float4& tint [[buffer(0)]]) {
    return tint;
}
"#;

const SIZE: usize = 8;

/// Position then color, four floats each.
fn vertices(data: &[([f32; 2], [f32; 4])]) -> Vec<u8> {
    data.iter()
        .flat_map(|(p, c)| [p[0], p[1], 0.0, 1.0, c[0], c[1], c[2], c[3]])
        .flat_map(f32::to_le_bytes)
        .collect()
}

struct Fixture {
    device: Device,
    queue: CommandQueue,
    library: Library,
}

impl Fixture {
    fn new() -> Self {
        let device = create_system_default_device().unwrap();
        let library = device
            .new_library_with_source(SHADERS, &CompileOptions::default())
            .unwrap();
        let queue = device.new_command_queue();
        Fixture {
            device,
            queue,
            library,
        }
    }

    fn pipeline(&self, fragment: &str, format: PixelFormat) -> RenderPipelineState {
        let descriptor = RenderPipelineDescriptor {
            vertex_function: Some(self.library.new_function_with_name("vertex_colors").unwrap()),
            fragment_function: Some(self.library.new_function_with_name(fragment).unwrap()),
            color_attachment0_pixel_format: format,
        };
        self.device
            .new_render_pipeline_state_with_descriptor(&descriptor)
            .unwrap()
    }

    fn target(&self, format: PixelFormat) -> Texture {
        self.device
            .new_texture_with_descriptor(&TextureDescriptor::texture_2d(format, SIZE, SIZE, false))
            .unwrap()
    }
}

fn pass(
    texture: &Texture,
    load_action: LoadAction,
    clear_color: ClearColor,
) -> RenderPassDescriptor {
    RenderPassDescriptor {
        color_attachment0: ColorAttachment {
            texture: Some(texture.clone()),
            load_action,
            store_action: StoreAction::Store,
            clear_color,
        },
    }
}

fn pixels(texture: &Texture) -> Vec<u8> {
    let mut out = vec![0; SIZE * SIZE * 4];
    texture
        .get_bytes(&mut out, SIZE * 4, Region::make_2d(0, 0, SIZE, SIZE), 0)
        .unwrap();
    out
}

fn pixel(bytes: &[u8], x: usize, y: usize) -> [u8; 4] {
    let i = (y * SIZE + x) * 4;
    bytes[i..i + 4].try_into().unwrap()
}

fn assert_close(actual: [u8; 4], expected: [u8; 4]) {
    for (a, e) in actual.iter().zip(expected) {
        assert!(a.abs_diff(e) <= 1, "{actual:?} vs {expected:?}");
    }
}

#[test]
fn triangle_over_clear_color() {
    let fixture = Fixture::new();
    let state = fixture.pipeline("tinted", PixelFormat::RGBA8_UNORM);
    let texture = fixture.target(PixelFormat::RGBA8_UNORM);
    let triangle = vertices(&[
        ([-0.5, -0.5], [0.0; 4]),
        ([0.5, -0.5], [0.0; 4]),
        ([0.0, 0.5], [0.0; 4]),
    ]);
    let tint: Vec<u8> = [1.0f32, 1.0, 1.0, 1.0].iter().flat_map(|f| f.to_le_bytes()).collect();

    let command_buffer = fixture.queue.command_buffer();
    let mut encoder = command_buffer
        .render_command_encoder_with_descriptor(&pass(
            &texture,
            LoadAction::Clear,
            ClearColor::new(0.0, 0.0, 1.0, 1.0),
        ))
        .unwrap();
    encoder.set_render_pipeline_state(&state).unwrap();
    encoder.set_vertex_bytes(&triangle, 0).unwrap();
    encoder.set_fragment_bytes(&tint, 0).unwrap();
    encoder.draw_primitives(PrimitiveType::Triangle, 0, 3).unwrap();
    encoder.end_encoding().unwrap();
    command_buffer.commit().unwrap();
    command_buffer.wait_until_completed().unwrap();

    let bytes = pixels(&texture);
    for (x, y) in [(0, 0), (SIZE - 1, 0), (0, SIZE - 1), (SIZE - 1, SIZE - 1)] {
        assert_eq!(pixel(&bytes, x, y), [0, 0, 255, 255], "corner ({x}, {y})");
    }
    assert_eq!(pixel(&bytes, 4, 4), [255, 255, 255, 255]);
}

#[test]
fn colors_interpolate_across_the_triangle() {
    let fixture = Fixture::new();
    let state = fixture.pipeline("interpolated", PixelFormat::RGBA8_UNORM);
    let texture = fixture.target(PixelFormat::RGBA8_UNORM);
    // covers the whole target
    let data = vertices(&[
        ([-1.0, -1.0], [1.0, 0.0, 0.0, 1.0]),
        ([3.0, -1.0], [0.0, 1.0, 0.0, 1.0]),
        ([-1.0, 3.0], [0.0, 0.0, 1.0, 1.0]),
    ]);
    let buffer = fixture
        .device
        .new_buffer_with_bytes(&data, ResourceOptions::STORAGE_MODE_SHARED)
        .unwrap();

    let command_buffer = fixture.queue.command_buffer();
    let mut encoder = command_buffer
        .render_command_encoder_with_descriptor(&pass(
            &texture,
            LoadAction::Clear,
            ClearColor::new(0.0, 0.0, 0.0, 1.0),
        ))
        .unwrap();
    encoder.set_render_pipeline_state(&state).unwrap();
    encoder.set_vertex_buffer(&buffer, 0, 0).unwrap();
    encoder.draw_primitives(PrimitiveType::Triangle, 0, 3).unwrap();
    encoder.end_encoding().unwrap();
    command_buffer.commit().unwrap();
    command_buffer.wait_until_completed().unwrap();

    // pixel (4, 4) samples at clip (0.125, -0.125): weights 0.5, 0.28125, 0.21875
    let bytes = pixels(&texture);
    assert_close(pixel(&bytes, 4, 4), [128, 72, 56, 255]);
}

#[test]
fn load_keeps_earlier_contents_and_bgra_swizzles() {
    let fixture = Fixture::new();
    let texture = fixture.target(PixelFormat::BGRA8_UNORM);

    let command_buffer = fixture.queue.command_buffer();
    let red = ClearColor::new(1.0, 0.0, 0.0, 1.0);
    command_buffer
        .render_command_encoder_with_descriptor(&pass(&texture, LoadAction::Clear, red))
        .unwrap()
        .end_encoding()
        .unwrap();
    let green = ClearColor::new(0.0, 1.0, 0.0, 1.0);
    command_buffer
        .render_command_encoder_with_descriptor(&pass(&texture, LoadAction::Load, green))
        .unwrap()
        .end_encoding()
        .unwrap();
    command_buffer.commit().unwrap();
    command_buffer.wait_until_completed().unwrap();

    // red, stored blue-green-red-alpha
    assert_eq!(pixel(&pixels(&texture), 3, 5), [0, 0, 255, 255]);
}

#[test]
fn vertex_fetch_past_the_buffer_fails_at_execution() {
    let fixture = Fixture::new();
    let state = fixture.pipeline("interpolated", PixelFormat::RGBA8_UNORM);
    let texture = fixture.target(PixelFormat::RGBA8_UNORM);
    let data = vertices(&[([0.0, 0.0], [1.0; 4]); 3]);

    let command_buffer = fixture.queue.command_buffer();
    let mut encoder = command_buffer
        .render_command_encoder_with_descriptor(&pass(
            &texture,
            LoadAction::DontCare,
            ClearColor::default(),
        ))
        .unwrap();
    encoder.set_render_pipeline_state(&state).unwrap();
    encoder.set_vertex_bytes(&data, 0).unwrap();
    // recording accepts the range; the fetch of vertex 3 faults
    encoder.draw_primitives(PrimitiveType::Triangle, 0, 6).unwrap();
    encoder.end_encoding().unwrap();
    command_buffer.commit().unwrap();

    assert!(matches!(
        command_buffer.wait_until_completed(),
        Err(WaitError::Execution(_))
    ));
    assert_eq!(command_buffer.status(), CommandBufferStatus::Error);
}

#[test]
fn vertex_ranges_past_the_id_range_fail_at_execution() {
    let fixture = Fixture::new();
    let state = fixture.pipeline("interpolated", PixelFormat::RGBA8_UNORM);
    let texture = fixture.target(PixelFormat::RGBA8_UNORM);
    let data = vertices(&[([0.0, 0.0], [1.0; 4]); 3]);

    for (start, count) in [(0, usize::MAX / 2), (usize::MAX, 3)] {
        let command_buffer = fixture.queue.command_buffer();
        let mut encoder = command_buffer
            .render_command_encoder_with_descriptor(&pass(
                &texture,
                LoadAction::DontCare,
                ClearColor::default(),
            ))
            .unwrap();
        encoder.set_label("huge draw");
        encoder.set_render_pipeline_state(&state).unwrap();
        encoder.set_vertex_bytes(&data, 0).unwrap();
        encoder
            .draw_primitives(PrimitiveType::Triangle, start, count)
            .unwrap();
        encoder.end_encoding().unwrap();
        command_buffer.commit().unwrap();

        let Err(WaitError::Execution(err)) = command_buffer.wait_until_completed() else {
            panic!("draw of {count} vertices from {start} did not fault");
        };
        assert_eq!(err.pass, "huge draw");
        assert!(err.message.contains("vertex id range"), "{err}");
        assert_eq!(command_buffer.status(), CommandBufferStatus::Error);
    }

    // the queue keeps running
    let command_buffer = fixture.queue.command_buffer();
    command_buffer.commit().unwrap();
    command_buffer.wait_until_completed().unwrap();
}

#[test]
fn drawables_present_after_success() {
    let fixture = Fixture::new();
    let texture = fixture.target(PixelFormat::RGBA8_UNORM);
    let drawable = Arc::new(OffscreenDrawable::new(texture.clone()));

    let command_buffer = fixture.queue.command_buffer();
    command_buffer
        .render_command_encoder_with_descriptor(&pass(
            drawable.texture(),
            LoadAction::Clear,
            ClearColor::new(0.0, 1.0, 0.0, 1.0),
        ))
        .unwrap()
        .end_encoding()
        .unwrap();
    command_buffer.present_drawable(drawable.clone()).unwrap();
    assert_eq!(drawable.present_count(), 0);
    command_buffer.commit().unwrap();
    command_buffer.wait_until_completed().unwrap();

    assert_eq!(drawable.present_count(), 1);
    assert_eq!(pixel(&pixels(&texture), 0, 0), [0, 255, 0, 255]);
}

#[test]
fn pipeline_and_attachment_formats_must_agree() {
    let fixture = Fixture::new();
    let state = fixture.pipeline("interpolated", PixelFormat::RGBA8_UNORM);
    let texture = fixture.target(PixelFormat::BGRA8_UNORM);

    let command_buffer = fixture.queue.command_buffer();
    let mut encoder = command_buffer
        .render_command_encoder_with_descriptor(&pass(
            &texture,
            LoadAction::Clear,
            ClearColor::default(),
        ))
        .unwrap();
    assert_eq!(
        encoder.set_render_pipeline_state(&state),
        Err(UsageError::PixelFormatMismatch {
            pipeline: PixelFormat::RGBA8_UNORM,
            attachment: PixelFormat::BGRA8_UNORM,
        })
    );
    assert_eq!(
        encoder.draw_primitives(PrimitiveType::Triangle, 0, 3),
        Err(UsageError::NoPipelineBound)
    );
    encoder.end_encoding().unwrap();
}
