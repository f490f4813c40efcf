// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Compute, render and blit encoders.

An encoder records into a local pass and hands it to its command buffer on `end_encoding`.
Every recording call is validated when it is made; a rejected call records nothing and
leaves the encoder as it was.  Arguments bound with `set_*` are snapshotted into each
dispatch or draw, so rebinding later does not affect commands already recorded.

Dropping an encoder without ending it throws its commands away and leaves the buffer with
an open encoder, so the buffer can no longer be committed.
*/

use crate::command_buffer::CommandBufferShared;
use crate::error::UsageError;
use crate::imp::{
    self, Binding, BindingTable, BlitCommand, ComputeProgram, Dispatch, Draw, Pass, PassKind,
    RenderProgram, RenderTarget, Synchronizable,
};
use crate::pipeline::{ComputePipelineState, RenderPipelineState};
use crate::pixel_formats::PixelFormat;
use crate::resource::{Buffer, Resource, Texture};
use crate::shader::MAX_BUFFER_INDEX;
use crate::types::{Origin, PrimitiveType, Region, Size};
use std::fmt::{Debug, Formatter};
use std::ops::Range;
use std::sync::Arc;

/// State every encoder kind shares.
struct Recording {
    buffer: Arc<CommandBufferShared>,
    id: u64,
    label: String,
    ended: bool,
}

impl Recording {
    fn new(buffer: Arc<CommandBufferShared>, id: u64, kind: &str) -> Self {
        logwise::trace_sync!("opened {kind} encoder {id}", kind = kind.to_string(), id = id);
        Recording {
            buffer,
            id,
            label: kind.to_string(),
            ended: false,
        }
    }

    fn check_open(&self) -> Result<(), UsageError> {
        if self.ended {
            return Err(UsageError::EncoderEnded.logged());
        }
        Ok(())
    }

    fn check_device(&self, device_id: u64, what: &'static str) -> Result<(), UsageError> {
        if device_id != self.buffer.device_id() {
            return Err(UsageError::CrossDevice(what).logged());
        }
        Ok(())
    }

    fn end(&mut self, kind: PassKind) -> Result<(), UsageError> {
        self.check_open()?;
        self.buffer.close_encoder(
            self.id,
            Pass {
                label: self.label.clone(),
                kind,
            },
        )?;
        self.ended = true;
        logwise::trace_sync!("ended encoder {label}", label = self.label.clone());
        Ok(())
    }
}

fn check_index(index: usize) -> Result<(), UsageError> {
    if index >= MAX_BUFFER_INDEX {
        return Err(UsageError::InvalidIndex(index).logged());
    }
    Ok(())
}

fn bind_buffer(
    recording: &Recording,
    table: &mut BindingTable,
    buffer: &Buffer,
    offset: usize,
    index: usize,
) -> Result<(), UsageError> {
    recording.check_open()?;
    check_index(index)?;
    recording.check_device(buffer.device_id(), "buffer")?;
    if offset > buffer.length() {
        return Err(UsageError::OffsetOutOfBounds {
            offset,
            length: buffer.length(),
        }
        .logged());
    }
    table[index] = Some(Binding::Buffer {
        buffer: buffer.imp().clone(),
        offset,
    });
    Ok(())
}

fn bind_bytes(
    recording: &Recording,
    table: &mut BindingTable,
    bytes: &[u8],
    index: usize,
) -> Result<(), UsageError> {
    recording.check_open()?;
    check_index(index)?;
    if bytes.len() > imp::MAX_INLINE_BYTES {
        return Err(UsageError::InlineBytesTooLarge {
            length: bytes.len(),
            max: imp::MAX_INLINE_BYTES,
        }
        .logged());
    }
    table[index] = Some(Binding::Bytes(Arc::from(bytes)));
    Ok(())
}

fn check_bindings(
    table: &BindingTable,
    indices: &[usize],
    stage: &'static str,
) -> Result<(), UsageError> {
    match indices.iter().find(|&&i| table[i].is_none()) {
        Some(&index) => Err(UsageError::MissingBinding { stage, index }.logged()),
        None => Ok(()),
    }
}

/// Records kernel dispatches.
pub struct ComputeCommandEncoder {
    recording: Recording,
    pipeline: Option<Arc<ComputeProgram>>,
    bindings: BindingTable,
    dispatches: Vec<Dispatch>,
}

impl Debug for ComputeCommandEncoder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeCommandEncoder")
            .field("label", &self.recording.label)
            .field("dispatches", &self.dispatches.len())
            .finish()
    }
}

impl ComputeCommandEncoder {
    pub(crate) fn new(buffer: Arc<CommandBufferShared>, id: u64) -> Self {
        ComputeCommandEncoder {
            recording: Recording::new(buffer, id, "compute"),
            pipeline: None,
            bindings: imp::empty_bindings(),
            dispatches: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.recording.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.recording.label = label.into();
    }

    pub fn set_compute_pipeline_state(
        &mut self,
        state: &ComputePipelineState,
    ) -> Result<(), UsageError> {
        self.recording.check_open()?;
        self.recording
            .check_device(state.device_id(), "compute pipeline state")?;
        self.pipeline = Some(state.program().clone());
        Ok(())
    }

    /// Binds `buffer` starting at `offset` to kernel buffer slot `index`.
    pub fn set_buffer(
        &mut self,
        buffer: &Buffer,
        offset: usize,
        index: usize,
    ) -> Result<(), UsageError> {
        bind_buffer(&self.recording, &mut self.bindings, buffer, offset, index)
    }

    /// Copies `bytes` into kernel buffer slot `index`.
    pub fn set_bytes(&mut self, bytes: &[u8], index: usize) -> Result<(), UsageError> {
        bind_bytes(&self.recording, &mut self.bindings, bytes, index)
    }

    fn record(
        &mut self,
        threadgroups: Size,
        threads_per_threadgroup: Size,
        grid: Size,
    ) -> Result<(), UsageError> {
        self.recording.check_open()?;
        let program = self
            .pipeline
            .clone()
            .ok_or_else(|| UsageError::NoPipelineBound.logged())?;
        if threads_per_threadgroup.is_empty() {
            return Err(UsageError::InvalidThreadgroupSize(threads_per_threadgroup).logged());
        }
        let requested = threads_per_threadgroup.product();
        if requested > program.max_total_threads {
            return Err(UsageError::ThreadgroupTooLarge {
                requested,
                max: program.max_total_threads,
            }
            .logged());
        }
        check_bindings(&self.bindings, &program.buffer_indices(), "kernel")?;
        logwise::trace_sync!(
            "dispatch {kernel} over {grid} in groups of {group}",
            kernel = program.name.clone(),
            grid = grid.to_string(),
            group = threads_per_threadgroup.to_string()
        );
        self.dispatches.push(Dispatch {
            program,
            bindings: self.bindings.clone(),
            threadgroups,
            threads_per_threadgroup,
            grid,
        });
        Ok(())
    }

    /**
    Runs the kernel once per thread of `grid`.

    Threadgroups at the far edges may be partial; threads outside the grid never run.
    */
    pub fn dispatch_threads(
        &mut self,
        grid: Size,
        threads_per_threadgroup: Size,
    ) -> Result<(), UsageError> {
        let groups = if threads_per_threadgroup.is_empty() {
            Size::default()
        } else {
            Size::new(
                grid.width.div_ceil(threads_per_threadgroup.width),
                grid.height.div_ceil(threads_per_threadgroup.height),
                grid.depth.div_ceil(threads_per_threadgroup.depth),
            )
        };
        self.record(groups, threads_per_threadgroup, grid)
    }

    /// Runs `threadgroups` whole threadgroups.
    pub fn dispatch_threadgroups(
        &mut self,
        threadgroups: Size,
        threads_per_threadgroup: Size,
    ) -> Result<(), UsageError> {
        let grid = Size::new(
            threadgroups.width.saturating_mul(threads_per_threadgroup.width),
            threadgroups.height.saturating_mul(threads_per_threadgroup.height),
            threadgroups.depth.saturating_mul(threads_per_threadgroup.depth),
        );
        self.record(threadgroups, threads_per_threadgroup, grid)
    }

    pub fn end_encoding(&mut self) -> Result<(), UsageError> {
        self.recording.check_open()?;
        let dispatches = std::mem::take(&mut self.dispatches);
        self.recording.end(PassKind::Compute(dispatches))
    }
}

/// Records draws into one color attachment.
pub struct RenderCommandEncoder {
    recording: Recording,
    target: Option<RenderTarget>,
    format: PixelFormat,
    pipeline: Option<Arc<RenderProgram>>,
    vertex_bindings: BindingTable,
    fragment_bindings: BindingTable,
    draws: Vec<Draw>,
}

impl Debug for RenderCommandEncoder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCommandEncoder")
            .field("label", &self.recording.label)
            .field("format", &self.format)
            .field("draws", &self.draws.len())
            .finish()
    }
}

impl RenderCommandEncoder {
    pub(crate) fn new(
        buffer: Arc<CommandBufferShared>,
        id: u64,
        target: RenderTarget,
        format: PixelFormat,
    ) -> Self {
        RenderCommandEncoder {
            recording: Recording::new(buffer, id, "render"),
            target: Some(target),
            format,
            pipeline: None,
            vertex_bindings: imp::empty_bindings(),
            fragment_bindings: imp::empty_bindings(),
            draws: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.recording.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.recording.label = label.into();
    }

    /// Binds `state`.  Its color format must match the attachment's.
    pub fn set_render_pipeline_state(
        &mut self,
        state: &RenderPipelineState,
    ) -> Result<(), UsageError> {
        self.recording.check_open()?;
        self.recording
            .check_device(state.device_id(), "render pipeline state")?;
        if state.pixel_format() != self.format {
            return Err(UsageError::PixelFormatMismatch {
                pipeline: state.pixel_format(),
                attachment: self.format,
            }
            .logged());
        }
        self.pipeline = Some(state.program().clone());
        Ok(())
    }

    pub fn set_vertex_buffer(
        &mut self,
        buffer: &Buffer,
        offset: usize,
        index: usize,
    ) -> Result<(), UsageError> {
        bind_buffer(&self.recording, &mut self.vertex_bindings, buffer, offset, index)
    }

    /// Copies at most 4096 bytes into vertex buffer slot `index`.
    pub fn set_vertex_bytes(&mut self, bytes: &[u8], index: usize) -> Result<(), UsageError> {
        bind_bytes(&self.recording, &mut self.vertex_bindings, bytes, index)
    }

    pub fn set_fragment_buffer(
        &mut self,
        buffer: &Buffer,
        offset: usize,
        index: usize,
    ) -> Result<(), UsageError> {
        bind_buffer(&self.recording, &mut self.fragment_bindings, buffer, offset, index)
    }

    pub fn set_fragment_bytes(&mut self, bytes: &[u8], index: usize) -> Result<(), UsageError> {
        bind_bytes(&self.recording, &mut self.fragment_bindings, bytes, index)
    }

    /**
    Draws `vertex_count` vertices starting at `vertex_start`.

    The range is not checked against the bound buffers here: a vertex fetch outside a
    buffer fails the command buffer when it executes.
    */
    pub fn draw_primitives(
        &mut self,
        primitive: PrimitiveType,
        vertex_start: usize,
        vertex_count: usize,
    ) -> Result<(), UsageError> {
        self.recording.check_open()?;
        let program = self
            .pipeline
            .clone()
            .ok_or_else(|| UsageError::NoPipelineBound.logged())?;
        check_bindings(&self.vertex_bindings, &program.vertex.buffer_indices(), "vertex")?;
        if let Some(fragment) = &program.fragment {
            check_bindings(&self.fragment_bindings, &fragment.buffer_indices(), "fragment")?;
        }
        self.draws.push(Draw {
            program,
            primitive,
            vertex_start,
            vertex_count,
            vertex_bindings: self.vertex_bindings.clone(),
            fragment_bindings: self.fragment_bindings.clone(),
        });
        Ok(())
    }

    pub fn end_encoding(&mut self) -> Result<(), UsageError> {
        self.recording.check_open()?;
        let Some(target) = self.target.take() else {
            return Err(UsageError::EncoderEnded.logged());
        };
        let draws = std::mem::take(&mut self.draws);
        self.recording.end(PassKind::Render { target, draws })
    }
}

/// Records copies, fills and synchronization.
pub struct BlitCommandEncoder {
    recording: Recording,
    commands: Vec<BlitCommand>,
}

impl Debug for BlitCommandEncoder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlitCommandEncoder")
            .field("label", &self.recording.label)
            .field("commands", &self.commands.len())
            .finish()
    }
}

fn texture_region(
    which: &'static str,
    texture: &Texture,
    slice: usize,
    level: usize,
    region: Region,
) -> Result<(), UsageError> {
    let inside = slice == 0
        && texture
            .imp()
            .level(level)
            .is_some_and(|l| l.contains(&region));
    if !inside {
        return Err(UsageError::RegionOutOfBounds {
            which,
            region,
            level,
            slice,
        }
        .logged());
    }
    Ok(())
}

fn buffer_range(buffer: &Buffer, offset: usize, length: usize) -> Result<Range<usize>, UsageError> {
    offset
        .checked_add(length)
        .filter(|end| *end <= buffer.length())
        .map(|end| offset..end)
        .ok_or_else(|| {
            UsageError::BufferRangeOutOfBounds {
                offset,
                length,
                capacity: buffer.length(),
            }
            .logged()
        })
}

impl BlitCommandEncoder {
    pub(crate) fn new(buffer: Arc<CommandBufferShared>, id: u64) -> Self {
        BlitCommandEncoder {
            recording: Recording::new(buffer, id, "blit"),
            commands: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.recording.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.recording.label = label.into();
    }

    /**
    Copies `source_size` pixels between textures.

    Only slice 0 exists.  Both regions must lie inside their mip level, and both textures
    must use the same number of bytes per pixel.
    */
    #[allow(clippy::too_many_arguments)]
    pub fn copy_from_texture(
        &mut self,
        source: &Texture,
        source_slice: usize,
        source_level: usize,
        source_origin: Origin,
        source_size: Size,
        destination: &Texture,
        destination_slice: usize,
        destination_level: usize,
        destination_origin: Origin,
    ) -> Result<(), UsageError> {
        self.recording.check_open()?;
        self.recording.check_device(source.device_id(), "source texture")?;
        self.recording
            .check_device(destination.device_id(), "destination texture")?;
        texture_region(
            "source",
            source,
            source_slice,
            source_level,
            Region {
                origin: source_origin,
                size: source_size,
            },
        )?;
        texture_region(
            "destination",
            destination,
            destination_slice,
            destination_level,
            Region {
                origin: destination_origin,
                size: source_size,
            },
        )?;
        if source.pixel_format().bytes_per_pixel() != destination.pixel_format().bytes_per_pixel() {
            return Err(UsageError::IncompatibleFormats {
                src: source.pixel_format(),
                dst: destination.pixel_format(),
            }
            .logged());
        }
        self.commands.push(BlitCommand::CopyTexture {
            src: source.imp().clone(),
            src_level: source_level,
            src_origin: source_origin,
            size: source_size,
            dst: destination.imp().clone(),
            dst_level: destination_level,
            dst_origin: destination_origin,
        });
        Ok(())
    }

    pub fn copy_from_buffer(
        &mut self,
        source: &Buffer,
        source_offset: usize,
        destination: &Buffer,
        destination_offset: usize,
        size: usize,
    ) -> Result<(), UsageError> {
        self.recording.check_open()?;
        self.recording.check_device(source.device_id(), "source buffer")?;
        self.recording
            .check_device(destination.device_id(), "destination buffer")?;
        buffer_range(source, source_offset, size)?;
        buffer_range(destination, destination_offset, size)?;
        self.commands.push(BlitCommand::CopyBuffer {
            src: source.imp().clone(),
            src_offset: source_offset,
            dst: destination.imp().clone(),
            dst_offset: destination_offset,
            len: size,
        });
        Ok(())
    }

    /// Sets every byte of `range` to `value`.
    pub fn fill_buffer(
        &mut self,
        buffer: &Buffer,
        range: Range<usize>,
        value: u8,
    ) -> Result<(), UsageError> {
        self.recording.check_open()?;
        self.recording.check_device(buffer.device_id(), "buffer")?;
        let range = buffer_range(buffer, range.start, range.end.saturating_sub(range.start))?;
        self.commands.push(BlitCommand::FillBuffer {
            buffer: buffer.imp().clone(),
            range,
            value,
        });
        Ok(())
    }

    /**
    Makes device writes to `resource` visible to the CPU at this point of the timeline.

    Only managed resources on devices without unified memory have anything to copy.
    */
    pub fn synchronize_resource<'a>(
        &mut self,
        resource: impl Into<Resource<'a>>,
    ) -> Result<(), UsageError> {
        self.recording.check_open()?;
        let resource = resource.into();
        self.recording.check_device(resource.device_id(), "resource")?;
        let target = match resource {
            Resource::Buffer(buffer) => Synchronizable::Buffer(buffer.imp().clone()),
            Resource::Texture(texture) => Synchronizable::Texture(texture.imp().clone()),
        };
        self.commands.push(BlitCommand::Synchronize(target));
        Ok(())
    }

    pub fn end_encoding(&mut self) -> Result<(), UsageError> {
        self.recording.check_open()?;
        let commands = std::mem::take(&mut self.commands);
        self.recording.end(PassKind::Blit(commands))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_buffer::RenderPassDescriptor;
    use crate::config::{AdapterConfig, SystemConfig};
    use crate::library::CompileOptions;
    use crate::resource::TextureDescriptor;
    use crate::types::ResourceOptions;
    use crate::{Device, System};

    fn device() -> Device {
        System::with_config(SystemConfig::with_adapters(vec![AdapterConfig::integrated()]))
            .default_device()
            .unwrap()
    }

    const KERNEL: &str = r#"
kernel void fill(device uint* out [[buffer(1)]], uint id [[thread_position_in_grid]]) {
    out[id] = id;
}
"#;

    fn pipeline(device: &Device) -> ComputePipelineState {
        let library = device
            .new_library_with_source(KERNEL, &CompileOptions::default())
            .unwrap();
        device
            .new_compute_pipeline_state_with_function(
                &library.new_function_with_name("fill").unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn compute_validation() {
        let device = device();
        let queue = device.new_command_queue();
        let buffer = queue.command_buffer();
        let mut encoder = buffer.compute_command_encoder().unwrap();
        let one = Size::new(1, 1, 1);
        assert_eq!(encoder.dispatch_threads(one, one), Err(UsageError::NoPipelineBound));
        encoder.set_compute_pipeline_state(&pipeline(&device)).unwrap();
        assert_eq!(
            encoder.dispatch_threads(one, one),
            Err(UsageError::MissingBinding {
                stage: "kernel",
                index: 1
            })
        );
        let out = device
            .new_buffer_with_length(64, ResourceOptions::default())
            .unwrap();
        assert_eq!(
            encoder.set_buffer(&out, 65, 1),
            Err(UsageError::OffsetOutOfBounds {
                offset: 65,
                length: 64
            })
        );
        assert_eq!(encoder.set_buffer(&out, 0, 31), Err(UsageError::InvalidIndex(31)));
        assert_eq!(
            encoder.set_bytes(&[0; 4097], 0),
            Err(UsageError::InlineBytesTooLarge {
                length: 4097,
                max: 4096
            })
        );
        encoder.set_buffer(&out, 0, 1).unwrap();
        assert_eq!(
            encoder.dispatch_threads(Size::new(16, 1, 1), Size::new(2048, 1, 1)),
            Err(UsageError::ThreadgroupTooLarge {
                requested: 2048,
                max: 1024
            })
        );
        assert_eq!(
            encoder.dispatch_threads(Size::new(16, 1, 1), Size::new(0, 1, 1)),
            Err(UsageError::InvalidThreadgroupSize(Size::new(0, 1, 1)))
        );
        encoder
            .dispatch_threads(Size::new(16, 1, 1), Size::new(5, 1, 1))
            .unwrap();
        encoder.end_encoding().unwrap();
        assert_eq!(encoder.set_bytes(&[0], 0), Err(UsageError::EncoderEnded));
        buffer.commit().unwrap();
        buffer.wait_until_completed().unwrap();
        let words: Vec<u32> = out
            .read_contents(0, 64)
            .unwrap()
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(words, (0..16).collect::<Vec<u32>>());
    }

    #[test]
    fn cross_device_arguments_are_rejected() {
        let device = device();
        let other = self::device();
        let foreign = other
            .new_buffer_with_length(16, ResourceOptions::default())
            .unwrap();
        let buffer = device.new_command_queue().command_buffer();
        let mut encoder = buffer.compute_command_encoder().unwrap();
        assert_eq!(
            encoder.set_buffer(&foreign, 0, 0),
            Err(UsageError::CrossDevice("buffer"))
        );
        assert_eq!(
            encoder.set_compute_pipeline_state(&pipeline(&other)),
            Err(UsageError::CrossDevice("compute pipeline state"))
        );
    }

    #[test]
    fn blit_validation_records_nothing_on_failure() {
        let device = device();
        let texture = |format| {
            device
                .new_texture_with_descriptor(&TextureDescriptor::texture_2d(format, 4, 4, false))
                .unwrap()
        };
        let rgba = texture(PixelFormat::RGBA8_UNORM);
        let bgra = texture(PixelFormat::BGRA8_UNORM);
        let r8 = texture(PixelFormat::R8_UNORM);
        let buffer = device.new_command_queue().command_buffer();
        let mut blit = buffer.blit_command_encoder().unwrap();
        let origin = Origin::default();
        assert!(matches!(
            blit.copy_from_texture(&rgba, 0, 0, origin, Size::new(5, 1, 1), &bgra, 0, 0, origin),
            Err(UsageError::RegionOutOfBounds { which: "source", .. })
        ));
        assert!(matches!(
            blit.copy_from_texture(&rgba, 1, 0, origin, Size::new(1, 1, 1), &bgra, 0, 0, origin),
            Err(UsageError::RegionOutOfBounds { slice: 1, .. })
        ));
        assert!(matches!(
            blit.copy_from_texture(
                &rgba,
                0,
                0,
                origin,
                Size::new(1, 1, 1),
                &bgra,
                0,
                0,
                Origin::new(4, 0, 0),
            ),
            Err(UsageError::RegionOutOfBounds { which: "destination", .. })
        ));
        assert_eq!(
            blit.copy_from_texture(&rgba, 0, 0, origin, Size::new(1, 1, 1), &r8, 0, 0, origin),
            Err(UsageError::IncompatibleFormats {
                src: PixelFormat::RGBA8_UNORM,
                dst: PixelFormat::R8_UNORM
            })
        );
        assert!(blit.commands.is_empty());
        blit.copy_from_texture(&rgba, 0, 0, origin, Size::new(4, 4, 1), &bgra, 0, 0, origin)
            .unwrap();
        assert_eq!(blit.commands.len(), 1);
    }

    #[test]
    fn render_format_must_match() {
        let device = device();
        let library = device
            .new_library_with_source(
                "vertex float4 v(uint id [[vertex_id]]) { return float4(0.0, 0.0, 0.0, 1.0); }",
                &CompileOptions::default(),
            )
            .unwrap();
        let state = device
            .new_render_pipeline_state_with_descriptor(&crate::pipeline::RenderPipelineDescriptor {
                vertex_function: Some(library.new_function_with_name("v").unwrap()),
                fragment_function: None,
                color_attachment0_pixel_format: PixelFormat::BGRA8_UNORM,
            })
            .unwrap();
        let target = device
            .new_texture_with_descriptor(&TextureDescriptor::texture_2d(
                PixelFormat::RGBA8_UNORM,
                2,
                2,
                false,
            ))
            .unwrap();
        let mut descriptor = RenderPassDescriptor::default();
        descriptor.color_attachment0.texture = Some(target);
        let buffer = device.new_command_queue().command_buffer();
        let mut encoder = buffer.render_command_encoder_with_descriptor(&descriptor).unwrap();
        assert_eq!(
            encoder.set_render_pipeline_state(&state),
            Err(UsageError::PixelFormatMismatch {
                pipeline: PixelFormat::BGRA8_UNORM,
                attachment: PixelFormat::RGBA8_UNORM
            })
        );
        assert_eq!(
            encoder.draw_primitives(PrimitiveType::Triangle, 0, 3),
            Err(UsageError::NoPipelineBound)
        );
        encoder.end_encoding().unwrap();
    }
}
