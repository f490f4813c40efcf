// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Runs recorded passes.  Called on the timeline thread only.

use super::memory::{read_bound, write_bound};
use super::raster::{self, Fragment, Vertex};
use super::{
    Binding, BindingTable, BlitCommand, Dispatch, Draw, Pass, PassKind, RenderTarget,
    Synchronizable,
};
use crate::error::ExecutionError;
use crate::shader::interp::{self, Fault, Inputs, Interpreter, Memory};
use crate::types::LoadAction;

/// The argument table one invocation runs against.
struct Bound<'a> {
    table: &'a BindingTable,
}

impl Memory for Bound<'_> {
    fn read(&self, index: u32, offset: usize, out: &mut [u8]) -> Result<(), Fault> {
        match self.table.get(index as usize) {
            Some(Some(Binding::Buffer { buffer, offset: base })) => {
                read_bound(buffer.storage.gpu(), *base, index, offset, out)
            }
            Some(Some(Binding::Bytes(bytes))) => {
                let src = offset
                    .checked_add(out.len())
                    .and_then(|end| bytes.get(offset..end))
                    .ok_or(Fault::OutOfBounds {
                        index,
                        offset: offset as i64,
                        len: out.len(),
                    })?;
                out.copy_from_slice(src);
                Ok(())
            }
            _ => Err(Fault::Unbound(index)),
        }
    }

    fn write(&self, index: u32, offset: usize, bytes: &[u8]) -> Result<(), Fault> {
        match self.table.get(index as usize) {
            Some(Some(Binding::Buffer { buffer, offset: base })) => {
                write_bound(buffer.storage.gpu(), *base, index, offset, bytes)
            }
            Some(Some(Binding::Bytes(_))) => Err(Fault::ReadOnly(index)),
            _ => Err(Fault::Unbound(index)),
        }
    }
}

fn fail(label: &str, message: String) -> ExecutionError {
    ExecutionError {
        pass: label.to_string(),
        message,
    }
}

/// Executes one pass.  The first fault aborts the pass.
pub(crate) fn run_pass(pass: &Pass) -> Result<(), ExecutionError> {
    logwise::trace_sync!("running pass {label}", label = pass.label.clone());
    match &pass.kind {
        PassKind::Compute(dispatches) => {
            for dispatch in dispatches {
                run_dispatch(dispatch).map_err(|m| fail(&pass.label, m))?;
            }
            Ok(())
        }
        PassKind::Render { target, draws } => {
            run_render(target, draws).map_err(|m| fail(&pass.label, m))
        }
        PassKind::Blit(commands) => {
            for command in commands {
                run_blit(command).map_err(|m| fail(&pass.label, m))?;
            }
            Ok(())
        }
    }
}

fn run_dispatch(dispatch: &Dispatch) -> Result<(), String> {
    let program = &dispatch.program;
    let memory = Bound {
        table: &dispatch.bindings,
    };
    let mut interp = Interpreter::new(&program.module, &memory);
    let groups = dispatch.threadgroups;
    let local = dispatch.threads_per_threadgroup;
    let grid = dispatch.grid;
    let as_u32 = |s: crate::types::Size| [s.width as u32, s.height as u32, s.depth as u32];
    let mut inputs = Inputs {
        threads_per_threadgroup: as_u32(local),
        threads_per_grid: as_u32(grid),
        ..Inputs::default()
    };
    for gz in 0..groups.depth {
        for gy in 0..groups.height {
            for gx in 0..groups.width {
                for lz in 0..local.depth {
                    for ly in 0..local.height {
                        for lx in 0..local.width {
                            let (x, y, z) = (
                                gx * local.width + lx,
                                gy * local.height + ly,
                                gz * local.depth + lz,
                            );
                            // ragged edge groups
                            if x >= grid.width || y >= grid.height || z >= grid.depth {
                                continue;
                            }
                            inputs.thread_position_in_grid = [x as u32, y as u32, z as u32];
                            inputs.thread_position_in_threadgroup =
                                [lx as u32, ly as u32, lz as u32];
                            inputs.threadgroup_position_in_grid = [gx as u32, gy as u32, gz as u32];
                            interp.run(program.entry, &inputs).map_err(|fault| {
                                format!(
                                    "kernel {} faulted at thread ({x}, {y}, {z}): {fault}",
                                    program.name
                                )
                            })?;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn run_render(target: &RenderTarget, draws: &[Draw]) -> Result<(), String> {
    let texture = &target.texture;
    if target.load == LoadAction::Clear {
        texture.clear(target.clear.as_f32x4());
    }
    let (width, height) = match texture.level(0) {
        Some(level) => (level.width, level.height),
        None => return Ok(()),
    };
    for draw in draws {
        let program = &draw.program;
        let vertex_memory = Bound {
            table: &draw.vertex_bindings,
        };
        let vertex_fn = &program.vertex.module.functions[program.vertex.entry];
        let mut vertex_interp = Interpreter::new(&program.vertex.module, &vertex_memory);
        // vertex ids are 32-bit
        let end = draw
            .vertex_start
            .checked_add(draw.vertex_count)
            .filter(|&end| end as u64 <= u64::from(u32::MAX) + 1)
            .ok_or_else(|| {
                format!(
                    "vertex range {start}+{count} exceeds the vertex id range",
                    start = draw.vertex_start,
                    count = draw.vertex_count
                )
            })?;
        let mut vertices = Vec::new();
        for id in draw.vertex_start..end {
            let inputs = Inputs {
                vertex_id: id as u32,
                ..Inputs::default()
            };
            let out = vertex_interp
                .run(program.vertex.entry, &inputs)
                .map_err(|fault| {
                    format!(
                        "vertex function {} faulted at vertex {id}: {fault}",
                        program.vertex.name
                    )
                })?;
            let (position, varyings) =
                interp::split_vertex_output(&program.vertex.module, &vertex_fn.ret, &out);
            vertices.push(Vertex { position, varyings });
        }

        let Some(fragment) = &program.fragment else {
            // no fragment stage: rasterization has no color output
            continue;
        };
        let fragment_memory = Bound {
            table: &draw.fragment_bindings,
        };
        let fragment_fn = &fragment.module.functions[fragment.entry];
        let stage_in_ty = fragment_fn.stage_in().map(|p| p.ty.clone());
        let mut fragment_interp = Interpreter::new(&fragment.module, &fragment_memory);
        let mut shade = |f: Fragment| -> Result<(), String> {
            let stage_in = stage_in_ty.as_ref().map(|ty| {
                interp::assemble_stage_in(&fragment.module, ty, f.position, &f.varyings)
            });
            let inputs = Inputs {
                stage_in,
                ..Inputs::default()
            };
            let color = fragment_interp.run(fragment.entry, &inputs).map_err(|fault| {
                format!(
                    "fragment function {} faulted at pixel ({}, {}): {fault}",
                    fragment.name, f.x, f.y
                )
            })?;
            let lanes = color.to_f32s();
            let mut rgba = [0.0, 0.0, 0.0, 1.0];
            for (c, v) in rgba.iter_mut().zip(lanes) {
                *c = v;
            }
            texture.write_pixel(f.x, f.y, rgba);
            Ok(())
        };
        for primitive in raster::assemble(draw.primitive, vertices.len()) {
            let corners: Vec<&Vertex> = primitive.iter().map(|&i| &vertices[i]).collect();
            raster::rasterize(&corners, width, height, &mut shade)?;
        }
    }
    Ok(())
}

fn run_blit(command: &BlitCommand) -> Result<(), String> {
    match command {
        BlitCommand::CopyTexture {
            src,
            src_level,
            src_origin,
            size,
            dst,
            dst_level,
            dst_origin,
        } => src
            .copy_region(*src_level, *src_origin, *size, dst, *dst_level, *dst_origin)
            .ok_or_else(|| "texture copy out of bounds".to_string()),
        BlitCommand::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            len,
        } => dst
            .storage
            .gpu()
            .copy_from(*dst_offset, src.storage.gpu(), *src_offset, *len)
            .ok_or_else(|| {
                format!(
                    "buffer copy of {len} bytes from {src_offset} to {dst_offset} out of bounds"
                )
            }),
        BlitCommand::FillBuffer {
            buffer,
            range,
            value,
        } => buffer
            .storage
            .gpu()
            .fill(range.clone(), *value)
            .ok_or_else(|| format!("fill of {range:?} out of bounds")),
        BlitCommand::Synchronize(resource) => {
            match resource {
                Synchronizable::Buffer(buffer) => buffer.storage.synchronize(),
                Synchronizable::Texture(texture) => texture.storage.synchronize(),
            }
            Ok(())
        }
    }
}
