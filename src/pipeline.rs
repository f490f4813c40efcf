// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Compute and render pipeline states.

use crate::device::Device;
use crate::error::PipelineError;
use crate::imp::{ComputeProgram, RenderProgram, Stage};
use crate::library::{Function, FunctionType};
use crate::pixel_formats::PixelFormat;
use crate::shader::ast::{Module, Type};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// SIMD group width of the software device.
const THREAD_EXECUTION_WIDTH: usize = 32;

fn check_function(
    device: &Device,
    function: &Function,
    expected: FunctionType,
) -> Result<(), PipelineError> {
    if function.device_id() != device.id() {
        return Err(PipelineError::CrossDevice(function.name().to_string()));
    }
    if function.function_type() != expected {
        return Err(PipelineError::WrongFunctionType {
            name: function.name().to_string(),
            expected: match expected {
                FunctionType::Kernel => "kernel",
                FunctionType::Vertex => "vertex",
                FunctionType::Fragment => "fragment",
            },
        });
    }
    Ok(())
}

/// A kernel ready for dispatch.
#[derive(Clone)]
pub struct ComputePipelineState {
    program: Arc<ComputeProgram>,
    device_id: u64,
}

impl Debug for ComputePipelineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePipelineState")
            .field("function", &self.program.name)
            .field("max_total_threads", &self.program.max_total_threads)
            .finish()
    }
}

impl ComputePipelineState {
    pub(crate) fn new(device: &Device, function: &Function) -> Result<Self, PipelineError> {
        check_function(device, function, FunctionType::Kernel)?;
        let device_max = device.adapter().max_threads_per_threadgroup;
        let max_total_threads = function
            .declaration()
            .max_total_threads
            .map_or(device_max, |attr| attr.min(device_max));
        Ok(ComputePipelineState {
            program: Arc::new(ComputeProgram {
                module: function.module().clone(),
                entry: function.entry(),
                name: function.name().to_string(),
                max_total_threads,
            }),
            device_id: device.id(),
        })
    }

    pub(crate) fn program(&self) -> &Arc<ComputeProgram> {
        &self.program
    }

    pub(crate) fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn function_name(&self) -> &str {
        &self.program.name
    }

    /// Largest threadgroup, in threads, a dispatch with this pipeline may use.
    pub fn max_total_threads_per_threadgroup(&self) -> usize {
        self.program.max_total_threads
    }

    pub fn thread_execution_width(&self) -> usize {
        THREAD_EXECUTION_WIDTH.min(self.program.max_total_threads)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenderPipelineDescriptor {
    pub vertex_function: Option<Function>,
    pub fragment_function: Option<Function>,
    pub color_attachment0_pixel_format: PixelFormat,
}

/// Layout-relevant description of an interface type: struct members by name, type and
/// `[[position]]`, anything else by its type name.
fn interface_shape(module: &Module, ty: &Type) -> String {
    match ty {
        Type::Struct(index) => module.structs[*index]
            .fields
            .iter()
            .map(|field| {
                format!(
                    "{} {}{}",
                    module.type_name(&field.ty),
                    field.name,
                    if field.position { " [[position]]" } else { "" }
                )
            })
            .collect::<Vec<_>>()
            .join("; "),
        other => module.type_name(other),
    }
}

/// A vertex and fragment pair bound to one color format.
#[derive(Clone)]
pub struct RenderPipelineState {
    program: Arc<RenderProgram>,
    device_id: u64,
}

impl Debug for RenderPipelineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPipelineState")
            .field("vertex", &self.program.vertex.name)
            .field(
                "fragment",
                &self.program.fragment.as_ref().map(|s| s.name.as_str()),
            )
            .field("format", &self.program.format)
            .finish()
    }
}

impl RenderPipelineState {
    pub(crate) fn new(
        device: &Device,
        descriptor: &RenderPipelineDescriptor,
    ) -> Result<Self, PipelineError> {
        let vertex = descriptor
            .vertex_function
            .as_ref()
            .ok_or(PipelineError::MissingVertexFunction)?;
        check_function(device, vertex, FunctionType::Vertex)?;
        let format = descriptor.color_attachment0_pixel_format;
        if !format.is_renderable() {
            return Err(PipelineError::UnrenderableFormat(format));
        }
        let fragment = match &descriptor.fragment_function {
            Some(fragment) => {
                check_function(device, fragment, FunctionType::Fragment)?;
                if let Some(stage_in) = fragment.declaration().stage_in() {
                    let produced = interface_shape(vertex.module(), &vertex.declaration().ret);
                    let consumed = interface_shape(fragment.module(), &stage_in.ty);
                    if produced != consumed {
                        return Err(PipelineError::StageInMismatch {
                            vertex: vertex.name().to_string(),
                            fragment: fragment.name().to_string(),
                            expected: fragment.module().type_name(&stage_in.ty),
                            found: vertex.module().type_name(&vertex.declaration().ret),
                        });
                    }
                }
                Some(Stage {
                    module: fragment.module().clone(),
                    entry: fragment.entry(),
                    name: fragment.name().to_string(),
                })
            }
            None => None,
        };
        Ok(RenderPipelineState {
            program: Arc::new(RenderProgram {
                vertex: Stage {
                    module: vertex.module().clone(),
                    entry: vertex.entry(),
                    name: vertex.name().to_string(),
                },
                fragment,
                format,
            }),
            device_id: device.id(),
        })
    }

    pub(crate) fn program(&self) -> &Arc<RenderProgram> {
        &self.program
    }

    pub(crate) fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.program.format
    }
}
