// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Error types.
//!
//! Errors fall into three groups:
//!
//! * construction failures ([`DeviceError`], [`ResourceError`], [`CompileError`],
//!   [`FunctionError`], [`PipelineError`]), returned from factory calls;
//! * protocol violations ([`UsageError`]), returned synchronously by the encoder or command
//!   buffer call that broke the contract.  The rejected call changes nothing;
//! * execution failures ([`ExecutionError`]), produced on the device timeline and retrieved
//!   from the command buffer after completion.

use crate::pixel_formats::PixelFormat;
use crate::types::{Region, Size, StorageMode};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("metal is not supported on this system")]
    NoDevice,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("resource length must be greater than zero")]
    ZeroLength,
    #[error("length {length} exceeds the device maximum of {max} bytes")]
    TooLarge { length: usize, max: usize },
    #[error("device memory exhausted: {requested} bytes requested, {available} available")]
    OutOfMemory { requested: usize, available: usize },
    #[error("invalid resource options {0:#x}")]
    InvalidOptions(u16),
    #[error("storage mode {0:?} is not valid for this resource")]
    UnsupportedStorageMode(StorageMode),
    #[error("invalid texture descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("resource with {0:?} storage is not CPU accessible")]
    NotCpuAccessible(StorageMode),
    #[error("range {offset}+{length} is outside a resource of {capacity} bytes")]
    RangeOutOfBounds {
        offset: usize,
        length: usize,
        capacity: usize,
    },
    #[error("region {region} is outside mip level {level}")]
    RegionOutOfBounds { region: Region, level: usize },
    #[error("bytes per row {bytes_per_row} is too small for {width} pixels of {format:?}")]
    BytesPerRow {
        bytes_per_row: usize,
        width: usize,
        format: PixelFormat,
    },
}

/// Shader compilation failure.  The text is the compiler's diagnostic output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{diagnostics}")]
pub struct CompileError {
    pub diagnostics: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FunctionError {
    #[error("function {0:?} not found")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("function {name:?} is not a {expected} function")]
    WrongFunctionType { name: String, expected: &'static str },
    #[error("function {0:?} belongs to a different device")]
    CrossDevice(String),
    #[error("pixel format {0:?} is not renderable")]
    UnrenderableFormat(PixelFormat),
    #[error(
        "fragment function {fragment:?} takes [[stage_in]] {expected}, but vertex function {vertex:?} returns {found}"
    )]
    StageInMismatch {
        vertex: String,
        fragment: String,
        expected: String,
        found: String,
    },
    #[error("render pipeline descriptor has no vertex function")]
    MissingVertexFunction,
}

/// A contract violation at the encoder/command-buffer boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("an encoder is already open on this command buffer")]
    EncoderAlreadyOpen,
    #[error("an encoder is still open; call end_encoding first")]
    EncoderStillOpen,
    #[error("encoding has already ended")]
    EncoderEnded,
    #[error("command buffer is already committed")]
    AlreadyCommitted,
    #[error("command buffer has not been committed")]
    NotCommitted,
    #[error("cannot wait for an unfinished command buffer on its own queue's timeline")]
    WaitOnTimeline,
    #[error("no pipeline state is bound")]
    NoPipelineBound,
    #[error("threadgroup of {requested} threads exceeds the pipeline maximum of {max}")]
    ThreadgroupTooLarge { requested: usize, max: usize },
    #[error("threadgroup size {0} has a zero dimension")]
    InvalidThreadgroupSize(Size),
    #[error("offset {offset} is beyond a buffer of {length} bytes")]
    OffsetOutOfBounds { offset: usize, length: usize },
    #[error("argument index {0} is out of range")]
    InvalidIndex(usize),
    #[error("{length} inline bytes exceed the {max} byte limit")]
    InlineBytesTooLarge { length: usize, max: usize },
    #[error("{0} belongs to a different device")]
    CrossDevice(&'static str),
    #[error("pipeline renders {pipeline:?} but the attachment is {attachment:?}")]
    PixelFormatMismatch {
        pipeline: PixelFormat,
        attachment: PixelFormat,
    },
    #[error("render pass has no color attachment texture")]
    MissingRenderTarget,
    #[error("nothing is bound at {stage} buffer index {index}")]
    MissingBinding { stage: &'static str, index: usize },
    #[error("{which} region {region} (level {level}, slice {slice}) is out of bounds")]
    RegionOutOfBounds {
        which: &'static str,
        region: Region,
        level: usize,
        slice: usize,
    },
    #[error("formats {src:?} and {dst:?} are not copy-compatible")]
    IncompatibleFormats { src: PixelFormat, dst: PixelFormat },
    #[error("range {offset}+{length} is outside a buffer of {capacity} bytes")]
    BufferRangeOutOfBounds {
        offset: usize,
        length: usize,
        capacity: usize,
    },
    #[error("render pass attachment {0:?} cannot be a render target")]
    UnrenderableAttachment(PixelFormat),
}

impl UsageError {
    /// Records the violation in the log and passes it on.
    pub(crate) fn logged(self) -> Self {
        logwise::warn_sync!(
            "rejected call: {err}",
            err = logwise::privacy::LogIt(&self)
        );
        self
    }
}

/// A fault raised while the device executed a command buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{pass}: {message}")]
pub struct ExecutionError {
    /// Label of the pass that faulted.
    pub pass: String,
    pub message: String,
}

/// Why [`crate::CommandBuffer::wait_until_completed`] did not report success.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("command buffer execution failed: {0}")]
    Execution(#[from] ExecutionError),
}

/// Any error this crate produces.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
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
