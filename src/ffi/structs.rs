// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Structs passed by value across the C boundary.  Field order and types match
//! `include/mtl_bindings.h`.

use crate::types::{ClearColor, Origin, Region, Size};
use std::ffi::{c_char, c_int, c_ulong, c_void};

/// The header's `uint_t`.
#[allow(non_camel_case_types)]
pub type uint_t = c_ulong;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CSize {
    pub width: uint_t,
    pub height: uint_t,
    pub depth: uint_t,
}

impl From<CSize> for Size {
    fn from(s: CSize) -> Self {
        Size::new(s.width as usize, s.height as usize, s.depth as usize)
    }
}

impl From<Size> for CSize {
    fn from(s: Size) -> Self {
        CSize {
            width: s.width as uint_t,
            height: s.height as uint_t,
            depth: s.depth as uint_t,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct COrigin {
    pub x: uint_t,
    pub y: uint_t,
    pub z: uint_t,
}

impl From<COrigin> for Origin {
    fn from(o: COrigin) -> Self {
        Origin::new(o.x as usize, o.y as usize, o.z as usize)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CRegion {
    pub origin: COrigin,
    pub size: CSize,
}

impl From<CRegion> for Region {
    fn from(r: CRegion) -> Self {
        Region {
            origin: r.origin.into(),
            size: r.size.into(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CClearColor {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub alpha: f64,
}

impl From<CClearColor> for ClearColor {
    fn from(c: CClearColor) -> Self {
        ClearColor::new(c.red, c.green, c.blue, c.alpha)
    }
}

/// A device handle plus its properties.  `device` is null when creation failed.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CDevice {
    pub device: *mut c_void,
    pub headless: bool,
    pub low_power: bool,
    pub removable: bool,
    pub registry_id: u64,
    /// Valid until the handle is released.
    pub name: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CDevices {
    pub devices: *mut CDevice,
    pub length: c_int,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CLibrary {
    pub library: *mut c_void,
    pub error: *const c_char,
}

/// All-zero means the defaults.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CCompileOptions {
    pub fast_math_enabled: bool,
    pub preserve_invariance: bool,
    pub language_version: uint_t,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CComputePipelineState {
    pub compute_pipeline_state: *mut c_void,
    pub max_total_threads_per_threadgroup: uint_t,
    pub error: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CRenderPipelineDescriptor {
    pub vertex_function: *mut c_void,
    pub fragment_function: *mut c_void,
    pub color_attachment0_pixel_format: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CRenderPipelineState {
    pub render_pipeline_state: *mut c_void,
    pub error: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CRenderPassDescriptor {
    pub color_attachment0_load_action: u8,
    pub color_attachment0_store_action: u8,
    pub color_attachment0_clear_color: CClearColor,
    pub color_attachment0_texture: *mut c_void,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CTextureDescriptor {
    pub pixel_format: u16,
    pub width: uint_t,
    pub height: uint_t,
    pub storage_mode: u8,
}
