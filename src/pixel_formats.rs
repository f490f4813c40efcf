// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Pixel format codes and the texel codec used by the software device.
//!
//! Formats are carried as the native API's numeric codes inside [`PixelFormat`], so values
//! arriving over the C boundary pass through untouched.  Only the formats listed here can
//! back a texture; anything else is rejected at texture creation.
//!
//! # Examples
//!
//! ```
//! use mtl_bindings::pixel_formats::PixelFormat;
//!
//! assert_eq!(PixelFormat::BGRA8_UNORM.bytes_per_pixel(), Some(4));
//! assert!(PixelFormat::RGBA16_FLOAT.is_renderable());
//! assert!(!PixelFormat::R32_UINT.is_renderable());
//! ```

use std::fmt::{Debug, Formatter};

pub use half::f16;

/// A native pixel format code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelFormat(pub u16);

/// How the channels of a format are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Unorm8,
    Unorm8Srgb,
    Float16,
    Float32,
    Uint32,
    Sint32,
}

#[derive(Debug, Clone, Copy)]
struct FormatInfo {
    name: &'static str,
    channels: u8,
    encoding: Encoding,
    /// BGRA ordering in memory.
    swizzled: bool,
}

impl PixelFormat {
    pub const INVALID: PixelFormat = PixelFormat(0);
    pub const R8_UNORM: PixelFormat = PixelFormat(10);
    pub const R16_FLOAT: PixelFormat = PixelFormat(25);
    pub const RG8_UNORM: PixelFormat = PixelFormat(30);
    pub const R32_UINT: PixelFormat = PixelFormat(53);
    pub const R32_SINT: PixelFormat = PixelFormat(54);
    pub const R32_FLOAT: PixelFormat = PixelFormat(55);
    pub const RG16_FLOAT: PixelFormat = PixelFormat(65);
    pub const RGBA8_UNORM: PixelFormat = PixelFormat(70);
    pub const RGBA8_UNORM_SRGB: PixelFormat = PixelFormat(71);
    pub const BGRA8_UNORM: PixelFormat = PixelFormat(80);
    pub const BGRA8_UNORM_SRGB: PixelFormat = PixelFormat(81);
    pub const RG32_FLOAT: PixelFormat = PixelFormat(105);
    pub const RGBA16_FLOAT: PixelFormat = PixelFormat(115);
    pub const RGBA32_FLOAT: PixelFormat = PixelFormat(125);

    fn info(self) -> Option<FormatInfo> {
        let (name, channels, encoding, swizzled) = match self {
            PixelFormat::R8_UNORM => ("R8Unorm", 1, Encoding::Unorm8, false),
            PixelFormat::R16_FLOAT => ("R16Float", 1, Encoding::Float16, false),
            PixelFormat::RG8_UNORM => ("RG8Unorm", 2, Encoding::Unorm8, false),
            PixelFormat::R32_UINT => ("R32Uint", 1, Encoding::Uint32, false),
            PixelFormat::R32_SINT => ("R32Sint", 1, Encoding::Sint32, false),
            PixelFormat::R32_FLOAT => ("R32Float", 1, Encoding::Float32, false),
            PixelFormat::RG16_FLOAT => ("RG16Float", 2, Encoding::Float16, false),
            PixelFormat::RGBA8_UNORM => ("RGBA8Unorm", 4, Encoding::Unorm8, false),
            PixelFormat::RGBA8_UNORM_SRGB => ("RGBA8Unorm_sRGB", 4, Encoding::Unorm8Srgb, false),
            PixelFormat::BGRA8_UNORM => ("BGRA8Unorm", 4, Encoding::Unorm8, true),
            PixelFormat::BGRA8_UNORM_SRGB => ("BGRA8Unorm_sRGB", 4, Encoding::Unorm8Srgb, true),
            PixelFormat::RG32_FLOAT => ("RG32Float", 2, Encoding::Float32, false),
            PixelFormat::RGBA16_FLOAT => ("RGBA16Float", 4, Encoding::Float16, false),
            PixelFormat::RGBA32_FLOAT => ("RGBA32Float", 4, Encoding::Float32, false),
            _ => return None,
        };
        Some(FormatInfo {
            name,
            channels,
            encoding,
            swizzled,
        })
    }

    /// Whether the software device can store this format.
    pub fn is_supported(self) -> bool {
        self.info().is_some()
    }

    pub fn bytes_per_pixel(self) -> Option<usize> {
        self.info().map(|i| {
            let channel = match i.encoding {
                Encoding::Unorm8 | Encoding::Unorm8Srgb => 1,
                Encoding::Float16 => 2,
                Encoding::Float32 | Encoding::Uint32 | Encoding::Sint32 => 4,
            };
            channel * i.channels as usize
        })
    }

    /// Float and normalized formats can be color attachments; integer formats cannot.
    pub fn is_renderable(self) -> bool {
        self.info()
            .is_some_and(|i| !matches!(i.encoding, Encoding::Uint32 | Encoding::Sint32))
    }

    pub fn is_srgb(self) -> bool {
        self.info()
            .is_some_and(|i| i.encoding == Encoding::Unorm8Srgb)
    }

    /**
    Writes a linear RGBA color as one texel.

    Normalized channels are clamped and rounded; sRGB formats apply the sRGB transfer
    function first.  `out` must be exactly [`Self::bytes_per_pixel`] long.
    */
    pub(crate) fn encode(self, rgba: [f32; 4], out: &mut [u8]) {
        let Some(info) = self.info() else { return };
        let mut channels = rgba;
        if info.swizzled {
            channels.swap(0, 2);
        }
        for (c, &value) in channels.iter().take(info.channels as usize).enumerate() {
            match info.encoding {
                Encoding::Unorm8 => out[c] = unorm8(value),
                Encoding::Unorm8Srgb => {
                    // alpha is always linear
                    let is_alpha = c == 3;
                    out[c] = unorm8(if is_alpha { value } else { linear_to_srgb(value) });
                }
                Encoding::Float16 => {
                    out[c * 2..c * 2 + 2].copy_from_slice(&f16::from_f32(value).to_le_bytes())
                }
                Encoding::Float32 => out[c * 4..c * 4 + 4].copy_from_slice(&value.to_le_bytes()),
                Encoding::Uint32 => {
                    out[c * 4..c * 4 + 4].copy_from_slice(&(value.max(0.0) as u32).to_le_bytes())
                }
                Encoding::Sint32 => {
                    out[c * 4..c * 4 + 4].copy_from_slice(&(value as i32).to_le_bytes())
                }
            }
        }
    }

    /// Reads one texel back as linear RGBA.  Missing channels read as 0, missing alpha as 1.
    pub(crate) fn decode(self, bytes: &[u8]) -> [f32; 4] {
        let mut rgba = [0.0, 0.0, 0.0, 1.0];
        let Some(info) = self.info() else {
            return rgba;
        };
        for (c, slot) in rgba.iter_mut().take(info.channels as usize).enumerate() {
            *slot = match info.encoding {
                Encoding::Unorm8 => bytes[c] as f32 / 255.0,
                Encoding::Unorm8Srgb => {
                    let v = bytes[c] as f32 / 255.0;
                    if c == 3 { v } else { srgb_to_linear(v) }
                }
                Encoding::Float16 => f16::from_le_bytes([bytes[c * 2], bytes[c * 2 + 1]]).to_f32(),
                Encoding::Float32 => f32::from_le_bytes(word(bytes, c)),
                Encoding::Uint32 => u32::from_le_bytes(word(bytes, c)) as f32,
                Encoding::Sint32 => i32::from_le_bytes(word(bytes, c)) as f32,
            };
        }
        if info.swizzled {
            rgba.swap(0, 2);
        }
        rgba
    }
}

fn word(bytes: &[u8], channel: usize) -> [u8; 4] {
    let mut w = [0; 4];
    w.copy_from_slice(&bytes[channel * 4..channel * 4 + 4]);
    w
}

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[inline]
pub(crate) fn linear_to_srgb(linear: f32) -> f32 {
    if linear < 0.0031308 {
        12.92 * linear
    } else {
        1.055 * linear.powf(1.0 / 2.4) - 0.055
    }
}

#[inline]
pub(crate) fn srgb_to_linear(srgb: f32) -> f32 {
    if srgb <= 0.04045 {
        srgb / 12.92
    } else {
        ((srgb + 0.055) / 1.055).powf(2.4)
    }
}

impl Debug for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.info() {
            Some(info) => write!(f, "PixelFormat::{}", info.name),
            None => write!(f, "PixelFormat({})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_swizzles_on_encode() {
        let mut out = [0u8; 4];
        PixelFormat::BGRA8_UNORM.encode([1.0, 0.5, 0.0, 1.0], &mut out);
        assert_eq!(out, [0, 128, 255, 255]);
        let back = PixelFormat::BGRA8_UNORM.decode(&out);
        assert_eq!(back[0], 1.0);
        assert_eq!(back[2], 0.0);
    }

    #[test]
    fn srgb_keeps_alpha_linear() {
        let mut out = [0u8; 4];
        PixelFormat::RGBA8_UNORM_SRGB.encode([0.5, 0.5, 0.5, 0.5], &mut out);
        assert_eq!(out[3], 128);
        assert!(out[0] > 180, "sRGB mid-gray should brighten, got {}", out[0]);
    }

    #[test]
    fn half_and_float_formats() {
        let mut out = [0u8; 8];
        PixelFormat::RGBA16_FLOAT.encode([0.25, -2.0, 8.0, 1.0], &mut out);
        assert_eq!(PixelFormat::RGBA16_FLOAT.decode(&out), [0.25, -2.0, 8.0, 1.0]);
        assert_eq!(PixelFormat::RG32_FLOAT.bytes_per_pixel(), Some(8));
        assert_eq!(PixelFormat(9999).bytes_per_pixel(), None);
        assert_eq!(format!("{:?}", PixelFormat::R32_FLOAT), "PixelFormat::R32Float");
    }
}
