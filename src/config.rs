// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Configuration of the adapters the software device exposes.

The process-wide system reads its configuration once, from the environment:

| variable                          | meaning                                                     |
|-----------------------------------|-------------------------------------------------------------|
| `MTL_BINDINGS_ADAPTERS`           | comma list of `integrated`, `discrete`, `external`, `none`  |
| `MTL_BINDINGS_MAX_BUFFER_LENGTH`  | per-buffer byte limit applied to every adapter              |

With nothing set, a single integrated adapter with unified memory is exposed.

Tests and embedders that want an isolated set of devices build a [`SystemConfig`] directly
and pass it to [`crate::System::with_config`].
*/

use crate::types::GpuFamily;

pub const ADAPTERS_VAR: &str = "MTL_BINDINGS_ADAPTERS";
pub const MAX_BUFFER_LENGTH_VAR: &str = "MTL_BINDINGS_MAX_BUFFER_LENGTH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    /// Shares memory with the CPU.
    Integrated,
    /// Has its own memory; managed resources keep two copies.
    Discrete,
    /// A removable discrete adapter.
    External,
}

/// Properties of one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub kind: AdapterKind,
    pub name: String,
    pub registry_id: u64,
    pub headless: bool,
    pub low_power: bool,
    pub removable: bool,
    pub unified_memory: bool,
    pub families: Vec<GpuFamily>,
    /// Device-wide ceiling on threads per threadgroup.
    pub max_threads_per_threadgroup: usize,
    pub max_buffer_length: usize,
    /// Total bytes of buffers and textures the device will hold at once.
    pub memory_budget: usize,
    pub max_texture_dimension: usize,
}

const MIB: usize = 1024 * 1024;

impl AdapterConfig {
    pub fn integrated() -> Self {
        AdapterConfig {
            kind: AdapterKind::Integrated,
            name: "Software Unified GPU".to_string(),
            registry_id: 0x1000_0001,
            headless: false,
            low_power: true,
            removable: false,
            unified_memory: true,
            families: vec![
                GpuFamily::APPLE1,
                GpuFamily::APPLE2,
                GpuFamily::APPLE3,
                GpuFamily::APPLE4,
                GpuFamily::APPLE5,
                GpuFamily::APPLE6,
                GpuFamily::APPLE7,
                GpuFamily::COMMON1,
                GpuFamily::COMMON2,
                GpuFamily::COMMON3,
                GpuFamily::METAL3,
            ],
            max_threads_per_threadgroup: 1024,
            max_buffer_length: 256 * MIB,
            memory_budget: 1024 * MIB,
            max_texture_dimension: 16384,
        }
    }

    pub fn discrete() -> Self {
        AdapterConfig {
            kind: AdapterKind::Discrete,
            name: "Software Discrete GPU".to_string(),
            registry_id: 0x2000_0001,
            headless: false,
            low_power: false,
            removable: false,
            unified_memory: false,
            families: vec![
                GpuFamily::MAC2,
                GpuFamily::COMMON1,
                GpuFamily::COMMON2,
                GpuFamily::COMMON3,
                GpuFamily::METAL3,
            ],
            ..AdapterConfig::integrated()
        }
    }

    pub fn external() -> Self {
        AdapterConfig {
            kind: AdapterKind::External,
            name: "Software External GPU".to_string(),
            registry_id: 0x3000_0001,
            headless: true,
            removable: true,
            ..AdapterConfig::discrete()
        }
    }

    fn of_kind(kind: AdapterKind) -> Self {
        match kind {
            AdapterKind::Integrated => AdapterConfig::integrated(),
            AdapterKind::Discrete => AdapterConfig::discrete(),
            AdapterKind::External => AdapterConfig::external(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown adapter kind {0:?} in MTL_BINDINGS_ADAPTERS")]
    UnknownAdapter(String),
    #[error("{var} must be a positive byte count, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

/// The adapters a [`crate::System`] exposes, in enumeration order.  The first is the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemConfig {
    pub adapters: Vec<AdapterConfig>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            adapters: vec![AdapterConfig::integrated()],
        }
    }
}

impl SystemConfig {
    pub fn with_adapters(adapters: Vec<AdapterConfig>) -> Self {
        SystemConfig { adapters }
    }

    /// A configuration with no adapters; device creation fails.
    pub fn empty() -> Self {
        SystemConfig { adapters: vec![] }
    }

    /// Reads the process environment.  Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(
            std::env::var(ADAPTERS_VAR).ok().as_deref(),
            std::env::var(MAX_BUFFER_LENGTH_VAR).ok().as_deref(),
        )
    }

    fn from_vars(adapters: Option<&str>, max_buffer: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match adapters {
            None => SystemConfig::default(),
            Some(list) => {
                let mut out: Vec<AdapterConfig> = Vec::new();
                for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    let kind = match item.to_ascii_lowercase().as_str() {
                        "integrated" => AdapterKind::Integrated,
                        "discrete" => AdapterKind::Discrete,
                        "external" => AdapterKind::External,
                        "none" => continue,
                        _ => return Err(ConfigError::UnknownAdapter(item.to_string())),
                    };
                    let mut adapter = AdapterConfig::of_kind(kind);
                    // repeated kinds still get distinct registry ids
                    adapter.registry_id += out
                        .iter()
                        .filter(|a| a.kind == kind)
                        .count() as u64;
                    out.push(adapter);
                }
                SystemConfig { adapters: out }
            }
        };
        if let Some(value) = max_buffer {
            let parsed = value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidNumber {
                    var: MAX_BUFFER_LENGTH_VAR,
                    value: value.to_string(),
                })?;
            for adapter in &mut config.adapters {
                adapter.max_buffer_length = parsed;
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_one_unified_adapter() {
        let config = SystemConfig::from_vars(None, None).unwrap();
        assert_eq!(config.adapters.len(), 1);
        assert!(config.adapters[0].unified_memory);
    }

    #[test]
    fn parses_adapter_list() {
        let config =
            SystemConfig::from_vars(Some("discrete, integrated,discrete"), Some("4096")).unwrap();
        let kinds: Vec<_> = config.adapters.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            [
                AdapterKind::Discrete,
                AdapterKind::Integrated,
                AdapterKind::Discrete
            ]
        );
        assert_ne!(config.adapters[0].registry_id, config.adapters[2].registry_id);
        assert!(config.adapters.iter().all(|a| a.max_buffer_length == 4096));
    }

    #[test]
    fn none_and_errors() {
        assert!(
            SystemConfig::from_vars(Some("none"), None)
                .unwrap()
                .adapters
                .is_empty()
        );
        assert_eq!(
            SystemConfig::from_vars(Some("quantum"), None),
            Err(ConfigError::UnknownAdapter("quantum".into()))
        );
        assert!(SystemConfig::from_vars(None, Some("0")).is_err());
    }
}
