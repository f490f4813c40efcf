// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Device discovery and the device factory.

A [`System`] owns one device per configured adapter.  The process-wide system is built on
first use from [`SystemConfig::from_env`]; [`create_system_default_device`] and
[`copy_all_devices`] read from it, so every call hands out the same underlying devices.

[`Device`] is a cheap handle.  Clones compare equal and share memory accounting, queues and
limits.
*/

use crate::command_queue::CommandQueue;
use crate::config::{AdapterConfig, SystemConfig};
use crate::error::{CompileError, DeviceError, PipelineError, ResourceError};
use crate::imp::MemoryAccount;
use crate::library::{CompileOptions, Function, Library};
use crate::pipeline::{ComputePipelineState, RenderPipelineDescriptor, RenderPipelineState};
use crate::resource::{Buffer, Texture, TextureDescriptor};
use crate::types::{GpuFamily, ResourceOptions, Size};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);
static SYSTEM: OnceLock<System> = OnceLock::new();

pub(crate) struct DeviceShared {
    pub(crate) id: u64,
    pub(crate) adapter: AdapterConfig,
    pub(crate) account: Arc<MemoryAccount>,
}

/// A GPU adapter and the factory for everything that runs on it.
#[derive(Clone)]
pub struct Device {
    shared: Arc<DeviceShared>,
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}

impl Eq for Device {}

impl Debug for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.shared.adapter.name)
            .field("registry_id", &self.shared.adapter.registry_id)
            .finish()
    }
}

impl Device {
    fn new(adapter: AdapterConfig) -> Self {
        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        logwise::info_sync!(
            "created device {name} (registry id {registry})",
            name = adapter.name.clone(),
            registry = adapter.registry_id
        );
        Device {
            shared: Arc::new(DeviceShared {
                id,
                account: MemoryAccount::new(adapter.memory_budget),
                adapter,
            }),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.shared.id
    }

    pub(crate) fn downgrade(&self) -> Weak<DeviceShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn upgrade(weak: &Weak<DeviceShared>) -> Option<Device> {
        weak.upgrade().map(|shared| Device { shared })
    }

    pub(crate) fn adapter(&self) -> &AdapterConfig {
        &self.shared.adapter
    }

    pub(crate) fn account(&self) -> &Arc<MemoryAccount> {
        &self.shared.account
    }

    pub fn name(&self) -> &str {
        &self.shared.adapter.name
    }

    pub fn registry_id(&self) -> u64 {
        self.shared.adapter.registry_id
    }

    pub fn is_headless(&self) -> bool {
        self.shared.adapter.headless
    }

    pub fn is_low_power(&self) -> bool {
        self.shared.adapter.low_power
    }

    pub fn is_removable(&self) -> bool {
        self.shared.adapter.removable
    }

    /// Whether CPU and device share one memory pool.  On devices without it, managed
    /// resources keep a CPU copy that is reconciled explicitly.
    pub fn has_unified_memory(&self) -> bool {
        self.shared.adapter.unified_memory
    }

    pub fn max_threads_per_threadgroup(&self) -> Size {
        let n = self.shared.adapter.max_threads_per_threadgroup;
        Size::new(n, n, n)
    }

    pub fn max_buffer_length(&self) -> usize {
        self.shared.adapter.max_buffer_length
    }

    pub fn recommended_max_working_set_size(&self) -> usize {
        self.shared.account.budget()
    }

    /// Bytes currently held by this device's buffers and textures.
    pub fn current_allocated_size(&self) -> usize {
        self.shared.account.allocated()
    }

    pub fn supports_family(&self, family: GpuFamily) -> bool {
        self.shared.adapter.families.contains(&family)
    }

    /// A zero-filled buffer.
    pub fn new_buffer_with_length(
        &self,
        length: usize,
        options: ResourceOptions,
    ) -> Result<Buffer, ResourceError> {
        Buffer::new(self, length, options)
    }

    /// A buffer initialized with a copy of `bytes`.
    pub fn new_buffer_with_bytes(
        &self,
        bytes: &[u8],
        options: ResourceOptions,
    ) -> Result<Buffer, ResourceError> {
        Buffer::with_bytes(self, bytes, options)
    }

    pub fn new_texture_with_descriptor(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<Texture, ResourceError> {
        Texture::new(self, descriptor)
    }

    /**
    Compiles `source`.

    A failed compile is returned as data: the error carries the compiler's diagnostics,
    one `program_source:LINE:COL: error: ...` line per problem.
    */
    pub fn new_library_with_source(
        &self,
        source: &str,
        options: &CompileOptions,
    ) -> Result<Library, CompileError> {
        Library::new(self, source, options)
    }

    pub fn new_compute_pipeline_state_with_function(
        &self,
        function: &Function,
    ) -> Result<ComputePipelineState, PipelineError> {
        ComputePipelineState::new(self, function)
    }

    pub fn new_render_pipeline_state_with_descriptor(
        &self,
        descriptor: &RenderPipelineDescriptor,
    ) -> Result<RenderPipelineState, PipelineError> {
        RenderPipelineState::new(self, descriptor)
    }

    /// A new queue with its own timeline thread.
    pub fn new_command_queue(&self) -> CommandQueue {
        CommandQueue::new(self)
    }
}

/// The set of devices visible to the process.
#[derive(Debug)]
pub struct System {
    devices: Vec<Device>,
}

impl System {
    /// The process-wide system, configured from the environment on first use.
    pub fn global() -> &'static System {
        SYSTEM.get_or_init(|| {
            let config = SystemConfig::from_env().unwrap_or_else(|err| {
                logwise::warn_sync!(
                    "ignoring device configuration: {err}",
                    err = logwise::privacy::LogIt(&err)
                );
                SystemConfig::default()
            });
            System::with_config(config)
        })
    }

    /// An isolated system.  Its devices are distinct from the global ones.
    pub fn with_config(config: SystemConfig) -> System {
        System {
            devices: config.adapters.into_iter().map(Device::new).collect(),
        }
    }

    pub fn default_device(&self) -> Result<Device, DeviceError> {
        self.devices.first().cloned().ok_or(DeviceError::NoDevice)
    }

    pub fn devices(&self) -> Vec<Device> {
        self.devices.clone()
    }
}

/// The default device of the process-wide [`System`].
pub fn create_system_default_device() -> Result<Device, DeviceError> {
    System::global().default_device()
}

/// Every device of the process-wide [`System`], in adapter order.
pub fn copy_all_devices() -> Vec<Device> {
    System::global().devices()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;

    #[test]
    fn default_device_is_stable() {
        let a = create_system_default_device().unwrap();
        let b = create_system_default_device().unwrap();
        assert_eq!(a, b);
        assert_eq!(copy_all_devices().first(), Some(&a));
    }

    #[test]
    fn isolated_systems() {
        let system = System::with_config(SystemConfig::with_adapters(vec![
            AdapterConfig::integrated(),
            AdapterConfig::discrete(),
        ]));
        let devices = system.devices();
        assert_eq!(devices.len(), 2);
        assert_ne!(devices[0], devices[1]);
        assert!(devices[0].has_unified_memory());
        assert!(!devices[1].has_unified_memory());
        assert!(devices[1].supports_family(GpuFamily::MAC2));
        assert!(!devices[1].supports_family(GpuFamily::APPLE7));
        assert_eq!(
            System::with_config(SystemConfig::empty()).default_device(),
            Err(DeviceError::NoDevice)
        );
    }

    #[test]
    fn allocation_is_accounted() {
        let device = System::with_config(SystemConfig::default())
            .default_device()
            .unwrap();
        let before = device.current_allocated_size();
        let buffer = device
            .new_buffer_with_length(4096, ResourceOptions::STORAGE_MODE_SHARED)
            .unwrap();
        assert_eq!(device.current_allocated_size(), before + 4096);
        drop(buffer);
        assert_eq!(device.current_allocated_size(), before);
    }
}
