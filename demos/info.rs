// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Lists the devices the system exposes and what they support.
//!
//! ```bash
//! cargo run --example info
//! MTL_BINDINGS_ADAPTERS=integrated,discrete,external cargo run --example info
//! ```

use mtl_bindings::{GpuFamily, copy_all_devices};

const FAMILIES: [(&str, GpuFamily); 6] = [
    ("Apple4", GpuFamily::APPLE4),
    ("Apple7", GpuFamily::APPLE7),
    ("Mac2", GpuFamily::MAC2),
    ("Common1", GpuFamily::COMMON1),
    ("Common3", GpuFamily::COMMON3),
    ("Metal3", GpuFamily::METAL3),
];

fn main() {
    let devices = copy_all_devices();
    if devices.is_empty() {
        eprintln!("no devices");
        std::process::exit(1);
    }
    for device in devices {
        println!("{}", device.name());
        println!("  registry id:        {:#x}", device.registry_id());
        println!("  headless:           {}", device.is_headless());
        println!("  low power:          {}", device.is_low_power());
        println!("  removable:          {}", device.is_removable());
        println!("  unified memory:     {}", device.has_unified_memory());
        println!("  max threadgroup:    {}", device.max_threads_per_threadgroup());
        println!("  max buffer length:  {}", device.max_buffer_length());
        println!(
            "  working set:        {}",
            device.recommended_max_working_set_size()
        );
        let supported: Vec<&str> = FAMILIES
            .iter()
            .filter(|(_, family)| device.supports_family(*family))
            .map(|(name, _)| *name)
            .collect();
        println!("  families:           {}", supported.join(", "));
    }
}
