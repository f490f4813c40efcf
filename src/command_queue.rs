// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Command queues.

Each queue owns a timeline thread.  Command buffers from one queue execute there one at a
time, in the order they were submitted (commit order, or the order reserved by
[`crate::CommandBuffer::enqueue`]).  Separate queues run independently.
*/

use crate::command_buffer::CommandBuffer;
use crate::device::Device;
use crate::imp::Timeline;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_QUEUE: AtomicU64 = AtomicU64::new(0);

pub(crate) struct QueueShared {
    pub(crate) device: Device,
    pub(crate) timeline: Timeline,
}

#[derive(Clone)]
pub struct CommandQueue {
    shared: Arc<QueueShared>,
}

impl Debug for CommandQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("label", &self.label())
            .finish()
    }
}

impl PartialEq for CommandQueue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl CommandQueue {
    pub(crate) fn new(device: &Device) -> Self {
        let label = format!(
            "mtl_bindings queue {}",
            NEXT_QUEUE.fetch_add(1, Ordering::Relaxed)
        );
        logwise::info_sync!(
            "created {label} on {device}",
            label = label.clone(),
            device = device.name().to_string()
        );
        CommandQueue {
            shared: Arc::new(QueueShared {
                device: device.clone(),
                timeline: Timeline::new(label),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<QueueShared> {
        &self.shared
    }

    pub(crate) fn from_shared(shared: Arc<QueueShared>) -> Self {
        CommandQueue { shared }
    }

    /// Name of the queue's timeline thread.
    pub fn label(&self) -> &str {
        self.shared.timeline.label()
    }

    pub fn device(&self) -> Device {
        self.shared.device.clone()
    }

    /// A new command buffer, ready to record.
    pub fn command_buffer(&self) -> CommandBuffer {
        CommandBuffer::new(self.shared.clone())
    }
}
