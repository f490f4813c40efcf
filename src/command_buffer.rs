// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Command buffers.

A command buffer records passes through one encoder at a time and then executes them on its
queue's timeline:

```text
Recording ──commit──▶ Committed ──▶ Completed
                                 └─▶ Error
```

Protocol violations are rejected synchronously with a [`UsageError`] and leave the buffer
unchanged.  Faults raised while the device runs the passes are reported at completion, via
[`CommandBuffer::wait_until_completed`], [`CommandBuffer::error`] or
[`CommandBuffer::completed`].
*/

use crate::command_encoder::{BlitCommandEncoder, ComputeCommandEncoder, RenderCommandEncoder};
use crate::command_queue::{CommandQueue, QueueShared};
use crate::device::Device;
use crate::drawable::Drawable;
use crate::error::{ExecutionError, UsageError, WaitError};
use crate::imp::{self, Pass, RenderTarget};
use crate::resource::Texture;
use crate::types::{ClearColor, LoadAction, StoreAction};
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};

/// Externally visible state, numbered as the native enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandBufferStatus {
    NotEnqueued = 0,
    Enqueued = 1,
    Committed = 2,
    Completed = 4,
    Error = 5,
}

impl CommandBufferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandBufferStatus::Completed | CommandBufferStatus::Error)
    }
}

/// Color attachment 0 of a render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorAttachment {
    pub texture: Option<Texture>,
    pub load_action: LoadAction,
    pub store_action: StoreAction,
    pub clear_color: ClearColor,
}

impl Default for ColorAttachment {
    fn default() -> Self {
        ColorAttachment {
            texture: None,
            load_action: LoadAction::DontCare,
            store_action: StoreAction::Store,
            clear_color: ClearColor::new(0.0, 0.0, 0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderPassDescriptor {
    pub color_attachment0: ColorAttachment,
}

type CompletedHandler = Box<dyn FnOnce(CommandBufferStatus) + Send + 'static>;

#[derive(Debug)]
enum Phase {
    Recording { encoder: Option<u64> },
    Committed,
    Completed,
    Error(ExecutionError),
}

struct State {
    phase: Phase,
    label: String,
    ticket: Option<u64>,
    passes: Vec<Pass>,
    next_encoder: u64,
    drawables: Vec<Arc<dyn Drawable>>,
    handlers: Vec<CompletedHandler>,
    waiters: Vec<r#continue::Sender<CommandBufferStatus>>,
    /// Handlers and drawables have run; waiters may return.
    settled: bool,
    gpu_start_time: Option<f64>,
    gpu_end_time: Option<f64>,
}

impl State {
    fn status(&self) -> CommandBufferStatus {
        match self.phase {
            Phase::Recording { .. } if self.ticket.is_some() => CommandBufferStatus::Enqueued,
            Phase::Recording { .. } => CommandBufferStatus::NotEnqueued,
            Phase::Committed => CommandBufferStatus::Committed,
            Phase::Completed => CommandBufferStatus::Completed,
            Phase::Error(_) => CommandBufferStatus::Error,
        }
    }
}

pub(crate) struct CommandBufferShared {
    queue: Arc<QueueShared>,
    state: Mutex<State>,
    settled: Condvar,
}

impl CommandBufferShared {
    pub(crate) fn device_id(&self) -> u64 {
        self.queue.device.id()
    }

    /**
    Opens an encoder if the buffer is recording with none open.

    `validate` runs under the state lock after the state checks pass, so a rejected open
    changes nothing.
    */
    pub(crate) fn open_encoder(
        &self,
        validate: impl FnOnce() -> Result<(), UsageError>,
    ) -> Result<u64, UsageError> {
        let mut state = self.state.lock().unwrap();
        match state.phase {
            Phase::Recording { encoder: None } => {}
            Phase::Recording { encoder: Some(_) } => {
                return Err(UsageError::EncoderAlreadyOpen.logged());
            }
            _ => return Err(UsageError::AlreadyCommitted.logged()),
        }
        validate().map_err(UsageError::logged)?;
        let id = state.next_encoder;
        state.next_encoder += 1;
        state.phase = Phase::Recording { encoder: Some(id) };
        Ok(id)
    }

    /// Hands in the pass of encoder `id` and closes it.
    pub(crate) fn close_encoder(&self, id: u64, pass: Pass) -> Result<(), UsageError> {
        let mut state = self.state.lock().unwrap();
        match state.phase {
            Phase::Recording { encoder: Some(open) } if open == id => {
                state.passes.push(pass);
                state.phase = Phase::Recording { encoder: None };
                Ok(())
            }
            _ => Err(UsageError::EncoderEnded.logged()),
        }
    }

    fn execute(self: Arc<Self>, passes: Vec<Pass>) {
        let timeline = &self.queue.timeline;
        let start = timeline.now();
        let perf = logwise::perfwarn_begin!("command buffer execution");
        let result = passes.iter().try_for_each(run_guarded);
        drop(perf);
        let end = timeline.now();
        if let Err(err) = &result {
            logwise::error_sync!(
                "command buffer failed: {err}",
                err = logwise::privacy::LogIt(err)
            );
        }
        //dropping the passes here releases the resources they retained
        drop(passes);
        self.finish(result, start, end);
    }

    fn finish(&self, result: Result<(), ExecutionError>, start: f64, end: f64) {
        let (status, drawables, handlers) = {
            let mut state = self.state.lock().unwrap();
            state.phase = match result {
                Ok(()) => Phase::Completed,
                Err(err) => Phase::Error(err),
            };
            state.gpu_start_time = Some(start);
            state.gpu_end_time = Some(end);
            (
                state.status(),
                std::mem::take(&mut state.drawables),
                std::mem::take(&mut state.handlers),
            )
        };
        if status == CommandBufferStatus::Completed {
            for drawable in drawables {
                drawable.present();
            }
        }
        for handler in handlers {
            handler(status);
        }
        let waiters = {
            let mut state = self.state.lock().unwrap();
            state.settled = true;
            std::mem::take(&mut state.waiters)
        };
        self.settled.notify_all();
        for waiter in waiters {
            waiter.send(status);
        }
    }
}

/// Runs one pass, turning a panic in the executor into a fault of that pass.
fn run_guarded(pass: &Pass) -> Result<(), ExecutionError> {
    panic::catch_unwind(AssertUnwindSafe(|| imp::run_pass(pass))).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(ExecutionError {
            pass: pass.label.clone(),
            message: format!("executor panicked: {message}"),
        })
    })
}

impl Drop for CommandBufferShared {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let status = state.status();
        if let (Phase::Recording { .. }, Some(ticket)) = (&state.phase, state.ticket.take()) {
            //let later buffers on the queue run
            self.queue.timeline.submit(ticket, None);
        }
        for waiter in state.waiters.drain(..) {
            waiter.send(status);
        }
    }
}

/// One unit of recorded GPU work.  Clones refer to the same buffer.
#[derive(Clone)]
pub struct CommandBuffer {
    shared: Arc<CommandBufferShared>,
}

impl Debug for CommandBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("label", &self.label())
            .field("status", &self.status())
            .finish()
    }
}

impl PartialEq for CommandBuffer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl CommandBuffer {
    pub(crate) fn new(queue: Arc<QueueShared>) -> Self {
        CommandBuffer {
            shared: Arc::new(CommandBufferShared {
                queue,
                state: Mutex::new(State {
                    phase: Phase::Recording { encoder: None },
                    label: String::new(),
                    ticket: None,
                    passes: Vec::new(),
                    next_encoder: 0,
                    drawables: Vec::new(),
                    handlers: Vec::new(),
                    waiters: Vec::new(),
                    settled: false,
                    gpu_start_time: None,
                    gpu_end_time: None,
                }),
                settled: Condvar::new(),
            }),
        }
    }

    pub fn device(&self) -> Device {
        self.shared.queue.device.clone()
    }

    pub fn command_queue(&self) -> CommandQueue {
        CommandQueue::from_shared(self.shared.queue.clone())
    }

    pub fn label(&self) -> String {
        self.shared.state.lock().unwrap().label.clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        self.shared.state.lock().unwrap().label = label.into();
    }

    pub fn status(&self) -> CommandBufferStatus {
        self.shared.state.lock().unwrap().status()
    }

    /// The fault that stopped execution, once the buffer is in the error state.
    pub fn error(&self) -> Option<ExecutionError> {
        match &self.shared.state.lock().unwrap().phase {
            Phase::Error(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Seconds on the queue's timeline when execution began.  `None` until completion.
    pub fn gpu_start_time(&self) -> Option<f64> {
        self.shared.state.lock().unwrap().gpu_start_time
    }

    pub fn gpu_end_time(&self) -> Option<f64> {
        self.shared.state.lock().unwrap().gpu_end_time
    }

    pub fn compute_command_encoder(&self) -> Result<ComputeCommandEncoder, UsageError> {
        let id = self.shared.open_encoder(|| Ok(()))?;
        Ok(ComputeCommandEncoder::new(self.shared.clone(), id))
    }

    pub fn blit_command_encoder(&self) -> Result<BlitCommandEncoder, UsageError> {
        let id = self.shared.open_encoder(|| Ok(()))?;
        Ok(BlitCommandEncoder::new(self.shared.clone(), id))
    }

    /// Opens a render encoder drawing into the descriptor's color attachment 0.
    pub fn render_command_encoder_with_descriptor(
        &self,
        descriptor: &RenderPassDescriptor,
    ) -> Result<RenderCommandEncoder, UsageError> {
        let attachment = &descriptor.color_attachment0;
        let mut target = None;
        let id = self.shared.open_encoder(|| {
            let texture = attachment
                .texture
                .as_ref()
                .ok_or(UsageError::MissingRenderTarget)?;
            if texture.device_id() != self.shared.device_id() {
                return Err(UsageError::CrossDevice("render target texture"));
            }
            if !texture.pixel_format().is_renderable() {
                return Err(UsageError::UnrenderableAttachment(texture.pixel_format()));
            }
            target = Some(texture.clone());
            Ok(())
        })?;
        let Some(texture) = target else {
            return Err(UsageError::MissingRenderTarget);
        };
        let format = texture.pixel_format();
        Ok(RenderCommandEncoder::new(
            self.shared.clone(),
            id,
            RenderTarget {
                texture: texture.imp().clone(),
                load: attachment.load_action,
                store: attachment.store_action,
                clear: attachment.clear_color,
            },
            format,
        ))
    }

    /// Reserves this buffer's place in its queue's execution order.  Calling it again has
    /// no effect.
    pub fn enqueue(&self) -> Result<(), UsageError> {
        let mut state = self.shared.state.lock().unwrap();
        if !matches!(state.phase, Phase::Recording { .. }) {
            return Err(UsageError::AlreadyCommitted.logged());
        }
        if state.ticket.is_none() {
            state.ticket = Some(self.shared.queue.timeline.reserve());
        }
        Ok(())
    }

    /// Presents `drawable` once the buffer completes without error.
    pub fn present_drawable(&self, drawable: Arc<dyn Drawable>) -> Result<(), UsageError> {
        let mut state = self.shared.state.lock().unwrap();
        if !matches!(state.phase, Phase::Recording { .. }) {
            return Err(UsageError::AlreadyCommitted.logged());
        }
        state.drawables.push(drawable);
        Ok(())
    }

    /**
    Runs `handler` with the final status on the timeline thread once the buffer finishes.

    If the buffer has already finished, `handler` runs immediately on the calling thread.
    */
    pub fn add_completed_handler<F>(&self, handler: F)
    where
        F: FnOnce(CommandBufferStatus) + Send + 'static,
    {
        let mut state = self.shared.state.lock().unwrap();
        let status = state.status();
        if status.is_terminal() {
            drop(state);
            handler(status);
        } else {
            state.handlers.push(Box::new(handler));
        }
    }

    /// Submits the recorded passes for execution.
    pub fn commit(&self) -> Result<(), UsageError> {
        let (ticket, passes, label) = {
            let mut state = self.shared.state.lock().unwrap();
            match state.phase {
                Phase::Recording { encoder: None } => {}
                Phase::Recording { encoder: Some(_) } => {
                    return Err(UsageError::EncoderStillOpen.logged());
                }
                _ => return Err(UsageError::AlreadyCommitted.logged()),
            }
            state.phase = Phase::Committed;
            let ticket = match state.ticket.take() {
                Some(ticket) => ticket,
                None => self.shared.queue.timeline.reserve(),
            };
            (ticket, std::mem::take(&mut state.passes), state.label.clone())
        };
        logwise::trace_sync!(
            "committing command buffer {label} with {count} passes",
            label = label,
            count = passes.len()
        );
        let shared = self.shared.clone();
        self.shared
            .queue
            .timeline
            .submit(ticket, Some(Box::new(move || shared.execute(passes))));
        Ok(())
    }

    /**
    Blocks until the buffer has finished executing.

    Returns `Err(Usage(NotCommitted))` immediately for a buffer that was never committed,
    and the execution fault for a buffer that ended in error.  From a completion handler on
    the same queue, waiting for a buffer that has not finished returns
    `Err(Usage(WaitOnTimeline))`, since the buffer can only finish on that thread.
    */
    pub fn wait_until_completed(&self) -> Result<(), WaitError> {
        let mut state = self.shared.state.lock().unwrap();
        if matches!(state.phase, Phase::Recording { .. }) {
            return Err(UsageError::NotCommitted.logged().into());
        }
        if !state.settled && self.shared.queue.timeline.is_worker_thread() {
            return Err(UsageError::WaitOnTimeline.logged().into());
        }
        while !state.settled {
            state = self.shared.settled.wait(state).unwrap();
        }
        match &state.phase {
            Phase::Error(err) => Err(WaitError::Execution(err.clone())),
            _ => Ok(()),
        }
    }

    /**
    Resolves to the final status once the buffer has finished.

    A buffer dropped before it was committed resolves to the status it had at that point.
    */
    pub fn completed(&self) -> impl Future<Output = CommandBufferStatus> + use<> {
        let (sender, future) = r#continue::continuation();
        let mut state = self.shared.state.lock().unwrap();
        if state.settled {
            let status = state.status();
            drop(state);
            sender.send(status);
        } else {
            state.waiters.push(sender);
        }
        future
    }
}
