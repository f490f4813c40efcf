// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The per-queue device timeline.

Every command queue owns one worker thread.  Work reaches it through a channel in ticket
order: a command buffer takes a ticket when it is enqueued (explicitly, or implicitly at
commit), and the [`Timeline`] releases submissions to the worker strictly by ticket, holding
back any that arrive early.  A ticket abandoned before commit is released empty so that later
buffers are not held back forever.
*/

use crate::sys::time::Instant;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle, ThreadId};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Order {
    next_ticket: u64,
    next_to_run: u64,
    parked: BTreeMap<u64, Option<Job>>,
}

pub(crate) struct Timeline {
    label: String,
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    order: Mutex<Order>,
    origin: Instant,
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl Timeline {
    pub(crate) fn new(label: String) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread_label = label.clone();
        let worker = thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                logwise::info_sync!("timeline {label} started", label = thread_label.clone());
                //exits once every sender is gone and the queue is drained
                while let Ok(job) = receiver.recv() {
                    job();
                }
                logwise::info_sync!("timeline {label} stopped", label = thread_label);
            })
            .expect("Failed to spawn timeline thread");
        Timeline {
            label,
            worker_id: worker.thread().id(),
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            order: Mutex::new(Order::default()),
            origin: Instant::now(),
        }
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    /// Seconds since the timeline started.
    pub(crate) fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    pub(crate) fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Reserves the next position in execution order.
    pub(crate) fn reserve(&self) -> u64 {
        let mut order = self.order.lock().unwrap();
        let ticket = order.next_ticket;
        order.next_ticket += 1;
        ticket
    }

    /// Hands in the work for `ticket`; `None` abandons the ticket.
    pub(crate) fn submit(&self, ticket: u64, job: Option<Job>) {
        let mut order = self.order.lock().unwrap();
        order.parked.insert(ticket, job);
        // release in ticket order while holding the lock, so the channel sees the same order
        loop {
            let next = order.next_to_run;
            let Some(job) = order.parked.remove(&next) else {
                break;
            };
            order.next_to_run += 1;
            if let Some(job) = job {
                self.send(job);
            }
        }
    }

    fn send(&self, job: Job) {
        let sender = self.sender.lock().unwrap();
        match sender.as_ref() {
            Some(sender) => {
                if let Err(mpsc::SendError(job)) = sender.send(job) {
                    logwise::warn_sync!(
                        "timeline {label} has stopped; running work inline",
                        label = self.label.clone()
                    );
                    job();
                }
            }
            None => {
                drop(sender);
                job();
            }
        }
    }
}

impl Drop for Timeline {
    fn drop(&mut self) {
        // closing the channel lets the worker drain what it has and exit
        self.sender.lock().unwrap().take();
        if let Some(worker) = self.worker.lock().unwrap().take() {
            // the last handle can be released by a completion handler on the worker itself
            if thread::current().id() != self.worker_id {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn runs_in_ticket_order() {
        let timeline = Timeline::new("test timeline".to_string());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = timeline.reserve();
        let b = timeline.reserve();
        let c = timeline.reserve();
        let record = |n: u64| -> Job {
            let seen = seen.clone();
            Box::new(move || seen.lock().unwrap().push(n))
        };
        timeline.submit(c, Some(record(c)));
        timeline.submit(b, None);
        assert!(seen.lock().unwrap().is_empty());
        timeline.submit(a, Some(record(a)));
        drop(timeline);
        assert_eq!(*seen.lock().unwrap(), [a, c]);
    }
}
