// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The command buffer lifecycle as seen from the outside.

use mtl_bindings::*;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use test_executors::async_test;

const KERNELS: &str = r#"
kernel void fill(device uint* out [[buffer(0)]], uint i [[thread_position_in_grid]]) {
    out[i] = 7u;
}
"#;

fn faulting_buffer(queue: &CommandQueue) -> CommandBuffer {
    let device = queue.device();
    let library = device
        .new_library_with_source(KERNELS, &CompileOptions::default())
        .unwrap();
    let state = device
        .new_compute_pipeline_state_with_function(&library.new_function_with_name("fill").unwrap())
        .unwrap();
    let out = device
        .new_buffer_with_length(4, ResourceOptions::STORAGE_MODE_SHARED)
        .unwrap();
    let command_buffer = queue.command_buffer();
    let mut encoder = command_buffer.compute_command_encoder().unwrap();
    encoder.set_compute_pipeline_state(&state).unwrap();
    encoder.set_buffer(&out, 0, 0).unwrap();
    // two threads, one element
    encoder
        .dispatch_threads(Size::new(2, 1, 1), Size::new(2, 1, 1))
        .unwrap();
    encoder.end_encoding().unwrap();
    command_buffer
}

#[test]
fn status_moves_forward_only() {
    let queue = create_system_default_device().unwrap().new_command_queue();
    let command_buffer = queue.command_buffer();
    command_buffer.set_label("frame 1");
    assert_eq!(command_buffer.label(), "frame 1");
    assert_eq!(command_buffer.status(), CommandBufferStatus::NotEnqueued);
    assert!(command_buffer.gpu_start_time().is_none());

    command_buffer.enqueue().unwrap();
    assert_eq!(command_buffer.status(), CommandBufferStatus::Enqueued);
    command_buffer.commit().unwrap();
    command_buffer.wait_until_completed().unwrap();
    assert_eq!(command_buffer.status(), CommandBufferStatus::Completed);
    assert!(command_buffer.error().is_none());
    assert_eq!(command_buffer.commit(), Err(UsageError::AlreadyCommitted));
    assert_eq!(command_buffer.enqueue(), Err(UsageError::AlreadyCommitted));
    // waiting again returns at once
    command_buffer.wait_until_completed().unwrap();
    assert_eq!(command_buffer.command_queue().label(), queue.label());
}

#[test]
fn waiting_before_commit_is_a_usage_error() {
    let queue = create_system_default_device().unwrap().new_command_queue();
    let command_buffer = queue.command_buffer();
    assert_eq!(
        command_buffer.wait_until_completed(),
        Err(WaitError::Usage(UsageError::NotCommitted))
    );
    assert_eq!(command_buffer.status(), CommandBufferStatus::NotEnqueued);
}

#[test]
fn handlers_see_the_final_status() {
    let queue = create_system_default_device().unwrap().new_command_queue();
    let command_buffer = faulting_buffer(&queue);
    let (sender, receiver) = mpsc::channel();
    command_buffer.add_completed_handler(move |status| sender.send(status).unwrap());
    command_buffer.commit().unwrap();
    assert_eq!(receiver.recv().unwrap(), CommandBufferStatus::Error);
    assert!(command_buffer.wait_until_completed().is_err());
    assert!(command_buffer.error().is_some());

    // already finished: runs right away, on this thread
    let seen = Arc::new(Mutex::new(None));
    let thread = std::thread::current().id();
    let record = seen.clone();
    command_buffer.add_completed_handler(move |status| {
        *record.lock().unwrap() = Some((status, std::thread::current().id()));
    });
    assert_eq!(
        *seen.lock().unwrap(),
        Some((CommandBufferStatus::Error, thread))
    );
}

#[test]
fn handlers_run_in_registration_order() {
    let queue = create_system_default_device().unwrap().new_command_queue();
    let command_buffer = queue.command_buffer();
    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3 {
        let order = order.clone();
        command_buffer.add_completed_handler(move |_| order.lock().unwrap().push(i));
    }
    command_buffer.commit().unwrap();
    command_buffer.wait_until_completed().unwrap();
    assert_eq!(*order.lock().unwrap(), [0, 1, 2]);
}

#[test]
fn waiting_from_a_handler_does_not_deadlock() {
    let queue = create_system_default_device().unwrap().new_command_queue();
    let first = queue.command_buffer();
    let second = queue.command_buffer();
    let (sender, receiver) = mpsc::channel();
    let (gate, opened) = mpsc::channel::<()>();
    let this = first.clone();
    let later = second.clone();
    first.add_completed_handler(move |_| {
        // hold until `second` is committed too
        opened.recv().unwrap();
        sender
            .send((this.wait_until_completed(), later.wait_until_completed()))
            .unwrap();
    });
    first.commit().unwrap();
    second.commit().unwrap();
    gate.send(()).unwrap();
    let (own, next) = receiver
        .recv_timeout(std::time::Duration::from_secs(10))
        .unwrap();
    assert_eq!(own, Err(WaitError::Usage(UsageError::WaitOnTimeline)));
    assert_eq!(next, Err(WaitError::Usage(UsageError::WaitOnTimeline)));
    first.wait_until_completed().unwrap();
    second.wait_until_completed().unwrap();
}

#[test]
fn protocol_violations_change_nothing() {
    let queue = create_system_default_device().unwrap().new_command_queue();
    let command_buffer = queue.command_buffer();
    let mut compute = command_buffer.compute_command_encoder().unwrap();
    assert_eq!(
        command_buffer.blit_command_encoder().unwrap_err(),
        UsageError::EncoderAlreadyOpen
    );
    assert_eq!(command_buffer.commit(), Err(UsageError::EncoderStillOpen));
    assert_eq!(command_buffer.status(), CommandBufferStatus::NotEnqueued);
    compute.end_encoding().unwrap();
    assert_eq!(compute.end_encoding(), Err(UsageError::EncoderEnded));
    assert_eq!(
        compute.set_bytes(&[0; 4], 0),
        Err(UsageError::EncoderEnded)
    );
    command_buffer.commit().unwrap();
    command_buffer.wait_until_completed().unwrap();
}

#[async_test]
async fn completion_can_be_awaited() {
    let queue = create_system_default_device().unwrap().new_command_queue();
    let ok = queue.command_buffer();
    let failing = faulting_buffer(&queue);
    let ok_done = ok.completed();
    let failing_done = failing.completed();
    ok.commit().unwrap();
    failing.commit().unwrap();
    assert_eq!(ok_done.await, CommandBufferStatus::Completed);
    assert_eq!(failing_done.await, CommandBufferStatus::Error);
    // after the fact resolves immediately
    assert_eq!(ok.completed().await, CommandBufferStatus::Completed);
}

#[async_test]
async fn dropped_without_commit_resolves() {
    let queue = create_system_default_device().unwrap().new_command_queue();
    let command_buffer = queue.command_buffer();
    command_buffer.enqueue().unwrap();
    let done = command_buffer.completed();
    drop(command_buffer);
    assert_eq!(done.await, CommandBufferStatus::Enqueued);

    // the abandoned slot does not hold up later work
    let next = queue.command_buffer();
    next.commit().unwrap();
    assert_eq!(next.completed().await, CommandBufferStatus::Completed);
}
