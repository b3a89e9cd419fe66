//! # Thread-side API
//!
//! Thin wrappers that turn each [`Request`] into an `svc 0`. These are what
//! application threads call; registry operations (spawn, destroy, create and
//! free) go through [`crate::kernel`] instead.
//!
//! None of these may be called from inside a critical section or from an
//! interrupt handler.

use crate::arch::cortex_m4;
use crate::semaphore::{CounterHandle, SemaphoreHandle};
use crate::syscall::Request;
use crate::thread::ThreadId;

#[inline]
fn trap(request: Request) -> u32 {
    let (code, args) = request.encode();
    cortex_m4::trap(code, args)
}

pub fn counter_increment(counter: CounterHandle) {
    trap(Request::CounterIncrement(counter));
}

/// Decrement, stopping at zero.
pub fn counter_decrement(counter: CounterHandle) {
    trap(Request::CounterDecrement(counter));
}

/// Current value; 0 for a handle that does not resolve.
pub fn counter_value(counter: CounterHandle) -> u32 {
    trap(Request::CounterValue(counter))
}

/// Let another thread in the same priority band run.
pub fn yield_now() {
    trap(Request::Yield);
}

pub fn start(thread: ThreadId) {
    trap(Request::Start(thread));
}

pub fn stop(thread: ThreadId) {
    trap(Request::Stop(thread));
}

/// Set a thread's priority, clamped to `[MIN_PRIORITY, MAX_PRIORITY]`.
pub fn set_priority(thread: ThreadId, priority: i32) {
    trap(Request::SetPriority(thread, priority));
}

pub fn current_id() -> ThreadId {
    ThreadId::from_raw(trap(Request::CurrentId))
}

/// Wait for `thread` to exit and return its exit value. Only the first
/// joiner sees the value; anyone else (and any unknown id) gets 0.
pub fn join(thread: ThreadId) -> u32 {
    trap(Request::Join(thread))
}

/// Finish the calling thread with `value`. Returning from the thread's
/// entry function does the same.
pub fn exit(value: u32) -> ! {
    trap(Request::Exit(value));
    // The kernel never resumes a finished thread.
    cortex_m::asm::udf()
}

/// Take a permit, blocking until one is available.
pub fn acquire(semaphore: SemaphoreHandle) {
    trap(Request::Acquire(semaphore));
}

pub fn release(semaphore: SemaphoreHandle) {
    trap(Request::Release(semaphore));
}
