//! # Scheduler
//!
//! Strict priority-preemptive scheduling with round-robin inside a priority
//! band. The decision is a pure function of the thread table, the context
//! that was running and the kind of request; it neither mutates threads nor
//! knows anything about interrupts, so the same path serves cooperative
//! yields, blocking traps and the preemption timer.
//!
//! ## Algorithm
//!
//! 1. Resolve the current context to its thread.
//! 2. `Current` with a still-runnable thread: keep running it.
//! 3. Find the highest priority among runnable threads, leaving the current
//!    thread out for `Other`. If nothing else is runnable, fall back to the
//!    current thread's own priority (only ever the idle thread, in practice).
//! 4. Within that band, pick the first runnable thread after the current
//!    one in slot order, wrapping to the start of the table.

use crate::context::ContextId;
use crate::error::Fault;
use crate::thread::{Thread, ThreadTable};

/// What the caller of a scheduling pass is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Keep the current thread if it can still run.
    Current,
    /// Prefer any thread other than the current one.
    Other,
    /// Pick the best thread, the current one included.
    Any,
}

/// Choose the context to resume next.
///
/// Errors are invariant violations: the current context belongs to no thread,
/// or no thread at all is runnable (the idle thread should always be).
pub fn schedule(
    current: ContextId,
    mode: ScheduleMode,
    threads: &ThreadTable,
) -> Result<ContextId, Fault> {
    let current_thread = threads
        .find_by_context(current)
        .ok_or(Fault::UnknownContext)?;

    if mode == ScheduleMode::Current && current_thread.is_runnable() {
        return Ok(current);
    }

    let mut band: Option<i32> = None;
    let mut self_band: Option<i32> = None;
    for thread in threads.iter().filter(|t| t.is_runnable()) {
        if mode == ScheduleMode::Other && thread.id == current_thread.id {
            self_band = Some(thread.priority);
            continue;
        }
        band = band.max(Some(thread.priority));
    }
    let band = band.or(self_band).ok_or(Fault::NothingRunnable)?;

    let next = band_members(threads, band)
        .skip_while(|t| t.id != current_thread.id)
        .nth(1)
        .or_else(|| band_members(threads, band).next())
        .and_then(Thread::context_id);

    next.ok_or(Fault::NothingRunnable)
}

fn band_members(threads: &ThreadTable, band: i32) -> impl Iterator<Item = &Thread> + '_ {
    threads
        .iter()
        .filter(move |t| t.is_runnable() && t.priority == band)
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
