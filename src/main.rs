//! # threadcore Demo Firmware
//!
//! Runs two self-checks on the board:
//!
//! | Scenario  | Threads | What it checks                                      |
//! |-----------|---------|-----------------------------------------------------|
//! | counter   | 1       | a counter bump is visible, join returns `id + 1000` |
//! | semaphore | 5       | capacity 2 admits waiters in table-slot order       |
//!
//! In the semaphore scenario every thread measures how long its `acquire`
//! blocked. Scaled against the longest wait, two threads get in at once, two
//! wait one busy loop, and one waits two.
//!
//! Results accumulate in `PASSED` / `FAILED`; inspect them with a debugger.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::peripheral::DWT;
use cortex_m_rt::entry;
use panic_halt as _;

use threadcore::error::KernelError;
use threadcore::semaphore::{CounterHandle, SemaphoreHandle};
use threadcore::thread::ThreadId;
use threadcore::{api, kernel};

const WORKERS: usize = 5;
const BUSY_LOOP: u32 = 1_000_000;

static PASSED: AtomicU32 = AtomicU32::new(0);
static FAILED: AtomicU32 = AtomicU32::new(0);

fn check(ok: bool) {
    if ok {
        PASSED.fetch_add(1, Ordering::Relaxed);
    } else {
        FAILED.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Thread entry points
// ---------------------------------------------------------------------------

extern "C" fn counter_thread(counter: usize) -> usize {
    api::counter_increment(CounterHandle::from_raw(counter as u32));
    api::current_id().raw() as usize + 1000
}

/// Returns the number of cycles spent waiting for a permit.
extern "C" fn semaphore_thread(semaphore: usize) -> usize {
    let semaphore = SemaphoreHandle::from_raw(semaphore as u32);

    let begin = DWT::cycle_count();
    api::acquire(semaphore);
    let waited = DWT::cycle_count().wrapping_sub(begin);

    for i in 0..BUSY_LOOP {
        core::hint::black_box(i);
    }

    api::release(semaphore);
    waited as usize
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

fn counter_scenario() -> Result<(), KernelError> {
    let counter = kernel::counter_new(0)?;
    let thread = kernel::spawn("test", counter_thread, counter.raw() as usize)?;

    api::start(thread);
    let value = api::join(thread);
    check(value == thread.raw() + 1000);
    check(api::counter_value(counter) == 1);

    kernel::destroy(thread)?;
    kernel::counter_free(counter)
}

fn semaphore_scenario() -> Result<(), KernelError> {
    const NAMES: [&str; WORKERS] = ["test1", "test2", "test3", "test4", "test5"];

    let semaphore = kernel::semaphore_new(2)?;
    let mut threads = [ThreadId::from_raw(0); WORKERS];
    for (slot, name) in threads.iter_mut().zip(NAMES) {
        *slot = kernel::spawn(name, semaphore_thread, semaphore.raw() as usize)?;
    }

    for &thread in &threads {
        api::start(thread);
    }
    let mut waits = [0u32; WORKERS];
    for (wait, &thread) in waits.iter_mut().zip(&threads) {
        *wait = api::join(thread);
    }

    // round(wait / max * 2) in integer arithmetic.
    let max = u64::from(waits.iter().copied().max().unwrap_or(0).max(1));
    let mut buckets = [0u32; 4];
    for &wait in &waits {
        let bucket = (4 * u64::from(wait) + max) / (2 * max);
        buckets[(bucket as usize).min(3)] += 1;
    }
    check(buckets == [2, 2, 1, 0]);

    for &thread in &threads {
        kernel::destroy(thread)?;
    }
    kernel::semaphore_free(semaphore)
}

/// Body of the main thread.
extern "C" fn demo(_: usize) -> usize {
    check(counter_scenario().is_ok());
    check(semaphore_scenario().is_ok());

    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Firmware entry point. Initializes the kernel and hands the CPU to the
/// main thread. Does not return.
#[entry]
fn main() -> ! {
    // Take ownership of core peripherals
    let mut cp = cortex_m::Peripherals::take().unwrap();

    // Cycle counter for the wait measurements
    cp.DCB.enable_trace();
    cp.DWT.enable_cycle_counter();

    kernel::init().expect("kernel init failed");

    match kernel::start(cp, demo, 0) {
        Ok(never) => match never {},
        Err(err) => panic!("failed to start scheduler: {}", err),
    }
}
