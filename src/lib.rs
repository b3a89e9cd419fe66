//! # threadcore
//!
//! Thread scheduler, counting semaphores, cross-thread counters and the
//! trap-driven syscall dispatcher of a bare-metal runtime for a single-core
//! ARM Cortex-M4F.
//!
//! ## Overview
//!
//! One physical CPU is shared among up to [`MAX_THREADS`](config::MAX_THREADS)
//! logical threads. Scheduling is strict priority with round robin inside a
//! priority band: a thread never runs while a higher-priority thread is
//! runnable, and equal-priority threads take turns. Threads give up the CPU at
//! well-defined points only:
//!
//! - a trap that yields, blocks (join, semaphore acquire), exits, or changes
//!   some thread's state or priority;
//! - the periodic preemption timer, which time-slices equal-priority threads
//!   that never cooperate.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                  Application Threads                    │
//! ├───────────────────────────┬────────────────────────────┤
//! │  Thread-side API (api.rs) │  Registry API (kernel.rs)   │
//! │  join · acquire · yield   │  spawn · destroy · *_new    │
//! ├───────────────────────────┴────────────────────────────┤
//! │              Trap Dispatcher (syscall.rs)               │
//! │        Request decode · wait/wake state machine         │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │  Thread Registry   │  Semaphores and   │
//! │  scheduler.rs│  thread.rs         │  Counters         │
//! │  ─ schedule()│  stack.rs          │  semaphore.rs     │
//! │              │                    │  arena.rs         │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │   Context (context.rs) · Errors and Diagnostics         │
//! ├────────────────────────────────────────────────────────┤
//! │            Arch Port (arch/cortex_m4.rs)                │
//! │    SVCall · SysTick · PendSV · trampoline · start-up    │
//! ├────────────────────────────────────────────────────────┤
//! │         ARM Cortex-M4F Hardware (Thumb-2)               │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: all state is statically allocated
//! - **Fixed tables**: threads, semaphores and counters live in fixed-size
//!   slot arrays; semaphores and counters are addressed by generation-checked
//!   handles
//! - **Stack pool**: one `[u8; THREAD_STACK_SIZE]` per thread slot, in a
//!   static of its own; the kernel only tracks which slots are taken
//! - **Critical sections**: every kernel access goes through
//!   `critical_section::with`
//!
//! Everything above the arch port is plain Rust and is unit-tested on the
//! host.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod sync;
pub mod error;
pub mod diag;
pub mod context;
pub mod arena;
pub mod semaphore;
pub mod stack;
pub mod thread;
pub mod scheduler;
pub mod syscall;
pub mod kernel;
pub mod arch;
#[cfg(target_arch = "arm")]
pub mod api;

#[cfg(test)]
mod sim;
