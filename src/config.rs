//! # Configuration
//!
//! Compile-time constants governing the registries and the scheduler.
//! All limits are fixed at compile time. There is no dynamic allocation, and
//! none of these are negotiable at runtime.

/// Maximum number of threads the registry can hold simultaneously,
/// including the idle thread and the main thread.
pub const MAX_THREADS: usize = 16;

/// Maximum number of live semaphores.
pub const MAX_SEMAPHORES: usize = 16;

/// Maximum number of live cross-thread counters.
pub const MAX_COUNTERS: usize = 16;

/// Stack reserved for every spawned thread (and the idle thread), in bytes.
/// Must cover the deepest call chain plus the largest exception frame
/// (26 words with the FPU active) plus the software-saved frame.
pub const THREAD_STACK_SIZE: usize = 4096;

/// Stack handed to the main thread by the architecture port at start-up.
pub const MAIN_STACK_SIZE: usize = 8192;

/// Longest thread name kept by the registry; longer names are truncated.
pub const THREAD_NAME_LEN: usize = 63;

/// Lowest priority a thread can be given through the priority syscall.
pub const MIN_PRIORITY: i32 = -512;

/// Highest priority a thread can be given through the priority syscall.
pub const MAX_PRIORITY: i32 = 512;

/// Priority of freshly spawned threads and of the main thread.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Priority of the idle thread. Sits below `MIN_PRIORITY` so no clamped
/// priority can ever share its band.
pub const IDLE_PRIORITY: i32 = i32::MIN;

/// Preemption timer frequency in Hz. Every tick forces an `ANY` reschedule.
pub const PREEMPTION_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;
