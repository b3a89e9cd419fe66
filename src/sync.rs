//! # Synchronization Primitives
//!
//! Interrupt-safe critical section abstraction. Disabling interrupt delivery
//! is the only concurrency-control primitive in the system: there is one core,
//! so once interrupts are masked nothing else can touch kernel state.
//!
//! On the Cortex-M4 the implementation behind `critical_section` comes from
//! `cortex-m`'s `critical-section-single-core` feature (PRIMASK save, `cpsid i`,
//! restore). Host tests link the `std` implementation instead.

pub use critical_section::CriticalSection;

/// Execute a closure within a critical section (interrupts disabled).
///
/// Interrupts are disabled on entry and the previous PRIMASK state is
/// restored on exit, so nested sections are fine.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     // Access shared state safely
/// });
/// ```
///
/// Never issue a trap (`svc`) from inside the closure: with interrupts
/// masked the SVCall escalates to a HardFault.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}
