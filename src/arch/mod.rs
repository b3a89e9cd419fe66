//! # Architecture Abstraction Layer
//!
//! Everything that touches real CPU state lives behind this boundary. The
//! Cortex-M4 port is the only one; on any other target (host tests) the two
//! hooks the portable code needs fall back to inert stand-ins.

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(target_arch = "arm")]
pub use cortex_m4::{thread_return_address, wait_for_interrupt};

/// Address a thread's entry function returns to. Off target there is
/// nothing to return to.
#[cfg(not(target_arch = "arm"))]
pub fn thread_return_address() -> u32 {
    0
}

#[cfg(not(target_arch = "arm"))]
pub fn wait_for_interrupt() {
    core::hint::spin_loop();
}
