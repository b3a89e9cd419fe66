//! # Diagnostics
//!
//! The kernel does not render anything itself. Every [`Fault`] goes to a
//! [`Reporter`], which on a headless board usually means a log sink or a
//! diagnostic screen owned by someone else.

use crate::error::{Fault, Severity};

/// Receives faults detected at the trap boundary.
pub trait Reporter {
    fn report(&mut self, fault: &Fault);
}

/// Forwards faults to the `log` facade. Without an installed logger this
/// compiles down to nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&mut self, fault: &Fault) {
        match (fault.severity(), fault.code()) {
            (Severity::Invariant, _) => log::error!("{}: {}", fault.category(), fault),
            (Severity::Exception, Some(code)) => {
                log::warn!("{}: {} ({:#x})", fault.category(), fault, code)
            }
            (Severity::Exception, None) => log::warn!("{}: {}", fault.category(), fault),
        }
    }
}

/// Collects faults in order, for inspection by tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct Recorder {
    pub faults: std::vec::Vec<Fault>,
}

#[cfg(test)]
impl Reporter for Recorder {
    fn report(&mut self, fault: &Fault) {
        self.faults.push(*fault);
    }
}
