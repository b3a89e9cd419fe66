//! # Errors
//!
//! Two kinds of failure exist in the kernel:
//!
//! - [`KernelError`] is returned as a `Result` from the explicit registry calls
//!   (spawn, destroy, semaphore/counter create and free). The caller decides
//!   what to do with it.
//! - [`Fault`] describes an invariant violation or a caller misuse detected
//!   inside a trap or a scheduling pass. Faults are never handed back to user
//!   code; the trap boundary passes them to the [`Reporter`](crate::diag::Reporter)
//!   and carries on with the best context it has.

use thiserror::Error;

/// Failure of an explicit registry operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("thread table is full")]
    ThreadTableFull,
    #[error("no free thread stack")]
    StackPoolExhausted,
    #[error("semaphore table is full")]
    SemaphoreTableFull,
    #[error("counter table is full")]
    CounterTableFull,
    #[error("no thread with id {0}")]
    UnknownThread(u32),
    #[error("no semaphore with handle {0:#010x}")]
    UnknownSemaphore(u32),
    #[error("no counter with handle {0:#010x}")]
    UnknownCounter(u32),
    #[error("thread {0} is currently executing")]
    ThreadIsCurrent(u32),
    #[error("the idle thread cannot be destroyed")]
    IdleThread,
    #[error("other threads are still waiting on this object")]
    HasWaiters,
    #[error("main thread is already registered")]
    MainAlreadyRegistered,
}

/// How bad a [`Fault`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// A state that correct operation can never reach.
    Invariant,
    /// Caller misuse; the trap still completes.
    Exception,
}

/// A problem detected while servicing a trap or choosing the next context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("cannot locate current thread to schedule")]
    UnknownContext,
    #[error("cannot locate new thread to schedule")]
    NothingRunnable,
    #[error("cannot locate thread object")]
    CallerNotFound { syscall: u32 },
    #[error("unrecognized syscall")]
    UnknownSyscall(u32),
    #[error("attempt acquire uninitialized semaphore")]
    AcquireUninitialized(u32),
    #[error("attempt release uninitialized semaphore")]
    ReleaseUninitialized(u32),
    #[error("attempt release unowned semaphore")]
    OverRelease(u32),
}

impl Fault {
    pub fn severity(&self) -> Severity {
        match self {
            Fault::UnknownContext | Fault::NothingRunnable => Severity::Invariant,
            _ => Severity::Exception,
        }
    }

    /// Short category label, as shown on a diagnostic screen.
    pub fn category(&self) -> &'static str {
        match self {
            Fault::UnknownContext | Fault::NothingRunnable => "scheduling failure",
            _ => "syscall exception",
        }
    }

    /// Numeric detail: the offending syscall code or semaphore handle.
    pub fn code(&self) -> Option<u32> {
        match *self {
            Fault::UnknownContext | Fault::NothingRunnable => None,
            Fault::CallerNotFound { syscall } => Some(syscall),
            Fault::UnknownSyscall(code)
            | Fault::AcquireUninitialized(code)
            | Fault::ReleaseUninitialized(code)
            | Fault::OverRelease(code) => Some(code),
        }
    }
}
