//! # Kernel
//!
//! Owns every registry (threads, stack slots, semaphores, counters), tracks which
//! context is on the CPU, and exposes the explicit registry API. The trap
//! dispatcher lives in [`crate::syscall`] and the scheduling decision in
//! [`crate::scheduler`]; both operate on the [`Kernel`] defined here.
//!
//! The system-wide instance is a `static` behind a critical-section mutex.
//! The free functions at the bottom of this module are the only way to reach
//! it, and each one runs with interrupts disabled.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()            ← Empty registries, idle thread
//!         ├─► kernel::counter_new() ... ← Optional setup
//!         └─► kernel::start(main_fn)    ← Never returns
//!               ├─► Configure SysTick (preemption timer)
//!               ├─► Set handler priorities, disable lazy FP stacking
//!               ├─► Register the main thread on its reserved stack
//!               └─► Enter main_fn in Thread mode on the PSP
//! ```

use core::cell::RefCell;

use critical_section::Mutex;

use crate::arena::Arena;
use crate::config::{DEFAULT_PRIORITY, IDLE_PRIORITY, MAX_COUNTERS, MAX_SEMAPHORES};
use crate::context::{Context, ContextId, ThreadEntry};
use crate::diag::{LogReporter, Reporter};
use crate::error::{Fault, KernelError};
use crate::scheduler::{self, ScheduleMode};
use crate::semaphore::{Counter, CounterHandle, Semaphore, SemaphoreHandle};
use crate::stack::StackPool;
use crate::sync;
use crate::thread::{Thread, ThreadId, ThreadInfo, ThreadState, ThreadTable, WaitTarget};

/// Classification an interrupt source passes along with the interrupted
/// context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    /// The periodic preemption timer. Always reschedules.
    Preemption,
    /// An interrupt the scheduler does not care about.
    Ignorable,
    /// Something happened that should let other threads run.
    Wakeup,
}

impl InterruptSource {
    fn mode(self) -> ScheduleMode {
        match self {
            InterruptSource::Preemption => ScheduleMode::Any,
            InterruptSource::Ignorable => ScheduleMode::Current,
            InterruptSource::Wakeup => ScheduleMode::Other,
        }
    }
}

/// Body of the idle thread.
extern "C" fn idle(_: usize) -> usize {
    loop {
        crate::arch::wait_for_interrupt();
    }
}

/// All scheduler and synchronization state.
pub struct Kernel<R = LogReporter> {
    pub(crate) threads: ThreadTable,
    stacks: StackPool,
    pub(crate) idle: Option<ThreadId>,
    pub(crate) semaphores: Arena<Semaphore, MAX_SEMAPHORES>,
    pub(crate) counters: Arena<Counter, MAX_COUNTERS>,
    running: Option<ContextId>,
    reporter: R,
}

impl Kernel<LogReporter> {
    pub const fn new() -> Self {
        Self::with_reporter(LogReporter)
    }
}

impl Default for Kernel<LogReporter> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Reporter> Kernel<R> {
    pub const fn with_reporter(reporter: R) -> Self {
        Self {
            threads: ThreadTable::new(),
            stacks: StackPool::new(),
            idle: None,
            semaphores: Arena::new(),
            counters: Arena::new(),
            running: None,
            reporter,
        }
    }

    /// Start from empty registries and create the idle thread.
    pub fn init(&mut self) -> Result<ThreadId, KernelError> {
        self.reset();
        let id = self.spawn_with_priority("idle", IDLE_PRIORITY, idle, 0)?;
        if let Some(thread) = self.threads.find_by_id_mut(id) {
            thread.state = ThreadState::Running;
        }
        self.idle = Some(id);
        Ok(id)
    }

    /// Tear down every counter, semaphore and thread.
    pub fn reset(&mut self) {
        self.counters.clear();
        self.semaphores.clear();
        self.threads.clear();
        self.stacks.release_all();
        self.idle = None;
        self.running = None;
    }

    /// Wrap the context the system booted on as the `Running` main thread.
    /// Its stack is not owned by the kernel and is never released.
    pub fn register_main(&mut self, context: Context) -> Result<ThreadId, KernelError> {
        if self.threads.iter().any(|thread| thread.main) {
            return Err(KernelError::MainAlreadyRegistered);
        }

        let id = self.threads.create("main", DEFAULT_PRIORITY)?;
        let context_id = context.id();
        if let Some(thread) = self.threads.find_by_id_mut(id) {
            thread.context = Some(context);
            thread.state = ThreadState::Running;
            thread.main = true;
        }
        self.running = Some(context_id);
        log::debug!("registered main thread {}", id.raw());
        Ok(id)
    }

    /// Create a `Stopped` thread at the default priority that will run
    /// `entry(argument)` once started.
    pub fn spawn(
        &mut self,
        name: &str,
        entry: ThreadEntry,
        argument: usize,
    ) -> Result<ThreadId, KernelError> {
        self.spawn_with_priority(name, DEFAULT_PRIORITY, entry, argument)
    }

    fn spawn_with_priority(
        &mut self,
        name: &str,
        priority: i32,
        entry: ThreadEntry,
        argument: usize,
    ) -> Result<ThreadId, KernelError> {
        let stack = self.stacks.alloc().ok_or(KernelError::StackPoolExhausted)?;
        let id = match self.threads.create(name, priority) {
            Ok(id) => id,
            Err(err) => {
                self.stacks.release(stack);
                return Err(err);
            }
        };

        let context = Context::new(entry, argument, self.stacks.top(stack));
        if let Some(thread) = self.threads.find_by_id_mut(id) {
            thread.stack = Some(stack);
            thread.context = Some(context);
        }
        log::debug!("spawned thread {} '{}'", id.raw(), name);
        Ok(id)
    }

    /// Remove a thread record, releasing its context and stack.
    ///
    /// Refuses the idle thread and the thread that is executing right now.
    /// A thread that others are still joined on is kept as well.
    pub fn destroy(&mut self, id: ThreadId) -> Result<(), KernelError> {
        let thread = self
            .threads
            .find_by_id(id)
            .ok_or(KernelError::UnknownThread(id.raw()))?;

        if self.idle == Some(id) {
            return Err(KernelError::IdleThread);
        }
        if thread.context_id().is_some() && thread.context_id() == self.running {
            return Err(KernelError::ThreadIsCurrent(id.raw()));
        }
        if self.has_waiters(WaitTarget::Thread(id)) {
            return Err(KernelError::HasWaiters);
        }

        if let Some(thread) = self.threads.remove(id) {
            if let (false, Some(stack)) = (thread.main, thread.stack) {
                self.stacks.release(stack);
            }
        }
        log::debug!("destroyed thread {}", id.raw());
        Ok(())
    }

    /// Debug snapshot of a thread. Unknown ids give an all-default record.
    pub fn thread_info(&self, id: ThreadId) -> ThreadInfo {
        self.threads
            .find_by_id(id)
            .map(Thread::info)
            .unwrap_or_default()
    }

    pub fn semaphore_new(&mut self, capacity: u32) -> Result<SemaphoreHandle, KernelError> {
        let handle = self
            .semaphores
            .insert(Semaphore::new(capacity))
            .map_err(|_| KernelError::SemaphoreTableFull)?;
        log::trace!("semaphore {:#010x} created, capacity {}", handle.raw(), capacity);
        Ok(SemaphoreHandle(handle))
    }

    /// Free a semaphore. Refused while any thread is blocked on it; those
    /// threads would otherwise stay parked forever.
    pub fn semaphore_free(&mut self, handle: SemaphoreHandle) -> Result<(), KernelError> {
        if self.has_waiters(WaitTarget::Semaphore(handle)) {
            return Err(KernelError::HasWaiters);
        }
        self.semaphores
            .remove(handle.0)
            .map(|_| ())
            .ok_or(KernelError::UnknownSemaphore(handle.raw()))
    }

    pub fn counter_new(&mut self, initial: u32) -> Result<CounterHandle, KernelError> {
        let handle = self
            .counters
            .insert(Counter::new(initial))
            .map_err(|_| KernelError::CounterTableFull)?;
        log::trace!("counter {:#010x} created at {}", handle.raw(), initial);
        Ok(CounterHandle(handle))
    }

    pub fn counter_free(&mut self, handle: CounterHandle) -> Result<(), KernelError> {
        self.counters
            .remove(handle.0)
            .map(|_| ())
            .ok_or(KernelError::UnknownCounter(handle.raw()))
    }

    fn has_waiters(&self, target: WaitTarget) -> bool {
        self.threads.iter().any(|thread| {
            thread.state == ThreadState::Waiting && thread.waiting == Some(target)
        })
    }

    /// Context most recently handed back to the trampoline.
    #[inline]
    pub fn running(&self) -> Option<ContextId> {
        self.running
    }

    pub fn context(&self, id: ContextId) -> Option<&Context> {
        self.threads
            .find_by_context(id)
            .and_then(|thread| thread.context.as_ref())
    }

    pub fn context_mut(&mut self, id: ContextId) -> Option<&mut Context> {
        self.threads
            .find_by_context_mut(id)
            .and_then(|thread| thread.context.as_mut())
    }

    /// Entry point for interrupt sources (the preemption timer in particular).
    pub fn interrupt(&mut self, current: ContextId, source: InterruptSource) -> ContextId {
        self.reschedule(current, source.mode())
    }

    /// Run the scheduler and remember its choice. On an invariant violation
    /// the fault is reported and `current` keeps running.
    pub(crate) fn reschedule(&mut self, current: ContextId, mode: ScheduleMode) -> ContextId {
        let next = match scheduler::schedule(current, mode, &self.threads) {
            Ok(next) => next,
            Err(fault) => {
                self.report(&fault);
                current
            }
        };
        self.running = Some(next);
        next
    }

    pub(crate) fn report(&mut self, fault: &Fault) {
        self.reporter.report(fault);
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }
}

// ---------------------------------------------------------------------------
// Global kernel instance
// ---------------------------------------------------------------------------

/// The system-wide kernel. Only reachable inside a critical section.
static KERNEL: Mutex<RefCell<Kernel>> = Mutex::new(RefCell::new(Kernel::new()));

/// Run `f` against the global kernel with interrupts disabled.
pub fn with_kernel<F, T>(f: F) -> T
where
    F: FnOnce(&mut Kernel) -> T,
{
    sync::critical_section(|cs| f(&mut KERNEL.borrow_ref_mut(cs)))
}

/// Initialize the kernel: clear every registry and create the idle thread.
///
/// Must be called before any other kernel function.
pub fn init() -> Result<(), KernelError> {
    with_kernel(|kernel| kernel.init()).map(|_| ())
}

/// Create a stopped thread that runs `entry(argument)` once started.
///
/// # Example
/// ```ignore
/// extern "C" fn worker(arg: usize) -> usize { arg * 2 }
///
/// let id = kernel::spawn("worker", worker, 21)?;
/// threadcore::api::start(id);
/// assert_eq!(threadcore::api::join(id), 42);
/// kernel::destroy(id)?;
/// ```
pub fn spawn(name: &str, entry: ThreadEntry, argument: usize) -> Result<ThreadId, KernelError> {
    with_kernel(|kernel| kernel.spawn(name, entry, argument))
}

/// Destroy a thread that has finished (or was never started). A thread cannot
/// destroy itself.
pub fn destroy(id: ThreadId) -> Result<(), KernelError> {
    with_kernel(|kernel| kernel.destroy(id))
}

pub fn thread_info(id: ThreadId) -> ThreadInfo {
    with_kernel(|kernel| kernel.thread_info(id))
}

pub fn semaphore_new(capacity: u32) -> Result<SemaphoreHandle, KernelError> {
    with_kernel(|kernel| kernel.semaphore_new(capacity))
}

pub fn semaphore_free(handle: SemaphoreHandle) -> Result<(), KernelError> {
    with_kernel(|kernel| kernel.semaphore_free(handle))
}

pub fn counter_new(initial: u32) -> Result<CounterHandle, KernelError> {
    with_kernel(|kernel| kernel.counter_new(initial))
}

pub fn counter_free(handle: CounterHandle) -> Result<(), KernelError> {
    with_kernel(|kernel| kernel.counter_free(handle))
}

/// Tear down all threads, semaphores and counters, e.g. before handing the
/// machine to code outside this runtime.
pub fn reset() {
    with_kernel(|kernel| kernel.reset());
}

/// Start the scheduler.
///
/// Configures the preemption timer and handler priorities, registers the
/// calling flow as the main thread on its reserved stack, and continues in
/// `main(argument)` in Thread mode. `init()` must have been called.
///
/// Only returns if the main thread cannot be registered.
#[cfg(target_arch = "arm")]
pub fn start(
    core_peripherals: cortex_m::Peripherals,
    main: ThreadEntry,
    argument: usize,
) -> Result<core::convert::Infallible, KernelError> {
    crate::arch::cortex_m4::start(core_peripherals, main, argument)
}

/// Ask for a reschedule once the current interrupt handler returns. Device
/// interrupt handlers call this after making a thread's wait condition true.
#[cfg(target_arch = "arm")]
pub fn request_reschedule() {
    crate::arch::cortex_m4::trigger_pendsv();
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MAX_THREADS, MIN_PRIORITY, THREAD_STACK_SIZE};
    use crate::diag::Recorder;
    use crate::syscall::Request;

    extern "C" fn noop(arg: usize) -> usize {
        arg
    }

    fn booted() -> (Kernel<Recorder>, ThreadId, ContextId) {
        let mut kernel = Kernel::with_reporter(Recorder::default());
        kernel.init().unwrap();
        let main = Context::boot();
        let main_ctx = main.id();
        let main_id = kernel.register_main(main).unwrap();
        (kernel, main_id, main_ctx)
    }

    #[test]
    fn test_init_creates_running_idle_thread() {
        let mut kernel = Kernel::with_reporter(Recorder::default());
        let idle = kernel.init().unwrap();
        let info = kernel.thread_info(idle);
        assert_eq!(info.name.as_str(), "idle");
        assert!(info.running);
        assert!(info.priority < MIN_PRIORITY);
    }

    #[test]
    fn test_register_main() {
        let (mut kernel, main_id, main_ctx) = booted();
        assert_eq!(kernel.running(), Some(main_ctx));
        let info = kernel.thread_info(main_id);
        assert_eq!(info.name.as_str(), "main");
        assert!(info.running);
        assert_eq!(
            kernel.register_main(Context::boot()),
            Err(KernelError::MainAlreadyRegistered)
        );
    }

    #[test]
    fn test_spawn_is_stopped_at_default_priority() {
        let (mut kernel, main_id, _) = booted();
        let id = kernel.spawn("test", noop, 0).unwrap();
        assert_ne!(id, main_id);

        let info = kernel.thread_info(id);
        assert_eq!(info.name.as_str(), "test");
        assert_eq!(info.priority, DEFAULT_PRIORITY);
        assert!(info.alive);
        assert!(!info.running);
    }

    #[test]
    fn test_spawn_until_full_then_recover() {
        let (mut kernel, _, _) = booted();
        // Idle and main already hold two slots; main has no pool stack.
        let mut spawned = std::vec::Vec::new();
        for _ in 0..MAX_THREADS - 2 {
            spawned.push(kernel.spawn("t", noop, 0).unwrap());
        }
        assert_eq!(kernel.spawn("t", noop, 0), Err(KernelError::ThreadTableFull));

        kernel.destroy(spawned[0]).unwrap();
        assert!(kernel.spawn("again", noop, 0).is_ok());
    }

    #[test]
    fn test_destroy_rules() {
        let (mut kernel, main_id, _) = booted();
        let id = kernel.spawn("t", noop, 0).unwrap();

        assert_eq!(kernel.destroy(main_id), Err(KernelError::ThreadIsCurrent(main_id.raw())));
        assert_eq!(
            kernel.destroy(ThreadId::from_raw(999)),
            Err(KernelError::UnknownThread(999))
        );

        kernel.destroy(id).unwrap();
        assert_eq!(kernel.thread_info(id), ThreadInfo::default());
    }

    #[test]
    fn test_idle_thread_is_protected() {
        let (mut kernel, main_id, main_ctx) = booted();
        let idle = kernel.idle.unwrap();
        assert_eq!(kernel.destroy(idle), Err(KernelError::IdleThread));
        assert!(kernel.thread_info(idle).alive);

        // With main blocked, the CPU still has somewhere to go.
        let semaphore = kernel.semaphore_new(0).unwrap();
        let next = kernel.syscall(main_ctx, Request::Acquire(semaphore));
        let idle_ctx = kernel.threads.find_by_id(idle).unwrap().context_id();
        assert_eq!(Some(next), idle_ctx);
        assert_eq!(kernel.threads.find_by_id(main_id).unwrap().state, ThreadState::Waiting);
        assert!(kernel.reporter().faults.is_empty());
    }

    #[test]
    fn test_thread_stacks_live_outside_the_kernel() {
        let (mut kernel, _, _) = booted();
        let id = kernel.spawn("t", noop, 0).unwrap();
        let stack = kernel.threads.find_by_id(id).unwrap().stack.unwrap();
        let top = kernel.stacks.top(stack);
        let bottom = top - THREAD_STACK_SIZE;

        let start = &kernel as *const Kernel<Recorder> as usize;
        let end = start + core::mem::size_of::<Kernel<Recorder>>();
        assert!(top <= start || bottom >= end);
    }

    #[test]
    fn test_destroy_refused_while_joined_on() {
        let (mut kernel, main_id, _) = booted();
        let id = kernel.spawn("t", noop, 0).unwrap();
        kernel
            .threads
            .find_by_id_mut(main_id)
            .unwrap()
            .block_on(WaitTarget::Thread(id));
        assert_eq!(kernel.destroy(id), Err(KernelError::HasWaiters));
    }

    #[test]
    fn test_semaphore_free_with_waiters_is_refused() {
        let (mut kernel, main_id, _) = booted();
        let sem = kernel.semaphore_new(1).unwrap();
        kernel
            .threads
            .find_by_id_mut(main_id)
            .unwrap()
            .block_on(WaitTarget::Semaphore(sem));

        assert_eq!(kernel.semaphore_free(sem), Err(KernelError::HasWaiters));

        kernel.threads.find_by_id_mut(main_id).unwrap().wake();
        assert_eq!(kernel.semaphore_free(sem), Ok(()));
        assert_eq!(
            kernel.semaphore_free(sem),
            Err(KernelError::UnknownSemaphore(sem.raw()))
        );
    }

    #[test]
    fn test_counter_lifecycle() {
        let (mut kernel, _, _) = booted();
        let counter = kernel.counter_new(3).unwrap();
        assert_eq!(kernel.counters.get(counter.0).map(|c| c.value), Some(3));
        kernel.counter_free(counter).unwrap();
        assert_eq!(
            kernel.counter_free(counter),
            Err(KernelError::UnknownCounter(counter.raw()))
        );
    }

    #[test]
    fn test_interrupt_classification() {
        let (mut kernel, _, main_ctx) = booted();
        let id = kernel.spawn("peer", noop, 0).unwrap();
        kernel.threads.find_by_id_mut(id).unwrap().state = ThreadState::Running;
        let peer_ctx = kernel.threads.find_by_id(id).unwrap().context_id().unwrap();

        assert_eq!(kernel.interrupt(main_ctx, InterruptSource::Ignorable), main_ctx);
        assert_eq!(kernel.interrupt(main_ctx, InterruptSource::Preemption), peer_ctx);
        assert_eq!(kernel.running(), Some(peer_ctx));
        assert_eq!(kernel.interrupt(peer_ctx, InterruptSource::Wakeup), main_ctx);
        assert!(kernel.reporter().faults.is_empty());
    }

    #[test]
    fn test_unknown_context_keeps_current_and_reports() {
        let (mut kernel, _, _) = booted();
        let stranger = Context::boot().id();
        assert_eq!(kernel.interrupt(stranger, InterruptSource::Preemption), stranger);
        assert_eq!(kernel.reporter().faults, std::vec![Fault::UnknownContext]);
    }

    #[test]
    fn test_reset_clears_everything() {
        let (mut kernel, _, _) = booted();
        kernel.spawn("t", noop, 0).unwrap();
        kernel.semaphore_new(1).unwrap();
        kernel.counter_new(0).unwrap();
        kernel.reset();
        assert!(kernel.threads.is_empty());
        assert!(kernel.semaphores.is_empty());
        assert!(kernel.counters.is_empty());
        assert_eq!(kernel.running(), None);
    }

    #[test]
    fn test_stale_thread_id_does_not_survive_reinit() {
        let (mut kernel, main_id, _) = booted();
        let old = kernel.spawn("old", noop, 0).unwrap();

        kernel.init().unwrap();
        let fresh = kernel.spawn("fresh", noop, 0).unwrap();

        assert_ne!(fresh, old);
        assert!(!kernel.thread_info(old).alive);
        assert!(!kernel.thread_info(main_id).alive);
        assert_eq!(kernel.destroy(old), Err(KernelError::UnknownThread(old.raw())));
        assert_eq!(kernel.thread_info(fresh).name.as_str(), "fresh");
    }

    #[test]
    fn test_global_api() {
        init().unwrap();
        let id = spawn("global", noop, 5).unwrap();
        assert_eq!(thread_info(id).name.as_str(), "global");
        let sem = semaphore_new(2).unwrap();
        let counter = counter_new(0).unwrap();
        semaphore_free(sem).unwrap();
        counter_free(counter).unwrap();
        destroy(id).unwrap();
        reset();
        assert!(!thread_info(id).alive);
    }
}
