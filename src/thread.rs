//! # Thread Registry
//!
//! Defines the thread record and the fixed-capacity table that holds them.
//!
//! Threads are identified by a monotonically increasing non-zero [`ThreadId`].
//! The table is scanned linearly; slot order matters in exactly two places,
//! round-robin within a priority band and the order in which semaphore
//! waiters are admitted.

use heapless::String;

use crate::config::{MAX_THREADS, THREAD_NAME_LEN};
use crate::context::{Context, ContextId};
use crate::error::KernelError;
use crate::semaphore::SemaphoreHandle;
use crate::stack::StackSlot;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Thread identifier. `0` is never assigned, so it never resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u32);

impl ThreadId {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        ThreadId(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Thread state machine
// ---------------------------------------------------------------------------

/// Execution state of a thread.
///
/// ```text
///   ┌─────────┐   start    ┌─────────┐   join / acquire   ┌─────────┐
///   │ Stopped │ ─────────► │ Running │ ─────────────────► │ Waiting │
///   └─────────┘ ◄───────── └─────────┘ ◄───────────────── └─────────┘
///                  stop         │              wake
///                               │ exit
///                               ▼
///                         ┌──────────┐  value consumed  ┌────────┐
///                         │ Finished │ ───────────────► │ Zombie │
///                         └──────────┘     by join      └────────┘
/// ```
///
/// `Running` means eligible to run, not necessarily on the CPU right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Stopped,
    Running,
    Waiting,
    Finished,
    Zombie,
}

/// What a `Waiting` thread is blocked on. A thread waits on exactly one
/// thing at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    Thread(ThreadId),
    Semaphore(SemaphoreHandle),
}

// ---------------------------------------------------------------------------
// Thread record
// ---------------------------------------------------------------------------

pub struct Thread {
    pub id: ThreadId,
    pub name: String<THREAD_NAME_LEN>,
    pub priority: i32,
    pub state: ThreadState,
    pub waiting: Option<WaitTarget>,
    /// Saved CPU state. Absent only between registry creation and context
    /// attachment.
    pub context: Option<Context>,
    /// Stack from the kernel pool. `None` for the main thread, whose stack
    /// belongs to the boot environment.
    pub stack: Option<StackSlot>,
    pub main: bool,
    pub retval: u32,
}

impl Thread {
    fn new(id: ThreadId, name: &str, priority: i32) -> Self {
        let mut truncated = String::new();
        for c in name.chars() {
            if truncated.push(c).is_err() {
                break;
            }
        }

        Self {
            id,
            name: truncated,
            priority,
            state: ThreadState::Stopped,
            waiting: None,
            context: None,
            stack: None,
            main: false,
            retval: 0,
        }
    }

    /// Eligible for selection by the scheduler.
    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.state == ThreadState::Running && self.context.is_some()
    }

    #[inline]
    pub fn context_id(&self) -> Option<ContextId> {
        self.context.as_ref().map(Context::id)
    }

    /// Wait on `target`. Replaces any previous wait.
    pub fn block_on(&mut self, target: WaitTarget) {
        self.state = ThreadState::Waiting;
        self.waiting = Some(target);
    }

    /// Clear the wait and make the thread eligible again.
    pub fn wake(&mut self) {
        self.state = ThreadState::Running;
        self.waiting = None;
    }

    pub fn info(&self) -> ThreadInfo {
        ThreadInfo {
            name: self.name.clone(),
            priority: self.priority,
            alive: matches!(
                self.state,
                ThreadState::Stopped | ThreadState::Running | ThreadState::Waiting
            ),
            running: self.state == ThreadState::Running,
        }
    }
}

/// Snapshot of a thread for debugging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadInfo {
    pub name: String<THREAD_NAME_LEN>,
    pub priority: i32,
    /// Not yet finished: stopped, running or waiting.
    pub alive: bool,
    pub running: bool,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct ThreadTable {
    slots: [Option<Thread>; MAX_THREADS],
    next_id: u32,
}

impl ThreadTable {
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_THREADS],
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> ThreadId {
        let id = self.next_id;
        self.next_id = match self.next_id.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        ThreadId(id)
    }

    /// Put a new `Stopped` thread in the first free slot.
    pub fn create(&mut self, name: &str, priority: i32) -> Result<ThreadId, KernelError> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::ThreadTableFull)?;

        let id = self.allocate_id();
        self.slots[index] = Some(Thread::new(id, name, priority));
        Ok(id)
    }

    pub fn find_by_id(&self, id: ThreadId) -> Option<&Thread> {
        self.iter().find(|thread| thread.id == id)
    }

    pub fn find_by_id_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.iter_mut().find(|thread| thread.id == id)
    }

    pub fn find_by_context(&self, context: ContextId) -> Option<&Thread> {
        self.iter()
            .find(|thread| thread.context_id() == Some(context))
    }

    pub fn find_by_context_mut(&mut self, context: ContextId) -> Option<&mut Thread> {
        self.iter_mut()
            .find(|thread| thread.context_id() == Some(context))
    }

    pub fn remove(&mut self, id: ThreadId) -> Option<Thread> {
        self.slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|thread| thread.id == id))
            .and_then(Option::take)
    }

    /// Live threads in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.slots.iter().flatten()
    }

    /// Live threads in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Thread> {
        self.slots.iter_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record. Ids keep counting, so an id handed out before the
    /// clear never resolves to a thread created after it.
    pub fn clear(&mut self) {
        self.slots = [const { None }; MAX_THREADS];
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
