//! # Trap Dispatcher
//!
//! User code enters the kernel with `svc 0`, the operation code in R0 and up
//! to two arguments in R1/R2. The trampoline captures the caller's context
//! and calls [`Kernel::trap`], which decodes the request, services it and
//! picks the next context. A result, where there is one, is written back to
//! the caller's R0 and becomes the return value of the trap.
//!
//! | Code | Request            | Arguments            | Result            |
//! |------|--------------------|----------------------|-------------------|
//! | 0    | `CounterIncrement` | counter              | -                 |
//! | 1    | `CounterDecrement` | counter              | -                 |
//! | 2    | `CounterValue`     | counter              | value, 0 if bad   |
//! | 3    | `Yield`            | -                    | -                 |
//! | 4    | `Start`            | thread id            | -                 |
//! | 5    | `Stop`             | thread id            | -                 |
//! | 6    | `SetPriority`      | thread id, priority  | -                 |
//! | 7    | `CurrentId`        | -                    | caller's id       |
//! | 8    | `Join`             | thread id            | exit value or 0   |
//! | 9    | `Exit`             | exit value           | does not return   |
//! | 10   | `Acquire`          | semaphore            | -                 |
//! | 11   | `Release`          | semaphore            | -                 |
//!
//! Misuse never fails the trap. It is reported through the kernel's
//! [`Reporter`] and the caller keeps running.

use crate::config::{MAX_PRIORITY, MIN_PRIORITY};
use crate::context::{Context, ContextId};
use crate::diag::Reporter;
use crate::error::Fault;
use crate::kernel::Kernel;
use crate::scheduler::ScheduleMode;
use crate::semaphore::{CounterHandle, SemaphoreHandle};
use crate::thread::{Thread, ThreadId, ThreadState, WaitTarget};

/// Trap operation codes as they appear in R0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Syscall {
    CounterIncrement = 0,
    CounterDecrement = 1,
    CounterValue = 2,
    Yield = 3,
    ThreadStart = 4,
    ThreadStop = 5,
    ThreadPriority = 6,
    ThreadId = 7,
    ThreadJoin = 8,
    ThreadExit = 9,
    SemaphoreAcquire = 10,
    SemaphoreRelease = 11,
}

impl Syscall {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Syscall::CounterIncrement,
            1 => Syscall::CounterDecrement,
            2 => Syscall::CounterValue,
            3 => Syscall::Yield,
            4 => Syscall::ThreadStart,
            5 => Syscall::ThreadStop,
            6 => Syscall::ThreadPriority,
            7 => Syscall::ThreadId,
            8 => Syscall::ThreadJoin,
            9 => Syscall::ThreadExit,
            10 => Syscall::SemaphoreAcquire,
            11 => Syscall::SemaphoreRelease,
            _ => return None,
        })
    }
}

/// A decoded trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    CounterIncrement(CounterHandle),
    CounterDecrement(CounterHandle),
    CounterValue(CounterHandle),
    Yield,
    Start(ThreadId),
    Stop(ThreadId),
    SetPriority(ThreadId, i32),
    CurrentId,
    Join(ThreadId),
    Exit(u32),
    Acquire(SemaphoreHandle),
    Release(SemaphoreHandle),
}

impl Request {
    pub fn decode(code: u32, args: [u32; 2]) -> Result<Self, Fault> {
        let syscall = Syscall::from_code(code).ok_or(Fault::UnknownSyscall(code))?;
        let [a0, a1] = args;
        Ok(match syscall {
            Syscall::CounterIncrement => Request::CounterIncrement(CounterHandle::from_raw(a0)),
            Syscall::CounterDecrement => Request::CounterDecrement(CounterHandle::from_raw(a0)),
            Syscall::CounterValue => Request::CounterValue(CounterHandle::from_raw(a0)),
            Syscall::Yield => Request::Yield,
            Syscall::ThreadStart => Request::Start(ThreadId::from_raw(a0)),
            Syscall::ThreadStop => Request::Stop(ThreadId::from_raw(a0)),
            Syscall::ThreadPriority => Request::SetPriority(ThreadId::from_raw(a0), a1 as i32),
            Syscall::ThreadId => Request::CurrentId,
            Syscall::ThreadJoin => Request::Join(ThreadId::from_raw(a0)),
            Syscall::ThreadExit => Request::Exit(a0),
            Syscall::SemaphoreAcquire => Request::Acquire(SemaphoreHandle::from_raw(a0)),
            Syscall::SemaphoreRelease => Request::Release(SemaphoreHandle::from_raw(a0)),
        })
    }

    /// Register image (R0, then R1/R2) that issues this request.
    pub fn encode(&self) -> (u32, [u32; 2]) {
        let code = self.syscall() as u32;
        let args = match *self {
            Request::CounterIncrement(c) | Request::CounterDecrement(c) | Request::CounterValue(c) => {
                [c.raw(), 0]
            }
            Request::Yield | Request::CurrentId => [0, 0],
            Request::Start(id) | Request::Stop(id) | Request::Join(id) => [id.raw(), 0],
            Request::SetPriority(id, priority) => [id.raw(), priority as u32],
            Request::Exit(value) => [value, 0],
            Request::Acquire(s) | Request::Release(s) => [s.raw(), 0],
        };
        (code, args)
    }

    pub fn syscall(&self) -> Syscall {
        match self {
            Request::CounterIncrement(_) => Syscall::CounterIncrement,
            Request::CounterDecrement(_) => Syscall::CounterDecrement,
            Request::CounterValue(_) => Syscall::CounterValue,
            Request::Yield => Syscall::Yield,
            Request::Start(_) => Syscall::ThreadStart,
            Request::Stop(_) => Syscall::ThreadStop,
            Request::SetPriority(..) => Syscall::ThreadPriority,
            Request::CurrentId => Syscall::ThreadId,
            Request::Join(_) => Syscall::ThreadJoin,
            Request::Exit(_) => Syscall::ThreadExit,
            Request::Acquire(_) => Syscall::SemaphoreAcquire,
            Request::Release(_) => Syscall::SemaphoreRelease,
        }
    }
}

impl<R: Reporter> Kernel<R> {
    /// Service the trap pending in `current`'s registers and return the
    /// context to resume.
    pub fn trap(&mut self, current: ContextId) -> ContextId {
        // An unresolvable caller falls through to the scheduler, which
        // reports it.
        let mode = match self.context(current).map(Context::trap_registers) {
            Some((code, args)) => match Request::decode(code, args) {
                Ok(request) => self.dispatch(current, request),
                Err(fault) => {
                    self.report(&fault);
                    ScheduleMode::Current
                }
            },
            None => ScheduleMode::Current,
        };
        self.reschedule(current, mode)
    }

    /// Service an already decoded request on behalf of `current`.
    pub fn syscall(&mut self, current: ContextId, request: Request) -> ContextId {
        let mode = self.dispatch(current, request);
        self.reschedule(current, mode)
    }

    fn dispatch(&mut self, current: ContextId, request: Request) -> ScheduleMode {
        log::trace!("trap {:?}", request);
        match self.service(current, request) {
            Ok(mode) => mode,
            Err(fault) => {
                self.report(&fault);
                ScheduleMode::Current
            }
        }
    }

    fn service(&mut self, current: ContextId, request: Request) -> Result<ScheduleMode, Fault> {
        match request {
            Request::CounterIncrement(handle) => {
                if let Some(counter) = self.counters.get_mut(handle.0) {
                    counter.increment();
                }
                Ok(ScheduleMode::Current)
            }
            Request::CounterDecrement(handle) => {
                if let Some(counter) = self.counters.get_mut(handle.0) {
                    counter.decrement();
                }
                Ok(ScheduleMode::Current)
            }
            Request::CounterValue(handle) => {
                let value = self.counters.get(handle.0).map_or(0, |counter| counter.value);
                self.reply(current, value);
                Ok(ScheduleMode::Current)
            }
            Request::Yield => Ok(ScheduleMode::Other),
            Request::Start(id) => {
                if let Some(thread) = self.threads.find_by_id_mut(id) {
                    if thread.state == ThreadState::Stopped {
                        thread.state = ThreadState::Running;
                    }
                }
                Ok(ScheduleMode::Any)
            }
            Request::Stop(id) => {
                if let Some(thread) = self.threads.find_by_id_mut(id) {
                    if thread.state == ThreadState::Running {
                        thread.state = ThreadState::Stopped;
                    }
                }
                Ok(ScheduleMode::Any)
            }
            Request::SetPriority(id, priority) => {
                // The idle thread stays below every user band.
                if self.idle == Some(id) {
                    return Ok(ScheduleMode::Any);
                }
                if let Some(thread) = self.threads.find_by_id_mut(id) {
                    thread.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
                }
                Ok(ScheduleMode::Any)
            }
            Request::CurrentId => {
                let id = self.caller(current, Syscall::ThreadId)?.id;
                self.reply(current, id.raw());
                Ok(ScheduleMode::Current)
            }
            Request::Join(target) => self.join(current, target),
            Request::Exit(value) => self.exit(current, value),
            Request::Acquire(handle) => self.acquire(current, handle),
            Request::Release(handle) => {
                self.release(handle)?;
                Ok(ScheduleMode::Other)
            }
        }
    }

    fn caller(&mut self, current: ContextId, syscall: Syscall) -> Result<&mut Thread, Fault> {
        self.threads
            .find_by_context_mut(current)
            .ok_or(Fault::CallerNotFound {
                syscall: syscall as u32,
            })
    }

    fn reply(&mut self, current: ContextId, value: u32) {
        if let Some(context) = self.context_mut(current) {
            context.set_result(value);
        }
    }

    fn join(&mut self, current: ContextId, target: ThreadId) -> Result<ScheduleMode, Fault> {
        let state = self.threads.find_by_id(target).map(|thread| thread.state);
        match state {
            Some(ThreadState::Stopped | ThreadState::Running | ThreadState::Waiting) => {
                self.caller(current, Syscall::ThreadJoin)?
                    .block_on(WaitTarget::Thread(target));
                Ok(ScheduleMode::Other)
            }
            Some(ThreadState::Finished) => {
                let mut value = 0;
                if let Some(thread) = self.threads.find_by_id_mut(target) {
                    thread.state = ThreadState::Zombie;
                    value = thread.retval;
                }
                self.reply(current, value);
                Ok(ScheduleMode::Current)
            }
            // Already joined, or never existed.
            Some(ThreadState::Zombie) | None => {
                self.reply(current, 0);
                Ok(ScheduleMode::Current)
            }
        }
    }

    fn exit(&mut self, current: ContextId, value: u32) -> Result<ScheduleMode, Fault> {
        let thread = self.caller(current, Syscall::ThreadExit)?;
        thread.state = ThreadState::Finished;
        thread.retval = value;
        let id = thread.id;
        log::debug!("thread {} exited with {}", id.raw(), value);

        self.wake_joiners(id, value);
        Ok(ScheduleMode::Other)
    }

    /// Hand a finished thread's exit value to whoever is joined on it. The
    /// first joiner in slot order consumes the value (the thread becomes a
    /// zombie); any later joiner gets 0.
    fn wake_joiners(&mut self, id: ThreadId, retval: u32) {
        let mut consumed = false;
        for thread in self.threads.iter_mut() {
            if thread.state != ThreadState::Waiting
                || thread.waiting != Some(WaitTarget::Thread(id))
            {
                continue;
            }
            thread.wake();
            let result = if consumed { 0 } else { retval };
            consumed = true;
            if let Some(context) = thread.context.as_mut() {
                context.set_result(result);
            }
        }

        if consumed {
            if let Some(thread) = self.threads.find_by_id_mut(id) {
                thread.state = ThreadState::Zombie;
            }
        }
    }

    fn acquire(&mut self, current: ContextId, handle: SemaphoreHandle) -> Result<ScheduleMode, Fault> {
        let semaphore = self
            .semaphores
            .get_mut(handle.0)
            .ok_or(Fault::AcquireUninitialized(handle.raw()))?;
        if semaphore.try_take() {
            return Ok(ScheduleMode::Current);
        }

        self.caller(current, Syscall::SemaphoreAcquire)?
            .block_on(WaitTarget::Semaphore(handle));
        Ok(ScheduleMode::Other)
    }

    /// Return a permit, then admit waiters in slot order while permits last.
    fn release(&mut self, handle: SemaphoreHandle) -> Result<(), Fault> {
        let semaphore = self
            .semaphores
            .get_mut(handle.0)
            .ok_or(Fault::ReleaseUninitialized(handle.raw()))?;
        let within_capacity = semaphore.give();

        for thread in self.threads.iter_mut() {
            if semaphore.current == 0 {
                break;
            }
            if thread.state == ThreadState::Waiting
                && thread.waiting == Some(WaitTarget::Semaphore(handle))
            {
                thread.wake();
                semaphore.current -= 1;
            }
        }

        if !within_capacity {
            self.report(&Fault::OverRelease(handle.raw()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
