//! # Counting Semaphores and Counters
//!
//! Plain data records kept in the kernel's fixed-capacity arenas. All the
//! blocking and waking logic lives in the trap dispatcher; these types only
//! know how to count.

use crate::arena::Handle;

/// Opaque reference to a live semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreHandle(pub(crate) Handle);

impl SemaphoreHandle {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        SemaphoreHandle(Handle::from_raw(raw))
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0.raw()
    }
}

/// A counting semaphore: `0 <= current <= max` under correct use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Semaphore {
    pub max: u32,
    pub current: u32,
}

impl Semaphore {
    /// A semaphore with `capacity` permits, all available.
    pub const fn new(capacity: u32) -> Self {
        Self {
            max: capacity,
            current: capacity,
        }
    }

    /// Take a permit if one is available.
    pub fn try_take(&mut self) -> bool {
        if self.current > 0 {
            self.current -= 1;
            true
        } else {
            false
        }
    }

    /// Return a permit. The count is incremented even past `max`; the return
    /// value is `false` when that happened (an over-release).
    pub fn give(&mut self) -> bool {
        self.current = self.current.wrapping_add(1);
        self.current <= self.max
    }
}

/// Opaque reference to a live counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterHandle(pub(crate) Handle);

impl CounterHandle {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        CounterHandle(Handle::from_raw(raw))
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0.raw()
    }
}

/// Unsigned cross-thread counter. Decrementing zero is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub value: u32,
}

impl Counter {
    pub const fn new(initial: u32) -> Self {
        Self { value: initial }
    }

    pub fn increment(&mut self) {
        self.value = self.value.wrapping_add(1);
    }

    pub fn decrement(&mut self) {
        self.value = self.value.saturating_sub(1);
    }
}
