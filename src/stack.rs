//! # Thread Stacks
//!
//! Spawned threads (and the idle thread) get their stack from a fixed pool.
//! The main thread's stack is supplied externally and never comes from here.
//!
//! The stack bytes live in their own static, outside the kernel state. A
//! suspended thread's frame is written through the process stack pointer
//! while the kernel is borrowed mutably, so the memory must not be part of
//! that borrow. The kernel only keeps the [`StackPool`] bitmap saying which
//! slots are checked out. Being all zero, the memory is placed in `.bss`.

use core::cell::UnsafeCell;

use crate::config::{MAX_THREADS, THREAD_STACK_SIZE};

/// One thread stack. Aligned to 8 bytes as required by ARM AAPCS.
#[repr(C, align(8))]
struct Stack(UnsafeCell<[u8; THREAD_STACK_SIZE]>);

struct StackMemory([Stack; MAX_THREADS]);

// SAFETY: the bytes are only reached through raw pointers handed out by
// `top`: by the CPU while the owning thread runs, and by the context switch
// while it is suspended. No reference into the memory is ever formed.
unsafe impl Sync for StackMemory {}

static STACKS: StackMemory =
    StackMemory([const { Stack(UnsafeCell::new([0; THREAD_STACK_SIZE])) }; MAX_THREADS]);

/// Index of a stack checked out of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSlot(usize);

/// Which stack slots are in use.
pub struct StackPool {
    in_use: [bool; MAX_THREADS],
}

impl StackPool {
    pub const fn new() -> Self {
        Self {
            in_use: [false; MAX_THREADS],
        }
    }

    pub fn alloc(&mut self) -> Option<StackSlot> {
        let index = self.in_use.iter().position(|used| !used)?;
        self.in_use[index] = true;
        Some(StackSlot(index))
    }

    pub fn release(&mut self, slot: StackSlot) {
        self.in_use[slot.0] = false;
    }

    /// Address one past the highest byte of the stack; stacks grow down.
    pub fn top(&self, slot: StackSlot) -> usize {
        STACKS.0[slot.0].0.get() as usize + THREAD_STACK_SIZE
    }

    pub fn release_all(&mut self) {
        self.in_use = [false; MAX_THREADS];
    }
}

impl Default for StackPool {
    fn default() -> Self {
        Self::new()
    }
}
