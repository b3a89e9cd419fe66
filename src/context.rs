//! # Execution Context
//!
//! A [`Context`] is a complete, self-contained image of the Cortex-M4 register
//! file for one suspended thread: R0–R12, SP, LR, PC, xPSR, the EXC_RETURN
//! value the thread was trapped with, and S0–S31/FPSCR.
//!
//! The rest of the kernel treats contexts as sealed values. It may create one,
//! drop one, compare identities through [`ContextId`], and read/write the
//! trap argument and result registers. Only the architecture port moves real
//! CPU state in and out, through [`Context::capture`] and [`Context::restore`].
//!
//! ## Process stack layout while trapped
//!
//! The trampoline pushes the software-saved part below the frame the
//! hardware stacked on exception entry, so the saved PSP points at R4:
//!
//! ```text
//!   low address   R4 R5 R6 R7 R8 R9 R10 R11 EXC_RETURN     <- saved PSP
//!                 S16 .. S31                (only with an FPU frame)
//!                 R0 R1 R2 R3 R12 LR PC xPSR                <- hardware frame
//!                 S0 .. S15 FPSCR reserved  (only with an FPU frame)
//!   high address  [4-byte pad if xPSR bit 9]                 <- thread SP
//! ```

use core::num::NonZeroU32;
use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};

/// Thread entry point. The return value becomes the thread's exit value.
pub type ThreadEntry = extern "C" fn(usize) -> usize;

/// Identity of a context. Unique for the lifetime of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(NonZeroU32);

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(1);

impl ContextId {
    fn next() -> Self {
        loop {
            let raw = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
            if let Some(id) = NonZeroU32::new(raw) {
                return ContextId(id);
            }
        }
    }
}

const XPSR_THUMB: u32 = 1 << 24;
const XPSR_STACK_PAD: u32 = 1 << 9;

/// Return to Thread mode, using PSP, basic (non-FPU) frame.
pub(crate) const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;
const EXC_RETURN_NO_FPU_FRAME: u32 = 1 << 4;

/// R4–R11 plus EXC_RETURN.
const SOFTWARE_WORDS: usize = 9;
/// S16–S31.
const SOFTWARE_FPU_WORDS: usize = 16;
/// R0–R3, R12, LR, PC, xPSR.
const HARDWARE_WORDS: usize = 8;
/// S0–S15, FPSCR, reserved.
const HARDWARE_FPU_WORDS: usize = 18;

/// Saved CPU state of one suspended thread.
#[derive(Debug, Clone)]
pub struct Context {
    id: ContextId,
    r: [u32; 13],
    sp: usize,
    lr: u32,
    pc: u32,
    xpsr: u32,
    exc_return: u32,
    s: [u32; 32],
    fpscr: u32,
}

impl Context {
    /// Build a context that, once restored, runs `entry(argument)` on the
    /// stack ending at `stack_top`. Returning from `entry` lands in the
    /// port's exit hook, which issues the exit trap with the return value.
    pub fn new(entry: ThreadEntry, argument: usize, stack_top: usize) -> Self {
        let mut r = [0; 13];
        r[0] = argument as u32;
        Self {
            id: ContextId::next(),
            r,
            // AAPCS wants an 8-byte aligned stack at public interfaces.
            sp: stack_top & !0x07,
            lr: crate::arch::thread_return_address(),
            // The stacked PC must not carry the Thumb bit.
            pc: (entry as usize as u32) & !1,
            xpsr: XPSR_THUMB,
            exc_return: EXC_RETURN_THREAD_PSP,
            s: [0; 32],
            fpscr: 0,
        }
    }

    /// An empty context for a thread that is already executing (the boot
    /// thread). Its contents are filled in by the first capture.
    pub fn boot() -> Self {
        Self {
            id: ContextId::next(),
            r: [0; 13],
            sp: 0,
            lr: 0,
            pc: 0,
            xpsr: XPSR_THUMB,
            exc_return: EXC_RETURN_THREAD_PSP,
            s: [0; 32],
            fpscr: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Operation code and arguments of a pending trap (R0, then R1/R2).
    #[inline]
    pub(crate) fn trap_registers(&self) -> (u32, [u32; 2]) {
        (self.r[0], [self.r[1], self.r[2]])
    }

    /// Store a trap result where the thread will find it on resumption (R0).
    #[inline]
    pub(crate) fn set_result(&mut self, value: u32) {
        self.r[0] = value;
    }

    #[inline]
    pub(crate) fn result(&self) -> u32 {
        self.r[0]
    }

    /// Put a trap request in the argument registers, as `svc` callers do.
    #[cfg(test)]
    pub(crate) fn load_trap(&mut self, code: u32, args: [u32; 2]) {
        self.r[0] = code;
        self.r[1] = args[0];
        self.r[2] = args[1];
    }

    fn has_fpu_frame(&self) -> bool {
        self.exc_return & EXC_RETURN_NO_FPU_FRAME == 0
    }

    fn frame_words(&self) -> usize {
        if self.has_fpu_frame() {
            SOFTWARE_WORDS + SOFTWARE_FPU_WORDS + HARDWARE_WORDS + HARDWARE_FPU_WORDS
        } else {
            SOFTWARE_WORDS + HARDWARE_WORDS
        }
    }

    /// Copy a trapped thread's stacked frame into this context.
    ///
    /// # Safety
    /// `psp` must point at a complete frame laid out as described in the
    /// module documentation.
    pub(crate) unsafe fn capture(&mut self, psp: *const u32) {
        let word = |at: usize| unsafe { ptr::read_volatile(psp.add(at)) };

        for i in 0..8 {
            self.r[4 + i] = word(i);
        }
        self.exc_return = word(8);
        let mut at = SOFTWARE_WORDS;

        let fpu = self.has_fpu_frame();
        if fpu {
            for i in 0..16 {
                self.s[16 + i] = word(at + i);
            }
            at += SOFTWARE_FPU_WORDS;
        }

        for i in 0..4 {
            self.r[i] = word(at + i);
        }
        self.r[12] = word(at + 4);
        self.lr = word(at + 5);
        self.pc = word(at + 6);
        self.xpsr = word(at + 7);
        at += HARDWARE_WORDS;

        if fpu {
            for i in 0..16 {
                self.s[i] = word(at + i);
            }
            self.fpscr = word(at + 16);
            at += HARDWARE_FPU_WORDS;
        }

        let mut sp = psp as usize + at * 4;
        if self.xpsr & XPSR_STACK_PAD != 0 {
            sp += 4;
        }
        self.sp = sp;
    }

    /// Write this context's frame onto its own stack and return the PSP the
    /// trampoline must unstack from.
    ///
    /// # Safety
    /// The stack this context was created on (or captured from) must still
    /// be alive and have room for the frame below its saved SP.
    pub(crate) unsafe fn restore(&self) -> *mut u32 {
        let pad = if self.xpsr & XPSR_STACK_PAD != 0 { 4 } else { 0 };
        let psp = (self.sp - pad - self.frame_words() * 4) as *mut u32;
        let put = |at: usize, value: u32| unsafe { ptr::write_volatile(psp.add(at), value) };

        for i in 0..8 {
            put(i, self.r[4 + i]);
        }
        put(8, self.exc_return);
        let mut at = SOFTWARE_WORDS;

        let fpu = self.has_fpu_frame();
        if fpu {
            for i in 0..16 {
                put(at + i, self.s[16 + i]);
            }
            at += SOFTWARE_FPU_WORDS;
        }

        for i in 0..4 {
            put(at + i, self.r[i]);
        }
        put(at + 4, self.r[12]);
        put(at + 5, self.lr);
        put(at + 6, self.pc);
        put(at + 7, self.xpsr);
        at += HARDWARE_WORDS;

        if fpu {
            for i in 0..16 {
                put(at + i, self.s[i]);
            }
            put(at + 16, self.fpscr);
            put(at + 17, 0);
        }

        psp
    }
}
