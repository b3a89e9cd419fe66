//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4F (Thumb-2) processor:
//! exception entry and exit, SysTick configuration, handler priorities and
//! the first jump into Thread mode.
//!
//! ## Context Switch Mechanism
//!
//! Threads run in Thread mode on the PSP; handlers run on the MSP. On
//! exception entry the hardware stacks R0–R3, R12, LR, PC and xPSR (plus
//! S0–S15/FPSCR if the thread used the FPU) onto the process stack. The
//! common trampoline pushes S16–S31 (FPU frames only), R4–R11 and EXC_RETURN
//! below that, then calls [`switch_context`] with the resulting PSP.
//! `switch_context` captures the frame into the running [`Context`], lets the
//! kernel decide, and writes the chosen context's frame back onto its own
//! stack. The trampoline unstacks whatever PSP it gets back.
//!
//! All three entry points (SVCall, SysTick, PendSV) share that trampoline and
//! differ only in the source code they pass along:
//!
//! | Exception | Source          | Kernel entry                             |
//! |-----------|-----------------|------------------------------------------|
//! | SVCall    | `SOURCE_TRAP`   | `Kernel::trap`                           |
//! | SysTick   | `SOURCE_TIMER`  | `Kernel::interrupt(.., Preemption)`      |
//! | PendSV    | `SOURCE_WAKEUP` | `Kernel::interrupt(.., Wakeup)`          |
//!
//! ## Interrupt Priorities
//!
//! SVCall, SysTick and PendSV all sit at the lowest priority (0xFF) so none
//! of them can nest inside another. Lazy FP state preservation is turned off
//! so the hardware frame always holds real S0–S15 values when captured.

use core::arch::{asm, naked_asm};
use core::convert::Infallible;
use core::ptr::addr_of_mut;

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SCB;

use crate::config::{MAIN_STACK_SIZE, PREEMPTION_HZ, SYSTEM_CLOCK_HZ};
use crate::context::{Context, ThreadEntry};
use crate::error::KernelError;
use crate::kernel::{self, InterruptSource};
use crate::syscall::Syscall;

const SOURCE_TRAP: u32 = 0;
const SOURCE_TIMER: u32 = 1;
const SOURCE_WAKEUP: u32 = 2;

/// Floating-Point Context Control Register.
const FPCCR: *mut u32 = 0xE000_EF34 as *mut u32;
const FPCCR_LSPEN: u32 = 1 << 30;

// ---------------------------------------------------------------------------
// Main thread stack
// ---------------------------------------------------------------------------

#[repr(C, align(8))]
struct MainStack([u8; MAIN_STACK_SIZE]);

static mut MAIN_STACK: MainStack = MainStack([0; MAIN_STACK_SIZE]);

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer as the preemption timer, firing at
/// `PREEMPTION_HZ` from the processor clock.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / PREEMPTION_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Pend a `Wakeup` reschedule. It runs once no other handler is active.
#[inline]
pub fn trigger_pendsv() {
    SCB::set_pendsv();
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Put SVCall, PendSV and SysTick at the lowest priority.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    unsafe {
        scb.set_priority(SystemHandler::SVCall, 0xFF);
        scb.set_priority(SystemHandler::PendSV, 0xFF);
        scb.set_priority(SystemHandler::SysTick, 0xFF);
    }
}

/// Clear FPCCR.LSPEN; automatic FP state preservation (ASPEN) stays on.
pub fn disable_lazy_stacking() {
    unsafe {
        let fpccr = core::ptr::read_volatile(FPCCR);
        core::ptr::write_volatile(FPCCR, fpccr & !FPCCR_LSPEN);
    }
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

#[inline]
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

// ---------------------------------------------------------------------------
// Start-up
// ---------------------------------------------------------------------------

/// Register the calling flow as the main thread and continue in
/// `main(argument)` on the reserved main stack, in Thread mode on the PSP.
///
/// Only returns if the main thread cannot be registered.
pub fn start(
    mut core_peripherals: cortex_m::Peripherals,
    main: ThreadEntry,
    argument: usize,
) -> Result<Infallible, KernelError> {
    cortex_m::interrupt::disable();

    disable_lazy_stacking();
    set_interrupt_priorities(&mut core_peripherals.SCB);

    // SAFETY: only the address is taken; no reference to the static is formed.
    let top = unsafe { addr_of_mut!(MAIN_STACK) } as usize + MAIN_STACK_SIZE;
    let context = Context::new(main, argument, top);
    // SAFETY: the main stack is static and nothing else uses it yet.
    let psp = unsafe { context.restore() };
    if let Err(err) = kernel::with_kernel(|kernel| kernel.register_main(context)) {
        unsafe { cortex_m::interrupt::enable() };
        return Err(err);
    }

    configure_systick(&mut core_peripherals.SYST);
    log::debug!("entering main thread");

    // SAFETY: `psp` points at the frame just written for the main context.
    unsafe { start_first_thread(psp) }
}

/// Unstack a freshly built frame by hand and branch to it in Thread mode.
///
/// # Safety
/// `psp` must point at a non-FPU frame written by [`Context::restore`].
unsafe fn start_first_thread(psp: *mut u32) -> ! {
    asm!(
        // Skip R4-R11 and EXC_RETURN (9 words); none matter for a new thread.
        "adds r0, #36",
        "msr psp, r0",

        // Thread mode uses the PSP from here on (CONTROL.SPSEL = 1).
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Pop the hardware frame manually since we're not really returning from an exception
        "pop {{r0-r3, r12}}",
        "pop {{r4}}",          // LR: the thread return hook
        "pop {{r5}}",          // PC: entry point
        "pop {{r6}}",          // xPSR (discarded)
        "mov lr, r4",
        "orr r5, r5, #1",

        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// Exception handlers
// ---------------------------------------------------------------------------

/// Supervisor call: a thread issued `svc 0`.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn SVCall() {
    naked_asm!(
        "movs r1, #{source}",
        "b {common}",
        source = const SOURCE_TRAP,
        common = sym trampoline,
    );
}

/// Preemption timer.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn SysTick() {
    naked_asm!(
        "movs r1, #{source}",
        "b {common}",
        source = const SOURCE_TIMER,
        common = sym trampoline,
    );
}

/// Deferred reschedule requested through [`trigger_pendsv`].
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "movs r1, #{source}",
        "b {common}",
        source = const SOURCE_WAKEUP,
        common = sym trampoline,
    );
}

/// Shared save/switch/restore path. Expects the source code in R1 and
/// EXC_RETURN in LR.
#[unsafe(naked)]
unsafe extern "C" fn trampoline() {
    naked_asm!(
        // --- Save current context ---
        "mrs r0, psp",
        "tst lr, #0x10",            // EXC_RETURN bit 4 clear: FPU frame
        "it eq",
        "vstmdbeq r0!, {{s16-s31}}",
        "stmdb r0!, {{r4-r11, lr}}",

        // --- Decide ---
        "bl {switch}",              // r0 = switch_context(psp, source)

        // --- Restore next context ---
        "ldmia r0!, {{r4-r11, lr}}",
        "tst lr, #0x10",
        "it eq",
        "vldmiaeq r0!, {{s16-s31}}",
        "msr psp, r0",
        "bx lr",

        switch = sym switch_context,
    );
}

/// Capture the trapped frame, run the kernel, and return the PSP of the
/// context to resume. Called from the trampoline on the MSP.
extern "C" fn switch_context(psp: *mut u32, source: u32) -> *mut u32 {
    kernel::with_kernel(|kernel| {
        let Some(current) = kernel.running() else {
            return psp;
        };
        if let Some(context) = kernel.context_mut(current) {
            // SAFETY: the trampoline just laid out a full frame at `psp`.
            unsafe { context.capture(psp) };
        }

        let next = match source {
            SOURCE_TRAP => kernel.trap(current),
            SOURCE_TIMER => kernel.interrupt(current, InterruptSource::Preemption),
            _ => kernel.interrupt(current, InterruptSource::Wakeup),
        };

        match kernel.context(next) {
            // SAFETY: every registered context owns a live stack.
            Some(context) => unsafe { context.restore() },
            None => psp,
        }
    })
}

// ---------------------------------------------------------------------------
// Thread side
// ---------------------------------------------------------------------------

/// Issue `svc 0` with `code` in R0 and `args` in R1/R2. Returns R0 as the
/// kernel left it.
#[inline(always)]
pub fn trap(code: u32, args: [u32; 2]) -> u32 {
    let mut r0 = code;
    unsafe {
        asm!(
            "svc 0",
            inout("r0") r0,
            in("r1") args[0],
            in("r2") args[1],
            options(nostack),
        );
    }
    r0
}

/// Where a thread's entry function returns to: turns the return value in R0
/// into an exit trap.
#[unsafe(naked)]
unsafe extern "C" fn thread_return() {
    naked_asm!(
        "mov r1, r0",
        "movs r0, #{exit}",
        "svc 0",
        "b .",
        exit = const Syscall::ThreadExit as u32,
    );
}

pub fn thread_return_address() -> u32 {
    thread_return as usize as u32
}
