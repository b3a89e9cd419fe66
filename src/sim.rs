//! # Simulated Machine
//!
//! Host-side stand-in for the CPU, the trap trampoline and the preemption
//! timer. Each thread runs a script of [`Op`]s instead of machine code; traps
//! go through the real register convention and [`Kernel::trap`], and every
//! unit of busy work is followed by a preemption tick. A virtual clock counts
//! units of work, so wait times can be measured without hardware.

use std::vec::Vec;

use crate::context::{Context, ContextId};
use crate::diag::Recorder;
use crate::kernel::{InterruptSource, Kernel};
use crate::syscall::Request;
use crate::thread::ThreadId;

/// One step of a thread script.
#[derive(Debug, Clone, Copy)]
pub enum Op {
    /// Issue a trap. The result is visible to later ops once the thread is
    /// resumed.
    Trap(Request),
    /// Spend this many clock units computing, preemptible after each one.
    Busy(u32),
    /// Remember the current time.
    Mark,
    /// Store the time elapsed since the last `Mark`.
    Lap,
    /// Append the last trap result to the thread's output.
    Record,
    /// Exit with the last trap result plus an offset.
    ExitWithLast(u32),
    /// Exit with the stored lap time.
    ExitWithLap,
}

struct Script {
    thread: ThreadId,
    context: ContextId,
    ops: Vec<Op>,
    pc: usize,
    busy: u32,
    awaiting_result: bool,
    last: u32,
    mark: u64,
    lap: u32,
    output: Vec<u32>,
}

impl Script {
    fn new(thread: ThreadId, context: ContextId) -> Self {
        Self {
            thread,
            context,
            ops: Vec::new(),
            pc: 0,
            busy: 0,
            awaiting_result: false,
            last: 0,
            mark: 0,
            lap: 0,
            output: Vec::new(),
        }
    }
}

enum Effect {
    Trap(Request),
    Tick,
    Nothing,
}

extern "C" fn scripted(_: usize) -> usize {
    0
}

pub struct Machine {
    pub kernel: Kernel<Recorder>,
    pub clock: u64,
    main: ThreadId,
    scripts: Vec<Script>,
}

impl Machine {
    /// Initialized kernel with the main thread registered and running.
    pub fn boot() -> Self {
        let mut kernel = Kernel::with_reporter(Recorder::default());
        kernel.init().unwrap();
        let context = Context::boot();
        let main_ctx = context.id();
        let main = kernel.register_main(context).unwrap();

        Self {
            kernel,
            clock: 0,
            main,
            scripts: std::vec![Script::new(main, main_ctx)],
        }
    }

    pub fn main(&self) -> ThreadId {
        self.main
    }

    /// Spawn a stopped thread that will run `ops`.
    pub fn spawn(&mut self, name: &str, ops: &[Op]) -> ThreadId {
        let id = self.kernel.spawn(name, scripted, 0).unwrap();
        let context = self
            .kernel
            .threads
            .find_by_id(id)
            .and_then(|thread| thread.context_id())
            .unwrap();
        let mut script = Script::new(id, context);
        script.ops.extend_from_slice(ops);
        self.scripts.push(script);
        id
    }

    /// Replace the script of an existing thread (typically main).
    pub fn load(&mut self, thread: ThreadId, ops: &[Op]) {
        let script = self.script_mut(thread);
        script.ops.clear();
        script.ops.extend_from_slice(ops);
        script.pc = 0;
    }

    pub fn output(&self, thread: ThreadId) -> &[u32] {
        &self
            .scripts
            .iter()
            .find(|script| script.thread == thread)
            .unwrap()
            .output
    }

    fn script_mut(&mut self, thread: ThreadId) -> &mut Script {
        self.scripts
            .iter_mut()
            .find(|script| script.thread == thread)
            .unwrap()
    }

    /// Run until main's script is exhausted. Returns `false` if that did
    /// not happen within `budget` steps.
    pub fn run(&mut self, budget: usize) -> bool {
        (0..budget).any(|_| !self.step())
    }

    /// Execute one op of whichever thread the kernel has on the CPU.
    /// Returns `false` once main has nothing left to do.
    fn step(&mut self) -> bool {
        let current = self.kernel.running().unwrap();
        let result = self.kernel.context(current).map_or(0, Context::result);
        let clock = self.clock;

        let effect = match self.scripts.iter_mut().find(|s| s.context == current) {
            // The idle thread: nothing to do but wait for the next tick.
            None => Effect::Tick,
            Some(script) => {
                if script.awaiting_result {
                    script.last = result;
                    script.awaiting_result = false;
                }
                let Some(&op) = script.ops.get(script.pc) else {
                    assert_eq!(script.thread, self.main, "thread ran off its script");
                    return false;
                };
                match op {
                    Op::Trap(request) => {
                        script.pc += 1;
                        script.awaiting_result = true;
                        Effect::Trap(request)
                    }
                    Op::ExitWithLast(offset) => {
                        script.pc += 1;
                        Effect::Trap(Request::Exit(script.last + offset))
                    }
                    Op::ExitWithLap => {
                        script.pc += 1;
                        Effect::Trap(Request::Exit(script.lap))
                    }
                    Op::Busy(units) => {
                        if script.busy == 0 {
                            script.busy = units;
                        }
                        script.busy -= 1;
                        if script.busy == 0 {
                            script.pc += 1;
                        }
                        Effect::Tick
                    }
                    Op::Mark => {
                        script.mark = clock;
                        script.pc += 1;
                        Effect::Nothing
                    }
                    Op::Lap => {
                        script.lap = (clock - script.mark) as u32;
                        script.pc += 1;
                        Effect::Nothing
                    }
                    Op::Record => {
                        script.output.push(script.last);
                        script.pc += 1;
                        Effect::Nothing
                    }
                }
            }
        };

        match effect {
            Effect::Trap(request) => {
                self.clock += 1;
                let (code, args) = request.encode();
                self.kernel
                    .context_mut(current)
                    .unwrap()
                    .load_trap(code, args);
                self.kernel.trap(current);
            }
            Effect::Tick => {
                self.clock += 1;
                self.kernel
                    .interrupt(current, InterruptSource::Preemption);
            }
            Effect::Nothing => {}
        }
        true
    }
}

// ---------------------------------------------------------------------------
// End-to-end scenarios
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const BUDGET: usize = 100_000;

    #[test]
    fn test_counter_thread_and_join() {
        let mut machine = Machine::boot();
        let counter = machine.kernel.counter_new(0).unwrap();
        let worker = machine.spawn(
            "test",
            &[
                Op::Trap(Request::CounterIncrement(counter)),
                Op::Trap(Request::CurrentId),
                Op::ExitWithLast(1000),
            ],
        );
        let main = machine.main();
        machine.load(
            main,
            &[
                Op::Trap(Request::Start(worker)),
                Op::Trap(Request::Join(worker)),
                Op::Record,
                Op::Trap(Request::CounterValue(counter)),
                Op::Record,
            ],
        );

        assert!(machine.run(BUDGET));
        assert_eq!(machine.output(main), &[worker.raw() + 1000, 1]);

        machine.kernel.destroy(worker).unwrap();
        machine.kernel.counter_free(counter).unwrap();
        assert!(machine.kernel.reporter().faults.is_empty());
    }

    #[test]
    fn test_semaphore_admission_buckets() {
        const WORK: u32 = 200;

        let mut machine = Machine::boot();
        let semaphore = machine.kernel.semaphore_new(2).unwrap();
        let body = [
            Op::Mark,
            Op::Trap(Request::Acquire(semaphore)),
            Op::Lap,
            Op::Busy(WORK),
            Op::Trap(Request::Release(semaphore)),
            Op::ExitWithLap,
        ];
        let workers: Vec<ThreadId> = ["test1", "test2", "test3", "test4", "test5"]
            .iter()
            .map(|name| machine.spawn(name, &body))
            .collect();

        let mut main_ops = Vec::new();
        main_ops.extend(workers.iter().map(|&id| Op::Trap(Request::Start(id))));
        for &id in &workers {
            main_ops.push(Op::Trap(Request::Join(id)));
            main_ops.push(Op::Record);
        }
        let main = machine.main();
        machine.load(main, &main_ops);

        assert!(machine.run(BUDGET));
        let waits = machine.output(main).to_vec();
        assert_eq!(waits.len(), 5);

        let max_wait = *waits.iter().max().unwrap();
        let buckets: Vec<u32> = waits
            .iter()
            .map(|&wait| (wait as f64 / max_wait as f64 * 2.0).round() as u32)
            .collect();

        // Slot order decides who gets the freed permits: the first two
        // threads go straight in, the next two wait one round, the last two.
        assert_eq!(buckets, std::vec![0, 0, 1, 1, 2]);

        for &id in &workers {
            machine.kernel.destroy(id).unwrap();
        }
        machine.kernel.semaphore_free(semaphore).unwrap();
        assert!(machine.kernel.reporter().faults.is_empty());
    }

    #[test]
    fn test_equal_priority_threads_time_slice() {
        let mut machine = Machine::boot();
        let counter = machine.kernel.counter_new(0).unwrap();
        let worker = machine.spawn(
            "busy",
            &[
                Op::Busy(50),
                Op::Trap(Request::CounterIncrement(counter)),
                Op::ExitWithLast(0),
            ],
        );
        let main = machine.main();
        machine.load(
            main,
            &[
                Op::Trap(Request::Start(worker)),
                Op::Trap(Request::CounterValue(counter)),
                Op::Record,
            ],
        );

        assert!(machine.run(BUDGET));
        // Main got the CPU back long before the worker finished.
        assert_eq!(machine.output(main), &[0]);
    }

    #[test]
    fn test_higher_priority_thread_runs_to_completion() {
        let mut machine = Machine::boot();
        let counter = machine.kernel.counter_new(0).unwrap();
        let worker = machine.spawn(
            "urgent",
            &[
                Op::Busy(50),
                Op::Trap(Request::CounterIncrement(counter)),
                Op::ExitWithLast(0),
            ],
        );
        let main = machine.main();
        machine.load(
            main,
            &[
                Op::Trap(Request::SetPriority(worker, 1)),
                Op::Trap(Request::Start(worker)),
                Op::Trap(Request::CounterValue(counter)),
                Op::Record,
            ],
        );

        assert!(machine.run(BUDGET));
        assert_eq!(machine.output(main), &[1]);
    }

    #[test]
    fn test_idle_runs_while_everyone_waits() {
        let mut machine = Machine::boot();
        let semaphore = machine.kernel.semaphore_new(0).unwrap();
        let main = machine.main();
        machine.load(main, &[Op::Trap(Request::Acquire(semaphore)), Op::Record]);

        // Main blocks forever; the machine keeps ticking on the idle thread.
        assert!(!machine.run(100));
        assert!(!machine.kernel.thread_info(main).running);
        assert!(machine.kernel.reporter().faults.is_empty());
    }
}
