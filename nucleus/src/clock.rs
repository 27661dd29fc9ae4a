use interrupt::IpiKind;
use proc::{CoreId, TaskId, ThreadState};

use crate::error::KResult;
use crate::kernel::Kernel;
use crate::smp::{Outcome, PrivilegedOp};

/// What a clock tick was charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The core had nothing but the idle thread.
    Idle,
    /// The thread was inside a kernel request.
    Kernel,
    User { remaining: usize },
    /// The quantum ran out and the core was rescheduled.
    Expired,
}

impl Kernel {
    /// Account one tick of `core`. The master's ticks also drive the alarm clock.
    pub fn clock_tick(&mut self, core: CoreId) -> TickOutcome {
        if core == self.master() {
            self.ticks += 1;
            self.check_alarms();
        }
        let Some(tid) = self.cores.get(core).curr_thread.filter(|&t| t != TaskId::IDLE) else {
            return TickOutcome::Idle;
        };
        let Some(thread) = self.threads.get_mut(tid) else {
            return TickOutcome::Idle;
        };
        let pid = thread.proc;
        if thread.state != ThreadState::Running || thread.relay.is_busy() {
            if let Some(p) = self.procs.get_mut(pid) {
                p.ktime += 1;
            }
            return TickOutcome::Kernel;
        }
        assert!(thread.counter > 0, "thread {}: quantum counter is zero", tid.0);
        thread.counter -= 1;
        let remaining = thread.counter;
        if let Some(p) = self.procs.get_mut(pid) {
            p.utime += 1;
        }
        if remaining > 0 {
            return TickOutcome::User { remaining };
        }
        debug!("core {}: thread {} quantum expired", core.0, tid.0);
        self.yield_core(core);
        self.sched_blocking_thread();
        TickOutcome::Expired
    }
}

/// A timer interrupt taken on a secondary core.
#[derive(Debug, Clone, Copy)]
pub struct ClockTick;

impl PrivilegedOp for ClockTick {
    fn kind(&self) -> IpiKind {
        IpiKind::Exception
    }

    fn execute(&mut self, kernel: &mut Kernel) -> KResult<Outcome> {
        let core = kernel.curr_core();
        Ok(match kernel.clock_tick(core) {
            TickOutcome::User { remaining } => Outcome::Done(remaining),
            _ => Outcome::Done(0),
        })
    }
}
