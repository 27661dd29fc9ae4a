use alloc::vec::Vec;

use interrupt::IpiMessage;
use proc::{CoreId, TaskId, ThreadState};

use super::scheduler::SchedulerPolicy;
use super::sync::Chain;
use crate::kernel::Kernel;
use crate::smp::ipi::IpiSource;
use crate::smp::YieldMode;

impl Kernel {
    /// Make `tid` ready to run.
    pub fn sched(&mut self, tid: TaskId) {
        let Some(thread) = self.threads.get(tid) else {
            return;
        };
        let nice = self.procs.get(thread.proc).map_or(0, |p| p.nice);
        self.set_thread_state(tid, ThreadState::Ready);
        if tid != TaskId::IDLE {
            self.policy.enqueue(tid, nice);
        }
    }

    /// Give `core` its next thread. The master falls back to the idle
    /// thread; a slave with nothing to run is told to idle.
    pub fn schedule_core(&mut self, core: CoreId) {
        if let Some(prev) = self.cores.get(core).curr_thread {
            if let Some(thread) = self.threads.get_mut(prev) {
                debug_assert_ne!(thread.state, ThreadState::Running, "{:?} still running", prev);
                thread.core = None;
            }
        }
        let next = self.policy.pick();
        if core == self.master() {
            self.switch_to(core, next.unwrap_or(TaskId::IDLE));
            return;
        }
        match next {
            Some(tid) => {
                self.switch_to(core, tid);
                let c = self.cores.get_mut(core);
                c.next_thread = Some(tid);
                c.link.mailbox.raise(IpiMessage::Schedule(tid));
            }
            None => {
                let c = self.cores.get_mut(core);
                c.curr_thread = None;
                c.curr_proc = None;
                c.next_thread = None;
                c.link.mailbox.raise(IpiMessage::Idle);
                trace!("core {}: idle", core.0);
            }
        }
    }

    fn switch_to(&mut self, core: CoreId, tid: TaskId) {
        let quantum = self.config.quantum;
        let Some(thread) = self.threads.get_mut(tid) else {
            panic!("dispatching unknown thread {}", tid.0);
        };
        thread.state = ThreadState::Running;
        thread.counter = quantum;
        thread.core = Some(core);
        thread.is_new = false;
        let pid = thread.proc;
        // A request parked by a suspended operation runs again now.
        let rearm = thread.relay.is_parked();
        if rearm {
            thread.relay.pending = true;
            thread.relay.core = Some(core);
            self.outstanding += 1;
        } else {
            thread.interrupted = false;
        }
        if let Some(p) = self.procs.get_mut(pid) {
            p.is_new = false;
        }
        self.refresh_proc_state(pid);
        let c = self.cores.get_mut(core);
        let prev = c.curr_thread.replace(tid);
        c.curr_proc = Some(pid);
        if core == self.master() {
            self.regions.install_page_directory(pid);
        }
        trace!("core {}: switch {:?} -> {}", core.0, prev.map(|t| t.0), tid.0);
    }

    /// Put the thread running on `core` back in the ready queue and dispatch.
    pub fn yield_core(&mut self, core: CoreId) {
        if let Some(tid) = self.cores.get(core).curr_thread {
            if self.threads.get(tid).map(|t| t.state) == Some(ThreadState::Running) {
                self.sched(tid);
            }
        }
        self.schedule_core(core);
    }

    /// Yield the master's current thread.
    pub fn yield_now(&mut self) {
        assert_eq!(self.curr_core, self.master(), "yield with a borrowed core identity");
        match self.yield_mode {
            YieldMode::Up => self.yield_up(),
            YieldMode::Smp => self.yield_smp(),
        }
    }

    fn yield_up(&mut self) {
        let master = self.master();
        self.yield_core(master);
    }

    /// Dispatch on the master goes through the relay: pick up any request
    /// whose interrupt has not been handled yet before giving the core away.
    fn yield_smp(&mut self) {
        self.handle_ipi(IpiSource::Recheck);
        let master = self.master();
        self.yield_core(master);
        self.sched_blocking_thread();
    }

    /// Promote blocked threads whose wait condition now holds, then hand
    /// ready threads to idle cores.
    pub fn sched_blocking_thread(&mut self) {
        // Child waits are woken by `terminate_process` itself.
        let mut satisfied: Vec<Chain> = self
            .chains
            .chains()
            .filter(|chain| match *chain {
                Chain::Join(target) => self
                    .threads
                    .get(target)
                    .map_or(true, |t| !t.state.is_live() || t.state == ThreadState::Stopped),
                _ => false,
            })
            .collect();
        satisfied.sort_unstable();
        for chain in satisfied {
            self.wakeup(chain);
        }

        if self.policy.is_empty() {
            return;
        }
        let master = self.master();
        if self.cores.get(master).curr_thread == Some(TaskId::IDLE) {
            self.yield_core(master);
        }
        let idle: Vec<CoreId> = self
            .cores
            .slaves()
            .filter(|&c| self.cores.get(c).curr_thread.is_none())
            .collect();
        for core in idle {
            if self.policy.is_empty() {
                break;
            }
            self.schedule_core(core);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use memory::RegionTable;
    use proc::{DetachState, ProcId};
    use vfs::RamFs;

    fn kernel(cores: usize) -> Kernel {
        Kernel::boot(Config::new().with_cores(cores), RamFs::new(1), RegionTable::new()).unwrap()
    }

    #[test]
    fn yield_up_round_robins() {
        let mut k = kernel(1);
        let a = k.create_thread(ProcId::INIT, 0, 0, DetachState::Joinable).unwrap();
        let b = k.create_thread(ProcId::INIT, 0, 0, DetachState::Joinable).unwrap();
        k.yield_now();
        assert_eq!(k.current_thread(), Some(a));
        k.yield_now();
        assert_eq!(k.current_thread(), Some(b));
        k.yield_now();
        assert_eq!(k.current_thread(), Some(TaskId(1)));
    }

    #[test]
    fn lower_nice_runs_first() {
        let mut k = kernel(1);
        let child = k.create_process(ProcId::INIT).unwrap();
        let t = k.create_thread(ProcId::INIT, 0, 0, DetachState::Joinable).unwrap();
        k.set_nice(-3).unwrap();
        k.yield_now();
        assert_eq!(k.current_thread(), Some(t));
        assert_eq!(k.current_process(), Some(ProcId::INIT));
        k.yield_now();
        assert_eq!(k.current_thread(), Some(TaskId(1)));
        assert_ne!(k.current_process(), Some(child));
    }

    #[test]
    fn idle_slaves_receive_work() {
        let mut k = kernel(3);
        let p = k.create_process(ProcId::INIT).unwrap();
        k.sched_blocking_thread();
        let t = k.process(p).unwrap().threads[0];
        let core = k.cores().get(CoreId(1));
        assert_eq!(core.curr_thread, Some(t));
        assert_eq!(core.next_thread, Some(t));
        assert_eq!(core.link.mailbox.ack(), Some(IpiMessage::Schedule(t)));
        assert_eq!(k.cores().get(CoreId(2)).curr_thread, None);
        assert_eq!(k.thread(t).unwrap().core, Some(CoreId(1)));
    }

    #[test]
    fn satisfied_joins_wake_in_chain_order() {
        let mut k = kernel(1);
        let spawn = |k: &mut Kernel| k.create_thread(ProcId::INIT, 0, 0, DetachState::Joinable).unwrap();
        let (x, y, a, b) = (spawn(&mut k), spawn(&mut k), spawn(&mut k), spawn(&mut k));
        let init = TaskId(1);
        k.sleep(Chain::Join(y), true);
        k.yield_now();
        k.yield_now();
        assert_eq!(k.current_thread(), Some(a));
        k.sleep(Chain::Join(x), true);
        assert_eq!(k.current_thread(), Some(b));
        for t in [x, y] {
            k.policy.remove(t);
            k.set_thread_state(t, ThreadState::Terminated);
        }
        k.sched_blocking_thread();
        assert!(k.waiters(Chain::Join(x)).is_empty());
        assert!(k.waiters(Chain::Join(y)).is_empty());
        k.yield_now();
        assert_eq!(k.current_thread(), Some(a));
        k.yield_now();
        assert_eq!(k.current_thread(), Some(init));
    }

    #[test]
    fn master_idles_when_nothing_is_ready() {
        let mut k = kernel(1);
        k.sleep(Chain::Event(1), false);
        assert_eq!(k.current_thread(), Some(TaskId::IDLE));
        k.wakeup(Chain::Event(1));
        k.sched_blocking_thread();
        assert_eq!(k.current_thread(), Some(TaskId(1)));
    }
}
