use alloc::vec::Vec;

use hashbrown::HashMap;
use proc::{ProcId, TaskId, ThreadState};

use crate::kernel::Kernel;

/// Identity of a sleep chain: the resource being waited on.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy)]
pub enum Chain {
    /// Waiters of a semaphore table slot.
    Semaphore(usize),
    /// Joiners of a thread.
    Join(TaskId),
    /// A parent waiting for a child to terminate.
    Children(ProcId),
    /// Any other kernel event, keyed by the caller.
    Event(usize),
}

/// Threads blocked per chain, in arrival order.
#[derive(Debug, Default)]
pub struct SleepChains {
    chains: HashMap<Chain, Vec<TaskId>>,
}

impl SleepChains {
    pub fn link(&mut self, chain: Chain, tid: TaskId) {
        self.chains.entry(chain).or_default().push(tid);
    }

    pub fn unlink(&mut self, chain: Chain, tid: TaskId) {
        if let Some(waiters) = self.chains.get_mut(&chain) {
            waiters.retain(|&t| t != tid);
            if waiters.is_empty() {
                self.chains.remove(&chain);
            }
        }
    }

    pub fn take(&mut self, chain: Chain) -> Vec<TaskId> {
        self.chains.remove(&chain).unwrap_or_default()
    }

    pub fn waiters(&self, chain: Chain) -> &[TaskId] {
        self.chains.get(&chain).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Chains with at least one waiter.
    pub fn chains(&self) -> impl Iterator<Item = Chain> + '_ {
        self.chains.keys().copied()
    }
}

impl Kernel {
    /// Block the current thread on `chain` and give its core away.
    pub fn sleep(&mut self, chain: Chain, interruptible: bool) {
        let core = self.curr_core;
        let Some(tid) = self.cores.get(core).curr_thread else {
            panic!("sleep on core {} without a thread", core.0);
        };
        assert_ne!(tid, TaskId::IDLE, "the idle thread cannot sleep");
        let state = if interruptible {
            ThreadState::Waiting
        } else {
            ThreadState::Sleeping
        };
        if let Some(thread) = self.threads.get_mut(tid) {
            debug_assert!(thread.chain.is_none(), "thread {} already asleep", tid.0);
            thread.chain = Some(chain);
        }
        self.set_thread_state(tid, state);
        self.chains.link(chain, tid);
        trace!("thread {} sleeps on {:?}", tid.0, chain);
        self.yield_core(core);
    }

    /// Make every thread on `chain` ready and empty the chain. Returns the
    /// number of threads woken.
    pub fn wakeup(&mut self, chain: Chain) -> usize {
        let waiters = self.chains.take(chain);
        let mut woken = 0;
        for tid in waiters {
            let Some(thread) = self.threads.get_mut(tid) else {
                continue;
            };
            if thread.chain != Some(chain) || !thread.state.is_blocked() {
                continue;
            }
            thread.chain = None;
            self.sched(tid);
            woken += 1;
        }
        if woken > 0 {
            trace!("wakeup {:?}: {} thread(s)", chain, woken);
        }
        woken
    }

    pub fn waiters(&self, chain: Chain) -> &[TaskId] {
        self.chains.waiters(chain)
    }

    /// Cut short an interruptible wait. The thread's parked request completes with `EINTR`.
    pub(crate) fn interrupt_wait(&mut self, tid: TaskId) -> bool {
        let Some(thread) = self.threads.get_mut(tid) else {
            return false;
        };
        if thread.state != ThreadState::Waiting {
            return false;
        }
        let chain = thread.chain.take();
        thread.interrupted = true;
        if let Some(chain) = chain {
            self.chains.unlink(chain, tid);
        }
        self.sched(tid);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use memory::RegionTable;
    use proc::DetachState;
    use vfs::RamFs;

    #[test]
    fn wakeup_moves_every_waiter() {
        let mut k = Kernel::boot(Config::new(), RamFs::new(1), RegionTable::new()).unwrap();
        let a = k.create_thread(ProcId::INIT, 0, 0, DetachState::Joinable).unwrap();
        k.sleep(Chain::Event(9), true);
        assert_eq!(k.current_thread(), Some(a));
        k.sleep(Chain::Event(9), false);
        assert_eq!(k.waiters(Chain::Event(9)), [TaskId(1), a]);
        assert_eq!(k.thread(a).unwrap().state, ThreadState::Sleeping);
        assert_eq!(k.current_thread(), Some(TaskId::IDLE));

        assert_eq!(k.wakeup(Chain::Event(9)), 2);
        assert!(k.waiters(Chain::Event(9)).is_empty());
        assert_eq!(k.thread(a).unwrap().state, ThreadState::Ready);
        assert_eq!(k.thread(a).unwrap().chain, None);
        assert_eq!(k.wakeup(Chain::Event(9)), 0);
    }

    #[test]
    fn chains_are_independent() {
        let mut chains = SleepChains::default();
        chains.link(Chain::Semaphore(0), TaskId(2));
        chains.link(Chain::Semaphore(1), TaskId(3));
        chains.unlink(Chain::Semaphore(0), TaskId(2));
        assert_eq!(chains.chains().collect::<Vec<_>>(), [Chain::Semaphore(1)]);
        assert_eq!(chains.take(Chain::Semaphore(1)), [TaskId(3)]);
    }
}
