use proc::{CoreId, DetachState, ProcId, TaskId, ThreadState};

use super::sync::Chain;
use super::table::Slot;
use crate::error::{KResult, KernelError, Resource};
use crate::kernel::Kernel;
use crate::smp::{Outcome, RelayRecord};
use crate::task::scheduler::SchedulerPolicy;

#[derive(Debug, Default)]
pub struct Thread {
    pub tid: TaskId,
    /// Owning process.
    pub proc: ProcId,
    pub state: ThreadState,
    pub detach: DetachState,
    /// Set on termination, consumed by a joiner.
    pub retval: Option<usize>,
    /// Remaining quantum.
    pub counter: usize,
    pub entry: usize,
    pub arg: usize,
    pub relay: RelayRecord,
    /// The sleep chain this thread is linked into.
    pub chain: Option<Chain>,
    pub is_new: bool,
    pub core: Option<CoreId>,
    /// Woken from an interruptible wait by a caught signal.
    pub interrupted: bool,
}

impl Thread {
    pub fn new(tid: TaskId, proc: ProcId) -> Self {
        Self {
            tid,
            proc,
            ..Default::default()
        }
    }
}

impl Slot for Thread {
    type Id = TaskId;

    fn id(&self) -> TaskId {
        self.tid
    }

    fn is_dead(&self) -> bool {
        self.state == ThreadState::Dead
    }

    fn is_new(&self) -> bool {
        self.is_new
    }
}

impl Kernel {
    pub fn thread(&self, tid: TaskId) -> Option<&Thread> {
        self.threads.get(tid)
    }

    pub(crate) fn thread_mut(&mut self, tid: TaskId) -> Option<&mut Thread> {
        self.threads.get_mut(tid)
    }

    /// The thread on the current core.
    pub fn current_thread(&self) -> Option<TaskId> {
        self.cores.get(self.curr_core).curr_thread
    }

    pub(crate) fn current_tid(&self) -> KResult<TaskId> {
        self.current_thread().ok_or(KernelError::NoSuchThread)
    }

    pub(crate) fn alloc_tid(&mut self) -> TaskId {
        let tid = TaskId(self.next_tid);
        self.next_tid += 1;
        tid
    }

    pub(crate) fn set_thread_state(&mut self, tid: TaskId, state: ThreadState) {
        let Some(thread) = self.threads.get_mut(tid) else {
            return;
        };
        thread.state = state;
        let pid = thread.proc;
        self.refresh_proc_state(pid);
    }

    pub fn create_thread(
        &mut self,
        pid: ProcId,
        entry: usize,
        arg: usize,
        detach: DetachState,
    ) -> KResult<TaskId> {
        self.procs
            .get(pid)
            .filter(|p| !p.state.is_terminal())
            .ok_or(KernelError::NoSuchProcess)?;
        let slot = self
            .threads
            .free_slot()
            .ok_or(KernelError::Exhausted(Resource::Thread))?;
        let tid = self.alloc_tid();
        let mut thread = Thread::new(tid, pid);
        thread.entry = entry;
        thread.arg = arg;
        thread.detach = detach;
        thread.is_new = true;
        self.threads.install(slot, thread);
        if let Some(p) = self.procs.get_mut(pid) {
            p.threads.push(tid);
        }
        self.sched(tid);
        debug!("thread {} created in process {}", tid.0, pid.0);
        Ok(tid)
    }

    /// Reclaim a terminated thread, returning its exit value.
    pub fn clear_thread(&mut self, tid: TaskId) -> KResult<usize> {
        let thread = self.threads.get(tid).ok_or(KernelError::NoSuchThread)?;
        if thread.state.is_live() {
            return Err(KernelError::Busy);
        }
        let retval = thread.retval.unwrap_or(0);
        let pid = thread.proc;
        self.threads.free(tid);
        if let Some(p) = self.procs.get_mut(pid) {
            p.threads.retain(|&t| t != tid);
        }
        Ok(retval)
    }

    /// Terminate the current thread. Detached threads are reclaimed at once;
    /// the last live thread of a process takes the process down with it.
    pub fn exit_thread(&mut self, retval: usize) -> KResult<()> {
        let tid = self.current_tid()?;
        if tid == TaskId::IDLE {
            return Err(KernelError::InvalidArgument);
        }
        let core = self.curr_core;
        let c = self.cores.get_mut(core);
        c.curr_thread = None;
        c.curr_proc = None;
        let Some(thread) = self.threads.get_mut(tid) else {
            return Err(KernelError::NoSuchThread);
        };
        let pid = thread.proc;
        thread.core = None;
        if thread.detach == DetachState::Detached {
            thread.state = ThreadState::Terminated;
            self.clear_thread(tid)?;
        } else {
            thread.retval = Some(retval);
            self.set_thread_state(tid, ThreadState::Terminated);
        }
        self.wakeup(Chain::Join(tid));
        trace!("thread {} exited with {:#x}", tid.0, retval);

        let live = self.procs.get(pid).map_or(false, |p| {
            p.threads
                .iter()
                .filter_map(|&t| self.threads.get(t))
                .any(|t| t.state.is_live())
        });
        if !live && pid != ProcId::INIT && pid != ProcId::IDLE {
            self.terminate_process(pid, 0)?;
        }
        self.schedule_core(core);
        Ok(())
    }

    /// Join `target` from the current thread. A running target suspends the
    /// caller until the target terminates.
    pub fn join(&mut self, target: TaskId) -> KResult<Outcome> {
        let me = self.current_tid()?;
        if me == target {
            return Err(KernelError::Deadlock);
        }
        let pid = self
            .threads
            .get(me)
            .map(|t| t.proc)
            .ok_or(KernelError::NoSuchThread)?;
        let thread = self
            .threads
            .get(target)
            .filter(|t| t.proc == pid)
            .ok_or(KernelError::NoSuchThread)?;
        if thread.detach == DetachState::Detached {
            return Err(KernelError::InvalidArgument);
        }
        match thread.state {
            ThreadState::Terminated => Ok(Outcome::Done(self.clear_thread(target)?)),
            ThreadState::Dead | ThreadState::Stopped => Ok(Outcome::Done(0)),
            _ => {
                self.sleep(Chain::Join(target), true);
                Ok(Outcome::Suspend { retry: true })
            }
        }
    }

    /// Remove a thread from every kernel structure. Returns the core it was
    /// running on, which now needs a new thread.
    pub(crate) fn teardown_thread(&mut self, tid: TaskId) -> Option<CoreId> {
        let thread = self.threads.get_mut(tid)?;
        let chain = thread.chain.take();
        let was_pending = thread.relay.pending;
        let ticket = thread.relay.cancel();
        if let Some(chain) = chain {
            self.chains.unlink(chain, tid);
        }
        if was_pending {
            self.outstanding -= 1;
        }
        if let Some(ticket) = ticket {
            ticket.release(Err(KernelError::Interrupted));
        }
        self.policy.remove(tid);
        let core = self.cores.running(tid);
        if let Some(core) = core {
            let c = self.cores.get_mut(core);
            c.curr_thread = None;
            c.curr_proc = None;
            c.next_thread = None;
        }
        self.threads.free(tid);
        core
    }
}
