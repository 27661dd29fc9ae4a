use alloc::{string::String, vec::Vec};

use memory::{RegionError, RegionId, RegionSlot, NR_PREGIONS};
use proc::{Credentials, ProcId, ProcState, SigHandler, Signal, TaskId, ThreadState, NR_SIGNALS};
use vfs::InodeId;

use super::sync::Chain;
use super::table::Slot;
use super::thread::Thread;
use crate::error::{KResult, KernelError, Resource};
use crate::kernel::Kernel;
use crate::task::scheduler::SchedulerPolicy;

/// Virtual address each region slot is attached at.
pub const USER_BASE: [usize; NR_PREGIONS] = [0x0040_0000, 0x0080_0000, 0x0100_0000];

pub const NICE_MIN: i32 = -20;
pub const NICE_MAX: i32 = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PRegion {
    pub region: RegionId,
    pub start: usize,
}

#[derive(Debug, Default)]
pub struct Process {
    pub pid: ProcId,
    pub father: Option<ProcId>,
    pub pgrp: ProcId,
    pub cred: Credentials,
    pub name: String,

    pub state: ProcState,
    pub is_new: bool,
    pub nice: i32,
    /// Absolute tick at which SIGALRM is due.
    pub alarm: Option<u64>,
    pub status: i32,

    pub utime: u64,
    pub ktime: u64,
    pub cutime: u64,
    pub cktime: u64,

    pub ofiles: Vec<Option<InodeId>>,
    pub pwd: Option<InodeId>,
    pub root: Option<InodeId>,
    pub umask: u16,

    pub pregs: [Option<PRegion>; NR_PREGIONS],

    /// Pending signals, one bit per signal.
    pub received: u32,
    pub handlers: [SigHandler; NR_SIGNALS],

    pub threads: Vec<TaskId>,
    pub nchildren: usize,
}

impl Process {
    pub fn new(pid: ProcId, father: Option<ProcId>, cred: Credentials, name: String) -> Self {
        Self {
            pid,
            father,
            pgrp: pid,
            cred,
            name,
            umask: 0o022,
            ..Default::default()
        }
    }

    #[inline]
    pub fn handler(&self, sig: Signal) -> SigHandler {
        self.handlers[sig.0 as usize]
    }
}

impl Slot for Process {
    type Id = ProcId;

    fn id(&self) -> ProcId {
        self.pid
    }

    fn is_dead(&self) -> bool {
        self.state == ProcState::Dead
    }

    fn is_new(&self) -> bool {
        self.is_new
    }
}

/// Exit status of a process that called exit.
#[inline]
pub const fn exit_status(code: i32) -> i32 {
    (code & 0xff) << 8
}

/// Exit status of a process terminated by `sig`.
#[inline]
pub const fn signaled_status(sig: Signal) -> i32 {
    (sig.0 & 0x7f) as i32
}

impl Kernel {
    pub fn process(&self, pid: ProcId) -> Option<&Process> {
        self.procs.get(pid)
    }

    pub(crate) fn process_mut(&mut self, pid: ProcId) -> Option<&mut Process> {
        self.procs.get_mut(pid)
    }

    /// The process owning the thread on the current core.
    pub fn current_process(&self) -> Option<ProcId> {
        self.cores.get(self.curr_core).curr_proc
    }

    pub(crate) fn current_pid(&self) -> KResult<ProcId> {
        self.current_process().ok_or(KernelError::NoSuchProcess)
    }

    /// Fork-like creation: the child inherits `parent`'s credentials, files,
    /// signal dispositions and memory regions, and starts with one ready thread.
    pub fn create_process(&mut self, parent: ProcId) -> KResult<ProcId> {
        let father = self
            .procs
            .get(parent)
            .filter(|p| !p.state.is_terminal())
            .ok_or(KernelError::NoSuchProcess)?;
        let pslot = self
            .procs
            .free_slot()
            .ok_or(KernelError::Exhausted(Resource::Process))?;
        let tslot = self
            .threads
            .free_slot()
            .ok_or(KernelError::Exhausted(Resource::Thread))?;
        let pid = ProcId(self.next_pid);
        let mut child = Process::new(pid, Some(parent), father.cred, father.name.clone());
        child.pgrp = father.pgrp;
        child.nice = father.nice;
        child.umask = father.umask;
        child.pwd = father.pwd;
        child.root = father.root;
        child.ofiles = father.ofiles.clone();
        child.handlers = father.handlers;
        let pregs = father.pregs;

        let mut attached = Vec::new();
        for slot in RegionSlot::ALL {
            let Some(preg) = pregs[slot.index()] else {
                continue;
            };
            if let Err(e) = self.regions.attach_region(pid, slot, preg.start, preg.region) {
                for slot in attached {
                    if let Err(e) = self.regions.detach_region(pid, slot) {
                        warn!("fork of {}: rollback of {:?} failed: {:?}", parent.0, slot, e);
                    }
                }
                warn!("fork of {}: region attach failed: {:?}", parent.0, e);
                return Err(e.into());
            }
            attached.push(slot);
            child.pregs[slot.index()] = Some(preg);
        }

        self.next_pid += 1;
        let tid = self.alloc_tid();
        child.is_new = true;
        child.threads.push(tid);
        self.procs.install(pslot, child);
        if let Some(father) = self.procs.get_mut(parent) {
            father.nchildren += 1;
        }
        let mut thread = Thread::new(tid, pid);
        thread.is_new = true;
        self.threads.install(tslot, thread);
        self.sched(tid);
        info!("process {} created by {}", pid.0, parent.0);
        Ok(pid)
    }

    /// Tear a process down to a zombie: threads, regions, files and
    /// semaphores are released and the parent is notified.
    pub fn terminate_process(&mut self, pid: ProcId, status: i32) -> KResult<()> {
        if pid == ProcId::IDLE || pid == ProcId::INIT {
            warn!("refusing to terminate process {}", pid.0);
            return Err(KernelError::PermissionDenied);
        }
        let p = self
            .procs
            .get(pid)
            .filter(|p| !p.state.is_terminal())
            .ok_or(KernelError::NoSuchProcess)?;
        let tids = p.threads.clone();
        let pregs = p.pregs;

        let mut cores = Vec::new();
        for tid in tids {
            if let Some(core) = self.teardown_thread(tid) {
                cores.push(core);
            }
        }
        for slot in RegionSlot::ALL {
            if pregs[slot.index()].is_some() {
                if let Err(e) = self.regions.detach_region(pid, slot) {
                    warn!("process {}: detach {:?} failed: {:?}", pid.0, slot, e);
                }
            }
        }
        self.sems.release_process(pid, &mut *self.fs);

        // Orphans go to init.
        let mut adopted = 0;
        let mut zombie_orphan = false;
        for child in self.procs.iter_mut() {
            if child.father == Some(pid) {
                child.father = Some(ProcId::INIT);
                adopted += 1;
                zombie_orphan |= child.state == ProcState::Zombie;
            }
        }
        if let Some(init) = self.procs.get_mut(ProcId::INIT) {
            init.nchildren += adopted;
        }
        if zombie_orphan {
            self.wakeup(Chain::Children(ProcId::INIT));
        }

        let Some(p) = self.procs.get_mut(pid) else {
            return Ok(());
        };
        p.threads.clear();
        p.pregs = [None; NR_PREGIONS];
        p.ofiles.iter_mut().for_each(|f| *f = None);
        p.pwd = None;
        p.root = None;
        p.alarm = None;
        p.received = 0;
        p.nchildren = 0;
        p.state = ProcState::Zombie;
        p.status = status;
        let father = p.father;
        info!("process {} terminated with status {:#x}", pid.0, status);

        if let Some(father) = father {
            let ignores = self
                .procs
                .get(father)
                .map_or(true, |f| f.handler(Signal::CHLD) == SigHandler::Ignore);
            if ignores {
                self.destroy_process(pid)?;
            } else {
                if let Some(f) = self.procs.get_mut(father) {
                    f.received |= Signal::CHLD.mask();
                }
                self.wakeup(Chain::Children(father));
            }
        }
        for core in cores {
            self.schedule_core(core);
        }
        Ok(())
    }

    /// Bury a zombie, returning its slot to the free pool.
    pub fn destroy_process(&mut self, pid: ProcId) -> KResult<()> {
        if pid == ProcId::IDLE || pid == ProcId::INIT {
            return Err(KernelError::PermissionDenied);
        }
        let p = self.procs.get(pid).ok_or(KernelError::NoSuchProcess)?;
        if p.state != ProcState::Zombie {
            return Err(KernelError::Busy);
        }
        let father = p.father;
        self.procs.free(pid);
        if let Some(f) = father.and_then(|f| self.procs.get_mut(f)) {
            f.nchildren = f.nchildren.saturating_sub(1);
        }
        debug!("process {} buried", pid.0);
        Ok(())
    }

    /// Collect a zombie child of the current process. `Ok(None)` means a
    /// matching child exists but none has terminated yet.
    pub fn wait_child(&mut self, which: Option<ProcId>) -> KResult<Option<(ProcId, i32)>> {
        let me = self.current_pid()?;
        let mut found = false;
        let mut zombie = None;
        for child in self.procs.iter() {
            if child.father != Some(me) || which.map_or(false, |w| w != child.pid) {
                continue;
            }
            found = true;
            if child.state == ProcState::Zombie {
                zombie = Some((
                    child.pid,
                    child.status,
                    child.utime + child.cutime,
                    child.ktime + child.cktime,
                ));
                break;
            }
        }
        if !found {
            return Err(KernelError::NoChildren);
        }
        let Some((pid, status, utime, ktime)) = zombie else {
            return Ok(None);
        };
        if let Some(p) = self.procs.get_mut(me) {
            p.cutime += utime;
            p.cktime += ktime;
            p.received &= !Signal::CHLD.mask();
        }
        self.destroy_process(pid)?;
        Ok(Some((pid, status)))
    }

    /// Adjust the current process' nice value. Returns the new value.
    pub fn set_nice(&mut self, incr: i32) -> KResult<i32> {
        let pid = self.current_pid()?;
        let p = self.procs.get_mut(pid).ok_or(KernelError::NoSuchProcess)?;
        if incr < 0 && !p.cred.is_superuser() {
            return Err(KernelError::PermissionDenied);
        }
        p.nice = (p.nice + incr).clamp(NICE_MIN, NICE_MAX);
        let nice = p.nice;
        let ready: Vec<TaskId> = p.threads.clone();
        for tid in ready {
            if self.policy.remove(tid) {
                self.policy.enqueue(tid, nice);
            }
        }
        Ok(nice)
    }

    /// Grow the current process' heap region. Returns the new heap size.
    pub fn grow_heap(&mut self, delta: isize) -> KResult<usize> {
        let pid = self.current_pid()?;
        let p = self.procs.get(pid).ok_or(KernelError::NoSuchProcess)?;
        if p.pregs[RegionSlot::Heap.index()].is_none() {
            return Err(RegionError::NotAttached.into());
        }
        Ok(self.regions.grow_region(pid, RegionSlot::Heap, delta)?)
    }

    /// Derive a process' state from its threads. Zombie, stopped and dead
    /// processes keep their state.
    pub(crate) fn refresh_proc_state(&mut self, pid: ProcId) {
        let Some(p) = self.procs.get(pid) else {
            return;
        };
        if matches!(p.state, ProcState::Zombie | ProcState::Stopped)
            || (p.state == ProcState::Dead && !p.is_new)
        {
            return;
        }
        let mut derived = None;
        for state in p.threads.iter().filter_map(|&t| self.threads.get(t)).map(|t| t.state) {
            let candidate = match state {
                ThreadState::Running => ProcState::Running,
                ThreadState::Ready => ProcState::Ready,
                ThreadState::Waiting => ProcState::Waiting,
                ThreadState::Sleeping => ProcState::Sleeping,
                _ => continue,
            };
            derived = Some(match derived {
                Some(best) if Self::rank(best) >= Self::rank(candidate) => best,
                _ => candidate,
            });
        }
        if let (Some(state), Some(p)) = (derived, self.procs.get_mut(pid)) {
            p.state = state;
        }
    }

    fn rank(state: ProcState) -> u8 {
        match state {
            ProcState::Running => 4,
            ProcState::Ready => 3,
            ProcState::Waiting => 2,
            ProcState::Sleeping => 1,
            _ => 0,
        }
    }
}
