//! Named semaphores.
//!
//! Each semaphore is anchored to an inode under `/sem`; the inode identity is
//! what makes two opens of one name meet. Slot lifecycle:
//!
//! ```text
//!   free ──open(create)──▶ live ──unlink──▶ unlinked ──last close──▶ free
//!                           ▲  │
//!                           └──┘ open / close
//! ```

use alloc::{format, string::String, vec::Vec};

use proc::{Credentials, ProcId, Uid};
use vfs::{FileSystem, InodeId};

use crate::config::Config;
use crate::error::{KResult, KernelError, Resource};
use crate::kernel::Kernel;
use crate::smp::Outcome;
use crate::task::sync::Chain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    pub create: bool,
    pub exclusive: bool,
}

impl OpenFlags {
    pub const NONE: Self = Self {
        create: false,
        exclusive: false,
    };
    pub const CREATE: Self = Self {
        create: true,
        exclusive: false,
    };
    pub const EXCLUSIVE: Self = Self {
        create: true,
        exclusive: true,
    };
}

#[derive(Debug)]
pub struct Semaphore {
    pub name: String,
    pub value: i32,
    /// One entry per open, so a process that opened twice appears twice.
    pub procs: Vec<ProcId>,
    pub inode: InodeId,
    pub unlinked: bool,
    pub uid: Uid,
}

pub struct SemTable {
    slots: Vec<Option<Semaphore>>,
    value_max: i32,
    name_max: usize,
}

impl SemTable {
    pub fn new(config: &Config) -> Self {
        let mut slots = Vec::with_capacity(config.sem_open_max);
        slots.resize_with(config.sem_open_max, || None);
        Self {
            slots,
            value_max: config.sem_value_max,
            name_max: config.sem_name_max,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> Option<&Semaphore> {
        self.slots.get(idx)?.as_ref()
    }

    /// Filesystem path backing `name`.
    fn path(&self, name: &str) -> KResult<String> {
        let base = name.strip_prefix('/').unwrap_or(name);
        if base.is_empty() || base.contains('/') {
            return Err(KernelError::InvalidArgument);
        }
        if base.len() > self.name_max {
            return Err(KernelError::NameTooLong);
        }
        Ok(format!("/sem/{}", base))
    }

    /// The live, still linked slot anchored at `inode`.
    fn find(&self, inode: InodeId) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.as_ref()
                .map_or(false, |s| s.inode == inode && !s.unlinked)
        })
    }

    fn owned_mut(&mut self, idx: usize, pid: ProcId) -> KResult<&mut Semaphore> {
        self.slots
            .get_mut(idx)
            .and_then(Option::as_mut)
            .filter(|s| s.procs.contains(&pid))
            .ok_or(KernelError::InvalidArgument)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &mut self,
        fs: &mut dyn FileSystem,
        name: &str,
        flags: OpenFlags,
        mode: u16,
        value: i32,
        pid: ProcId,
        cred: Credentials,
    ) -> KResult<usize> {
        let path = self.path(name)?;
        if let Some(idx) = fs.lookup(&path).and_then(|inode| self.find(inode)) {
            if flags.create && flags.exclusive {
                return Err(KernelError::AlreadyExists);
            }
            if let Some(sem) = self.slots[idx].as_mut() {
                sem.procs.push(pid);
            }
            return Ok(idx);
        }
        if !flags.create {
            return Err(KernelError::NotFound);
        }
        if !(0..=self.value_max).contains(&value) {
            return Err(KernelError::InvalidArgument);
        }
        let idx = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::Exhausted(Resource::Semaphore))?;
        let inode = fs.create(&path, mode, cred.euid, cred.egid)?;
        self.slots[idx] = Some(Semaphore {
            name: String::from(name.strip_prefix('/').unwrap_or(name)),
            value,
            procs: alloc::vec![pid],
            inode,
            unlinked: false,
            uid: cred.euid,
        });
        Ok(idx)
    }

    pub fn close(&mut self, fs: &mut dyn FileSystem, idx: usize, pid: ProcId) -> KResult<()> {
        let sem = self.owned_mut(idx, pid)?;
        if let Some(i) = sem.procs.iter().position(|&p| p == pid) {
            sem.procs.remove(i);
        }
        trace!("sem {}: closed by {}, {} open", sem.name, pid.0, sem.procs.len());
        self.collect(fs, idx);
        Ok(())
    }

    /// Free `idx` once unlinked and no longer open anywhere.
    fn collect(&mut self, fs: &mut dyn FileSystem, idx: usize) {
        let Some(sem) = self.slots[idx].as_ref() else {
            return;
        };
        if !sem.unlinked || !sem.procs.is_empty() {
            return;
        }
        if let Some(sem) = self.slots[idx].take() {
            if let Err(e) = fs.release_inode(sem.inode) {
                warn!("sem {}: releasing inode {}: {:?}", sem.name, sem.inode, e);
            }
            debug!("sem {} freed (slot {})", sem.name, idx);
        }
    }

    /// Increment the value. Returns `true` on the transition that unblocks waiters.
    pub fn post(&mut self, fs: &mut dyn FileSystem, idx: usize, pid: ProcId) -> KResult<bool> {
        let value_max = self.value_max;
        let sem = self.owned_mut(idx, pid)?;
        fs.lock_inode(sem.inode)?;
        let result = if sem.value >= value_max {
            Err(KernelError::Overflow)
        } else {
            sem.value += 1;
            Ok(sem.value == 1)
        };
        fs.unlock_inode(sem.inode)?;
        result
    }

    /// Take one unit if available.
    pub fn try_acquire(&mut self, idx: usize, pid: ProcId) -> KResult<bool> {
        let sem = self.owned_mut(idx, pid)?;
        if sem.value > 0 {
            sem.value -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn value(&mut self, idx: usize, pid: ProcId) -> KResult<i32> {
        Ok(self.owned_mut(idx, pid)?.value)
    }

    pub fn unlink(&mut self, fs: &mut dyn FileSystem, name: &str, cred: Credentials) -> KResult<()> {
        let path = self.path(name)?;
        let idx = fs
            .lookup(&path)
            .and_then(|inode| self.find(inode))
            .ok_or(KernelError::NotFound)?;
        if let Some(sem) = self.slots[idx].as_mut() {
            if cred.euid != sem.uid && !cred.is_superuser() {
                return Err(KernelError::PermissionDenied);
            }
            fs.unlink(&path)?;
            sem.unlinked = true;
        }
        self.collect(fs, idx);
        Ok(())
    }

    /// Drop every reference `pid` holds, as on process termination.
    pub fn release_process(&mut self, pid: ProcId, fs: &mut dyn FileSystem) {
        for idx in 0..self.slots.len() {
            if let Some(sem) = self.slots[idx].as_mut() {
                sem.procs.retain(|&p| p != pid);
            }
            self.collect(fs, idx);
        }
    }
}

impl Kernel {
    pub fn sem_open(&mut self, name: &str, flags: OpenFlags, mode: u16, value: i32) -> KResult<usize> {
        let pid = self.current_pid()?;
        let cred = self.procs.get(pid).ok_or(KernelError::NoSuchProcess)?.cred;
        let idx = self
            .sems
            .open(&mut *self.fs, name, flags, mode, value, pid, cred)?;
        debug!("sem {} opened by process {} (slot {})", name, pid.0, idx);
        Ok(idx)
    }

    pub fn sem_close(&mut self, idx: usize) -> KResult<()> {
        let pid = self.current_pid()?;
        self.sems.close(&mut *self.fs, idx, pid)
    }

    /// Every waiter is woken on the 0 to 1 transition; all but one go back
    /// to sleep when their wait runs again.
    pub fn sem_post(&mut self, idx: usize) -> KResult<()> {
        let pid = self.current_pid()?;
        if self.sems.post(&mut *self.fs, idx, pid)? {
            self.wakeup(Chain::Semaphore(idx));
        }
        Ok(())
    }

    /// Acquire one unit, or sleep on the semaphore's chain. A suspended wait
    /// re-checks the value when the thread runs again.
    pub fn sem_wait(&mut self, idx: usize) -> KResult<Outcome> {
        let pid = self.current_pid()?;
        if self.sems.try_acquire(idx, pid)? {
            return Ok(Outcome::Done(0));
        }
        self.sleep(Chain::Semaphore(idx), true);
        Ok(Outcome::Suspend { retry: true })
    }

    pub fn sem_trywait(&mut self, idx: usize) -> KResult<()> {
        let pid = self.current_pid()?;
        if self.sems.try_acquire(idx, pid)? {
            Ok(())
        } else {
            Err(KernelError::WouldBlock)
        }
    }

    pub fn sem_getvalue(&mut self, idx: usize) -> KResult<i32> {
        let pid = self.current_pid()?;
        self.sems.value(idx, pid)
    }

    pub fn sem_unlink(&mut self, name: &str) -> KResult<()> {
        let pid = self.current_pid()?;
        let cred = self.procs.get(pid).ok_or(KernelError::NoSuchProcess)?.cred;
        self.sems.unlink(&mut *self.fs, name, cred)
    }

    pub fn sems(&self) -> &SemTable {
        &self.sems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory::RegionTable;
    use vfs::RamFs;

    fn kernel() -> Kernel {
        Kernel::boot(Config::new(), RamFs::new(1), RegionTable::new()).unwrap()
    }

    #[test]
    fn same_name_same_slot() {
        let mut k = kernel();
        let a = k.sem_open("sem1", OpenFlags::CREATE, 0o644, 1).unwrap();
        let b = k.sem_open("/sem1", OpenFlags::NONE, 0, 0).unwrap();
        assert_eq!(a, b);
        assert_eq!(k.sems().get(a).unwrap().procs.len(), 2);
        assert_eq!(
            k.sem_open("sem1", OpenFlags::EXCLUSIVE, 0o644, 1),
            Err(KernelError::AlreadyExists)
        );
    }

    #[test]
    fn close_frees_only_when_unlinked() {
        let mut k = kernel();
        let idx = k.sem_open("s", OpenFlags::CREATE, 0o644, 0).unwrap();
        k.sem_open("s", OpenFlags::NONE, 0, 0).unwrap();
        k.sem_close(idx).unwrap();
        k.sem_close(idx).unwrap();
        assert!(k.sems().get(idx).is_some());
        k.sem_unlink("s").unwrap();
        assert!(k.sems().get(idx).is_none());
        assert_eq!(k.fs().lookup("/sem/s"), None);
    }

    #[test]
    fn unlinked_survives_until_last_close() {
        let mut k = kernel();
        let old = k.sem_open("s", OpenFlags::CREATE, 0o644, 3).unwrap();
        k.sem_unlink("s").unwrap();
        assert_eq!(k.sem_getvalue(old), Ok(3));
        let new = k.sem_open("s", OpenFlags::CREATE, 0o644, 0).unwrap();
        assert_ne!(old, new);
        k.sem_close(old).unwrap();
        assert!(k.sems().get(old).is_none());
        assert_eq!(k.sem_getvalue(new), Ok(0));
    }

    #[test]
    fn argument_errors() {
        let mut k = kernel();
        assert_eq!(k.sem_open("missing", OpenFlags::NONE, 0, 0), Err(KernelError::NotFound));
        assert_eq!(k.sem_open("a/b", OpenFlags::CREATE, 0, 0), Err(KernelError::InvalidArgument));
        assert_eq!(
            k.sem_open(&"x".repeat(33), OpenFlags::CREATE, 0, 0),
            Err(KernelError::NameTooLong)
        );
        assert_eq!(
            k.sem_open("big", OpenFlags::CREATE, 0, 40000),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(k.sem_post(7), Err(KernelError::InvalidArgument));
        assert_eq!(k.sem_post(1000), Err(KernelError::InvalidArgument));
        assert_eq!(k.sem_unlink("missing"), Err(KernelError::NotFound));
    }

    #[test]
    fn table_exhaustion() {
        let mut k = Kernel::boot(Config::new().with_sem_open_max(2), RamFs::new(1), RegionTable::new()).unwrap();
        k.sem_open("a", OpenFlags::CREATE, 0, 0).unwrap();
        k.sem_open("b", OpenFlags::CREATE, 0, 0).unwrap();
        assert_eq!(
            k.sem_open("c", OpenFlags::CREATE, 0, 0),
            Err(KernelError::Exhausted(Resource::Semaphore))
        );
    }

    #[test]
    fn trywait_and_overflow() {
        let mut k = Kernel::boot(Config::new(), RamFs::new(1), RegionTable::new()).unwrap();
        let idx = k.sem_open("t", OpenFlags::CREATE, 0, 1).unwrap();
        assert_eq!(k.sem_trywait(idx), Ok(()));
        assert_eq!(k.sem_trywait(idx), Err(KernelError::WouldBlock));
        k.sems.slots[idx].as_mut().unwrap().value = 32767;
        assert_eq!(k.sem_post(idx), Err(KernelError::Overflow));
    }

    #[test]
    fn wait_blocks_until_post() {
        let mut k = kernel();
        let idx = k.sem_open("w", OpenFlags::CREATE, 0, 0).unwrap();
        let worker = k
            .create_thread(ProcId::INIT, 0, 0, proc::DetachState::Joinable)
            .unwrap();
        assert_eq!(k.sem_wait(idx), Ok(Outcome::Suspend { retry: true }));
        assert_eq!(k.waiters(Chain::Semaphore(idx)), [proc::TaskId(1)]);
        assert_eq!(k.current_thread(), Some(worker));
        k.sem_post(idx).unwrap();
        assert!(k.waiters(Chain::Semaphore(idx)).is_empty());
        assert_eq!(k.sem_getvalue(idx), Ok(1));
        k.yield_now();
        assert_eq!(k.current_thread(), Some(proc::TaskId(1)));
        assert_eq!(k.sem_wait(idx), Ok(Outcome::Done(0)));
        assert_eq!(k.sem_getvalue(idx), Ok(0));
    }

    #[test]
    fn terminating_process_drops_references() {
        let mut k = kernel();
        let child = k.create_process(ProcId::INIT).unwrap();
        k.yield_now();
        assert_eq!(k.current_process(), Some(child));
        let idx = k.sem_open("r", OpenFlags::CREATE, 0, 0).unwrap();
        k.sem_unlink("r").unwrap();
        k.terminate_process(child, 0).unwrap();
        assert!(k.sems().get(idx).is_none());
    }
}
