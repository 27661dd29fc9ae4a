#![cfg_attr(not(test), no_std)]

mod signal;

pub use signal::*;

#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Default)]
pub struct ProcId(pub usize);

impl ProcId {
    /// The idle process. Always lives in slot 0.
    pub const IDLE: Self = Self(0);
    /// The init process. Always lives in slot 1 and adopts orphans.
    pub const INIT: Self = Self(1);
}

#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Default)]
pub struct TaskId(pub usize);

impl TaskId {
    pub const IDLE: Self = Self(0);
}

#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Default)]
pub struct CoreId(pub usize);

impl CoreId {
    pub const BOOT: Self = Self(0);
}

/// Process life cycle:
///
/// ```text
///                  ___________________________
///                 |                           |
///                 v                           |
/// [Dead] --> Ready ---> Running ---> Waiting/Sleeping/Stopped
///                 ^         |
///                 |_________|
///                           |
///                           v
///                        Zombie --> [Dead]
/// ```
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Default)]
#[repr(u8)]
pub enum ProcState {
    #[default]
    Dead,
    Zombie,
    Running,
    Ready,
    /// Waiting (interruptible).
    Waiting,
    /// Waiting (uninterruptible).
    Sleeping,
    Stopped,
}

impl ProcState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcState::Zombie | ProcState::Dead)
    }
}

#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Default)]
#[repr(u8)]
pub enum ThreadState {
    #[default]
    Dead,
    Ready,
    Running,
    /// Blocked on a join or a condition (interruptible).
    Waiting,
    /// Blocked on a condition (uninterruptible).
    Sleeping,
    Stopped,
    /// Finished, return value not yet collected.
    Terminated,
}

impl ThreadState {
    #[inline]
    pub fn is_blocked(self) -> bool {
        matches!(self, ThreadState::Waiting | ThreadState::Sleeping)
    }

    #[inline]
    pub fn is_live(self) -> bool {
        !matches!(self, ThreadState::Dead | ThreadState::Terminated)
    }
}

#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, Default)]
#[repr(u8)]
pub enum CoreState {
    Running,
    #[default]
    Ready,
}

unsafe impl bytemuck::NoUninit for CoreState {}

#[derive(Debug, Eq, PartialEq, Clone, Copy, Default)]
pub enum DetachState {
    #[default]
    Joinable,
    Detached,
}

pub type Uid = u16;
pub type Gid = u16;

pub const SUPERUSER: Uid = 0;
pub const SUPERGROUP: Gid = 0;

/// Real, effective and saved-set user and group IDs.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Default)]
pub struct Credentials {
    pub uid: Uid,
    pub euid: Uid,
    pub suid: Uid,
    pub gid: Gid,
    pub egid: Gid,
    pub sgid: Gid,
}

impl Credentials {
    pub const ROOT: Self = Self::new(SUPERUSER, SUPERGROUP);

    pub const fn new(uid: Uid, gid: Gid) -> Self {
        Self {
            uid,
            euid: uid,
            suid: uid,
            gid,
            egid: gid,
            sgid: gid,
        }
    }

    #[inline]
    pub fn is_superuser(&self) -> bool {
        self.uid == SUPERUSER || self.euid == SUPERUSER
    }

    /// May a process with these credentials signal a process owned by `target`?
    pub fn can_signal(&self, target: &Credentials) -> bool {
        self.is_superuser()
            || self.uid == target.uid
            || self.euid == target.uid
            || self.uid == target.euid
            || self.euid == target.euid
    }
}
