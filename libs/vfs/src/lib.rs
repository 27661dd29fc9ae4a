#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::fmt;

use proc::{Gid, Uid};

pub mod ramfs;

pub use ramfs::RamFs;

/// Identity of an inode: device number plus inode number on that device.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy)]
pub struct InodeId {
    pub dev: u32,
    pub num: u32,
}

impl InodeId {
    pub const fn new(dev: u32, num: u32) -> Self {
        Self { dev, num }
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.num)
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum FsError {
    NotFound,
    Exists,
    NoSpace,
    Invalid,
    Busy,
}

/// The subset of filesystem services the kernel core consumes.
///
/// Paths are absolute (`/sem/name`). Inode locks are not reentrant.
pub trait FileSystem: Send {
    fn name(&self) -> &'static str;
    /// Resolve a path to an inode identity.
    fn lookup(&self, path: &str) -> Option<InodeId>;
    /// Create a regular file. Missing parent directories are created too.
    fn create(&mut self, path: &str, mode: u16, uid: Uid, gid: Gid) -> Result<InodeId, FsError>;
    fn lock_inode(&mut self, inode: InodeId) -> Result<(), FsError>;
    fn unlock_inode(&mut self, inode: InodeId) -> Result<(), FsError>;
    /// Remove the directory entry for `path`. The inode survives until released.
    fn unlink(&mut self, path: &str) -> Result<InodeId, FsError>;
    /// Drop one reference to an inode, freeing it once unreferenced and unlinked.
    fn release_inode(&mut self, inode: InodeId) -> Result<(), FsError>;
}
