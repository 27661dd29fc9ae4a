use core::fmt;

use memory::RegionError;
use vfs::FsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Process,
    Thread,
    Semaphore,
}

/// Recoverable errors returned to the immediate caller.
///
/// Relay protocol violations are not represented here: they panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    Exhausted(Resource),
    InvalidArgument,
    NoSuchProcess,
    NoSuchThread,
    NotFound,
    AlreadyExists,
    NameTooLong,
    PermissionDenied,
    Overflow,
    Deadlock,
    NoChildren,
    Busy,
    WouldBlock,
    Interrupted,
    Fs(FsError),
    Region(RegionError),
}

pub type KResult<T> = Result<T, KernelError>;

pub mod errno {
    pub const EPERM: isize = 1;
    pub const ENOENT: isize = 2;
    pub const ESRCH: isize = 3;
    pub const EINTR: isize = 4;
    pub const EIO: isize = 5;
    pub const ECHILD: isize = 10;
    pub const EAGAIN: isize = 11;
    pub const ENOMEM: isize = 12;
    pub const EBUSY: isize = 16;
    pub const EEXIST: isize = 17;
    pub const EINVAL: isize = 22;
    pub const ENFILE: isize = 23;
    pub const EDEADLK: isize = 35;
    pub const ENAMETOOLONG: isize = 36;
    pub const EOVERFLOW: isize = 75;
}

impl KernelError {
    /// Negative error number returned across the syscall boundary.
    pub fn errno(&self) -> isize {
        use errno::*;
        let e = match self {
            KernelError::Exhausted(Resource::Semaphore) => ENFILE,
            KernelError::Exhausted(_) => EAGAIN,
            KernelError::InvalidArgument => EINVAL,
            KernelError::NoSuchProcess | KernelError::NoSuchThread => ESRCH,
            KernelError::NotFound => ENOENT,
            KernelError::AlreadyExists => EEXIST,
            KernelError::NameTooLong => ENAMETOOLONG,
            KernelError::PermissionDenied => EPERM,
            KernelError::Overflow => EOVERFLOW,
            KernelError::Deadlock => EDEADLK,
            KernelError::NoChildren => ECHILD,
            KernelError::Busy => EBUSY,
            KernelError::WouldBlock => EAGAIN,
            KernelError::Interrupted => EINTR,
            KernelError::Fs(FsError::NoSpace) | KernelError::Region(RegionError::NoMemory) => ENOMEM,
            KernelError::Fs(_) | KernelError::Region(_) => EIO,
        };
        -e
    }
}

impl From<FsError> for KernelError {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound => KernelError::NotFound,
            FsError::Exists => KernelError::AlreadyExists,
            e => KernelError::Fs(e),
        }
    }
}

impl From<RegionError> for KernelError {
    fn from(e: RegionError) -> Self {
        KernelError::Region(e)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::Exhausted(r) => write!(f, "no free {:?} slot", r),
            KernelError::Fs(e) => write!(f, "filesystem error: {:?}", e),
            KernelError::Region(e) => write!(f, "region error: {:?}", e),
            e => write!(f, "{:?} ({})", e, e.errno()),
        }
    }
}
