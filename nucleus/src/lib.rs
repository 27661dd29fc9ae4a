#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[allow(unused)]
#[macro_use]
extern crate log as log_crate;

pub mod clock;
pub mod config;
pub mod error;
pub mod kernel;
pub mod log;
pub mod sem;
pub mod smp;
pub mod syscall;
pub mod task;

pub use config::Config;
pub use error::{KResult, KernelError, Resource};
pub use kernel::Kernel;
pub use smp::master::Master;
pub use smp::slave::SlaveCore;
pub use smp::ticket::{SysResult, Ticket};
pub use smp::{Exception, ExceptionHandler, Outcome, PrivilegedOp};
pub use syscall::Syscall;
pub use task::sync::Chain;

pub use proc::{CoreId, ProcId, TaskId};
