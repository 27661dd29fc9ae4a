use alloc::string::String;

use interrupt::IpiKind;
use proc::{DetachState, ProcId, SigHandler, Signal, TaskId, ThreadState};

use crate::error::KResult;
use crate::kernel::Kernel;
use crate::sem::OpenFlags;
use crate::smp::{Outcome, PrivilegedOp};
use crate::task::proc::exit_status;
use crate::task::sync::Chain;

/// System calls, executed by the master in the caller's core identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Syscall {
    Yield,
    GetPid,
    /// Returns the new nice value, sign-extended.
    Nice(i32),
    Fork,
    Exit(i32),
    /// Collect a terminated child, `None` for any. Returns its pid.
    Wait { pid: Option<ProcId> },
    Kill { pid: ProcId, sig: Signal },
    Sigaction { sig: Signal, handler: SigHandler },
    Alarm(u64),
    ThreadCreate { entry: usize, arg: usize, detached: bool },
    ThreadExit(usize),
    ThreadJoin(TaskId),
    SemOpen { name: String, flags: OpenFlags, mode: u16, value: i32 },
    SemClose(usize),
    SemPost(usize),
    SemWait(usize),
    SemTryWait(usize),
    SemGetValue(usize),
    SemUnlink(String),
    /// Grow the heap by a signed byte count. Returns the new heap size.
    Brk(isize),
}

impl PrivilegedOp for Syscall {
    fn kind(&self) -> IpiKind {
        IpiKind::Syscall
    }

    fn execute(&mut self, kernel: &mut Kernel) -> KResult<Outcome> {
        let value = match self {
            Syscall::Yield => {
                let core = kernel.curr_core();
                let me = kernel.current_tid()?;
                kernel.yield_core(core);
                let still_running = kernel
                    .thread(me)
                    .map_or(false, |t| t.state == ThreadState::Running && t.core == Some(core));
                if !still_running {
                    return Ok(Outcome::Suspend { retry: false });
                }
                0
            }
            Syscall::GetPid => kernel.current_pid()?.0,
            Syscall::Nice(incr) => kernel.set_nice(*incr)? as isize as usize,
            Syscall::Fork => {
                let parent = kernel.current_pid()?;
                kernel.create_process(parent)?.0
            }
            Syscall::Exit(code) => {
                let pid = kernel.current_pid()?;
                kernel.terminate_process(pid, exit_status(*code))?;
                0
            }
            Syscall::Wait { pid } => match kernel.wait_child(*pid)? {
                Some((child, _status)) => child.0,
                None => {
                    let me = kernel.current_pid()?;
                    kernel.sleep(Chain::Children(me), true);
                    return Ok(Outcome::Suspend { retry: true });
                }
            },
            Syscall::Kill { pid, sig } => {
                let me = kernel.current_pid()?;
                kernel.send_signal(me, *pid, *sig)?;
                0
            }
            Syscall::Sigaction { sig, handler } => {
                let me = kernel.current_pid()?;
                match kernel.set_handler(me, *sig, *handler)? {
                    SigHandler::Handler(entry) => entry,
                    _ => 0,
                }
            }
            Syscall::Alarm(ticks) => {
                let me = kernel.current_pid()?;
                kernel.set_alarm(me, *ticks)? as usize
            }
            Syscall::ThreadCreate {
                entry,
                arg,
                detached,
            } => {
                let me = kernel.current_pid()?;
                let detach = if *detached {
                    DetachState::Detached
                } else {
                    DetachState::Joinable
                };
                kernel.create_thread(me, *entry, *arg, detach)?.0
            }
            Syscall::ThreadExit(retval) => {
                kernel.exit_thread(*retval)?;
                0
            }
            Syscall::ThreadJoin(tid) => return kernel.join(*tid),
            Syscall::SemOpen {
                name,
                flags,
                mode,
                value,
            } => kernel.sem_open(name, *flags, *mode, *value)?,
            Syscall::SemClose(idx) => {
                kernel.sem_close(*idx)?;
                0
            }
            Syscall::SemPost(idx) => {
                kernel.sem_post(*idx)?;
                0
            }
            Syscall::SemWait(idx) => return kernel.sem_wait(*idx),
            Syscall::SemTryWait(idx) => {
                kernel.sem_trywait(*idx)?;
                0
            }
            Syscall::SemGetValue(idx) => kernel.sem_getvalue(*idx)? as usize,
            Syscall::SemUnlink(name) => {
                kernel.sem_unlink(name)?;
                0
            }
            Syscall::Brk(delta) => kernel.grow_heap(*delta)?,
        };
        Ok(Outcome::Done(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::KernelError;
    use memory::RegionTable;
    use vfs::RamFs;

    fn kernel() -> Kernel {
        Kernel::boot(Config::new(), RamFs::new(1), RegionTable::new()).unwrap()
    }

    #[test]
    fn fork_then_wait() {
        let mut k = kernel();
        let child = k.syscall(Syscall::Fork).wait().unwrap();
        let waiting = k.syscall(Syscall::Wait { pid: None });
        assert!(!waiting.is_released());
        assert_eq!(k.current_process(), Some(ProcId(child)));
        k.syscall(Syscall::Exit(3)).wait().unwrap();
        assert_eq!(waiting.result(), Some(Ok(child)));
        assert_eq!(k.current_process(), Some(ProcId::INIT));
        assert!(k.process(ProcId(child)).is_none());
    }

    #[test]
    fn yield_without_competition_returns() {
        let mut k = kernel();
        assert_eq!(k.syscall(Syscall::Yield).result(), Some(Ok(0)));
        assert_eq!(k.current_thread(), Some(TaskId(1)));
    }

    #[test]
    fn yield_parks_until_dispatched() {
        let mut k = kernel();
        let other = k.syscall(Syscall::ThreadCreate {
            entry: 0x1000,
            arg: 0,
            detached: false,
        });
        let other = TaskId(other.wait().unwrap());
        let yielded = k.syscall(Syscall::Yield);
        assert!(!yielded.is_released());
        assert_eq!(k.current_thread(), Some(other));
        k.syscall(Syscall::ThreadExit(5)).wait().unwrap();
        assert_eq!(yielded.result(), Some(Ok(0)));
        assert_eq!(k.syscall(Syscall::ThreadJoin(other)).wait(), Ok(5));
    }

    #[test]
    fn errors_reach_the_ticket() {
        let mut k = kernel();
        assert_eq!(
            k.syscall(Syscall::SemPost(3)).wait(),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            k.syscall(Syscall::Wait { pid: None }).wait(),
            Err(KernelError::NoChildren)
        );
        assert_eq!(
            k.syscall(Syscall::Exit(0)).wait(),
            Err(KernelError::PermissionDenied)
        );
    }

    #[test]
    fn brk_grows_heap() {
        let mut k = kernel();
        let size = k.syscall(Syscall::Brk(4096)).wait().unwrap();
        assert_eq!(size, 2 * memory::PAGE_SIZE);
    }
}
