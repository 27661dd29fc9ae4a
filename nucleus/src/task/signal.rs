use alloc::vec::Vec;

use proc::{CoreId, ProcId, ProcState, SigAction, SigHandler, Signal, TaskId, ThreadState};

use super::proc::signaled_status;
use super::scheduler::SchedulerPolicy;
use crate::error::{KResult, KernelError};
use crate::kernel::Kernel;

impl Kernel {
    /// Send `sig` from `sender` to `target`. Signal 0 only checks that the
    /// target exists and may be signalled.
    pub fn send_signal(&mut self, sender: ProcId, target: ProcId, sig: Signal) -> KResult<()> {
        if !sig.is_valid() {
            return Err(KernelError::InvalidArgument);
        }
        let cred = self
            .procs
            .get(sender)
            .map(|p| p.cred)
            .ok_or(KernelError::NoSuchProcess)?;
        let p = self
            .procs
            .get(target)
            .filter(|p| !p.state.is_terminal())
            .ok_or(KernelError::NoSuchProcess)?;
        if !cred.can_signal(&p.cred) {
            warn!("process {} may not signal {}", sender.0, target.0);
            return Err(KernelError::PermissionDenied);
        }
        if sig == Signal::NULL {
            return Ok(());
        }
        let handler = if sig.is_catchable() {
            p.handler(sig)
        } else {
            SigHandler::Default
        };
        debug!("signal {} to process {} ({:?})", sig.0, target.0, handler);
        if sig == Signal::CONT {
            self.continue_process(target);
        }
        match handler {
            SigHandler::Ignore => Ok(()),
            SigHandler::Handler(_) => {
                if let Some(p) = self.procs.get_mut(target) {
                    p.received |= sig.mask();
                }
                let waiting: Vec<TaskId> = self
                    .procs
                    .get(target)
                    .map(|p| p.threads.clone())
                    .unwrap_or_default();
                for tid in waiting {
                    self.interrupt_wait(tid);
                }
                self.sched_blocking_thread();
                Ok(())
            }
            SigHandler::Default => match sig.default_action() {
                SigAction::Terminate => self.terminate_process(target, signaled_status(sig)),
                SigAction::Stop => {
                    self.stop_process(target);
                    Ok(())
                }
                SigAction::Continue | SigAction::Ignore => Ok(()),
            },
        }
    }

    /// Install a disposition for `sig`, returning the previous one.
    pub fn set_handler(&mut self, pid: ProcId, sig: Signal, handler: SigHandler) -> KResult<SigHandler> {
        if !sig.is_valid() || sig == Signal::NULL {
            return Err(KernelError::InvalidArgument);
        }
        if !sig.is_catchable() && handler != SigHandler::Default {
            return Err(KernelError::InvalidArgument);
        }
        let p = self.procs.get_mut(pid).ok_or(KernelError::NoSuchProcess)?;
        let old = core::mem::replace(&mut p.handlers[sig.0 as usize], handler);
        if handler == SigHandler::Ignore {
            p.received &= !sig.mask();
        }
        Ok(old)
    }

    /// The lowest pending signal `pid` has a handler for. It is consumed;
    /// pending signals the process ignores are discarded on the way.
    pub fn issig(&mut self, pid: ProcId) -> Option<Signal> {
        let p = self.procs.get_mut(pid)?;
        for n in 1..proc::NR_SIGNALS as u8 {
            let sig = Signal(n);
            if p.received & sig.mask() == 0 {
                continue;
            }
            match p.handler(sig) {
                SigHandler::Handler(_) => {
                    p.received &= !sig.mask();
                    return Some(sig);
                }
                SigHandler::Ignore => p.received &= !sig.mask(),
                SigHandler::Default if sig.default_action() == SigAction::Ignore => {
                    p.received &= !sig.mask()
                }
                SigHandler::Default => {}
            }
        }
        None
    }

    /// Arrange SIGALRM for `pid` after `ticks` clock ticks; 0 cancels.
    /// Returns the ticks left on the previous alarm.
    pub fn set_alarm(&mut self, pid: ProcId, ticks: u64) -> KResult<u64> {
        let now = self.ticks;
        let p = self.procs.get_mut(pid).ok_or(KernelError::NoSuchProcess)?;
        let left = p.alarm.map_or(0, |due| due.saturating_sub(now));
        p.alarm = if ticks == 0 { None } else { Some(now + ticks) };
        Ok(left)
    }

    /// Deliver SIGALRM to every process whose alarm is due.
    pub(crate) fn check_alarms(&mut self) {
        let now = self.ticks;
        let due: Vec<ProcId> = self
            .procs
            .iter_mut()
            .filter(|p| p.alarm.map_or(false, |t| t <= now))
            .map(|p| {
                p.alarm = None;
                p.pid
            })
            .collect();
        for pid in due {
            if let Err(e) = self.send_signal(ProcId::IDLE, pid, Signal::ALRM) {
                debug!("alarm for process {} dropped: {}", pid.0, e);
            }
        }
    }

    /// Stop every ready or running thread of `pid`.
    pub(crate) fn stop_process(&mut self, pid: ProcId) {
        let Some(p) = self.procs.get(pid) else {
            return;
        };
        let tids = p.threads.clone();
        let mut cores: Vec<CoreId> = Vec::new();
        for tid in tids {
            let Some(thread) = self.threads.get_mut(tid) else {
                continue;
            };
            match thread.state {
                ThreadState::Ready => {
                    thread.state = ThreadState::Stopped;
                    self.policy.remove(tid);
                }
                ThreadState::Running => {
                    thread.state = ThreadState::Stopped;
                    thread.core = None;
                    if thread.relay.pending {
                        // Runs again when the thread is continued.
                        thread.relay.pending = false;
                        self.outstanding -= 1;
                    }
                    if let Some(core) = self.cores.running(tid) {
                        let c = self.cores.get_mut(core);
                        c.curr_thread = None;
                        c.curr_proc = None;
                        cores.push(core);
                    }
                }
                _ => {}
            }
        }
        if let Some(p) = self.procs.get_mut(pid) {
            p.state = ProcState::Stopped;
        }
        info!("process {} stopped", pid.0);
        for core in cores {
            self.schedule_core(core);
        }
    }

    pub(crate) fn continue_process(&mut self, pid: ProcId) {
        let Some(p) = self.procs.get_mut(pid) else {
            return;
        };
        if p.state != ProcState::Stopped {
            return;
        }
        p.state = ProcState::Ready;
        let tids = p.threads.clone();
        for tid in tids {
            if self.threads.get(tid).map(|t| t.state) == Some(ThreadState::Stopped) {
                self.sched(tid);
            }
        }
        self.refresh_proc_state(pid);
        info!("process {} continued", pid.0);
    }
}
