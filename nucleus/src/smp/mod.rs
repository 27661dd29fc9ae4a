use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::fmt;
use core::sync::atomic::Ordering;

use atomic::Atomic;
use crossbeam::utils::CachePadded;
use interrupt::{InterruptLine, IpiKind, IpiMessage};
use proc::{CoreId, CoreState, ProcId, TaskId};
use spin::Mutex;

use crate::error::KResult;
use crate::kernel::Kernel;

pub mod ipi;
pub mod master;
pub mod slave;
pub mod ticket;

pub use slave::SlaveCore;
use ticket::Ticket;

/// Result of executing a privileged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done(usize),
    /// The calling thread went to sleep. With `retry` the operation runs again
    /// when the thread is next dispatched, otherwise it completes with `Done(0)`.
    Suspend { retry: bool },
}

/// Handler run by the master on behalf of a core that took an exception.
pub type ExceptionHandler = fn(&mut Kernel) -> KResult<()>;

/// Work only the master core may perform.
pub trait PrivilegedOp: Send + fmt::Debug {
    fn kind(&self) -> IpiKind;
    fn execute(&mut self, kernel: &mut Kernel) -> KResult<Outcome>;
    fn exception_handler(&self) -> Option<ExceptionHandler> {
        None
    }
}

#[derive(Clone, Copy)]
pub struct Exception {
    pub handler: ExceptionHandler,
}

impl Exception {
    pub const fn new(handler: ExceptionHandler) -> Self {
        Self { handler }
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exception({:#x})", self.handler as usize)
    }
}

impl PrivilegedOp for Exception {
    fn kind(&self) -> IpiKind {
        IpiKind::Exception
    }

    fn execute(&mut self, kernel: &mut Kernel) -> KResult<Outcome> {
        (self.handler)(kernel)?;
        Ok(Outcome::Done(0))
    }

    fn exception_handler(&self) -> Option<ExceptionHandler> {
        Some(self.handler)
    }
}

/// Completes a suspended request that must not be re-executed.
#[derive(Debug)]
pub(crate) struct Resume;

impl PrivilegedOp for Resume {
    fn kind(&self) -> IpiKind {
        IpiKind::Syscall
    }

    fn execute(&mut self, _kernel: &mut Kernel) -> KResult<Outcome> {
        Ok(Outcome::Done(0))
    }
}

/// Per-thread relay state, used while the thread runs on a slave core.
///
/// `pending` means accepted by the master but not yet serviced. A request that
/// suspended stays here with `pending` clear until the thread is dispatched again.
#[derive(Default)]
pub struct RelayRecord {
    pub core: Option<CoreId>,
    pub pending: bool,
    pub released: bool,
    pub kind: Option<IpiKind>,
    pub exception_handler: Option<ExceptionHandler>,
    pub(crate) request: Option<Box<dyn PrivilegedOp>>,
    pub(crate) ticket: Option<Arc<Ticket>>,
}

impl RelayRecord {
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.pending || self.request.is_some()
    }

    #[inline]
    pub fn is_parked(&self) -> bool {
        !self.pending && self.request.is_some()
    }

    pub(crate) fn cancel(&mut self) -> Option<Arc<Ticket>> {
        self.pending = false;
        self.request = None;
        self.kind = None;
        self.exception_handler = None;
        self.ticket.take()
    }
}

impl fmt::Debug for RelayRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayRecord")
            .field("core", &self.core)
            .field("pending", &self.pending)
            .field("released", &self.released)
            .field("kind", &self.kind)
            .field("request", &self.request)
            .finish()
    }
}

/// A request travelling on the relay line from a slave to the master.
#[derive(Debug)]
pub struct RelayEnvelope {
    pub core: CoreId,
    /// The thread the slave believed it was running.
    pub thread: Option<TaskId>,
    pub request: Box<dyn PrivilegedOp>,
    pub ticket: Arc<Ticket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldMode {
    /// Single core: yielding re-enters the dispatch loop directly.
    Up,
    /// Dispatch decisions go through the master.
    Smp,
}

/// The part of a core record shared with the core itself.
pub struct CoreLink {
    pub id: CoreId,
    state: CachePadded<Atomic<CoreState>>,
    pub mailbox: InterruptLine<IpiMessage>,
}

impl CoreLink {
    fn new(id: CoreId) -> Self {
        Self {
            id,
            state: CachePadded::new(Atomic::new(CoreState::Ready)),
            mailbox: InterruptLine::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> CoreState {
        self.state.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn set_state(&self, state: CoreState) {
        self.state.store(state, Ordering::SeqCst)
    }
}

pub struct Core {
    pub id: CoreId,
    pub link: Arc<CoreLink>,
    pub curr_thread: Option<TaskId>,
    pub curr_proc: Option<ProcId>,
    pub next_thread: Option<TaskId>,
}

pub struct CoreRegistry {
    cores: Vec<Core>,
    master: CoreId,
}

impl CoreRegistry {
    pub fn new(num_cores: usize, master: CoreId) -> Self {
        Self {
            cores: (0..num_cores)
                .map(|i| Core {
                    id: CoreId(i),
                    link: Arc::new(CoreLink::new(CoreId(i))),
                    curr_thread: None,
                    curr_proc: None,
                    next_thread: None,
                })
                .collect(),
            master,
        }
    }

    #[inline]
    pub fn master(&self) -> CoreId {
        self.master
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cores.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    #[inline]
    pub fn get(&self, id: CoreId) -> &Core {
        &self.cores[id.0]
    }

    #[inline]
    pub fn get_mut(&mut self, id: CoreId) -> &mut Core {
        &mut self.cores[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Core> {
        self.cores.iter()
    }

    pub fn slaves(&self) -> impl Iterator<Item = CoreId> + '_ {
        let master = self.master;
        self.cores.iter().map(|c| c.id).filter(move |&c| c != master)
    }

    /// The core currently running `tid`, if any.
    pub fn running(&self, tid: TaskId) -> Option<CoreId> {
        self.cores
            .iter()
            .find(|c| c.curr_thread == Some(tid))
            .map(|c| c.id)
    }
}

/// Release secondary cores one at a time. The master ends up RUNNING, every other core READY.
pub fn bring_up(cores: &CoreRegistry) {
    static BOOT_LOCK: Mutex<()> = Mutex::new(());
    let master = cores.get(cores.master());
    master.link.set_state(CoreState::Running);
    info!("core {} online (master)", master.id.0);
    for id in cores.slaves() {
        let _guard = BOOT_LOCK.lock();
        let core = cores.get(id);
        core.link.set_state(CoreState::Ready);
        core.link.mailbox.unmask();
        info!("core {} online", id.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bring_up_releases_each_slave() {
        let cores = CoreRegistry::new(3, CoreId(1));
        for core in cores.iter() {
            core.link.set_state(CoreState::Running);
            core.link.mailbox.mask();
        }
        bring_up(&cores);
        assert_eq!(cores.get(CoreId(1)).link.state(), CoreState::Running);
        assert!(cores.get(CoreId(1)).link.mailbox.is_masked());
        for id in [CoreId(0), CoreId(2)] {
            let link = &cores.get(id).link;
            assert_eq!(link.state(), CoreState::Ready);
            assert!(!link.mailbox.is_masked());
        }
    }
}
