//! Master side of the relay.
//!
//! ```text
//!   slave                       master
//!   -----                       ------
//!   submit(op) ──envelope──▶    accept: record {pending, core, request, ticket}
//!                               handle_ipi: find a pending RUNNING thread
//!                               serve: borrow curr_core, execute, restore
//!   spin on ticket ◀─release─   (or park on Suspend, re-arm on dispatch)
//! ```

use alloc::{boxed::Box, sync::Arc};
use core::mem;

use proc::{CoreId, TaskId, ThreadState};

use super::ticket::Ticket;
use super::{Outcome, PrivilegedOp, RelayEnvelope, Resume};
use crate::error::KernelError;
use crate::kernel::Kernel;

/// How the relay handler was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpiSource {
    /// The relay interrupt line fired.
    Interrupt,
    /// Explicit re-check, e.g. from the yield path.
    Recheck,
}

impl Kernel {
    /// Record a slave's request on the relay record of the thread it was
    /// raised for. A request from a thread the core no longer runs is stale
    /// and completes with `EINTR`.
    pub fn accept(&mut self, envelope: RelayEnvelope) {
        let RelayEnvelope {
            core,
            thread,
            request,
            ticket,
        } = envelope;
        assert_ne!(core, self.master(), "relay envelope from the master core");
        let running = self.cores.get(core).curr_thread;
        let Some(tid) = running.filter(|&t| Some(t) == thread) else {
            debug!(
                "core {}: stale {:?} for thread {:?} (running {:?})",
                core.0,
                request,
                thread.map(|t| t.0),
                running.map(|t| t.0)
            );
            ticket.release(Err(KernelError::Interrupted));
            return;
        };
        self.arm(tid, core, request, ticket);
    }

    fn arm(&mut self, tid: TaskId, core: CoreId, request: Box<dyn PrivilegedOp>, ticket: Arc<Ticket>) {
        let Some(thread) = self.threads.get_mut(tid) else {
            panic!("relay request for unknown thread {}", tid.0);
        };
        assert!(
            !thread.relay.is_busy(),
            "core {}: thread {} already has a request outstanding",
            core.0,
            tid.0
        );
        let record = &mut thread.relay;
        record.core = Some(core);
        record.pending = true;
        record.released = false;
        record.kind = Some(request.kind());
        record.exception_handler = request.exception_handler();
        record.request = Some(request);
        record.ticket = Some(ticket);
        self.outstanding += 1;
        trace!("core {}: thread {} armed {:?}", core.0, tid.0, record.kind);
    }

    /// Service one pending request. Returns `false` for a duplicate
    /// invocation, when nothing is pending and nothing is owed.
    pub fn handle_ipi(&mut self, source: IpiSource) -> bool {
        let threads = &self.threads;
        let found = self
            .procs
            .iter()
            .flat_map(|p| p.threads.iter().copied())
            .find(|&tid| {
                threads
                    .get(tid)
                    .map_or(false, |t| t.relay.pending && t.state == ThreadState::Running)
            });
        let Some(tid) = found else {
            if self.outstanding == 0 {
                debug!("{:?} relay entry with nothing pending, discarded", source);
                return false;
            }
            panic!(
                "relay: {} request(s) outstanding but no pending running thread",
                self.outstanding
            );
        };
        self.serve(tid);
        true
    }

    /// Execute the pending request of `tid` in its core's identity.
    pub(crate) fn serve(&mut self, tid: TaskId) {
        let master = self.master();
        let Some(thread) = self.threads.get_mut(tid) else {
            panic!("serving unknown thread {}", tid.0);
        };
        let record = &mut thread.relay;
        let Some(mut request) = record.request.take() else {
            panic!("thread {} pending without a request", tid.0);
        };
        record.pending = false;
        let core = record.core.unwrap_or(master);
        let ticket = record.ticket.take();
        let interrupted = mem::take(&mut thread.interrupted);
        let pid = thread.proc;
        self.outstanding -= 1;

        let result = if interrupted {
            Err(KernelError::Interrupted)
        } else {
            assert_eq!(self.curr_core, master, "relay service re-entered");
            self.curr_core = core;
            let result = request.execute(self);
            let borrowed = mem::replace(&mut self.curr_core, master);
            assert_eq!(borrowed, core, "core identity changed while serving {:?}", request);
            result
        };
        if let Some(p) = self.procs.get_mut(pid) {
            p.ktime += 1;
        }

        let result = match result {
            Ok(Outcome::Suspend { retry }) => {
                let parked: Box<dyn PrivilegedOp> = if retry { request } else { Box::new(Resume) };
                self.park(tid, parked, ticket);
                self.sched_blocking_thread();
                return;
            }
            Ok(Outcome::Done(value)) => Ok(value),
            Err(e) => Err(e),
        };
        if let Some(thread) = self.threads.get_mut(tid) {
            thread.relay.released = true;
            thread.relay.kind = None;
            thread.relay.exception_handler = None;
        }
        trace!("core {}: thread {} released with {:?}", core.0, tid.0, result);
        if let Some(ticket) = ticket {
            ticket.release(result);
        }
        self.sched_blocking_thread();
    }

    /// Keep a suspended request on its thread until the thread runs again.
    fn park(&mut self, tid: TaskId, request: Box<dyn PrivilegedOp>, ticket: Option<Arc<Ticket>>) {
        let Some(thread) = self.threads.get_mut(tid) else {
            if let Some(ticket) = ticket {
                ticket.release(Err(KernelError::Interrupted));
            }
            return;
        };
        trace!("thread {} parks {:?}", tid.0, request);
        thread.relay.request = Some(request);
        thread.relay.ticket = ticket;
        if thread.state == ThreadState::Running {
            thread.relay.pending = true;
            self.outstanding += 1;
        }
    }

    /// Drain the relay line, then service every re-armed request. Returns
    /// the number of requests executed.
    pub fn service(&mut self) -> usize {
        let mut served = 0;
        while let Some(envelope) = self.relay.take() {
            self.accept(envelope);
            if self.handle_ipi(IpiSource::Interrupt) {
                served += 1;
            }
        }
        while self.outstanding > 0 {
            if self.handle_ipi(IpiSource::Recheck) {
                served += 1;
            }
        }
        served
    }

    /// Run `op` for the thread on the master core, through the same record a
    /// relayed request uses.
    pub fn syscall(&mut self, op: impl PrivilegedOp + 'static) -> Arc<Ticket> {
        let master = self.master();
        assert_eq!(self.curr_core, master, "syscall with a borrowed core identity");
        let ticket = Arc::new(Ticket::new());
        let Some(tid) = self
            .cores
            .get(master)
            .curr_thread
            .filter(|&t| t != TaskId::IDLE)
        else {
            ticket.release(Err(KernelError::NoSuchThread));
            return ticket;
        };
        self.arm(tid, master, Box::new(op), ticket.clone());
        self.serve(tid);
        self.service();
        ticket
    }
}
