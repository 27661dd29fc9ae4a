use alloc::{boxed::Box, sync::Arc};

use crossbeam::utils::Backoff;
use interrupt::{InterruptLine, IpiMessage};
use proc::{CoreId, CoreState, TaskId};

use super::ticket::{SysResult, Ticket};
use super::{CoreLink, Exception, ExceptionHandler, PrivilegedOp, RelayEnvelope};
use crate::clock::ClockTick;
use crate::error::KernelError;

/// Handle driven by a secondary core. It never touches kernel tables: every
/// privileged operation is raised on the master's relay line.
pub struct SlaveCore {
    link: Arc<CoreLink>,
    relay: Arc<InterruptLine<RelayEnvelope>>,
    current: Option<TaskId>,
}

impl SlaveCore {
    pub(crate) fn new(link: Arc<CoreLink>, relay: Arc<InterruptLine<RelayEnvelope>>) -> Self {
        Self {
            link,
            relay,
            current: None,
        }
    }

    #[inline]
    pub fn id(&self) -> CoreId {
        self.link.id
    }

    /// The thread this core was last told to run.
    #[inline]
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    #[inline]
    pub fn link(&self) -> &Arc<CoreLink> {
        &self.link
    }

    #[inline]
    pub fn state(&self) -> CoreState {
        self.link.state()
    }

    /// Handle one message from the master, if one is deliverable.
    pub fn handle_ipi(&mut self) -> Option<IpiMessage> {
        let mailbox = &self.link.mailbox;
        if !mailbox.is_pending() {
            return None;
        }
        mailbox.mask();
        let message = mailbox.ack();
        match message {
            Some(IpiMessage::Schedule(tid)) => {
                self.link.set_state(CoreState::Running);
                self.current = Some(tid);
                trace!("core {}: running thread {}", self.id().0, tid.0);
            }
            Some(IpiMessage::Idle) => {
                self.link.set_state(CoreState::Ready);
                self.current = None;
                trace!("core {}: idle", self.id().0);
            }
            None => {}
        }
        mailbox.unmask();
        message
    }

    /// Idle wait for the next message from the master.
    pub fn wait_for_ipi(&mut self) -> IpiMessage {
        let backoff = Backoff::new();
        loop {
            if let Some(message) = self.handle_ipi() {
                return message;
            }
            backoff.snooze();
        }
    }

    /// Raise `op` on the relay line for the current thread, without waiting.
    pub fn submit(&self, op: impl PrivilegedOp + 'static) -> Arc<Ticket> {
        let ticket = Arc::new(Ticket::new());
        self.relay.raise(RelayEnvelope {
            core: self.id(),
            thread: self.current,
            request: Box::new(op),
            ticket: ticket.clone(),
        });
        ticket
    }

    /// Ask the master to run `op` and spin until it is released. Messages
    /// from the master are handled while waiting.
    pub fn syscall(&mut self, op: impl PrivilegedOp + 'static) -> SysResult {
        if self.current.is_none() {
            return Err(KernelError::NoSuchThread);
        }
        let ticket = self.submit(op);
        let backoff = Backoff::new();
        while !ticket.is_released() {
            self.handle_ipi();
            backoff.snooze();
        }
        ticket.wait()
    }

    pub fn raise_exception(&mut self, handler: ExceptionHandler) -> SysResult {
        self.syscall(Exception::new(handler))
    }

    /// Report a clock tick for the current thread.
    pub fn tick(&self) -> Arc<Ticket> {
        self.submit(ClockTick)
    }
}
