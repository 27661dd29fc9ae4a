#![cfg_attr(not(test), no_std)]

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;
use proc::TaskId;

/// Kind of work carried by an inter-processor interrupt.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
pub enum IpiKind {
    /// Master -> slave: run the core's next thread.
    Schedule,
    /// Master -> slave: nothing to run, wait for the next message.
    Idle,
    /// Slave -> master: execute a system call on the slave's behalf.
    Syscall,
    /// Slave -> master: execute an exception handler on the slave's behalf.
    Exception,
}

/// Message delivered to a slave core's mailbox.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum IpiMessage {
    Schedule(TaskId),
    Idle,
}

impl IpiMessage {
    pub fn kind(&self) -> IpiKind {
        match self {
            IpiMessage::Schedule(_) => IpiKind::Schedule,
            IpiMessage::Idle => IpiKind::Idle,
        }
    }
}

/// A maskable interrupt line.
///
/// Raising never blocks. Delivery is gated by the mask: a masked line
/// reports nothing pending, but the handler can still acknowledge queued
/// messages.
pub struct InterruptLine<T> {
    queue: SegQueue<T>,
    masked: AtomicBool,
    raised: AtomicUsize,
}

impl<T> InterruptLine<T> {
    pub const fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            masked: AtomicBool::new(false),
            raised: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn raise(&self, message: T) {
        self.queue.push(message);
        self.raised.fetch_add(1, Ordering::SeqCst);
    }

    /// Acknowledge the oldest message, regardless of the mask.
    #[inline]
    pub fn ack(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Acknowledge the oldest message if the line is unmasked.
    #[inline]
    pub fn take(&self) -> Option<T> {
        if self.is_masked() {
            return None;
        }
        self.queue.pop()
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        !self.is_masked() && !self.queue.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn mask(&self) {
        self.masked.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn unmask(&self) {
        self.masked.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_masked(&self) -> bool {
        self.masked.load(Ordering::SeqCst)
    }

    /// Total number of interrupts ever raised on this line.
    #[inline]
    pub fn raised(&self) -> usize {
        self.raised.load(Ordering::SeqCst)
    }
}

impl<T> Default for InterruptLine<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_line_holds_messages() {
        let line = InterruptLine::new();
        line.mask();
        line.raise(IpiMessage::Idle);
        assert!(!line.is_pending());
        assert_eq!(line.take(), None);
        line.unmask();
        assert!(line.is_pending());
        assert_eq!(line.take(), Some(IpiMessage::Idle));
        assert!(line.is_empty());
        assert_eq!(line.raised(), 1);
    }

    #[test]
    fn ack_ignores_mask() {
        let line = InterruptLine::new();
        line.raise(IpiMessage::Schedule(TaskId(3)));
        line.raise(IpiMessage::Idle);
        line.mask();
        assert_eq!(line.ack(), Some(IpiMessage::Schedule(TaskId(3))));
        assert_eq!(line.ack().map(|m| m.kind()), Some(IpiKind::Idle));
    }
}
