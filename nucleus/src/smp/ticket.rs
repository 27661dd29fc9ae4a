use core::sync::atomic::{AtomicBool, Ordering};

use crossbeam::utils::Backoff;
use spin::Mutex;

use crate::error::KernelError;

pub type SysResult = Result<usize, KernelError>;

/// Completion handle for a relayed request.
///
/// The master stores the result, then raises the release flag; the requester
/// spins on the flag.
#[derive(Debug, Default)]
pub struct Ticket {
    released: AtomicBool,
    result: Mutex<Option<SysResult>>,
}

impl Ticket {
    pub const fn new() -> Self {
        Self {
            released: AtomicBool::new(false),
            result: Mutex::new(None),
        }
    }

    pub(crate) fn release(&self, result: SysResult) {
        let mut slot = self.result.lock();
        debug_assert!(!self.is_released(), "ticket released twice");
        *slot = Some(result);
        self.released.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// The result, once released.
    pub fn result(&self) -> Option<SysResult> {
        if !self.is_released() {
            return None;
        }
        self.result.lock().clone()
    }

    pub fn wait(&self) -> SysResult {
        let backoff = Backoff::new();
        loop {
            if let Some(result) = self.result() {
                return result;
            }
            backoff.snooze();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_visible_after_release() {
        let t = Ticket::new();
        assert_eq!(t.result(), None);
        t.release(Err(KernelError::Interrupted));
        assert!(t.is_released());
        assert_eq!(t.wait(), Err(KernelError::Interrupted));
    }

    #[test]
    fn wait_across_threads() {
        let t = alloc::sync::Arc::new(Ticket::new());
        let t2 = t.clone();
        let h = std::thread::spawn(move || t2.wait());
        t.release(Ok(42));
        assert_eq!(h.join().unwrap(), Ok(42));
    }
}
