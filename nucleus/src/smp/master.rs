use core::sync::atomic::{AtomicBool, Ordering};

use crossbeam::utils::Backoff;

use crate::kernel::Kernel;

/// The master core's service loop. Owns the kernel: slaves reach it only
/// through the relay line.
pub struct Master {
    kernel: Kernel,
}

impl Master {
    pub fn new(kernel: Kernel) -> Self {
        Self { kernel }
    }

    /// One pass over the relay line. Returns the number of requests executed.
    pub fn run_once(&mut self) -> usize {
        self.kernel.service()
    }

    /// Service requests until `stop` is raised.
    pub fn serve(&mut self, stop: &AtomicBool) -> usize {
        let backoff = Backoff::new();
        let mut served = 0;
        while !stop.load(Ordering::SeqCst) {
            match self.run_once() {
                0 => backoff.snooze(),
                n => {
                    served += n;
                    backoff.reset();
                }
            }
        }
        served += self.run_once();
        debug!("master stopped after {} request(s)", served);
        served
    }

    #[inline]
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    #[inline]
    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    pub fn into_kernel(self) -> Kernel {
        self.kernel
    }
}
