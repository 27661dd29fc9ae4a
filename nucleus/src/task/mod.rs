pub mod proc;
pub mod sched;
pub mod scheduler;
pub mod signal;
pub mod sync;
pub mod table;
pub mod thread;

pub use self::proc::Process;
pub use self::thread::Thread;
