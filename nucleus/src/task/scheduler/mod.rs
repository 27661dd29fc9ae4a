mod static_priority;

use proc::TaskId;

pub use static_priority::StaticPriority;

/// Ready-queue ordering. The idle thread never enters the queue.
pub trait SchedulerPolicy: Default + Send {
    fn enqueue(&mut self, tid: TaskId, nice: i32);
    /// Returns whether `tid` was queued.
    fn remove(&mut self, tid: TaskId) -> bool;
    /// Dequeue the thread to run next.
    fn pick(&mut self) -> Option<TaskId>;
    fn peek(&self) -> Option<TaskId>;
    fn contains(&self, tid: TaskId) -> bool;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type Policy = StaticPriority;
