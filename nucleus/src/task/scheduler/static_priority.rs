use alloc::collections::BTreeSet;

use hashbrown::HashMap;
use proc::TaskId;

use super::SchedulerPolicy;

/// Lowest nice value first, then insertion order. No aging.
#[derive(Debug, Default)]
pub struct StaticPriority {
    queue: BTreeSet<(i32, u64, TaskId)>,
    index: HashMap<TaskId, (i32, u64)>,
    seq: u64,
}

impl SchedulerPolicy for StaticPriority {
    fn enqueue(&mut self, tid: TaskId, nice: i32) {
        if self.index.contains_key(&tid) {
            return;
        }
        let seq = self.seq;
        self.seq += 1;
        self.queue.insert((nice, seq, tid));
        self.index.insert(tid, (nice, seq));
    }

    fn remove(&mut self, tid: TaskId) -> bool {
        match self.index.remove(&tid) {
            Some((nice, seq)) => self.queue.remove(&(nice, seq, tid)),
            None => false,
        }
    }

    fn pick(&mut self) -> Option<TaskId> {
        let (_, _, tid) = self.queue.pop_first()?;
        self.index.remove(&tid);
        Some(tid)
    }

    fn peek(&self) -> Option<TaskId> {
        self.queue.first().map(|&(_, _, tid)| tid)
    }

    fn contains(&self, tid: TaskId) -> bool {
        self.index.contains_key(&tid)
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_then_fifo() {
        let mut q = StaticPriority::default();
        q.enqueue(TaskId(1), 0);
        q.enqueue(TaskId(2), -5);
        q.enqueue(TaskId(3), 0);
        q.enqueue(TaskId(1), 0);
        assert_eq!(q.len(), 3);
        assert_eq!(q.pick(), Some(TaskId(2)));
        assert_eq!(q.pick(), Some(TaskId(1)));
        assert_eq!(q.peek(), Some(TaskId(3)));
    }

    #[test]
    fn remove_queued() {
        let mut q = StaticPriority::default();
        q.enqueue(TaskId(4), 3);
        assert!(q.remove(TaskId(4)));
        assert!(!q.remove(TaskId(4)));
        assert!(q.is_empty());
        assert_eq!(q.pick(), None);
    }
}
