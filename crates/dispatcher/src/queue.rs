use std::cmp::Ordering;
use std::collections::BinaryHeap;

use collector_core::models::{JobId, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueuedJob {
    priority: Priority,
    seq: u64,
    job_id: JobId,
}

impl Ord for QueuedJob {
    /// BinaryHeap is a max-heap: the lowest priority value, then the oldest
    /// submission, compares greatest
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending jobs ordered by (priority, submission order)
#[derive(Debug, Default)]
pub struct JobQueue {
    heap: BinaryHeap<QueuedJob>,
    next_seq: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job_id: JobId, priority: Priority) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedJob {
            priority,
            seq,
            job_id,
        });
    }

    /// Highest priority first, FIFO within a priority
    pub fn pop(&mut self) -> Option<JobId> {
        self.heap.pop().map(|q| q.job_id)
    }

    pub fn peek(&self) -> Option<JobId> {
        self.heap.peek().map(|q| q.job_id)
    }

    /// Drops a queued job, e.g. one cancelled before dispatch
    pub fn remove(&mut self, job_id: JobId) -> bool {
        let before = self.heap.len();
        self.heap.retain(|q| q.job_id != job_id);
        self.heap.len() != before
    }

    /// Empties the queue in dispatch order
    pub fn drain(&mut self) -> Vec<JobId> {
        let mut ids = Vec::with_capacity(self.heap.len());
        while let Some(id) = self.pop() {
            ids.push(id);
        }
        ids
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = JobQueue::new();
        let low = JobId::new();
        let normal_first = JobId::new();
        let normal_second = JobId::new();
        let critical = JobId::new();

        queue.push(low, Priority::Low);
        queue.push(normal_first, Priority::Normal);
        queue.push(normal_second, Priority::Normal);
        queue.push(critical, Priority::Critical);

        assert_eq!(queue.drain(), vec![critical, normal_first, normal_second, low]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut queue = JobQueue::new();
        let a = JobId::new();
        let b = JobId::new();
        queue.push(a, Priority::High);
        queue.push(b, Priority::High);

        assert!(queue.remove(a));
        assert!(!queue.remove(a));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek(), Some(b));
    }
}
