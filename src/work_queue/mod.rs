//! In-memory priority queue of pending collector tasks.
//!
//! Ordering is strictly `(priority desc, enqueued_at asc)`, with insertion
//! order breaking exact timestamp ties. Nothing is persisted: a crash loses
//! every pending task. Identical tasks are not deduplicated.

mod lease;
mod task;

pub use lease::{RunGuards, RunLease};
pub use task::{PriorityPolicy, Task, TaskKind, TaskKindName};

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use serde::Serialize;

/// Heap entry: a task plus its insertion sequence number.
#[derive(Debug)]
struct QueuedTask {
    seq: u64,
    task: Task,
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: "greater" pops first.
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.task.enqueued_at.cmp(&self.task.enqueued_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTask {}

/// Snapshot of the queue for observability.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStatus {
    pub length: usize,
    pub by_kind: BTreeMap<TaskKindName, usize>,
}

/// Priority queue of pending tasks.
#[derive(Debug, Default)]
pub struct TaskQueue {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedTask { seq, task });
    }

    /// Remove and return the head, or `None` when empty.
    pub fn dequeue(&mut self) -> Option<Task> {
        self.heap.pop().map(|entry| entry.task)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn peek_status(&self) -> QueueStatus {
        let mut by_kind = BTreeMap::new();
        for entry in self.heap.iter() {
            *by_kind.entry(entry.task.kind.name()).or_insert(0) += 1;
        }
        QueueStatus {
            length: self.heap.len(),
            by_kind,
        }
    }

    /// Pending tasks in dequeue order.
    pub fn pending(&self) -> Vec<Task> {
        let mut entries: Vec<&QueuedTask> = self.heap.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|e| e.task.clone()).collect()
    }
}
