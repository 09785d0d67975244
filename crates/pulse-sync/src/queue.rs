//! In-memory offline queue.
//!
//! Authoritative copy of pending operations; [`crate::SyncClient`] mirrors
//! every change to the `operations` collection.
//!
//! Order is `(timestamp, seq)`. Timestamps only have millisecond precision,
//! so `seq` keeps a burst of sends in enqueue order, in memory and after a
//! reload from storage.

use std::collections::VecDeque;

use pulse_core::QueuedOperation;

#[derive(Debug, Default)]
pub struct OfflineQueue {
    operations: VecDeque<QueuedOperation>,
    next_seq: u64,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents, e.g. with operations loaded from storage.
    pub fn hydrate(&mut self, operations: Vec<QueuedOperation>) {
        self.operations = operations.into();
        self.sort();
        if let Some(max) = self.operations.iter().map(|op| op.seq).max() {
            self.next_seq = self.next_seq.max(max + 1);
        }
    }

    /// Appends `operation`, stamping the next sequence number.
    pub fn push(&mut self, mut operation: QueuedOperation) -> &QueuedOperation {
        operation.seq = self.next_seq;
        self.next_seq += 1;
        self.operations.push_back(operation);
        &self.operations[self.operations.len() - 1]
    }

    /// Removes and returns everything, oldest first.
    pub fn take_all(&mut self) -> Vec<QueuedOperation> {
        self.sort();
        self.operations.drain(..).collect()
    }

    /// Puts `operations` back at the head, keeping their order.
    pub fn restore_front(&mut self, operations: Vec<QueuedOperation>) {
        for operation in operations.into_iter().rev() {
            self.operations.push_front(operation);
        }
    }

    /// Stable: equal keys keep their current order.
    pub fn sort(&mut self) {
        self.operations
            .make_contiguous()
            .sort_by_key(QueuedOperation::order_key);
    }

    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        self.operations.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn clear(&mut self) -> usize {
        let cleared = self.operations.len();
        self.operations.clear();
        cleared
    }
}
