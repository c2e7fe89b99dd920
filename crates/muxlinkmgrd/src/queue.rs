//! Single-flight operation queue.
//!
//! The qmi_wwan `add_mux`/`del_mux` attributes race when written
//! concurrently, so a manager runs at most one link operation at a time.
//! Later requests wait here in strict submission order.

use std::collections::VecDeque;

/// FIFO of operations with at most one in flight.
///
/// `running` is true iff exactly one operation has been handed out and not
/// yet reported back through [`OperationQueue::on_completed`]; `pending`
/// only ever holds operations that have not started.
#[derive(Debug)]
pub struct OperationQueue<T> {
    running: bool,
    pending: VecDeque<T>,
}

impl<T> OperationQueue<T> {
    /// Creates an idle queue.
    pub fn new() -> Self {
        Self {
            running: false,
            pending: VecDeque::new(),
        }
    }

    /// Submits an operation.
    ///
    /// Returns the operation back if the queue was idle and it must start
    /// right away, or `None` if it was queued behind the running one.
    #[must_use]
    pub fn submit(&mut self, op: T) -> Option<T> {
        if self.running {
            self.pending.push_back(op);
            return None;
        }
        self.running = true;
        Some(op)
    }

    /// Marks the running operation as finished and returns the next one to
    /// start, if any.
    #[must_use]
    pub fn on_completed(&mut self) -> Option<T> {
        debug_assert!(self.running, "on_completed() without a running operation");
        self.running = false;

        let next = self.pending.pop_front()?;
        self.running = true;
        Some(next)
    }

    /// Removes every pending operation matching `pred`, preserving the order
    /// of the rest. The running operation is not affected.
    pub fn remove_pending_where<F>(&mut self, mut pred: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(self.pending.len());

        for op in self.pending.drain(..) {
            if pred(&op) {
                removed.push(op);
            } else {
                kept.push_back(op);
            }
        }

        self.pending = kept;
        removed
    }

    /// Returns true while an operation is in flight.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of operations waiting to start.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl<T> Default for OperationQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
