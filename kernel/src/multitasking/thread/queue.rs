// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the ordered queue of runnable threads.
//!
//! The queue keeps threads in descending order of effective priority.
//! Within one priority class the order is first-in, first-out: a new
//! thread is inserted after every thread of equal priority, and the
//! stable [`resort`](ReadyQueue::resort) preserves the arrival order
//! of equals when the feedback policy rewrites priorities in bulk.

use crate::multitasking::thread::ThreadPtr;
use alloc::collections::VecDeque;
use core::cmp::Reverse;

/// The queue of threads that are ready to run.
///
pub(super) struct ReadyQueue {
    runnable: VecDeque<ThreadPtr>,
}

impl ReadyQueue {
    pub const fn new() -> ReadyQueue {
        ReadyQueue {
            runnable: VecDeque::new(),
        }
    }

    /// Inserts a thread behind every queued thread of equal
    /// or higher effective priority.
    ///
    pub fn insert(&mut self, thread: ThreadPtr) {
        let priority = thread.priority();
        let position = self
            .runnable
            .iter()
            .position(|t| t.priority() < priority)
            .unwrap_or(self.runnable.len());

        self.runnable.insert(position, thread);
    }

    /// Removes and returns the highest-priority thread.
    ///
    pub fn pop_front(&mut self) -> Option<ThreadPtr> {
        self.runnable.pop_front()
    }

    /// Returns the effective priority of the
    /// highest-priority thread.
    ///
    pub fn front_priority(&self) -> Option<i32> {
        self.runnable.front().map(|t| t.priority())
    }

    /// Moves a queued thread to the position its current
    /// effective priority demands. Used when a donation
    /// changes the priority of a thread that is already
    /// queued.
    ///
    pub fn reposition(&mut self, thread: ThreadPtr) {
        let before = self.runnable.len();
        self.runnable.retain(|t| *t != thread);
        if self.runnable.len() != before {
            self.insert(thread);
        }
    }

    /// Re-establishes priority order across the whole queue
    /// after a bulk priority recomputation. The sort is
    /// stable, so arrival order within a priority class is
    /// kept.
    ///
    pub fn resort(&mut self) {
        self.runnable
            .make_contiguous()
            .sort_by_key(|t| Reverse(t.priority()));
    }

    pub fn len(&self) -> usize {
        self.runnable.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThreadPtr> {
        self.runnable.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::ReadyQueue;
    use crate::multitasking::thread::Thread;

    #[test]
    fn priority_order_with_fifo_ties() {
        let mut queue = ReadyQueue::new();
        let a = Thread::test_thread("a", 31);
        let b = Thread::test_thread("b", 31);
        let c = Thread::test_thread("c", 32);
        let d = Thread::test_thread("d", 30);

        queue.insert(a);
        queue.insert(b);
        queue.insert(c);
        queue.insert(d);

        assert_eq!(queue.front_priority(), Some(32));
        assert_eq!(queue.pop_front(), Some(c));
        assert_eq!(queue.pop_front(), Some(a));
        assert_eq!(queue.pop_front(), Some(b));
        assert_eq!(queue.pop_front(), Some(d));
        assert_eq!(queue.pop_front(), None);
    }

    #[test]
    fn reposition_follows_new_priority() {
        let mut queue = ReadyQueue::new();
        let a = Thread::test_thread("a", 31);
        let b = Thread::test_thread("b", 30);

        queue.insert(a);
        queue.insert(b);
        assert_eq!(queue.front_priority(), Some(31));

        b.set_priority_value(40);
        queue.reposition(b);
        assert_eq!(queue.pop_front(), Some(b));
        assert_eq!(queue.pop_front(), Some(a));
    }

    #[test]
    fn resort_is_stable() {
        let mut queue = ReadyQueue::new();
        let a = Thread::test_thread("a", 31);
        let b = Thread::test_thread("b", 31);
        let c = Thread::test_thread("c", 33);

        queue.insert(c);
        queue.insert(a);
        queue.insert(b);

        // Make the head stale, as a bulk recompute would.
        c.set_priority_value(20);
        queue.resort();

        assert_eq!(queue.pop_front(), Some(a));
        assert_eq!(queue.pop_front(), Some(b));
        assert_eq!(queue.pop_front(), Some(c));
    }
}
