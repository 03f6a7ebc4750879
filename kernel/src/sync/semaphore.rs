// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements counting semaphores.

use crate::interrupts;
use crate::multitasking::thread::{self, ThreadPtr};
use alloc::collections::VecDeque;

/// A counting semaphore: a non-negative count with two
/// atomic operations, [`down`](Semaphore::down) and
/// [`up`](Semaphore::up).
///
pub struct Semaphore {
    inner: spin::Mutex<Inner>,
}

struct Inner {
    value: usize,

    // Threads blocked in down, ordered by effective
    // priority at the time they blocked.
    waiters: VecDeque<ThreadPtr>,
}

impl Semaphore {
    /// Returns a semaphore with the given initial value.
    ///
    pub const fn new(value: usize) -> Semaphore {
        Semaphore {
            inner: spin::Mutex::new(Inner {
                value,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Decrements the semaphore, blocking until the value
    /// is positive.
    ///
    /// Must not be called from an interrupt handler, which
    /// cannot block.
    ///
    pub fn down(&self) {
        assert!(
            !interrupts::is_external(),
            "semaphore down in an interrupt handler"
        );

        let old_level = interrupts::disable();
        loop {
            let mut inner = self.inner.lock();
            if inner.value > 0 {
                inner.value -= 1;
                break;
            }

            // Wait our turn. Another thread may take the
            // semaphore between the wakeup and our next
            // look, in which case we simply queue again.
            let curr = ThreadPtr::from(thread::current());
            let priority = curr.priority();
            let position = inner
                .waiters
                .iter()
                .position(|t| t.priority() < priority)
                .unwrap_or(inner.waiters.len());
            inner.waiters.insert(position, curr);

            drop(inner);
            thread::block();
        }

        interrupts::set_level(old_level);
    }

    /// Increments the semaphore and wakes the
    /// highest-priority waiter, if any. If the woken thread
    /// outranks the current one, the CPU is yielded; from
    /// an interrupt handler the switch is deferred until
    /// the handler unwinds.
    ///
    /// This is the one blocking-related operation an
    /// interrupt handler may call.
    ///
    pub fn up(&self) {
        let old_level = interrupts::disable();
        let woken = {
            let mut inner = self.inner.lock();
            inner.value += 1;

            // Waiters were queued in priority order, but
            // donations may have changed priorities since,
            // so scan for the current maximum.
            let best = inner
                .waiters
                .iter()
                .enumerate()
                .max_by_key(|(position, t)| (t.priority(), core::cmp::Reverse(*position)))
                .map(|(position, _)| position);
            best.and_then(|position| inner.waiters.remove(position))
        };

        if let Some(t) = woken {
            thread::unblock(&t);
        }
        interrupts::set_level(old_level);

        thread::preempt_check();
    }
}
