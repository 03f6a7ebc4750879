// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements condition variables.
//!
//! Each waiter parks on its own one-shot semaphore, so a signal can
//! pick exactly which waiter to release. Signalling always releases
//! the waiter whose thread has the highest effective priority at that
//! moment.

use crate::interrupts;
use crate::multitasking::thread::{self, ThreadPtr};
use crate::sync::lock::Lock;
use crate::sync::semaphore::Semaphore;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// A condition variable, always used together with a
/// [`Lock`] guarding the condition itself.
///
pub struct Condition {
    waiters: spin::Mutex<Vec<Waiter>>,
}

struct Waiter {
    thread: ThreadPtr,
    semaphore: Arc<Semaphore>,
}

impl Condition {
    /// Returns a new condition variable with no waiters.
    ///
    pub const fn new() -> Condition {
        Condition {
            waiters: spin::Mutex::new(Vec::new()),
        }
    }

    /// Atomically releases `lock` and waits to be
    /// signalled, then reacquires `lock` before returning.
    ///
    /// The monitor condition may have changed again by the
    /// time `wait` returns, so callers re-check it in a
    /// loop.
    ///
    /// # Panics
    ///
    /// `wait` panics in an interrupt handler, and if the
    /// current thread does not hold `lock`.
    ///
    pub fn wait(&self, lock: &Lock) {
        assert!(!interrupts::is_external(), "condition wait in an interrupt handler");
        assert!(lock.held_by_current(), "condition wait without the lock");

        let semaphore = Arc::new(Semaphore::new(0));
        interrupts::without_interrupts(|| {
            self.waiters.lock().push(Waiter {
                thread: ThreadPtr::from(thread::current()),
                semaphore: semaphore.clone(),
            });
        });

        lock.release();
        semaphore.down();
        lock.acquire();
    }

    /// Wakes the waiting thread with the highest effective
    /// priority, if any.
    ///
    /// # Panics
    ///
    /// `signal` panics if the current thread does not hold
    /// `lock`.
    ///
    pub fn signal(&self, lock: &Lock) {
        assert!(lock.held_by_current(), "condition signal without the lock");

        let woken = interrupts::without_interrupts(|| {
            let mut waiters = self.waiters.lock();
            let best = waiters
                .iter()
                .enumerate()
                .max_by_key(|(position, w)| (w.thread.priority(), core::cmp::Reverse(*position)))
                .map(|(position, _)| position);
            best.map(|position| waiters.remove(position))
        });

        if let Some(waiter) = woken {
            waiter.semaphore.up();
        }
    }

    /// Wakes all waiting threads, highest priority first.
    ///
    /// # Panics
    ///
    /// `broadcast` panics if the current thread does not
    /// hold `lock`.
    ///
    pub fn broadcast(&self, lock: &Lock) {
        loop {
            let empty = interrupts::without_interrupts(|| self.waiters.lock().is_empty());
            if empty {
                return;
            }

            self.signal(lock);
        }
    }
}

impl Default for Condition {
    fn default() -> Condition {
        Condition::new()
    }
}
