// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements timed sleep: the sleep set and its per-tick drainage.
//!
//! Sleeping threads are blocked threads with a wakeup deadline,
//! collected in the scheduler's sleep set. The earliest deadline is
//! cached in [`NEXT_WAKE`], so the tick handler can skip the set
//! entirely until something is actually due.

use crate::interrupts;
use crate::multitasking::thread::scheduler::SCHEDULER;
use crate::multitasking::thread::{self, ThreadPtr};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

/// The tick of the earliest deadline in the sleep set, or
/// `u64::MAX` when the set is empty.
///
static NEXT_WAKE: AtomicU64 = AtomicU64::new(u64::MAX);

/// Returns the tick at which the next sleeper is due.
///
pub(super) fn next_wake() -> u64 {
    NEXT_WAKE.load(Ordering::Relaxed)
}

/// Blocks the current thread until the timer reaches the
/// absolute tick `wakeup`. Returns no earlier than that
/// tick, and at most one tick later.
///
/// # Panics
///
/// `sleep_until` panics if called by the idle thread, which
/// must always be available to run.
///
pub fn sleep_until(wakeup: u64) {
    let curr = thread::current();
    let old_level = interrupts::disable();
    assert!(!thread::is_idle(curr), "idle thread tried to sleep");

    curr.wakeup_tick.store(wakeup);
    NEXT_WAKE.fetch_min(wakeup, Ordering::Relaxed);
    SCHEDULER.lock().sleeping.push(ThreadPtr::from(curr));

    thread::block();
    interrupts::set_level(old_level);
}

/// Wakes every sleeper whose deadline has passed and
/// recomputes the next-wake hint from the remainder.
///
/// Runs from the tick handler with interrupts off. Threads
/// sharing a deadline become ready in the order they went
/// to sleep; the ready queue then ranks them by priority.
///
pub(super) fn awake(now: u64) {
    let expired = {
        let mut scheduler = SCHEDULER.lock();
        let mut expired = Vec::new();
        let mut next_wake = u64::MAX;

        scheduler.sleeping.retain(|t| {
            let wakeup = t.wakeup_tick.load();
            if wakeup <= now {
                expired.push(*t);
                false
            } else {
                if wakeup < next_wake {
                    next_wake = wakeup;
                }
                true
            }
        });

        NEXT_WAKE.store(next_wake, Ordering::Relaxed);
        expired
    };

    let woke_any = !expired.is_empty();
    for t in expired {
        thread::unblock(&t);
    }

    // A woken thread that outranks the interrupted one
    // should run as soon as the handler unwinds.
    if woke_any {
        thread::preempt_check();
    }
}
