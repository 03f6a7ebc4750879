// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the multilevel-feedback priority policy.
//!
//! When the kernel boots with `-mlfqs`, priorities are no longer set
//! by thread owners. Instead each thread's priority is derived from
//! its niceness and a decaying estimate of its recent CPU use, and the
//! estimate in turn decays against the system load average. All three
//! are recomputed on a fixed schedule driven by the timer tick:
//!
//! - every tick, the running thread's `recent_cpu` grows by one;
//! - every [`TIME_SLICE`] ticks, every thread's priority is recomputed
//!   and the ready queue re-sorted;
//! - every second, the load average is updated and every thread's
//!   `recent_cpu` is decayed.
//!
//! The idle thread takes no part in any of this.

use crate::multitasking::thread::scheduler::SCHEDULER;
use crate::multitasking::thread::{self, Thread, PRI_MAX, PRI_MIN, TIME_SLICE};
use crate::time::TICKS_PER_SECOND;
use crossbeam::atomic::AtomicCell;
use fixedpoint::Fixed;

/// The system-wide load average: a decaying estimate of the
/// number of threads ready to run over the last minute.
///
static LOAD_AVG: AtomicCell<Fixed> = AtomicCell::new(Fixed::ZERO);

/// Returns the current load average.
///
pub(crate) fn load_avg() -> Fixed {
    LOAD_AVG.load()
}

/// Resets the load average at scheduler start.
///
pub(crate) fn reset() {
    LOAD_AVG.store(Fixed::ZERO);
}

/// Computes a thread's priority from its recent CPU use and
/// niceness, clamped to the valid range.
///
fn priority_for(recent_cpu: Fixed, nice: i32) -> i32 {
    let priority = (Fixed::from_int(PRI_MAX - nice * 2) - recent_cpu / 4).trunc();
    priority.clamp(PRI_MIN, PRI_MAX)
}

/// Decays a thread's recent CPU use against the load
/// average and charges its niceness:
/// `recent_cpu = (2·load)/(2·load + 1) · recent_cpu + nice`.
///
fn decayed_recent_cpu(recent_cpu: Fixed, load: Fixed, nice: i32) -> Fixed {
    let twice_load = load * 2;
    (twice_load / (twice_load + 1)) * recent_cpu + nice
}

/// Folds the current number of runnable threads into the
/// load average: `load = (59/60)·load + (1/60)·ready`.
///
fn next_load_avg(load: Fixed, ready_threads: i32) -> Fixed {
    Fixed::from_int(59) / Fixed::from_int(60) * load
        + Fixed::from_int(1) / Fixed::from_int(60) * ready_threads
}

/// Recomputes one thread's priority. The idle thread's
/// priority is fixed and is left alone.
///
pub(crate) fn recompute_thread(t: &Thread) {
    if thread::is_idle(t) {
        return;
    }

    t.set_priority_value(priority_for(t.recent_cpu.load(), t.nice.load()));
}

/// Decays one thread's recent CPU use.
///
fn decay_thread(t: &Thread, load: Fixed) {
    if thread::is_idle(t) {
        return;
    }

    t.recent_cpu
        .store(decayed_recent_cpu(t.recent_cpu.load(), load, t.nice.load()));
}

/// Runs the feedback schedule for one timer tick. Called
/// from the tick handler with interrupts off.
///
pub(super) fn on_tick(now: u64) {
    let curr = thread::current();

    // Charge this tick to the running thread.
    if !thread::is_idle(curr) {
        curr.recent_cpu.store(curr.recent_cpu.load() + 1);
    }

    // Once a second: fold the run queue length into the
    // load average, then decay every thread's recent_cpu
    // against the new value.
    if now % TICKS_PER_SECOND == 0 {
        let scheduler = SCHEDULER.lock();

        let mut ready_threads = scheduler.ready.len() as i32;
        if !thread::is_idle(curr) {
            ready_threads += 1;
        }

        let load = next_load_avg(LOAD_AVG.load(), ready_threads);
        LOAD_AVG.store(load);

        for t in scheduler.ready.iter() {
            decay_thread(t, load);
        }
        for t in scheduler.sleeping.iter() {
            decay_thread(t, load);
        }
        decay_thread(curr, load);
    }

    // Once a slice: recompute every thread's priority and
    // restore the ready queue's ordering. Preemption at the
    // matching slice boundary then switches to the new
    // maximum.
    if now % TIME_SLICE == 0 {
        let mut scheduler = SCHEDULER.lock();

        for t in scheduler.ready.iter() {
            recompute_thread(t);
        }
        for t in scheduler.sleeping.iter() {
            recompute_thread(t);
        }
        recompute_thread(curr);

        scheduler.ready.resort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_formula() {
        assert_eq!(priority_for(Fixed::ZERO, 0), PRI_MAX);
        assert_eq!(priority_for(Fixed::from_int(8), 2), PRI_MAX - 2 - 4);
        assert_eq!(priority_for(Fixed::from_int(1000), 0), PRI_MIN);
        assert_eq!(priority_for(Fixed::ZERO, -20), PRI_MAX);
    }

    #[test]
    fn load_average_step() {
        // One second with sixty runnable threads moves an
        // empty load average by exactly one thread.
        let load = next_load_avg(Fixed::ZERO, 60);
        assert_eq!((load * 100).round(), 100);

        // And it decays towards zero when nothing runs.
        let load = next_load_avg(Fixed::from_int(60), 0);
        assert_eq!((load * 100).round(), 5900);
    }

    #[test]
    fn recent_cpu_decay() {
        // With load 1, recent_cpu decays by 2/3 and gains
        // the niceness.
        let decayed = decayed_recent_cpu(Fixed::from_int(3), Fixed::from_int(1), 1);
        assert_eq!(decayed.round(), 3);
        let decayed = decayed_recent_cpu(Fixed::from_int(30), Fixed::from_int(1), 0);
        assert_eq!(decayed.round(), 20);
    }
}
