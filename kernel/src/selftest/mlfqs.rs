// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Multilevel-feedback policy workloads. Both require the
//! kernel to have booted with `-mlfqs`.

use crate::multitasking::thread;
use crate::time::{self, TICKS_PER_SECOND};
use core::sync::atomic::{AtomicI32, AtomicU64, Ordering};

/// The tick at which the compute-bound workers stop.
///
static SPIN_END: AtomicU64 = AtomicU64::new(0);

const NICENESS: [i32; 3] = [0, 5, 10];

static RECENT: [AtomicI32; 3] = [AtomicI32::new(0), AtomicI32::new(0), AtomicI32::new(0)];
static PRIORITY: [AtomicI32; 3] = [AtomicI32::new(0), AtomicI32::new(0), AtomicI32::new(0)];

fn nice_worker(index: usize) {
    thread::set_nice(NICENESS[index]);

    let end = SPIN_END.load(Ordering::Relaxed);
    while time::ticks() < end {}

    RECENT[index].store(thread::get_recent_cpu(), Ordering::Relaxed);
    PRIORITY[index].store(thread::get_priority(), Ordering::Relaxed);
    println!("nice-{} finished", NICENESS[index]);
}

/// Compute-bound threads with spread niceness: the kinder a
/// thread, the less CPU it is given, so the less recent CPU
/// use it accumulates.
///
pub(super) fn nice() {
    assert!(thread::mlfqs_enabled(), "boot with -mlfqs");

    SPIN_END.store(time::ticks() + 25 * TICKS_PER_SECOND, Ordering::Relaxed);
    for index in 0..NICENESS.len() {
        thread::create("nice-worker", thread::PRI_DEFAULT, nice_worker, index)
            .expect("failed to create worker");
    }

    // Sleep past the spin window, leaving the workers the
    // CPU, then give them a moment to record and exit.
    thread::sleep_until(SPIN_END.load(Ordering::Relaxed) + 3 * TICKS_PER_SECOND);

    let recent: [i32; 3] = [
        RECENT[0].load(Ordering::Relaxed),
        RECENT[1].load(Ordering::Relaxed),
        RECENT[2].load(Ordering::Relaxed),
    ];
    assert!(
        recent[0] > recent[1] && recent[1] > recent[2],
        "recent_cpu not ordered by niceness: {:?}",
        recent
    );

    println!(
        "recent_cpu {} > {} > {}",
        recent[0], recent[1], recent[2]
    );
    println!(
        "priorities {} / {} / {}",
        PRIORITY[0].load(Ordering::Relaxed),
        PRIORITY[1].load(Ordering::Relaxed),
        PRIORITY[2].load(Ordering::Relaxed)
    );
}

static LOAD_END: AtomicU64 = AtomicU64::new(0);

fn load_worker(_arg: usize) {
    let end = LOAD_END.load(Ordering::Relaxed);
    while time::ticks() < end {}
}

/// With a steady set of runnable threads, the load average
/// converges to their count.
///
pub(super) fn load_avg() {
    assert!(thread::mlfqs_enabled(), "boot with -mlfqs");

    const WORKERS: i32 = 3;
    let end = time::ticks() + 240 * TICKS_PER_SECOND;
    LOAD_END.store(end, Ordering::Relaxed);

    for _ in 0..WORKERS {
        thread::create("load-worker", thread::PRI_DEFAULT, load_worker, 0)
            .expect("failed to create worker");
    }

    // Wake shortly before the workers stop, while all of
    // them still count towards the load.
    thread::sleep_until(end - TICKS_PER_SECOND / 2);

    let load = thread::get_load_avg();
    let expected = WORKERS * 100;
    assert!(
        (load - expected).abs() <= 10,
        "load average {} did not converge to {}",
        load,
        expected
    );
    println!("load average {} (x100) with {} workers", load, WORKERS);
}
