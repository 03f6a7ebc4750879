// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Timed-sleep workloads.

use crate::multitasking::thread;
use crate::time;
use core::sync::atomic::{AtomicU64, Ordering};

/// Deadlines are measured from a common base tick recorded
/// before the sleepers are created.
///
static BASE_TICK: AtomicU64 = AtomicU64::new(0);

/// Each sleeper's name and deadline offset. Creation order
/// deliberately differs from wake order, and the offsets
/// are far enough apart that thread creation itself cannot
/// reorder them.
///
const SLEEPERS: [(&str, u64); 3] = [("S1", 300), ("S2", 100), ("S3", 200)];

fn sleeper(index: usize) {
    let (name, offset) = SLEEPERS[index];
    let deadline = BASE_TICK.load(Ordering::Relaxed) + offset;

    thread::sleep_until(deadline);

    let now = time::ticks();
    assert!(now >= deadline, "{} woke early: {} < {}", name, now, deadline);
    println!("{} woke", name);
}

/// Sleepers with staggered deadlines wake in deadline
/// order, not creation order.
///
pub(super) fn ordering() {
    BASE_TICK.store(time::ticks(), Ordering::Relaxed);

    for index in 0..SLEEPERS.len() {
        let (name, _) = SLEEPERS[index];
        thread::create(name, thread::PRI_DEFAULT, sleeper, index)
            .expect("failed to create sleeper");
    }

    // Outsleep all of them, then report.
    thread::sleep_until(BASE_TICK.load(Ordering::Relaxed) + 400);
    println!("all sleepers finished");
}
