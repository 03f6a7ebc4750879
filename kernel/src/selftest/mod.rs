// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Built-in thread workloads, run by name from the boot
//! command line.
//!
//! Each workload exercises one behaviour of the thread subsystem from
//! inside a running kernel and prints what it observes, so a harness
//! that boots the kernel can judge the run from the console output
//! alone. A workload that detects a violation panics the kernel.
//!
//! Workloads run in the initial thread, after the scheduler has
//! started. `run <name>` on the command line (with `-threads-tests`)
//! selects one.

use crate::multitasking::thread;
use crate::time;
use core::sync::atomic::{AtomicU64, Ordering};

mod alarm;
mod mlfqs;
mod priority;

/// The table of runnable workloads.
///
const TASKS: &[(&str, fn())] = &[
    ("alarm-ordering", alarm::ordering),
    ("priority-fifo", priority::fifo),
    ("priority-preempt", priority::preempt),
    ("priority-donate", priority::donate),
    ("priority-sync", priority::sync),
    ("mlfqs-nice", mlfqs::nice),
    ("mlfqs-load-avg", mlfqs::load_avg),
    ("idle", idle),
];

/// Runs the named workload.
///
/// # Panics
///
/// `run` panics if no workload has that name.
///
pub fn run(name: &str) {
    let task = TASKS
        .iter()
        .find(|(task_name, _)| *task_name == name)
        .unwrap_or_else(|| panic!("no thread workload named `{}'", name));

    println!("({}) begin", name);
    (task.1)();
    println!("({}) end", name);
}

static SWITCH_ACTIVATIONS: AtomicU64 = AtomicU64::new(0);
static THREADS_INITIALISED: AtomicU64 = AtomicU64::new(0);

fn count_switch(_incoming: &thread::Thread) {
    SWITCH_ACTIVATIONS.fetch_add(1, Ordering::Relaxed);
}

fn count_init(_new: &thread::Thread) {
    THREADS_INITIALISED.fetch_add(1, Ordering::Relaxed);
}

fn helper(_arg: usize) {
    println!("helper ran");
}

/// With nothing to do, the idle thread runs and the idle
/// tick counter grows, while kernel ticks stand still. Also
/// checks the loader hooks: the per-thread initialisation
/// hook and the address-space activation callout.
///
fn idle() {
    thread::set_address_space_hook(count_switch);
    thread::set_thread_init_hook(count_init);

    thread::create("helper", thread::PRI_DEFAULT + 1, helper, 0)
        .expect("failed to create helper thread");
    assert!(
        THREADS_INITIALISED.load(Ordering::Relaxed) >= 1,
        "thread init hook never ran"
    );

    let before = thread::stats();
    time::sleep(200);
    let after = thread::stats();

    let idle_delta = after.idle_ticks - before.idle_ticks;
    let kernel_delta = after.kernel_ticks - before.kernel_ticks;
    assert!(idle_delta >= 150, "idle thread barely ran: {} ticks", idle_delta);
    assert!(kernel_delta <= 20, "kernel ticks grew while asleep: {}", kernel_delta);
    assert_eq!(after.user_ticks, 0);
    assert!(
        SWITCH_ACTIVATIONS.load(Ordering::Relaxed) >= 2,
        "address-space hook never ran"
    );

    println!("slept through {} idle ticks", idle_delta);
}
