// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Strict-priority scheduling workloads: ordering, preemption,
//! donation, and priority-aware synchronisation primitives.

use crate::interrupts;
use crate::multitasking::thread::{self, PRI_DEFAULT};
use crate::sync::{Condition, Lock, Semaphore};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

/// Threads created at one priority run in creation order.
///
static FIFO_ORDER: spin::Mutex<Vec<&'static str>> = spin::Mutex::new(Vec::new());

const FIFO_WORKERS: [&str; 3] = ["A", "B", "C"];

fn fifo_worker(index: usize) {
    let name = FIFO_WORKERS[index];
    interrupts::without_interrupts(|| FIFO_ORDER.lock().push(name));
    println!("{} ran", name);
}

/// Three equal-priority threads, created from a higher
/// priority, run first-in first-out once the creator drops
/// below them, and the creator does not run again until all
/// three have exited.
///
pub(super) fn fifo() {
    thread::set_priority(PRI_DEFAULT + 1);

    for index in 0..FIFO_WORKERS.len() {
        thread::create(FIFO_WORKERS[index], PRI_DEFAULT, fifo_worker, index)
            .expect("failed to create worker");
    }

    // Dropping below the workers hands them the CPU; we are
    // back only once every one of them has exited.
    thread::set_priority(PRI_DEFAULT - 1);

    let order = interrupts::without_interrupts(|| FIFO_ORDER.lock().clone());
    assert_eq!(order.as_slice(), &FIFO_WORKERS[..], "creation order not kept");
    println!("main ran last");
}

static PREEMPTED: AtomicBool = AtomicBool::new(false);

fn preempt_worker(_arg: usize) {
    println!("high-priority thread running");
    PREEMPTED.store(true, Ordering::Relaxed);
}

/// Creating a higher-priority thread hands it the CPU
/// before `create` returns.
///
pub(super) fn preempt() {
    thread::set_priority(20);

    thread::create("high", 40, preempt_worker, 0).expect("failed to create worker");
    assert!(
        PREEMPTED.load(Ordering::Relaxed),
        "high-priority thread did not preempt its creator"
    );
    println!("back in main");
}

static DONATE_LOCK: Lock = Lock::new();
static OUTER: Lock = Lock::new();
static INNER: Lock = Lock::new();

fn acquirer(_arg: usize) {
    DONATE_LOCK.acquire();
    println!("acquirer got the lock");
    DONATE_LOCK.release();
}

fn middle(_arg: usize) {
    INNER.acquire();
    println!("middle holds inner");
    OUTER.acquire();
    println!("middle got outer");
    OUTER.release();
    INNER.release();
    println!("middle done");
}

fn high(_arg: usize) {
    INNER.acquire();
    println!("high got inner");
    INNER.release();
    println!("high done");
}

/// Blocking on a held lock donates effective priority to
/// the holder, directly and along a chain of held locks,
/// and releasing revokes exactly that lock's donations.
///
pub(super) fn donate() {
    assert_eq!(thread::get_priority(), PRI_DEFAULT);

    // A single donation.
    DONATE_LOCK.acquire();
    thread::create("acquirer", PRI_DEFAULT + 2, acquirer, 0).expect("failed to create acquirer");
    assert_eq!(
        thread::get_priority(),
        PRI_DEFAULT + 2,
        "donation did not reach the holder"
    );
    println!("donation raised holder to {}", thread::get_priority());

    DONATE_LOCK.release();
    assert_eq!(thread::get_priority(), PRI_DEFAULT, "donation was not revoked");
    println!("release restored {}", thread::get_priority());

    // A nested chain: high waits on middle, middle waits on
    // us, and high's priority flows through both hops.
    OUTER.acquire();
    thread::create("middle", PRI_DEFAULT + 2, middle, 0).expect("failed to create middle");
    assert_eq!(thread::get_priority(), PRI_DEFAULT + 2);

    thread::create("high", PRI_DEFAULT + 4, high, 0).expect("failed to create high");
    assert_eq!(
        thread::get_priority(),
        PRI_DEFAULT + 4,
        "nested donation did not propagate"
    );
    println!("chain raised holder to {}", thread::get_priority());

    OUTER.release();
    assert_eq!(thread::get_priority(), PRI_DEFAULT, "chain was not unwound");
    println!("chain unwound to {}", thread::get_priority());
}

static GATE: Semaphore = Semaphore::new(0);

const SEMA_WAITERS: [(&str, i32); 3] = [
    ("sema-low", PRI_DEFAULT + 2),
    ("sema-high", PRI_DEFAULT + 4),
    ("sema-mid", PRI_DEFAULT + 3),
];

fn sema_waiter(index: usize) {
    GATE.down();
    println!("{} up", SEMA_WAITERS[index].0);
}

static MONITOR: Lock = Lock::new();
static SIGNALLED: Condition = Condition::new();

const COND_WAITERS: [(&str, i32); 3] = [
    ("cond-low", PRI_DEFAULT + 2),
    ("cond-high", PRI_DEFAULT + 4),
    ("cond-mid", PRI_DEFAULT + 3),
];

fn cond_waiter(index: usize) {
    MONITOR.acquire();
    SIGNALLED.wait(&MONITOR);
    println!("{} signalled", COND_WAITERS[index].0);
    MONITOR.release();
}

/// Semaphores and condition variables wake their waiters in
/// effective-priority order, not arrival order.
///
pub(super) fn sync() {
    // All waiters outrank us, so each runs to its blocking
    // point as soon as it is created.
    for index in 0..SEMA_WAITERS.len() {
        let (name, priority) = SEMA_WAITERS[index];
        thread::create(name, priority, sema_waiter, index).expect("failed to create waiter");
    }
    for _ in 0..SEMA_WAITERS.len() {
        GATE.up();
    }
    println!("semaphore drained");

    for index in 0..COND_WAITERS.len() {
        let (name, priority) = COND_WAITERS[index];
        thread::create(name, priority, cond_waiter, index).expect("failed to create waiter");
    }
    for _ in 0..COND_WAITERS.len() {
        MONITOR.acquire();
        SIGNALLED.signal(&MONITOR);
        MONITOR.release();
    }
    println!("condition drained");
}
