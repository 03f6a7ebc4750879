// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the scheduler core: the ready queue, thread
//! selection, and the context switch.
//!
//! ## Thread switching
//!
//! [`reschedule`] is the single entry to the scheduler. The caller has
//! disabled interrupts and decided the departing thread's next state;
//! `reschedule` first frees the stack regions of threads that died
//! since the last switch, then selects the next thread and switches to
//! it. The shared state lock is always released before the stack
//! switch, so the incoming thread never finds it taken.

use crate::arch;
use crate::interrupts::{self, Level};
use crate::memory;
use crate::multitasking::thread::queue::ReadyQueue;
use crate::multitasking::thread::{self, ThreadPtr, ThreadState, TIME_SLICE};
use alloc::vec::Vec;

/// The scheduler's shared state, guarded by a spin mutex
/// that is only ever taken with interrupts disabled.
///
pub(super) static SCHEDULER: spin::Mutex<Scheduler> = spin::Mutex::new(Scheduler::new());

pub(super) struct Scheduler {
    /// Threads that are ready to run, in priority order.
    pub ready: ReadyQueue,

    /// Threads waiting for a wakeup tick, in no particular
    /// order.
    pub sleeping: Vec<ThreadPtr>,

    /// Dead threads whose stack regions are freed at the
    /// top of the next reschedule.
    destruction: Vec<ThreadPtr>,

    /// Ticks the running thread has had since it was
    /// scheduled.
    slice_ticks: u64,
}

impl Scheduler {
    const fn new() -> Scheduler {
        Scheduler {
            ready: ReadyQueue::new(),
            sleeping: Vec::new(),
            destruction: Vec::new(),
            slice_ticks: 0,
        }
    }
}

/// Queues a thread onto the ready queue, in priority order.
///
pub(crate) fn insert_ready(t: ThreadPtr) {
    debug_assert!(interrupts::get_level() == Level::Off);
    SCHEDULER.lock().ready.insert(t);
}

/// Returns the effective priority of the highest-priority
/// ready thread, if any.
///
pub(crate) fn front_priority() -> Option<i32> {
    SCHEDULER.lock().ready.front_priority()
}

/// Re-sorts a ready thread whose effective priority just
/// changed, such as by a donation. Threads in any other
/// state are left alone.
///
pub(crate) fn reposition(t: ThreadPtr) {
    debug_assert!(interrupts::get_level() == Level::Off);

    let mut scheduler = SCHEDULER.lock();
    if t.state() == ThreadState::Ready {
        scheduler.ready.reposition(t);
    }
}

/// Charges one tick to the running thread's time slice,
/// returning `true` once the slice is exhausted.
///
pub(crate) fn tick_slice() -> bool {
    let mut scheduler = SCHEDULER.lock();
    scheduler.slice_ticks += 1;
    scheduler.slice_ticks >= TIME_SLICE
}

/// Moves the current thread into `status`, frees any dead
/// threads, and switches to the next thread to run. At
/// entry, interrupts must be off and the current thread
/// must still be marked running.
///
pub(crate) fn reschedule(status: ThreadState) {
    assert!(interrupts::get_level() == Level::Off);
    assert!(thread::current().state() == ThreadState::Running);

    // Free the stack regions of threads that died since the
    // last switch. This must not happen in the same call
    // that queued them: the dying thread was still running
    // on its stack then.
    let victims: Vec<ThreadPtr> = {
        let mut scheduler = SCHEDULER.lock();
        scheduler.destruction.drain(..).collect()
    };
    for victim in victims {
        // The control block sits at the base of the
        // thread's stack region, so its address is the
        // region's address.
        unsafe {
            let block = victim.as_raw();
            core::ptr::drop_in_place(block);
            memory::page_free(core::ptr::NonNull::new_unchecked(block.cast()));
        }
    }

    thread::current().set_state(status);
    schedule();
}

/// Chooses the next thread and switches to it.
///
/// The ready queue's head runs next; if the queue is empty,
/// the idle thread runs. The departing thread, if dying, is
/// queued for destruction, except for the initial thread,
/// whose stack region was never ours to free.
///
fn schedule() {
    let curr = thread::running_ptr();
    debug_assert!(curr.state() != ThreadState::Running);

    let next = {
        let mut scheduler = SCHEDULER.lock();

        // Start a new time slice.
        scheduler.slice_ticks = 0;

        scheduler.ready.pop_front()
    };
    let next = next.unwrap_or_else(idle_thread);
    next.check();
    next.set_state(ThreadState::Running);

    // Activate the new address space.
    if let Some(hook) = thread::address_space_hook() {
        hook(&next);
    }

    if curr != next {
        if curr.state() == ThreadState::Dying && !thread::is_initial(&curr) {
            SCHEDULER.lock().destruction.push(curr);
        }

        // Nothing below this point may touch the shared
        // state: the locks are released, and the switch
        // must not use the departing stack after saving it.
        unsafe { arch::switch_stack(curr.stack_pointer.get(), next.stack_pointer.get()) };
    }
}

/// Returns the idle thread, which must exist by the time
/// the ready queue can be empty.
///
fn idle_thread() -> ThreadPtr {
    thread::idle_ptr().expect("ready queue empty before the idle thread exists")
}
