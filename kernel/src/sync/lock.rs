// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements locks with priority donation.
//!
//! A lock is a semaphore with an owner. Under the strict-priority
//! policy, a thread that blocks on a held lock donates its effective
//! priority to the holder, and the donation follows the chain of
//! holders waiting on further locks, up to [`MAX_DONATION_DEPTH`]
//! levels. Releasing a lock revokes exactly the donations that
//! arrived through it and re-derives the holder's effective priority
//! from its base priority and the donations that remain.
//!
//! Donations are tracked by id, not by reference: each record on the
//! donee names the donor thread and the lock the donation came
//! through, and a side table maps lock ids to their holders so the
//! chain walk can hop from a contended lock to its owner. A lock's id
//! is its address, which is stable and unique while the lock exists.
//!
//! The feedback policy computes priorities from CPU use instead, so
//! donation is disabled entirely under `-mlfqs`.

use crate::interrupts;
use crate::multitasking::thread::{self, scheduler, ThreadId, ThreadPtr};
use crate::sync::semaphore::Semaphore;
use alloc::collections::BTreeMap;
use core::num::NonZeroUsize;
use crossbeam::atomic::AtomicCell;

/// How many levels a donation propagates along a chain of
/// held locks before we give up. Deeper chains than this
/// indicate a design problem in the caller, not a need for
/// deeper propagation.
///
const MAX_DONATION_DEPTH: usize = 8;

/// Identifies a lock for donation bookkeeping: the lock's
/// address, stable and unique for the lock's lifetime.
///
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) struct LockId(NonZeroUsize);

/// One priority donation: `donor` is blocked on `lock` and
/// lends `priority` to the lock's holder.
///
#[derive(Clone, Copy, Debug)]
pub(crate) struct Donation {
    pub donor: ThreadId,
    pub lock: LockId,
    pub priority: i32,
}

/// Maps contended locks to their holders, for the donation
/// chain walk. Maintained by acquire and release, touched
/// only with interrupts disabled.
///
static HOLDERS: spin::Mutex<BTreeMap<LockId, ThreadPtr>> = spin::Mutex::new(BTreeMap::new());

/// A mutual-exclusion lock with priority donation.
///
/// Unlike a semaphore, a lock has an owner: only the thread
/// that acquired it may release it, and acquiring it twice
/// from the same thread is an error rather than a deadlock.
///
pub struct Lock {
    holder: AtomicCell<Option<ThreadPtr>>,
    semaphore: Semaphore,
}

impl Lock {
    /// Returns a new, unheld lock.
    ///
    pub const fn new() -> Lock {
        Lock {
            holder: AtomicCell::new(None),
            semaphore: Semaphore::new(1),
        }
    }

    fn id(&self) -> LockId {
        LockId(NonZeroUsize::new(self as *const Lock as usize).expect("lock at address zero"))
    }

    /// Returns whether the current thread holds this lock.
    ///
    pub fn held_by_current(&self) -> bool {
        match self.holder.load() {
            Some(holder) => core::ptr::eq(&*holder, thread::current()),
            None => false,
        }
    }

    /// Acquires the lock, blocking until it is free.
    ///
    /// While blocked, the current thread donates its
    /// effective priority to the chain of threads it is
    /// waiting behind, so a low-priority holder cannot
    /// starve us via a middle-priority bystander.
    ///
    /// # Panics
    ///
    /// `acquire` panics in an interrupt handler, and if the
    /// current thread already holds the lock.
    ///
    pub fn acquire(&self) {
        assert!(!interrupts::is_external(), "lock acquire in an interrupt handler");
        assert!(!self.held_by_current(), "lock already held by this thread");

        if !thread::mlfqs_enabled() {
            let old_level = interrupts::disable();
            if self.holder.load().is_some() {
                let curr = thread::current();
                curr.waiting_on.store(Some(self.id()));
                donate(curr);
            }
            interrupts::set_level(old_level);
        }

        self.semaphore.down();

        // The lock is ours.
        let old_level = interrupts::disable();
        let curr = thread::current();
        curr.waiting_on.store(None);
        self.holder.store(Some(ThreadPtr::from(curr)));
        HOLDERS.lock().insert(self.id(), ThreadPtr::from(curr));
        interrupts::set_level(old_level);
    }

    /// Releases the lock, revoking the donations that
    /// arrived through it, and wakes the highest-priority
    /// waiter.
    ///
    /// # Panics
    ///
    /// `release` panics if the current thread does not hold
    /// the lock.
    ///
    pub fn release(&self) {
        assert!(
            self.held_by_current(),
            "lock released by a thread that does not hold it"
        );

        let old_level = interrupts::disable();
        if !thread::mlfqs_enabled() {
            let id = self.id();
            let curr = thread::current();
            curr.donations.lock().retain(|d| d.lock != id);
            thread::refresh_priority(curr);
        }

        self.holder.store(None);
        HOLDERS.lock().remove(&self.id());
        interrupts::set_level(old_level);

        // Waking the waiter also re-checks preemption, which
        // covers the priority we may just have dropped.
        self.semaphore.up();
    }
}

impl Default for Lock {
    fn default() -> Lock {
        Lock::new()
    }
}

/// Walks the chain of held locks starting at `donor`,
/// recording the donation at each level and raising each
/// holder to at least the donor's effective priority.
///
/// Runs with interrupts disabled.
///
fn donate(donor: &thread::Thread) {
    let mut donor = ThreadPtr::from(donor);

    for _ in 0..MAX_DONATION_DEPTH {
        let lock_id = match donor.waiting_on.load() {
            Some(id) => id,
            None => break,
        };
        let holder = match HOLDERS.lock().get(&lock_id) {
            Some(holder) => *holder,
            None => break,
        };

        // Record (or refresh) this donor's donation on the
        // holder, keyed by the lock it arrived through.
        let donation = Donation {
            donor: donor.id(),
            lock: lock_id,
            priority: donor.priority(),
        };
        {
            let mut donations = holder.donations.lock();
            match donations
                .iter_mut()
                .find(|d| d.donor == donation.donor && d.lock == donation.lock)
            {
                Some(existing) => existing.priority = donation.priority,
                None => donations.push(donation),
            }
        }

        if holder.priority() < donor.priority() {
            holder.set_priority_value(donor.priority());
            scheduler::reposition(holder);
        }

        donor = holder;
    }
}
