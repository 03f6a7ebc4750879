// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Handles the kernel's monotonic ticker.
//!
//! The ticker counts timer interrupts since boot; one tick is the
//! kernel's canonical time unit. [`timer_interrupt`] is the handler
//! the interval timer drives — through the virtual timer on hosted
//! builds, or from the embedder's timer ISR on bare metal — and it in
//! turn drives sleeping, preemption, and the feedback policy's
//! recomputation schedule.

use crate::interrupts;
use crate::multitasking::thread;
use core::sync::atomic::{AtomicU64, Ordering};

/// The number of timer interrupts per second.
///
pub const TICKS_PER_SECOND: u64 = 100;

/// The system ticker, which is a monotonic counter.
///
static TICKER: AtomicU64 = AtomicU64::new(0);

/// Returns the number of ticks since the kernel booted.
///
/// The counter is read behind the interrupt gate for a
/// coherent view, so polling `ticks` in a loop is also a
/// preemption point, exactly as on real hardware.
///
pub fn ticks() -> u64 {
    let old_level = interrupts::disable();
    let now = TICKER.load(Ordering::Relaxed);
    interrupts::set_level(old_level);

    now
}

/// Returns the number of ticks that have passed since
/// `then`, which should be a value previously returned by
/// [`ticks`].
///
pub fn elapsed(then: u64) -> u64 {
    ticks().saturating_sub(then)
}

/// Sleeps for approximately `duration` ticks: no less, and
/// at most one tick more.
///
/// # Panics
///
/// `sleep` panics if interrupts are disabled, since time
/// cannot pass with the gate closed.
///
pub fn sleep(duration: u64) {
    assert!(
        interrupts::get_level() == interrupts::Level::On,
        "sleep with interrupts disabled"
    );

    let start = ticks();
    thread::sleep_until(start + duration);
}

/// The timer interrupt handler. Advances the ticker and
/// runs the thread subsystem's tick work: statistics,
/// feedback-policy recomputation, wakeups and preemption.
///
/// Must be called in external interrupt context; a
/// bare-metal embedder wraps it with
/// [`interrupts::external_interrupt`].
///
pub fn timer_interrupt() {
    let now = TICKER.fetch_add(1, Ordering::Relaxed) + 1;
    thread::on_timer_tick(now);
}
