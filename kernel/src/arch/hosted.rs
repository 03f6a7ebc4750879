// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Runs the kernel inside an ordinary process.
//!
//! The thread subsystem only needs three things from its machine: an
//! interrupt gate, an interval timer, and somewhere for the first
//! stack. This module provides all three in software so the kernel can
//! be booted and observed without hardware:
//!
//! - The interrupt gate is a process-wide flag.
//! - The interval timer pends one tick at every gate opening, and
//!   pended ticks are delivered exactly where hardware would deliver
//!   them: the moment the gate opens, and in the idle thread's
//!   [`wait_for_interrupt`]. Code that polls [`time::ticks`](crate::time::ticks)
//!   therefore advances the clock and is preempted mid-loop, just as a
//!   hardware timer would preempt it.
//! - [`run`] boots the kernel on a freshly allocated, properly aligned
//!   stack region, so the stack-pointer-rounding recovery of the
//!   running thread holds from the first instruction. When the kernel
//!   powers off, `run` returns the captured console output.
//!
//! One process hosts at most one boot, because the kernel's global
//! state is initialised once.

use crate::arch::switch;
use crate::console;
use crate::init;
use crate::interrupts;
use crate::memory::{self, PageFlags};
use crate::multitasking::thread;
use crate::time;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// The software interrupt flag.
///
static ENABLED: AtomicBool = AtomicBool::new(false);

/// Ticks raised by the virtual interval timer but not yet
/// delivered through the gate.
///
static PENDING_TICKS: AtomicU64 = AtomicU64::new(0);

/// Whether this process has already booted a kernel.
///
static BOOTED: AtomicBool = AtomicBool::new(false);

/// The boot command line, staged for the kernel entry point.
///
static BOOT_ARGS: spin::Mutex<Vec<String>> = spin::Mutex::new(Vec::new());

/// The host stack pointer saved by [`boot_on_stack`](switch::boot_on_stack),
/// restored when the kernel powers off.
///
static HOST_STACK_POINTER: SavedPointer = SavedPointer(UnsafeCell::new(0));

struct SavedPointer(UnsafeCell<u64>);

// Only ever touched with the kernel stopped or from the
// single boot path.
unsafe impl Sync for SavedPointer {}

pub(crate) fn interrupts_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

pub(crate) fn disable_interrupts() {
    ENABLED.store(false, Ordering::Relaxed);
}

/// Opens the gate. Crossing the gate boundary pends one
/// timer tick, then anything pended is delivered.
///
pub(crate) fn enable_interrupts() {
    if !ENABLED.swap(true, Ordering::Relaxed) {
        PENDING_TICKS.fetch_add(1, Ordering::Relaxed);
        deliver_pending();
    }
}

/// Waits for the next timer interrupt. The virtual timer
/// always has one due, so this amounts to opening the gate.
///
pub(crate) fn wait_for_interrupt() {
    enable_interrupts();
}

/// Delivers pended ticks while the gate is open.
///
/// Each tick runs the timer handler in external-interrupt
/// context with the gate closed, mirroring the CPU's own
/// interrupt entry, and performs any context switch the
/// handler requested only after the handler has unwound and
/// the gate is open again.
///
fn deliver_pending() {
    loop {
        if !ENABLED.load(Ordering::Relaxed) {
            return;
        }
        if PENDING_TICKS.load(Ordering::Relaxed) == 0 {
            return;
        }

        PENDING_TICKS.fetch_sub(1, Ordering::Relaxed);
        ENABLED.store(false, Ordering::Relaxed);
        let wants_yield = interrupts::dispatch_external(time::timer_interrupt);
        ENABLED.store(true, Ordering::Relaxed);

        if wants_yield {
            thread::yield_now();
        }
    }
}

/// Stops the machine: switches back to the host frame saved
/// at boot. The kernel's threads are abandoned in place.
///
pub(crate) fn power_off() -> ! {
    disable_interrupts();

    let mut scratch = 0u64;
    unsafe { switch::switch_stack(&mut scratch, HOST_STACK_POINTER.0.get()) };
    unreachable!("powered-off kernel kept running");
}

/// Boots the kernel with the given command line and returns
/// everything it wrote to the console.
///
/// # Panics
///
/// `run` panics if this process has already booted a kernel:
/// kernel state is global and initialised exactly once.
///
pub fn run(args: &[&str]) -> String {
    assert!(
        !BOOTED.swap(true, Ordering::Relaxed),
        "this process has already booted a kernel"
    );

    *BOOT_ARGS.lock() = args.iter().map(|s| String::from(*s)).collect();

    // The boot stack is an ordinary thread stack region, so
    // thread::init can adopt it as the initial thread.
    let stack = memory::page_alloc(PageFlags::ZERO | PageFlags::ASSERT)
        .expect("failed to allocate the boot stack");
    let stack_top = stack.as_ptr() as u64 + memory::STACK_SIZE as u64;

    unsafe {
        switch::boot_on_stack(HOST_STACK_POINTER.0.get(), stack_top, kernel_entry, 0);
    }

    // power_off switched us back here.
    console::take_output()
}

/// The kernel side of [`run`]: runs on the boot stack and
/// never returns.
///
extern "sysv64" fn kernel_entry(_arg: u64) -> ! {
    let args = BOOT_ARGS.lock();
    let argv: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    init::main(&argv)
}
