// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Bare-metal machine support.
//!
//! The interrupt gate is the CPU's interrupt flag. The embedder owns
//! the IDT and the interrupt controller; it programs the interval
//! timer with [`init_interval_timer`] and calls
//! [`interrupts::external_interrupt`](crate::interrupts::external_interrupt)
//! with [`time::timer_interrupt`](crate::time) glue from its timer ISR
//! after acknowledging the controller.

use x86_64::instructions::interrupts;
use x86_64::instructions::port::Port;

pub(crate) fn interrupts_enabled() -> bool {
    interrupts::are_enabled()
}

pub(crate) fn disable_interrupts() {
    interrupts::disable();
}

pub(crate) fn enable_interrupts() {
    interrupts::enable();
}

/// Enables interrupts and halts until the next one arrives.
/// The two are a single instruction pair, so an interrupt
/// cannot slip in between and leave the CPU halted.
///
pub(crate) fn wait_for_interrupt() {
    interrupts::enable_and_hlt();
}

/// Powers the machine off via the 0xf4 debug-exit port, the
/// same mechanism the QEMU harness uses. Falls back to a
/// halt loop if nothing is listening on the port.
///
pub(crate) fn power_off() -> ! {
    unsafe {
        let mut port = Port::new(0xf4);
        port.write(0x10u32);
    }

    loop {
        x86_64::instructions::hlt();
    }
}

const MIN_FREQUENCY: u64 = 18; // See https://wiki.osdev.org/Programmable_Interval_Timer
const MAX_FREQUENCY: u64 = 1193181;

/// Programs the Programmable Interval Timer to fire at
/// [`time::TICKS_PER_SECOND`](crate::time::TICKS_PER_SECOND) Hz.
///
pub fn init_interval_timer() {
    let mut freq = crate::time::TICKS_PER_SECOND;
    if freq < MIN_FREQUENCY {
        freq = MIN_FREQUENCY;
    }

    if freq > MAX_FREQUENCY {
        freq = MAX_FREQUENCY;
    }

    let divisor = MAX_FREQUENCY / freq;

    // See http://kernelx.weebly.com/programmable-interval-timer.html
    unsafe {
        Port::new(0x43).write(0x34 as u8);
        Port::new(0x40).write((divisor & 0xff) as u8);
        Port::new(0x40).write((divisor >> 8) as u8);
    }
}
