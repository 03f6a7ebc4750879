// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the kernel's interrupt gate.
//!
//! Every mutation of scheduler state happens with interrupts disabled.
//! Primitives save the prior level with [`disable`] and restore it with
//! [`set_level`], so critical sections nest. The gate also tracks
//! whether the CPU is currently running an external interrupt handler:
//! handlers must never block, so they request a context switch with
//! [`yield_on_return`] instead, and the switch happens once the handler
//! has unwound.
//!
//! On bare metal the gate is the CPU's interrupt flag. On hosted builds
//! it is a software flag, and the virtual interval timer delivers
//! pended ticks at the moment the gate opens, which is exactly when
//! real hardware would deliver a pended interrupt.

use crate::arch;
use core::sync::atomic::{AtomicBool, Ordering};

/// Whether an external interrupt handler is currently running.
///
static IN_EXTERNAL: AtomicBool = AtomicBool::new(false);

/// Whether the running external handler has requested a
/// context switch on return.
///
static YIELD_ON_RETURN: AtomicBool = AtomicBool::new(false);

/// The state of the interrupt gate.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    /// Interrupts are disabled.
    Off,

    /// Interrupts are enabled.
    On,
}

/// Returns the current interrupt level.
///
pub fn get_level() -> Level {
    if arch::interrupts_enabled() {
        Level::On
    } else {
        Level::Off
    }
}

/// Disables interrupts and returns the previous level.
///
pub fn disable() -> Level {
    let old = get_level();
    arch::disable_interrupts();
    old
}

/// Enables interrupts and returns the previous level.
///
/// # Panics
///
/// `enable` panics if called from an external interrupt
/// handler, which cannot be interrupted.
///
pub fn enable() -> Level {
    assert!(
        !is_external(),
        "interrupts enabled inside an external handler"
    );

    let old = get_level();
    arch::enable_interrupts();
    old
}

/// Sets the interrupt level and returns the previous one.
///
pub fn set_level(level: Level) -> Level {
    match level {
        Level::On => enable(),
        Level::Off => disable(),
    }
}

/// Runs `f` with interrupts disabled, restoring the
/// previous level afterwards.
///
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let old = disable();
    let ret = f();
    set_level(old);
    ret
}

/// Returns whether the CPU is currently running an
/// external interrupt handler.
///
pub fn is_external() -> bool {
    IN_EXTERNAL.load(Ordering::Relaxed)
}

/// Requests a context switch once the running external
/// handler has unwound.
///
/// # Panics
///
/// `yield_on_return` panics outside an external handler;
/// ordinary code calls [`thread::yield_now`](crate::multitasking::thread::yield_now)
/// directly.
///
pub(crate) fn yield_on_return() {
    assert!(is_external(), "yield_on_return outside an external handler");
    YIELD_ON_RETURN.store(true, Ordering::Relaxed);
}

/// Runs `handler` in external-interrupt context and reports
/// whether it requested a context switch on return.
///
/// The caller is responsible for performing the switch after
/// the handler's frame is fully unwound.
///
pub(crate) fn dispatch_external(handler: fn()) -> bool {
    debug_assert!(get_level() == Level::Off);
    debug_assert!(!is_external());

    IN_EXTERNAL.store(true, Ordering::Relaxed);
    handler();
    IN_EXTERNAL.store(false, Ordering::Relaxed);

    YIELD_ON_RETURN.swap(false, Ordering::Relaxed)
}

/// Runs `handler` as an external interrupt, then performs
/// any context switch it requested.
///
/// This is the glue a bare-metal embedder calls from its
/// timer interrupt service routine, after acknowledging the
/// interrupt controller.
///
pub fn external_interrupt(handler: fn()) {
    if dispatch_external(handler) {
        crate::multitasking::thread::yield_now();
    }
}
