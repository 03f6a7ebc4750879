// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Architecture and environment support for the thread subsystem.
//!
//! The scheduler proper is architecture-neutral. Everything it cannot
//! express portably lives here:
//!
//! - [`switch`]: the x86-64 stack switch and the initial frame layout
//!   for new threads. This is shared by both environments, since a
//!   stack switch is equally valid inside a hosted process.
//! - [`metal`]: the bare-metal interrupt gate, halt, interval timer
//!   and power-off, compiled for `target_os = "none"`.
//! - [`hosted`]: a software interrupt gate, virtual interval timer and
//!   boot shim, so the kernel can be booted inside an ordinary process
//!   and its behaviour observed from tests.

#[cfg(not(target_arch = "x86_64"))]
compile_error!("the Ember kernel currently supports x86-64 only");

pub(crate) mod switch;

#[cfg(not(target_os = "none"))]
pub mod hosted;

#[cfg(target_os = "none")]
pub mod metal;

#[cfg(not(target_os = "none"))]
pub(crate) use hosted::{
    disable_interrupts, enable_interrupts, interrupts_enabled, power_off, wait_for_interrupt,
};

#[cfg(target_os = "none")]
pub(crate) use metal::{
    disable_interrupts, enable_interrupts, interrupts_enabled, power_off, wait_for_interrupt,
};

pub(crate) use switch::{prepare_thread_stack, switch_stack};
