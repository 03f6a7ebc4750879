// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the kernel console behind the `print!` and `println!`
//! macros.
//!
//! Output is appended to an in-memory buffer. A bare-metal embedder can
//! register a [`redirect`](set_redirect) to copy everything to a serial
//! port as it is written; a hosted boot reads the buffer back with
//! [`take_output`] once the kernel has powered off.

use crate::interrupts;
use alloc::string::String;
use core::fmt;
use core::fmt::Write;

/// The accumulated console output.
///
static CONSOLE: spin::Mutex<Console> = spin::Mutex::new(Console {
    buffer: String::new(),
    redirect: None,
});

struct Console {
    buffer: String,
    redirect: Option<fn(&str)>,
}

/// Registers a function that receives every chunk of console
/// output as it is written, such as a serial driver.
///
pub fn set_redirect(sink: fn(&str)) {
    interrupts::without_interrupts(|| {
        CONSOLE.lock().redirect = Some(sink);
    });
}

/// Removes and returns everything written to the console so far.
///
pub fn take_output() -> String {
    interrupts::without_interrupts(|| core::mem::take(&mut CONSOLE.lock().buffer))
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // Interrupts stay off while the console lock is held, so a
    // preempting thread can never find the lock taken.
    interrupts::without_interrupts(|| {
        let mut console = CONSOLE.lock();
        let start = console.buffer.len();
        console
            .buffer
            .write_fmt(args)
            .expect("write to console buffer failed");
        if let Some(redirect) = console.redirect {
            let written = &console.buffer[start..];
            redirect(written);
        }
    });
}

/// Prints to the kernel console.
///
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!($($arg)*))
    };
}

/// Prints to the kernel console, with a newline.
///
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::console::_print(format_args!("{}\n", format_args!($($arg)*))));
}
