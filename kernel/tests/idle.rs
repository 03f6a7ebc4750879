// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Boots the kernel and checks that the idle thread soaks
//! up the ticks while everything sleeps, and that the
//! loader hooks fire. The workload asserts the counters
//! in-kernel.

use kernel::machine;

#[test]
fn idle_thread_accounts_sleep_time() {
    let output = machine::run(&["-q", "-threads-tests", "run", "idle"]);

    assert!(output.contains("helper ran"), "{}", output);
    assert!(output.contains("slept through "), "{}", output);
    assert!(output.contains("(idle) end"), "{}", output);
}
