// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Boots the kernel and checks that semaphores and
//! condition variables wake waiters in priority order.

use kernel::machine;

fn offset(output: &str, needle: &str) -> usize {
    output
        .find(needle)
        .unwrap_or_else(|| panic!("`{}' missing from output:\n{}", needle, output))
}

#[test]
fn waiters_wake_by_priority() {
    let output = machine::run(&["-q", "-threads-tests", "run", "priority-sync"]);

    let high = offset(&output, "sema-high up");
    let mid = offset(&output, "sema-mid up");
    let low = offset(&output, "sema-low up");
    assert!(high < mid && mid < low, "semaphore wake order wrong:\n{}", output);

    let high = offset(&output, "cond-high signalled");
    let mid = offset(&output, "cond-mid signalled");
    let low = offset(&output, "cond-low signalled");
    assert!(high < mid && mid < low, "condition wake order wrong:\n{}", output);

    assert!(output.contains("(priority-sync) end"), "{}", output);
}
