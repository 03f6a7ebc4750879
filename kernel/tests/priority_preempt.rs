// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Boots the kernel and checks that creating a
//! higher-priority thread preempts the creator at once.

use kernel::machine;

fn offset(output: &str, needle: &str) -> usize {
    output
        .find(needle)
        .unwrap_or_else(|| panic!("`{}' missing from output:\n{}", needle, output))
}

#[test]
fn higher_priority_thread_runs_first() {
    let output = machine::run(&["-q", "-threads-tests", "run", "priority-preempt"]);

    let high = offset(&output, "high-priority thread running");
    let back = offset(&output, "back in main");
    assert!(high < back, "creator resumed before the new thread:\n{}", output);

    assert!(output.contains("(priority-preempt) end"), "{}", output);
}
