// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Boots the kernel and checks that equal-priority threads
//! run in creation order, with the lowered creator last.

use kernel::machine;

fn offset(output: &str, needle: &str) -> usize {
    output
        .find(needle)
        .unwrap_or_else(|| panic!("`{}' missing from output:\n{}", needle, output))
}

#[test]
fn equal_priorities_run_fifo() {
    let output = machine::run(&["-q", "-threads-tests", "run", "priority-fifo"]);

    let a = offset(&output, "A ran");
    let b = offset(&output, "B ran");
    let c = offset(&output, "C ran");
    let main = offset(&output, "main ran last");
    assert!(a < b && b < c && c < main, "run order wrong:\n{}", output);

    assert!(output.contains("(priority-fifo) end"), "{}", output);
}
