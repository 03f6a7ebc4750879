// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Boots the kernel and checks that sleepers wake in
//! deadline order, not creation order.
//!
//! Kernel state is global to the process, so this binary
//! holds exactly one boot.

use kernel::machine;

fn offset(output: &str, needle: &str) -> usize {
    output
        .find(needle)
        .unwrap_or_else(|| panic!("`{}' missing from output:\n{}", needle, output))
}

#[test]
fn sleepers_wake_in_deadline_order() {
    let output = machine::run(&["-q", "-threads-tests", "run", "alarm-ordering"]);

    let s2 = offset(&output, "S2 woke");
    let s3 = offset(&output, "S3 woke");
    let s1 = offset(&output, "S1 woke");
    let done = offset(&output, "all sleepers finished");
    assert!(s2 < s3 && s3 < s1, "wake order wrong:\n{}", output);
    assert!(s1 < done, "main woke before its sleepers:\n{}", output);

    assert!(output.contains("(alarm-ordering) end"), "{}", output);
    assert!(output.contains("Thread:"), "missing stats:\n{}", output);
}
