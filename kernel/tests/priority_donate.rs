// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Boots the kernel and checks priority donation, single
//! and chained. The workload asserts the priority values
//! in-kernel; here we check it ran to completion and in a
//! sensible order.

use kernel::machine;

fn offset(output: &str, needle: &str) -> usize {
    output
        .find(needle)
        .unwrap_or_else(|| panic!("`{}' missing from output:\n{}", needle, output))
}

#[test]
fn donation_raises_and_release_restores() {
    let output = machine::run(&["-q", "-threads-tests", "run", "priority-donate"]);

    let raised = offset(&output, "donation raised holder to 33");
    let acquired = offset(&output, "acquirer got the lock");
    let restored = offset(&output, "release restored 31");
    assert!(raised < acquired && acquired < restored, "{}", output);

    let chained = offset(&output, "chain raised holder to 35");
    let middle_outer = offset(&output, "middle got outer");
    let high_inner = offset(&output, "high got inner");
    let unwound = offset(&output, "chain unwound to 31");
    assert!(chained < middle_outer, "{}", output);
    assert!(middle_outer < high_inner, "{}", output);
    assert!(high_inner < unwound, "{}", output);

    assert!(output.contains("(priority-donate) end"), "{}", output);
}
