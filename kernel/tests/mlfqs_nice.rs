// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Boots the kernel with `-mlfqs` and checks that kinder
//! compute-bound threads accumulate less recent CPU use.
//! The workload asserts the ordering in-kernel.

use kernel::machine;

#[test]
fn niceness_spreads_recent_cpu() {
    let output = machine::run(&["-q", "-mlfqs", "-threads-tests", "run", "mlfqs-nice"]);

    assert!(output.contains("nice-0 finished"), "{}", output);
    assert!(output.contains("nice-5 finished"), "{}", output);
    assert!(output.contains("nice-10 finished"), "{}", output);
    assert!(output.contains("recent_cpu "), "{}", output);
    assert!(output.contains("(mlfqs-nice) end"), "{}", output);
}
