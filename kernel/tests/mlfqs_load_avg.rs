// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Boots the kernel with `-mlfqs` and checks that the load
//! average converges to the number of runnable threads.
//! The workload asserts the tolerance in-kernel.

use kernel::machine;

#[test]
fn load_average_converges() {
    let output = machine::run(&["-q", "-mlfqs", "-threads-tests", "run", "mlfqs-load-avg"]);

    assert!(output.contains("with 3 workers"), "{}", output);
    assert!(output.contains("(mlfqs-load-avg) end"), "{}", output);
}
