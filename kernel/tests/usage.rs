// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Boots the kernel with `-h` and checks that it prints the
//! usage summary and powers off before threading starts.

use kernel::machine;

#[test]
fn help_prints_usage_and_stops() {
    let output = machine::run(&["-h", "-q", "run", "never-reached"]);

    assert!(output.contains("Command line syntax"), "{}", output);
    assert!(output.contains("-mlfqs"), "{}", output);
    // -h powers off before actions run or stats exist.
    assert!(!output.contains("Thread: "), "{}", output);
    assert!(!output.contains("(never-reached)"), "{}", output);
}
