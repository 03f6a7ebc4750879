// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Boots the kernel with no actions and checks the plain
//! boot-to-power-off path.

use kernel::machine;

#[test]
fn boots_and_powers_off() {
    let output = machine::run(&["-q"]);

    assert!(output.contains("Ember kernel booting."), "{}", output);
    assert!(output.contains("Thread: "), "missing stats:\n{}", output);
    assert!(output.contains("Powering off..."), "{}", output);
}
