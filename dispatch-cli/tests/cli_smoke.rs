// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("dispatchctl").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("rc"))
        .stdout(predicate::str::contains("coordinator"))
        .stdout(predicate::str::contains("processor"));
}

#[test]
fn test_no_args_shows_help_and_fails() {
    let mut cmd = Command::cargo_bin("dispatchctl").unwrap();
    cmd.assert().failure();
}

#[test]
fn test_completions_bash() {
    let mut cmd = Command::cargo_bin("dispatchctl").unwrap();
    cmd.args(["completions", "bash"]);
    cmd.assert().success().stdout(predicate::str::contains("dispatchctl"));
}

#[test]
fn test_status_requires_at_least_one_url() {
    let mut cmd = Command::cargo_bin("dispatchctl").unwrap();
    cmd.arg("status");
    cmd.assert().failure();
}
