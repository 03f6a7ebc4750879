// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The kernel's boot path: command-line parsing, actions,
//! and shutdown.
//!
//! The command line is options first, then positional actions.
//! Unknown options and malformed actions are fatal; a kernel that
//! cannot understand its boot line has nothing sensible to do.
//!
//! Options:
//!
//! - `-h`: print a usage summary and power off.
//! - `-q`: power off once all actions have run.
//! - `-f`: format the file system (no file system is configured, so
//!   this is accepted and ignored).
//! - `-rs=SEED`: seed the pseudo-random number generator.
//! - `-mlfqs`: select the multilevel-feedback scheduler policy.
//! - `-ul=COUNT`: limit user pages (no user processes are configured,
//!   so this is accepted and ignored).
//! - `-threads-tests`: allow `run` to name a built-in thread workload.
//!
//! Actions:
//!
//! - `run NAME`: run the named workload from [`selftest`](crate::selftest).

use crate::arch;
use crate::multitasking::thread;
use crate::random;
use crate::selftest;
use alloc::string::{String, ToString};

/// Everything the option block of the command line can say.
///
#[derive(Debug, Default, Eq, PartialEq)]
struct Options {
    help: bool,
    power_off_when_done: bool,
    format_filesystem: bool,
    random_seed: Option<u64>,
    mlfqs: bool,
    user_page_limit: Option<u64>,
    threads_tests: bool,
}

/// A fatal problem with the command line.
///
#[derive(Debug, Eq, PartialEq)]
enum ParseError {
    UnknownOption(String),
    BadValue(String),
}

/// The kernel's entry point. Parses the command line,
/// brings up threading, runs the requested actions, and
/// powers off or idles forever.
///
pub fn main(args: &[&str]) -> ! {
    println!("Ember kernel booting.");

    let (options, actions) = match parse_options(args) {
        Ok(parsed) => parsed,
        Err(ParseError::UnknownOption(name)) => {
            panic!("unknown option `{}' (use -h for help)", name)
        }
        Err(ParseError::BadValue(name)) => {
            panic!("option `{}' needs a numeric value", name)
        }
    };

    if options.help {
        usage();
    }
    if let Some(seed) = options.random_seed {
        random::init(seed);
    }
    if options.mlfqs {
        thread::select_mlfqs();
    }
    if options.format_filesystem {
        println!("No file system is configured; ignoring -f.");
    }
    if options.user_page_limit.is_some() {
        println!("No user processes are configured; ignoring -ul.");
    }

    // Initialise ourselves as a thread, then start
    // preemptive scheduling.
    thread::init();
    thread::start();

    run_actions(&options, actions);

    if options.power_off_when_done {
        shutdown();
    }

    thread::exit();
}

/// Splits the command line into its options and the actions
/// that follow them.
///
fn parse_options<'a>(args: &'a [&'a str]) -> Result<(Options, &'a [&'a str]), ParseError> {
    let mut options = Options::default();

    let mut rest = args;
    while let Some(&arg) = rest.first() {
        if !arg.starts_with('-') {
            break;
        }
        rest = &rest[1..];

        let (name, value) = match arg.find('=') {
            Some(idx) => (&arg[..idx], Some(&arg[idx + 1..])),
            None => (arg, None),
        };

        match name {
            "-h" => options.help = true,
            "-q" => options.power_off_when_done = true,
            "-f" => options.format_filesystem = true,
            "-rs" => options.random_seed = Some(numeric_value(name, value)?),
            "-mlfqs" => options.mlfqs = true,
            "-ul" => options.user_page_limit = Some(numeric_value(name, value)?),
            "-threads-tests" => options.threads_tests = true,
            _ => return Err(ParseError::UnknownOption(name.to_string())),
        }
    }

    Ok((options, rest))
}

fn numeric_value(name: &str, value: Option<&str>) -> Result<u64, ParseError> {
    value
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ParseError::BadValue(name.to_string()))
}

/// Runs the actions specified on the kernel command line.
///
fn run_actions(options: &Options, mut actions: &[&str]) {
    while let Some(&action) = actions.first() {
        match action {
            "run" => {
                let name = actions
                    .get(1)
                    .unwrap_or_else(|| panic!("action `run' requires an argument"));
                run_task(options, name);
                actions = &actions[2..];
            }
            _ => panic!("unknown action `{}' (use -h for help)", action),
        }
    }
}

/// Runs the task named by a `run` action.
///
fn run_task(options: &Options, name: &str) {
    if !options.threads_tests {
        panic!("no process loader is configured; boot with -threads-tests to run `{}'", name);
    }

    selftest::run(name);
}

/// Prints stats and powers the machine off.
///
fn shutdown() -> ! {
    thread::print_stats();
    println!("Powering off...");
    arch::power_off();
}

/// Prints a usage summary and powers off, without stats.
///
fn usage() -> ! {
    println!(
        "\nCommand line syntax: [OPTION...] [ACTION...]
Options must precede actions and apply to every action.

Available actions:
  run NAME             Run the named thread workload.

Options:
  -h                   Print this help message and power off.
  -q                   Power off after completing all actions.
  -f                   Format the file system (none is configured).
  -rs=SEED             Seed the random number generator.
  -mlfqs               Use the multilevel feedback queue scheduler.
  -ul=COUNT            Limit user memory to COUNT pages (no user processes).
  -threads-tests       Allow `run' to name built-in thread workloads."
    );
    arch::power_off();
}

#[cfg(test)]
mod tests {
    use super::{parse_options, Options, ParseError};

    #[test]
    fn options_then_actions() {
        let args = ["-q", "-threads-tests", "run", "alarm-ordering"];
        let (options, actions) = parse_options(&args).unwrap();
        assert_eq!(
            options,
            Options {
                power_off_when_done: true,
                threads_tests: true,
                ..Options::default()
            }
        );
        assert_eq!(actions, ["run", "alarm-ordering"]);
    }

    #[test]
    fn valued_options() {
        let args = ["-rs=42", "-ul=16", "-mlfqs"];
        let (options, actions) = parse_options(&args).unwrap();
        assert_eq!(options.random_seed, Some(42));
        assert_eq!(options.user_page_limit, Some(16));
        assert!(options.mlfqs);
        assert!(actions.is_empty());
    }

    #[test]
    fn unknown_option_is_fatal() {
        let args = ["-zap"];
        assert_eq!(
            parse_options(&args),
            Err(ParseError::UnknownOption("-zap".into()))
        );
    }

    #[test]
    fn missing_value_is_fatal() {
        let args = ["-rs"];
        assert_eq!(parse_options(&args), Err(ParseError::BadValue("-rs".into())));
    }
}
