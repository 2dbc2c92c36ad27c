//! Syscall and signal name tables, spec §6's "Syscall name table" external
//! collaborator.
//!
//! Grounded directly on `stalker/src/syscalls.rs`'s `fetch_syscall_table()`:
//! an embedded JSON table parsed with `serde_json`, keyed by syscall number.
//! Tables are process-wide and immutable after initialisation (spec §9:
//! "Global-ish syscall name table ... implement as a read-only data table
//! selected by target architecture"), so each table is built once behind
//! `lazy_static!` and indexed both ways.

use std::collections::HashMap;

use lazy_static::lazy_static;
use serde_json::Value;

#[cfg(target_arch = "x86_64")]
const SYSCALL_TABLE_JSON: &str = include_str!("data/x86_64_syscalls.json");
#[cfg(target_arch = "aarch64")]
const SYSCALL_TABLE_JSON: &str = include_str!("data/aarch64_syscalls.json");

struct SyscallTable {
    name_to_number: HashMap<String, i64>,
    number_to_name: HashMap<i64, String>,
}

fn build_table(json: &str) -> SyscallTable {
    let parsed: Value = serde_json::from_str(json).expect("embedded syscall table is valid JSON");
    let mut name_to_number = HashMap::new();
    let mut number_to_name = HashMap::new();
    for entry in parsed["data"].as_array().expect("data is an array") {
        let number = entry[0].as_i64().expect("syscall number is an integer");
        let name = entry[1].as_str().expect("syscall name is a string").to_owned();
        name_to_number.insert(name.clone(), number);
        number_to_name.insert(number, name);
    }
    SyscallTable {
        name_to_number,
        number_to_name,
    }
}

lazy_static! {
    static ref TABLE: SyscallTable = build_table(SYSCALL_TABLE_JSON);
}

/// `name_to_number(name) -> number or Unknown`, spec §6.
pub fn name_to_number(name: &str) -> Option<i64> {
    TABLE.name_to_number.get(name).copied()
}

/// `number_to_name(number) -> name or Unknown`, spec §6.
pub fn number_to_name(number: i64) -> Option<&'static str> {
    TABLE.number_to_name.get(&number).map(String::as_str)
}

/// `signal_name(number) -> name or Unknown`, spec §6. Signal numbering is
/// architecture-independent on Linux, so this is a small static table
/// rather than a generated one.
pub fn signal_name(number: i32) -> Option<&'static str> {
    const NAMES: &[(i32, &str)] = &[
        (libc::SIGHUP, "SIGHUP"),
        (libc::SIGINT, "SIGINT"),
        (libc::SIGQUIT, "SIGQUIT"),
        (libc::SIGILL, "SIGILL"),
        (libc::SIGTRAP, "SIGTRAP"),
        (libc::SIGABRT, "SIGABRT"),
        (libc::SIGBUS, "SIGBUS"),
        (libc::SIGFPE, "SIGFPE"),
        (libc::SIGKILL, "SIGKILL"),
        (libc::SIGUSR1, "SIGUSR1"),
        (libc::SIGSEGV, "SIGSEGV"),
        (libc::SIGUSR2, "SIGUSR2"),
        (libc::SIGPIPE, "SIGPIPE"),
        (libc::SIGALRM, "SIGALRM"),
        (libc::SIGTERM, "SIGTERM"),
        (libc::SIGCHLD, "SIGCHLD"),
        (libc::SIGCONT, "SIGCONT"),
        (libc::SIGSTOP, "SIGSTOP"),
        (libc::SIGTSTP, "SIGTSTP"),
        (libc::SIGTTIN, "SIGTTIN"),
        (libc::SIGTTOU, "SIGTTOU"),
        (libc::SIGSYS, "SIGSYS"),
    ];
    NAMES
        .iter()
        .find(|(n, _)| *n == number)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_to_number_round_trips_with_number_to_name() {
        for (name, number) in TABLE.name_to_number.iter() {
            assert_eq!(number_to_name(*number), Some(name.as_str()));
        }
    }

    #[test]
    fn write_resolves_on_every_supported_arch() {
        assert!(name_to_number("write").is_some());
        assert!(name_to_number("exit_group").is_some());
    }

    #[test]
    fn unknown_name_is_none() {
        assert_eq!(name_to_number("not_a_real_syscall"), None);
    }

    #[test]
    fn known_signal_name() {
        assert_eq!(signal_name(libc::SIGKILL), Some("SIGKILL"));
    }

    #[test]
    fn unknown_signal_is_none() {
        assert_eq!(signal_name(9999), None);
    }
}
