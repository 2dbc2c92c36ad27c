//! `Event`, spec §3.

use nix::unistd::Pid;

/// Decoded syscall arguments, spec §3's `tracy_sc_args` analog.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SyscallArgs {
    pub a0: i64,
    pub a1: i64,
    pub a2: i64,
    pub a3: i64,
    pub a4: i64,
    pub a5: i64,
    pub return_code: i64,
    pub syscall: i64,
    pub ip: u64,
    pub sp: u64,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EventKind {
    None,
    Syscall,
    Signal,
    Internal,
    Quit,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub pid: Pid,
    pub syscall_num: Option<i64>,
    pub signal_num: Option<i32>,
    pub args: SyscallArgs,
    /// True when this is the syscall-entry stop, false for syscall-exit.
    /// Meaningless (left `true`) for non-`Syscall` event kinds. Spec §4.6:
    /// a hook needs this to tell whether `args.return_code` is live yet and
    /// whether denial/modification is still possible this stop.
    pub pre_syscall: bool,
}

impl Event {
    pub fn new(kind: EventKind, pid: Pid) -> Event {
        Event {
            kind,
            pid,
            syscall_num: None,
            signal_num: None,
            args: SyscallArgs::default(),
            pre_syscall: true,
        }
    }
}
