//! `SyscallFsm`, spec §4.6: per-child pre/post state tracking, argument
//! modification, and syscall denial.

use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::arch::{ArchAbi, Registers};
use crate::child::Child;
use crate::error::{Result, TraceyError};
use crate::event::SyscallArgs;

/// A syscall guaranteed to be harmless and (on every supported arch) cheap,
/// used as the substitute when denying a syscall: the kernel runs this
/// instead of whatever the tracee asked for, and the post-hook substitutes
/// the real return value before the tracee sees it.
#[cfg(target_arch = "x86_64")]
pub const NOOP_SYSCALL_NR: i64 = libc::SYS_getpid;
#[cfg(target_arch = "aarch64")]
pub const NOOP_SYSCALL_NR: i64 = libc::SYS_getpid;

/// Advances the FSM for one syscall-stop. Per spec §3's invariant,
/// `pre_syscall` toggles exactly once per stop of kind syscall-entry/exit.
pub fn advance(child: &mut Child) -> bool {
    let was_pre = child.pre_syscall;
    child.pre_syscall = !was_pre;
    was_pre
}

fn get_regs(pid: Pid) -> Result<Registers> {
    ptrace::getregs(pid)
        .map(Registers::from)
        .map_err(TraceyError::KernelRefused)
}

fn set_regs(pid: Pid, regs: &Registers) -> Result<()> {
    ptrace::setregs(pid, (*regs).into()).map_err(TraceyError::KernelRefused)
}

/// At a pre-stop, rewrites the syscall number and/or argument slots. Spec
/// §4.6: "ArchABI performs the register writes before the child is
/// resumed, so the kernel sees the modified call."
pub fn modify_syscall(
    pid: Pid,
    new_syscall_number: Option<i64>,
    new_args: Option<&SyscallArgs>,
) -> Result<()> {
    let mut regs = get_regs(pid)?;
    if let Some(nr) = new_syscall_number {
        regs.set_syscall(nr);
    }
    if let Some(args) = new_args {
        regs.set_arg(0, args.a0 as u64);
        regs.set_arg(1, args.a1 as u64);
        regs.set_arg(2, args.a2 as u64);
        regs.set_arg(3, args.a3 as u64);
        regs.set_arg(4, args.a4 as u64);
        regs.set_arg(5, args.a5 as u64);
    }
    set_regs(pid, &regs)
}

/// At a pre-stop, replaces the requested syscall with a no-op and records
/// the original number in `child.denied_nr`, plus the hook's requested
/// `substitute_return` in `child.denied_return`, so the post-stop can apply
/// it via `substitute_denied_return` once the no-op has run to completion.
pub fn deny_syscall(child: &mut Child, substitute_return: i64) -> Result<()> {
    let mut regs = get_regs(child.pid)?;
    child.denied_nr = Some(regs.get_syscall());
    child.denied_return = Some(substitute_return);
    regs.set_syscall(NOOP_SYSCALL_NR);
    set_regs(child.pid, &regs)
}

/// At the post-stop following a denial, substitutes `value` into the
/// return-value register and clears `denied_nr`. The post-hook still fires
/// with the substituted value visible in the event's `args.return_code`.
pub fn substitute_denied_return(child: &mut Child, value: i64) -> Result<()> {
    let mut regs = get_regs(child.pid)?;
    regs.set_return(value);
    set_regs(child.pid, &regs)?;
    child.denied_nr = None;
    child.denied_return = None;
    Ok(())
}

/// Decodes the current register file into `SyscallArgs` for the
/// user-visible event. Per spec §4.6's invariant, this always reflects the
/// natural syscall, never an injected one — callers must not invoke this
/// while `child.inj.injecting` is true.
pub fn decode_args(regs: &Registers) -> SyscallArgs {
    SyscallArgs {
        a0: regs.get_arg(0) as i64,
        a1: regs.get_arg(1) as i64,
        a2: regs.get_arg(2) as i64,
        a3: regs.get_arg(3) as i64,
        a4: regs.get_arg(4) as i64,
        a5: regs.get_arg(5) as i64,
        return_code: regs.get_return(),
        syscall: regs.get_syscall(),
        ip: regs.get_ip(),
        sp: regs.get_sp(),
    }
}

pub fn fetch_regs(pid: Pid) -> Result<Registers> {
    get_regs(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn advance_toggles_exactly_once() {
        let mut child = Child::new(Pid::from_raw(1), false);
        assert!(child.pre_syscall);
        let was_pre = advance(&mut child);
        assert!(was_pre);
        assert!(!child.pre_syscall);
        let was_pre = advance(&mut child);
        assert!(!was_pre);
        assert!(child.pre_syscall);
    }

    #[test]
    fn decode_args_reflects_register_slots() {
        let mut regs = Registers::default();
        regs.set_arg(0, 1);
        regs.set_arg(1, 2);
        regs.set_syscall(57);
        regs.set_return(-1);
        regs.set_ip(0x1000);
        regs.set_sp(0x2000);
        let args = decode_args(&regs);
        assert_eq!(args.a0, 1);
        assert_eq!(args.a1, 2);
        assert_eq!(args.syscall, 57);
        assert_eq!(args.return_code, -1);
        assert_eq!(args.ip, 0x1000);
        assert_eq!(args.sp, 0x2000);
    }
}
