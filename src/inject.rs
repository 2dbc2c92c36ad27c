//! `Injector`: synchronous and asynchronous syscall injection, spec §4.6.
//!
//! Grounded on vmsh's `tracer/inject_syscall.rs`, which follows the same
//! save-registers / patch-syscall-site / restore shape this spec describes,
//! and on proot-rs for the ptrace register plumbing.

use nix::sys::ptrace;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::arch::{ArchAbi, Registers};
use crate::error::{Result, TraceyError};
use crate::event::SyscallArgs;

/// Per-child injection context, spec §3's "Injection context".
#[derive(Default)]
pub struct InjectState {
    pub injecting: bool,
    pub injected: bool,
    /// Whether injection was started before (`true`) or after (`false`)
    /// the natural syscall boundary — records whether the instruction
    /// pointer needs rewinding on restore.
    pub pre: bool,
    pub syscall_num: i64,
    pub saved_regs: Option<Registers>,
    pub callback: Option<Box<dyn FnMut(i64)>>,
    /// Return code of the most recently completed async injection, for
    /// callers that poll via `inject_syscall_end`/`_post_end` instead of
    /// relying on the callback.
    pub pending_return: Option<i64>,
}

/// Snapshots `pid`'s registers via ptrace.
fn get_regs(pid: Pid) -> Result<Registers> {
    ptrace::getregs(pid)
        .map(Registers::from)
        .map_err(TraceyError::KernelRefused)
}

fn set_regs(pid: Pid, regs: &Registers) -> Result<()> {
    ptrace::setregs(pid, (*regs).into()).map_err(TraceyError::KernelRefused)
}

fn write_args(regs: &mut Registers, nr: i64, args: &SyscallArgs) {
    regs.set_syscall(nr);
    regs.set_arg(0, args.a0 as u64);
    regs.set_arg(1, args.a1 as u64);
    regs.set_arg(2, args.a2 as u64);
    regs.set_arg(3, args.a3 as u64);
    regs.set_arg(4, args.a4 as u64);
    regs.set_arg(5, args.a5 as u64);
}

/// Blocks until `pid` reports the next syscall-stop (entry or exit),
/// ignoring other stop kinds (group-stops, other ptrace-events) by simply
/// resuming through them. Used only for the internal pre→post pair of an
/// injected call — the outer `EventLoop` never sees these.
fn wait_for_syscall_stop(pid: Pid) -> Result<()> {
    loop {
        ptrace::syscall(pid, None).map_err(TraceyError::KernelRefused)?;
        match waitpid(pid, Some(WaitPidFlag::empty())) {
            Ok(WaitStatus::PtraceSyscall(_)) => return Ok(()),
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => {
                return Err(TraceyError::ChildGone(pid));
            }
            Ok(_) => continue,
            Err(e) => return Err(TraceyError::KernelRefused(e)),
        }
    }
}

/// Synchronous injection, spec §4.6 steps 1-6.
///
/// Snapshots registers, rewinds `rip` over the trap if currently at a
/// post-stop (so the kernel re-enters kernel-mode for the injected call),
/// writes the injected syscall and arguments, runs it to completion, then
/// restores the snapshot so the original syscall (if any) re-executes
/// untouched on the next `wait_event`.
pub fn inject_syscall(
    pid: Pid,
    at_post_stop: bool,
    syscall_number: i64,
    args: &SyscallArgs,
) -> Result<i64> {
    let snapshot = get_regs(pid)?;
    let mut working = snapshot;

    if at_post_stop {
        let rewound = working.get_ip() - Registers::SYSCALL_INSN_SIZE as u64;
        working.set_ip(rewound);
    }

    write_args(&mut working, syscall_number, args);
    set_regs(pid, &working)?;

    // Run the injected call's entry stop, then its exit stop.
    wait_for_syscall_stop(pid)?;
    wait_for_syscall_stop(pid)?;

    let post_regs = get_regs(pid)?;
    let return_code = post_regs.get_return();

    // Restore the original snapshot. If we rewound to re-enter kernel mode,
    // the restored rip must still point past the original trap so the
    // tracee doesn't re-execute the instruction we borrowed.
    set_regs(pid, &snapshot)?;

    Ok(return_code)
}

/// Starts an asynchronous injection: stashes intent and callback into
/// `inj`, marks `injecting`, and leaves resuming to the caller (normally
/// `EventLoop`, which recognises the next two syscall-stops belong to this
/// injection and hides them from user hooks).
pub fn inject_syscall_pre_start(
    inj: &mut InjectState,
    pid: Pid,
    at_post_stop: bool,
    syscall_number: i64,
    args: &SyscallArgs,
    callback: Box<dyn FnMut(i64)>,
) -> Result<()> {
    if inj.injecting {
        return Err(TraceyError::InjectionBusy);
    }
    let snapshot = get_regs(pid)?;
    let mut working = snapshot;
    if at_post_stop {
        let rewound = working.get_ip() - Registers::SYSCALL_INSN_SIZE as u64;
        working.set_ip(rewound);
    }
    write_args(&mut working, syscall_number, args);
    set_regs(pid, &working)?;

    inj.injecting = true;
    inj.injected = false;
    inj.pre = !at_post_stop;
    inj.syscall_num = syscall_number;
    inj.saved_regs = Some(snapshot);
    inj.callback = Some(callback);
    Ok(())
}

/// Called by `EventLoop` when the injected call's pre→post pair has both
/// been consumed. Restores the snapshot, invokes the callback, and clears
/// `injecting`.
pub fn complete_async_injection(inj: &mut InjectState, pid: Pid) -> Result<i64> {
    let post_regs = get_regs(pid)?;
    let return_code = post_regs.get_return();

    if let Some(snapshot) = inj.saved_regs.take() {
        set_regs(pid, &snapshot)?;
    }

    if let Some(mut cb) = inj.callback.take() {
        cb(return_code);
    }

    inj.injecting = false;
    inj.injected = true;
    inj.pending_return = Some(return_code);
    Ok(return_code)
}

/// Synchronous retrieval of the return code for a caller that prefers
/// polling over a callback. Only valid once `complete_async_injection` has
/// run (i.e. `inj.injected` is set); otherwise this would race the
/// in-flight call.
pub fn inject_syscall_end(inj: &mut InjectState) -> Result<i64> {
    inj.pending_return.take().ok_or_else(|| {
        TraceyError::Internal("inject_syscall_end called before injection completed".into())
    })
}
