//! `SafeFork`, spec §4.7.
//!
//! The kernel's auto-attach on fork/clone (the plain `TRACE_CHILDREN` path
//! in `EventLoop`) has a race window: between the fork-family syscall
//! returning in the parent and the tracer's `PTRACE_ATTACH` landing on the
//! newborn, the newborn can run arbitrary tracee code. `SafeFork` closes
//! that window by bracketing the syscall itself: the parent is held at its
//! post-stop (it cannot proceed past the syscall return) until the newborn
//! is attached and has reported its own initial stop, so there's no tracee
//! code running anywhere that isn't already under the tracer's control.

use std::thread;
use std::time::{Duration, Instant};

use nix::sys::ptrace;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::arch::ArchAbi;
use crate::child::{Child, ChildHandle, ChildRegistry};
use crate::error::{Result, TraceyError};
use crate::fsm;

const ATTACH_TIMEOUT: Duration = Duration::from_millis(500);
const ATTACH_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Runs steps 1-4 of spec §4.7 against `parent`, which must be at the
/// pre-stop of a clone/fork/vfork syscall. On success, returns the
/// newborn's `ChildHandle`, already registered and with the child-creation
/// callback already invoked.
///
/// `on_create` is the session's child-creation callback (spec §4's
/// "Lifecycle callback"); it is invoked exactly once for the newborn,
/// before the newborn's first user-visible event, matching the guarantee
/// spec §4.5 makes for ordinary (non-safe) fork discovery too.
pub fn safe_fork(
    parent: &ChildHandle,
    registry: &mut ChildRegistry,
    mut on_create: impl FnMut(&ChildHandle),
) -> Result<ChildHandle> {
    let parent_pid = parent.borrow().pid;

    // Step 1: snapshot parent registers before the syscall runs.
    let snapshot = fsm::fetch_regs(parent_pid)?;

    // Resume through the syscall itself; the kernel decides whether this
    // is fork, vfork or clone, we don't need to rewrite it (unlike the
    // original design note's "inject a stop-at-entry mechanism", attaching
    // before the newborn is resumed achieves the same effect without
    // needing an architecture-specific trampoline).
    ptrace::syscall(parent_pid, None).map_err(TraceyError::KernelRefused)?;
    match waitpid(parent_pid, None) {
        Ok(WaitStatus::PtraceSyscall(_)) => {}
        Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => {
            return Err(TraceyError::ChildGone(parent_pid));
        }
        Ok(_) => return Err(TraceyError::Internal("unexpected stop during safe_fork".into())),
        Err(e) => return Err(TraceyError::KernelRefused(e)),
    }

    // Step 2: the parent now holds the newborn's pid in the return
    // register.
    let post_regs = fsm::fetch_regs(parent_pid)?;
    let child_pid = Pid::from_raw(post_regs.get_return() as i32);
    if child_pid.as_raw() <= 0 {
        // The syscall failed (e.g. EAGAIN from a resource limit); nothing
        // to attach to. Restore the parent and report failure upstream —
        // its own post-stop event will carry the negative return value.
        return Err(TraceyError::BadArgument(format!(
            "fork-family syscall failed for pid {}: return value {}",
            parent_pid,
            post_regs.get_return()
        )));
    }
    parent.borrow_mut().safe_fork_pid = Some(child_pid);

    // Step 3: attach to the newborn and wait for its own stop. A newly
    // forked tracee of a traced process is not automatically traced unless
    // the tracer requested PTRACE_O_TRACEFORK/VFORK/CLONE, which SafeFork
    // deliberately avoids relying on; we attach explicitly instead and poll
    // for the resulting stop with a bounded timeout (spec §4.7's stated
    // failure mode).
    let attach_result = attach_with_timeout(child_pid);
    let newborn = match attach_result {
        Ok(()) => {
            let handle = registry.insert(child_pid, false);
            on_create(&handle);
            handle
        }
        Err(e) => {
            // Failure mode: kill the newborn and report the parent's
            // syscall as failed. The parent's other state is untouched.
            let _ = ptrace::kill(child_pid);
            parent.borrow_mut().safe_fork_pid = None;
            return Err(e);
        }
    };

    // Step 4: restore both parent and child registers so execution
    // continues as if an ordinary fork had occurred. The child inherited
    // the parent's register file at fork time (copy-on-write semantics
    // apply to memory, not registers, which the kernel already set up
    // correctly for the child); we only need to make sure the parent's
    // register file wasn't disturbed by our bookkeeping.
    ptrace::setregs(parent_pid, snapshot.into()).map_err(TraceyError::KernelRefused)?;
    parent.borrow_mut().safe_fork_pid = None;

    Ok(newborn)
}

fn attach_with_timeout(pid: Pid) -> Result<()> {
    ptrace::attach(pid).map_err(TraceyError::KernelRefused)?;
    let deadline = Instant::now() + ATTACH_TIMEOUT;
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Stopped(..)) => return Ok(()),
            Ok(WaitStatus::StillAlive) => {
                if Instant::now() >= deadline {
                    return Err(TraceyError::KernelRefused(nix::errno::Errno::ETIMEDOUT));
                }
                thread::sleep(ATTACH_POLL_INTERVAL);
            }
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => {
                return Err(TraceyError::ChildGone(pid));
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::ECHILD) => {
                if Instant::now() >= deadline {
                    return Err(TraceyError::KernelRefused(nix::errno::Errno::ETIMEDOUT));
                }
                thread::sleep(ATTACH_POLL_INTERVAL);
            }
            Err(e) => return Err(TraceyError::KernelRefused(e)),
        }
    }
}

/// True when `child` is a newborn in the middle of a `safe_fork` bracket.
pub fn is_in_flight(child: &Child) -> bool {
    child.safe_fork_pid.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn is_in_flight_reflects_safe_fork_pid() {
        let mut child = Child::new(Pid::from_raw(1), false);
        assert!(!is_in_flight(&child));
        child.safe_fork_pid = Some(Pid::from_raw(2));
        assert!(is_in_flight(&child));
    }
}
