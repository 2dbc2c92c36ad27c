//! `EventLoop`, spec §4.5: the single blocking `wait_event` call that
//! classifies the next kernel stop into a user-visible `Event`, or handles
//! it internally and asks the caller to wait again.
//!
//! Grounded on `rd`'s event-classification shape (`session/session.rs`'s
//! interpretation of `WaitStatus`) and on `renacer`'s syscall-stop
//! bookkeeping for the pre/post toggle.

use nix::sys::ptrace;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::child::{ChildHandle, ChildRegistry};
use crate::error::{Result, TraceyError};
use crate::event::{Event, EventKind};
use crate::fsm;
use crate::hooks::{HookResult, HookTable};
use crate::inject;
use crate::log::LogLevel::*;
use crate::options::Options;
use crate::safe_fork;

/// Outcome of one `wait_event` call. `Handled` means a stop was consumed
/// internally (group-stop, injection bookkeeping, newborn discovery) and
/// the caller should call `wait_event` again rather than treating this as
/// a user-visible event.
pub enum WaitOutcome {
    Event(Event),
    Handled,
}

/// Blocks on the next kernel stop for `target` (a specific pid, or `None`
/// for "any child of this session"), classifies it, and either returns a
/// user-visible event or resumes the child and reports `Handled`.
pub fn wait_event(
    target: Option<Pid>,
    registry: &mut ChildRegistry,
    hooks: &mut HookTable,
    options: Options,
    mut on_create: impl FnMut(&ChildHandle),
) -> Result<WaitOutcome> {
    let wait_target = target.unwrap_or_else(|| Pid::from_raw(-1));
    let status = match waitpid(wait_target, Some(WaitPidFlag::__WALL)) {
        Ok(s) => s,
        Err(nix::errno::Errno::ECHILD) => {
            return Ok(WaitOutcome::Event(Event::new(EventKind::Quit, Pid::from_raw(0))));
        }
        Err(e) => return Err(TraceyError::KernelRefused(e)),
    };

    match status {
        WaitStatus::Exited(pid, code) => {
            log!(LogDebug, "pid {} exited with code {}", pid, code);
            registry.remove(pid);
            let mut event = Event::new(EventKind::Quit, pid);
            event.args.return_code = code as i64;
            Ok(WaitOutcome::Event(event))
        }
        WaitStatus::Signaled(pid, sig, _) => {
            log!(LogDebug, "pid {} killed by signal {}", pid, sig);
            registry.remove(pid);
            let mut event = Event::new(EventKind::Quit, pid);
            event.signal_num = Some(sig as i32);
            Ok(WaitOutcome::Event(event))
        }
        WaitStatus::PtraceSyscall(pid) => handle_syscall_stop(pid, registry, hooks),
        WaitStatus::Stopped(pid, sig) => handle_signal_stop(pid, sig, registry, options, &mut on_create),
        WaitStatus::PtraceEvent(pid, _, raw_event) => {
            handle_ptrace_event(pid, raw_event, registry, &mut on_create)
        }
        WaitStatus::Continued(pid) => {
            log!(LogDebug, "pid {} continued", pid);
            Ok(WaitOutcome::Handled)
        }
        WaitStatus::StillAlive => Ok(WaitOutcome::Handled),
    }
}

fn handle_syscall_stop(
    pid: Pid,
    registry: &mut ChildRegistry,
    hooks: &mut HookTable,
) -> Result<WaitOutcome> {
    let handle = registry
        .lookup(pid)
        .ok_or_else(|| TraceyError::ChildGone(pid))?;

    // Syscall-stops belonging to an in-flight asynchronous injection are
    // hidden from user hooks entirely; `Injector` owns that pre/post pair.
    // `inj.pre` tracks which half of the pair we're waiting for: true means
    // the next stop is the injected call's entry echo (nothing to do but
    // let it run), false means it's the exit, which is when the return
    // value is ready to collect.
    let is_injecting = handle.borrow().inj.injecting;
    if is_injecting {
        let mut child = handle.borrow_mut();
        let entry_echo = child.inj.pre;
        child.inj.pre = false;
        if !entry_echo {
            inject::complete_async_injection(&mut child.inj, pid)?;
        }
        drop(child);
        resume_past_syscall(pid)?;
        return Ok(WaitOutcome::Handled);
    }

    let regs = fsm::fetch_regs(pid)?;
    let was_pre = fsm::advance(&mut handle.borrow_mut());
    let mut args = fsm::decode_args(&regs);

    if !was_pre {
        // Post-stop: if the matching pre-stop denied this syscall, apply
        // the hook's substitute return value now, before anything else
        // observes it, and report the real syscall number rather than the
        // no-op that actually ran in its place.
        let mut child = handle.borrow_mut();
        if let Some(denied_nr) = child.denied_nr {
            let substitute = child.denied_return.take().unwrap_or(0);
            fsm::substitute_denied_return(&mut child, substitute)?;
            args.syscall = denied_nr;
            args.return_code = substitute;
        }
    }

    let mut event = Event::new(EventKind::Syscall, pid);
    event.syscall_num = Some(args.syscall);
    event.pre_syscall = was_pre;
    event.args = args;
    handle.borrow_mut().event = Some(event.clone());

    let original_syscall_num = event.syscall_num;
    let original_args = event.args;

    match hooks.dispatch(&handle, &mut event) {
        HookResult::Continue | HookResult::NoHook => {
            // Apply any argument/syscall-number rewrite the hook made,
            // spec §5's atomic {decode -> dispatch -> apply -> resume}.
            // Only meaningful at the pre-stop, and only when the hook
            // didn't already hand the child off to `deny_syscall` or
            // injection, both of which write the registers themselves.
            if was_pre {
                let child = handle.borrow();
                let already_denied = child.denied_nr.is_some();
                let already_injecting = child.inj.injecting;
                drop(child);
                if !already_denied
                    && !already_injecting
                    && (event.syscall_num != original_syscall_num || event.args != original_args)
                {
                    fsm::modify_syscall(pid, event.syscall_num, Some(&event.args))?;
                }
            }
            resume_past_syscall(pid)?;
            Ok(WaitOutcome::Event(event))
        }
        HookResult::KillChild => {
            ptrace::kill(pid).map_err(TraceyError::KernelRefused)?;
            registry.remove(pid);
            Ok(WaitOutcome::Handled)
        }
        HookResult::Abort => {
            for child_pid in registry.pids() {
                let _ = ptrace::kill(child_pid);
            }
            Ok(WaitOutcome::Event(Event::new(EventKind::Quit, pid)))
        }
    }
}

fn handle_signal_stop(
    pid: Pid,
    sig: nix::sys::signal::Signal,
    registry: &mut ChildRegistry,
    options: Options,
    on_create: &mut impl FnMut(&ChildHandle),
) -> Result<WaitOutcome> {
    use nix::sys::signal::Signal;

    if registry.lookup(pid).is_none() {
        // First stop of a newly discovered tracee (plain fork/clone
        // discovery under `TRACE_CHILDREN`, without `SafeFork`'s explicit
        // bracketing).
        if !options.contains(Options::TRACE_CHILDREN) {
            return Err(TraceyError::Internal(format!(
                "unexpected stop from untracked pid {}",
                pid
            )));
        }
        let handle = registry.insert(pid, false);
        on_create(&handle);
        log!(LogDebug, "discovered newborn pid {} via TRACE_CHILDREN", pid);
        ptrace::syscall(pid, None).map_err(TraceyError::KernelRefused)?;
        return Ok(WaitOutcome::Handled);
    }

    if sig == Signal::SIGTRAP {
        // A bare SIGTRAP with no PTRACE_EVENT payload at this point is the
        // group-stop/continuation noise PTRACE_SYSCALL tracing produces;
        // swallow it and keep going.
        ptrace::syscall(pid, None).map_err(TraceyError::KernelRefused)?;
        return Ok(WaitOutcome::Handled);
    }

    let mut event = Event::new(EventKind::Signal, pid);
    event.signal_num = Some(sig as i32);
    // Deliver the signal back to the tracee on resume, matching ptrace's
    // default signal-forwarding behaviour for anything we don't consume.
    ptrace::syscall(pid, Some(sig)).map_err(TraceyError::KernelRefused)?;
    Ok(WaitOutcome::Event(event))
}

fn handle_ptrace_event(
    pid: Pid,
    raw_event: i32,
    registry: &mut ChildRegistry,
    on_create: &mut impl FnMut(&ChildHandle),
) -> Result<WaitOutcome> {
    use nix::sys::ptrace::Event as PEvent;

    if raw_event == PEvent::PTRACE_EVENT_FORK as i32
        || raw_event == PEvent::PTRACE_EVENT_VFORK as i32
        || raw_event == PEvent::PTRACE_EVENT_CLONE as i32
    {
        if let Ok(newborn_raw) = ptrace::getevent(pid) {
            let newborn = Pid::from_raw(newborn_raw as i32);
            if registry.lookup(newborn).is_none() {
                let handle = registry.insert(newborn, false);
                on_create(&handle);
                log!(LogDebug, "discovered newborn pid {} via ptrace event", newborn);
            }
        }
    } else if raw_event == PEvent::PTRACE_EVENT_EXEC as i32 {
        if let Some(handle) = registry.lookup(pid) {
            handle.borrow_mut().registers = None;
        }
    }
    ptrace::syscall(pid, None).map_err(TraceyError::KernelRefused)?;
    Ok(WaitOutcome::Handled)
}

fn resume_past_syscall(pid: Pid) -> Result<()> {
    ptrace::syscall(pid, None).map_err(TraceyError::KernelRefused)
}

/// Brackets a fork-family syscall through `safe_fork::safe_fork` instead of
/// relying on the ordinary discovery path in `handle_signal_stop`. Callers
/// invoke this from their own hook when they recognise a pre-stop for
/// clone/fork/vfork and the session was configured with
/// `Options::USE_SAFE_TRACE`.
pub fn safe_fork_discover(
    parent: &ChildHandle,
    registry: &mut ChildRegistry,
    on_create: impl FnMut(&ChildHandle),
) -> Result<ChildHandle> {
    safe_fork::safe_fork(parent, registry, on_create)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use nix::unistd::Pid;

    #[test]
    fn wait_outcome_event_carries_kind() {
        let event = Event::new(EventKind::Quit, Pid::from_raw(1));
        match WaitOutcome::Event(event) {
            WaitOutcome::Event(e) => assert_eq!(e.kind, EventKind::Quit),
            WaitOutcome::Handled => panic!("expected Event"),
        }
    }
}
