//! `Session`, spec §3/§4: the top-level handle a caller holds. Owns the
//! `ChildRegistry` and `HookTable`, threads the verbosity option into
//! `crate::log`, and drives `EventLoop::wait_event` in a loop until a
//! user-visible event surfaces or the session has nothing left to trace.
//!
//! Grounded on `rd`'s `Session` (`session/session.rs`): a long-lived object
//! that owns the tracee set and exposes a single step/wait entry point,
//! though `rd`'s version also drives a scheduler for replay, which this
//! library has no equivalent of.

use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult, Pid};

use crate::child::{ChildHandle, ChildRegistry};
use crate::error::{Result, TraceyError};
use crate::event::{Event, SyscallArgs};
use crate::event_loop::{self, WaitOutcome};
use crate::hooks::HookTable;
use crate::inject;
use crate::log::{self, LogLevel::*};
use crate::options::Options;
use crate::safe_fork;

type ChildCreateCallback = Box<dyn FnMut(&ChildHandle)>;

pub struct Session {
    registry: ChildRegistry,
    hooks: HookTable,
    options: Options,
    child_create: Option<ChildCreateCallback>,
    quitting: bool,
}

impl Session {
    /// `Session::init`, spec §4: validates the options bitset and wires up
    /// the verbosity gate.
    pub fn init(raw_options: u32) -> Result<Session> {
        let options = Options::parse(raw_options)?;
        log::set_verbose(options.contains(Options::VERBOSE));
        log!(LogDebug, "session initialised with options {:?}", options);
        Ok(Session {
            registry: ChildRegistry::new(),
            hooks: HookTable::new(),
            options,
            child_create: None,
            quitting: false,
        })
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn hooks(&mut self) -> &mut HookTable {
        &mut self.hooks
    }

    pub fn set_child_create_hook(&mut self, cb: impl FnMut(&ChildHandle) + 'static) {
        self.child_create = Some(Box::new(cb));
    }

    pub fn lookup(&self, pid: Pid) -> Option<ChildHandle> {
        self.registry.lookup(pid)
    }

    pub fn children(&self) -> impl Iterator<Item = &ChildHandle> {
        self.registry.iter()
    }

    pub fn child_count(&self) -> usize {
        self.registry.count()
    }

    /// Forks `path`/`args`, traces the new process through `execve`, and
    /// registers it as the session's first child. Mirrors `PTRACE_TRACEME`
    /// + `execvp` from spec §1's "fork a child, trace its syscalls" scope,
    /// the same shape every ptrace crate in the pack (proot-rs, renacer,
    /// tracexec) uses to start a trace.
    pub fn spawn(&mut self, path: &std::ffi::CString, args: &[std::ffi::CString]) -> Result<ChildHandle> {
        match unsafe { fork() }.map_err(TraceyError::KernelRefused)? {
            ForkResult::Child => {
                ptrace::traceme().expect("PTRACE_TRACEME failed in child");
                nix::unistd::execvp(path, args).expect("execvp failed in traced child");
                unreachable!("execvp does not return on success");
            }
            ForkResult::Parent { child } => {
                match waitpid(child, None) {
                    Ok(_) => {}
                    Err(e) => return Err(TraceyError::KernelRefused(e)),
                }
                let mut trace_options = ptrace::Options::PTRACE_O_TRACESYSGOOD;
                if self.options.contains(Options::TRACE_CHILDREN)
                    && !self.options.contains(Options::USE_SAFE_TRACE)
                {
                    trace_options |= ptrace::Options::PTRACE_O_TRACEFORK
                        | ptrace::Options::PTRACE_O_TRACEVFORK
                        | ptrace::Options::PTRACE_O_TRACECLONE;
                }
                ptrace::setoptions(child, trace_options).map_err(TraceyError::KernelRefused)?;
                let handle = self.registry.insert(child, false);
                self.fire_child_create(&handle);
                ptrace::syscall(child, None).map_err(TraceyError::KernelRefused)?;
                log!(LogDebug, "spawned and attached pid {}", child);
                Ok(handle)
            }
        }
    }

    /// Attaches to an already-running process (spec §1's "attach to a
    /// running one").
    pub fn attach(&mut self, pid: Pid) -> Result<ChildHandle> {
        ptrace::attach(pid).map_err(TraceyError::KernelRefused)?;
        match waitpid(pid, None) {
            Ok(_) => {}
            Err(e) => return Err(TraceyError::KernelRefused(e)),
        }
        ptrace::setoptions(pid, ptrace::Options::PTRACE_O_TRACESYSGOOD)
            .map_err(TraceyError::KernelRefused)?;
        let handle = self.registry.insert(pid, true);
        self.fire_child_create(&handle);
        ptrace::syscall(pid, None).map_err(TraceyError::KernelRefused)?;
        Ok(handle)
    }

    fn fire_child_create(&mut self, handle: &ChildHandle) {
        if let Some(cb) = self.child_create.as_mut() {
            cb(handle);
        }
    }

    /// `EventLoop::wait_event`, spec §4.5. Loops over internally-handled
    /// stops until a user-visible event surfaces, the session runs out of
    /// children, or an unrecoverable condition is hit — both of the latter
    /// report `Ok(None)` per spec's "NULL on unsolvable stop" contract;
    /// genuinely bad arguments or kernel refusals still propagate as `Err`.
    pub fn wait_event(&mut self) -> Result<Option<Event>> {
        if self.quitting || self.registry.is_empty() {
            return Ok(None);
        }
        loop {
            let mut child_create = self.child_create.take();
            let on_create: &mut dyn FnMut(&ChildHandle) = match child_create.as_mut() {
                Some(cb) => cb.as_mut(),
                None => &mut |_: &ChildHandle| {},
            };
            let outcome = event_loop::wait_event(None, &mut self.registry, &mut self.hooks, self.options, on_create);
            self.child_create = child_create;

            match outcome {
                Ok(WaitOutcome::Event(event)) => return Ok(Some(event)),
                Ok(WaitOutcome::Handled) => {
                    if self.registry.is_empty() {
                        return Ok(None);
                    }
                    continue;
                }
                Err(TraceyError::ChildGone(pid)) => {
                    self.registry.remove(pid);
                    if self.registry.is_empty() {
                        return Ok(None);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Synchronous injection, spec §4.6/§8 scenario 4: runs `syscall_number`
    /// to completion on `child` right now and returns its result, without
    /// the event loop ever seeing the extra pre/post pair. Callers invoke
    /// this from a hook holding the `ChildHandle` `dispatch` gave them.
    pub fn inject_syscall(
        &self,
        child: &ChildHandle,
        at_post_stop: bool,
        syscall_number: i64,
        args: &SyscallArgs,
    ) -> Result<i64> {
        let pid = child.borrow().pid;
        inject::inject_syscall(pid, at_post_stop, syscall_number, args)
    }

    /// Asynchronous injection, spec §4.6: stages `syscall_number` on
    /// `child` and returns immediately; `EventLoop` hides the pre/post pair
    /// from user hooks and runs `callback` with the result once it
    /// completes.
    pub fn inject_syscall_async(
        &self,
        child: &ChildHandle,
        at_post_stop: bool,
        syscall_number: i64,
        args: &SyscallArgs,
        callback: impl FnMut(i64) + 'static,
    ) -> Result<()> {
        let mut c = child.borrow_mut();
        let pid = c.pid;
        inject::inject_syscall_pre_start(
            &mut c.inj,
            pid,
            at_post_stop,
            syscall_number,
            args,
            Box::new(callback),
        )
    }

    /// Brackets a fork-family syscall through `SafeFork` instead of relying
    /// on kernel auto-trace-on-fork. Callers invoke this from a pre-stop
    /// hook for clone/fork/vfork once `Options::USE_SAFE_TRACE` is set.
    pub fn safe_fork(&mut self, parent: &ChildHandle) -> Result<ChildHandle> {
        let mut child_create = self.child_create.take();
        let on_create: &mut dyn FnMut(&ChildHandle) = match child_create.as_mut() {
            Some(cb) => cb.as_mut(),
            None => &mut |_: &ChildHandle| {},
        };
        let result = safe_fork::safe_fork(parent, &mut self.registry, on_create);
        self.child_create = child_create;
        result
    }

    /// Graceful teardown, spec §9: detach attached children, kill
    /// forked-and-owned ones, leave the session empty but otherwise usable.
    pub fn free(&mut self) {
        for pid in self.registry.pids() {
            if let Some(handle) = self.registry.lookup(pid) {
                let attached = handle.borrow().attached;
                if attached {
                    let _ = ptrace::detach(pid, None);
                } else {
                    let _ = ptrace::kill(pid);
                    let _ = waitpid(pid, None);
                }
            }
            self.registry.remove(pid);
        }
        log!(LogDebug, "session torn down gracefully");
    }

    /// Abrupt teardown, spec §9: kill everything regardless of `attached`,
    /// mark the session as quit, and report `exit_code` to the caller
    /// rather than calling `std::process::exit` directly — a library has no
    /// business terminating its host process.
    pub fn quit(&mut self, exit_code: i32) -> i32 {
        for pid in self.registry.pids() {
            let _ = ptrace::kill(pid);
            let _ = waitpid(pid, None);
            self.registry.remove(pid);
        }
        self.quitting = true;
        log!(LogWarn, "session quit with exit code {}", exit_code);
        exit_code
    }

    /// Partial teardown after a fatal `waitpid` failure (spec §9's third,
    /// previously-open teardown path): best-effort detach/kill everything
    /// we still hold a handle for, but don't assume the kernel state
    /// matches our registry — a fatal wait error means we've lost the
    /// ability to trust that picture in the first place.
    pub fn teardown_after_fatal_wait(&mut self) {
        for pid in self.registry.pids() {
            let _ = ptrace::kill(pid);
        }
        self.registry = ChildRegistry::new();
        self.quitting = true;
        log!(LogError, "session torn down after a fatal wait failure");
    }

    pub fn signal_name(number: i32) -> Option<&'static str> {
        crate::syscalls::signal_name(number)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.quitting && !self.registry.is_empty() {
            self.free();
        }
    }
}

#[allow(dead_code)]
fn forward_signal(pid: Pid, sig: Signal) -> Result<()> {
    ptrace::syscall(pid, Some(sig)).map_err(TraceyError::KernelRefused)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_rejects_unknown_option_bits() {
        let result = Session::init(1 << 15);
        assert!(matches!(result, Err(TraceyError::BadArgument(_))));
    }

    #[test]
    fn fresh_session_has_no_children() {
        let session = Session::init(0).unwrap();
        assert_eq!(session.child_count(), 0);
    }

    #[test]
    fn wait_event_on_empty_session_is_none() {
        let mut session = Session::init(0).unwrap();
        assert_eq!(session.wait_event().unwrap(), None);
    }
}
