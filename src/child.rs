//! `Child` and `ChildRegistry`, spec §3 and §4.3.
//!
//! Grounded on `rd`'s `thread_group.rs`: a registry of tracees held as
//! `Rc<RefCell<_>>` so that the event loop, hook dispatch and injection can
//! all hold a live handle to the child they're acting on without fighting
//! the borrow checker over a single owning collection.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use nix::unistd::Pid;

use crate::arch::Registers;
use crate::event::Event;
use crate::inject::InjectState;

pub type ChildHandle = Rc<RefCell<Child>>;

/// One per tracee. Field-for-field mirror of spec §3's `Child`.
pub struct Child {
    pub pid: Pid,

    /// True when the library latched onto a pre-existing process instead
    /// of having forked it. Attached children (and their descendants) are
    /// detached, not killed, on teardown.
    pub attached: bool,

    /// The `SyscallFsm`'s pre/post toggle. Starts `true` (`Pre`).
    pub pre_syscall: bool,

    /// Cached fd for `/proc/<pid>/mem`, lazily opened, `None` when closed.
    pub mem_fd: Option<RawFd>,

    /// The syscall number currently being denied, or `None`.
    pub denied_nr: Option<i64>,

    /// The return value a hook asked to substitute for a denied syscall,
    /// staged at the pre-stop and consumed at the matching post-stop.
    pub denied_return: Option<i64>,

    /// Opaque user data. The core never reads or writes this.
    pub custom: Option<Box<dyn std::any::Any>>,

    /// Injection context (§4.6 / §3's "Injection context").
    pub inj: InjectState,

    /// The most recent event delivered for this child.
    pub event: Option<Event>,

    /// PID of an in-flight `SafeFork` newborn, set transiently.
    pub safe_fork_pid: Option<Pid>,

    /// Last register snapshot read back from the kernel for this child.
    pub(crate) registers: Option<Registers>,
}

impl Child {
    pub(crate) fn new(pid: Pid, attached: bool) -> Child {
        Child {
            pid,
            attached,
            pre_syscall: true,
            mem_fd: None,
            denied_nr: None,
            denied_return: None,
            custom: None,
            inj: InjectState::default(),
            event: None,
            safe_fork_pid: None,
            registers: None,
        }
    }
}

impl Drop for Child {
    fn drop(&mut self) {
        if let Some(fd) = self.mem_fd.take() {
            unsafe {
                libc::close(fd);
            }
        }
    }
}

/// Set of live tracees keyed by PID.
///
/// Invariant (spec §3): a child exists in the registry iff the kernel
/// believes it is being traced by this session. `insert` is only ever
/// called from `EventLoop` on first sight of a PID; nothing else creates
/// entries.
#[derive(Default)]
pub struct ChildRegistry {
    children: HashMap<Pid, ChildHandle>,
}

impl ChildRegistry {
    pub fn new() -> ChildRegistry {
        ChildRegistry::default()
    }

    pub fn insert(&mut self, pid: Pid, attached: bool) -> ChildHandle {
        let handle = Rc::new(RefCell::new(Child::new(pid, attached)));
        self.children.insert(pid, handle.clone());
        handle
    }

    pub fn lookup(&self, pid: Pid) -> Option<ChildHandle> {
        self.children.get(&pid).cloned()
    }

    /// Removes a child from the registry. Closing `mem_fd` happens in
    /// `Child::drop`; detaching or killing the underlying process per the
    /// `attached` flag and teardown mode is the caller's responsibility
    /// (`Session::remove_child`), since that decision needs the teardown
    /// mode which this registry doesn't know about.
    pub fn remove(&mut self, pid: Pid) -> Option<ChildHandle> {
        self.children.remove(&pid)
    }

    pub fn count(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChildHandle> {
        self.children.values()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.children.keys().copied().collect()
    }
}
