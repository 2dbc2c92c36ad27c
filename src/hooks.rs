//! `HookTable`, spec §4.4.

use std::collections::HashMap;

use crate::child::ChildHandle;
use crate::error::{Result, TraceyError};
use crate::event::Event;
use crate::syscalls;

/// Hook return values, spec §4.4.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum HookResult {
    /// Resume the child normally.
    Continue,
    /// Terminate this tracee; the session continues.
    KillChild,
    /// Terminate all tracees and stop the session.
    Abort,
    /// No hook was applied. Only meaningful as the dispatcher's internal
    /// "nothing matched" return — a registered hook must never return this.
    NoHook,
}

/// A hook is a boxed closure rather than a bare function pointer: spec §9's
/// design note treats "concrete function pointer or a small object
/// implementing a single-operation capability" as equivalent shapes, and a
/// boxed `FnMut` covers both (a plain `fn` coerces to it) while letting
/// callers close over state, which every hook in spec §8's end-to-end
/// scenarios (denial, modification, injection) needs to do.
///
/// The `ChildHandle` argument mirrors `tracy_event`'s `tracy_child`/`tracy`
/// pointers in the C library this is modeled on: a hook that only saw a
/// borrowed `Event` could inspect a syscall but had no way to reach the
/// tracee to deny it (`fsm::deny_syscall`), inject one (`inject::*`), or
/// read its memory (`crate::memory`). Mutating `event.args`/`syscall_num`
/// still works for plain argument modification — `EventLoop` applies those
/// back to the registers itself after dispatch.
pub type Hook = Box<dyn FnMut(&ChildHandle, &mut Event) -> HookResult>;

#[derive(Default)]
pub struct HookTable {
    hooks: HashMap<i64, Hook>,
    default_hook: Option<Hook>,
}

impl HookTable {
    pub fn new() -> HookTable {
        HookTable::default()
    }

    /// Registers `func` for `syscall`, resolving the name to a number
    /// through the external name table. Spec §4.4: "registration of an
    /// unknown name fails."
    pub fn set_hook(&mut self, syscall: &str, func: Hook) -> Result<()> {
        let nr = syscalls::name_to_number(syscall)
            .ok_or_else(|| TraceyError::BadArgument(format!("unknown syscall: {}", syscall)))?;
        self.hooks.insert(nr, func);
        Ok(())
    }

    pub fn set_default_hook(&mut self, func: Hook) {
        self.default_hook = Some(func);
    }

    /// Dispatch policy, spec §4.4: look up by the current syscall number;
    /// if absent, fall back to the default hook; if neither, `NoHook`.
    pub fn dispatch(&mut self, child: &ChildHandle, event: &mut Event) -> HookResult {
        let nr = match event.syscall_num {
            Some(nr) => nr,
            None => return HookResult::NoHook,
        };
        if let Some(hook) = self.hooks.get_mut(&nr) {
            return hook(child, event);
        }
        if let Some(hook) = self.default_hook.as_mut() {
            return hook(child, event);
        }
        HookResult::NoHook
    }

    pub fn has_hook(&self, nr: i64) -> bool {
        self.hooks.contains_key(&nr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::child::{Child, ChildHandle};
    use crate::event::EventKind;
    use nix::unistd::Pid;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn sample_event(nr: i64) -> Event {
        let mut e = Event::new(EventKind::Syscall, Pid::from_raw(1));
        e.syscall_num = Some(nr);
        e
    }

    fn sample_child() -> ChildHandle {
        Rc::new(RefCell::new(Child::new(Pid::from_raw(1), false)))
    }

    #[test]
    fn unknown_syscall_name_fails_registration() {
        let mut table = HookTable::new();
        let result = table.set_hook("not_a_syscall", Box::new(|_, _| HookResult::Continue));
        assert!(matches!(result, Err(TraceyError::BadArgument(_))));
    }

    #[test]
    fn dispatch_prefers_specific_hook_over_default() {
        let mut table = HookTable::new();
        table
            .set_hook("write", Box::new(|_, _| HookResult::KillChild))
            .unwrap();
        table.set_default_hook(Box::new(|_, _| HookResult::Abort));
        let write_nr = crate::syscalls::name_to_number("write").unwrap();
        let mut event = sample_event(write_nr);
        let child = sample_child();
        assert_eq!(table.dispatch(&child, &mut event), HookResult::KillChild);
    }

    #[test]
    fn dispatch_falls_back_to_default() {
        let mut table = HookTable::new();
        table.set_default_hook(Box::new(|_, _| HookResult::Abort));
        let unrelated_nr = crate::syscalls::name_to_number("close").unwrap();
        let mut event = sample_event(unrelated_nr);
        let child = sample_child();
        assert_eq!(table.dispatch(&child, &mut event), HookResult::Abort);
    }

    #[test]
    fn dispatch_returns_nohook_when_nothing_registered() {
        let mut table = HookTable::new();
        let mut event = sample_event(9999);
        let child = sample_child();
        assert_eq!(table.dispatch(&child, &mut event), HookResult::NoHook);
    }

    #[test]
    fn hook_can_reach_child_pid_through_handle() {
        let mut table = HookTable::new();
        table
            .set_hook(
                "write",
                Box::new(|child, _| {
                    assert_eq!(child.borrow().pid, Pid::from_raw(1));
                    HookResult::Continue
                }),
            )
            .unwrap();
        let write_nr = crate::syscalls::name_to_number("write").unwrap();
        let mut event = sample_event(write_nr);
        let child = sample_child();
        assert_eq!(table.dispatch(&child, &mut event), HookResult::Continue);
    }
}
