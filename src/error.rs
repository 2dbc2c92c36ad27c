//! Error taxonomy, spec §7.
//!
//! Grounded on `renacer` (a sibling ptrace crate in the example pack) which
//! pairs `nix::errno::Errno` with `thiserror` for exactly this kind of
//! kernel-facing error surface.

use nix::unistd::Pid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceyError {
    /// The trace primitive returned an error the library cannot work
    /// around: detach failed, registers unreadable, tracee died in a way
    /// that isn't the ordinary "it exited" path.
    #[error("ptrace request refused: {0}")]
    KernelRefused(#[from] nix::errno::Errno),

    /// The tracee died between operations. Not fatal: the child is removed
    /// from the registry and the operation reports this specific kind.
    #[error("child {0} is gone")]
    ChildGone(Pid),

    /// Caller supplied an unknown syscall name, a misaligned address, or a
    /// forbidden zero length.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// A second injection was attempted on a child that already has one in
    /// flight.
    #[error("injection already in progress on this child")]
    InjectionBusy,

    /// An invariant was broken. Should not occur; surfaces to `wait_event`
    /// as `None`.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TraceyError>;
