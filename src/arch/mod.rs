//! Per-architecture syscall ABI, spec §4.1.
//!
//! Every other component addresses tracee registers through the `ArchAbi`
//! trait, so porting to a new architecture is confined to this module —
//! the same rationale `rd` gives for its `registers.rs` arch union and that
//! `birdup000-Homunculi` expresses by splitting `src/arch/<name>/` per
//! target.
//!
//! Unlike `rd` (which carries both x86 and x86_64 register layouts
//! simultaneously behind one union, because rr supports tracing 32-bit
//! tracees from a 64-bit tracer) this library picks its `Registers` layout
//! at compile time via `cfg(target_arch)`: the tracee and the tracer run on
//! the same machine architecture in every environment this crate targets.

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use self::x86_64::Registers;

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use self::aarch64::Registers;

/// Capability set over a raw register snapshot. Spec's design notes call
/// this out verbatim: `{get_arg_n, set_arg_n, get_syscall, set_syscall,
/// get_return, set_return, get_ip, set_ip}`.
pub trait ArchAbi {
    /// Width of a machine word on this architecture, in bytes. Used by
    /// `MemoryIO` to decide alignment for word-oriented peek/poke.
    const WORD_SIZE: usize;

    /// Size, in bytes, of the trap instruction used to unwind a syscall
    /// that was rewound for re-entry (see `Injector`).
    const SYSCALL_INSN_SIZE: usize;

    fn get_arg(&self, n: u8) -> u64;
    fn set_arg(&mut self, n: u8, value: u64);

    fn get_syscall(&self) -> i64;
    fn set_syscall(&mut self, nr: i64);

    fn get_return(&self) -> i64;
    fn set_return(&mut self, value: i64);

    fn get_ip(&self) -> u64;
    fn set_ip(&mut self, value: u64);

    fn get_sp(&self) -> u64;
    fn set_sp(&mut self, value: u64);
}
