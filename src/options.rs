//! Session creation options bitset, spec §6.

use crate::error::TraceyError;

bitflags::bitflags! {
    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    pub struct Options: u32 {
        /// Follow descendants created with fork, vfork or clone.
        const TRACE_CHILDREN = 1 << 0;
        /// Diagnostics verbosity.
        const VERBOSE = 1 << 1;
        /// Don't rely on the kernel's auto-trace-on-fork; use `SafeFork`
        /// instead.
        const USE_SAFE_TRACE = 1 << 31;
    }
}

impl Options {
    /// `bitflags` would otherwise silently drop unknown bits; spec §6
    /// requires rejecting them.
    pub fn parse(raw: u32) -> Result<Options, TraceyError> {
        Options::from_bits(raw)
            .ok_or_else(|| TraceyError::BadArgument(format!("unknown option bits: {:#x}", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_bits_round_trip() {
        let opt = Options::parse(Options::TRACE_CHILDREN.bits() | Options::VERBOSE.bits())
            .expect("known bits should parse");
        assert!(opt.contains(Options::TRACE_CHILDREN));
        assert!(opt.contains(Options::VERBOSE));
        assert!(!opt.contains(Options::USE_SAFE_TRACE));
    }

    #[test]
    fn unknown_bits_rejected() {
        let result = Options::parse(1 << 15);
        assert!(matches!(result, Err(TraceyError::BadArgument(_))));
    }
}
