//! Minimal leveled logging, in the style of `rd`'s own `log!` macro rather
//! than pulling in the `log`/`tracing` crates: the teacher doesn't depend on
//! either, and this library only ever needs stderr output gated by a single
//! verbosity bit carried on `Session`.

use std::cell::Cell;
use std::fmt;

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub enum LogLevel {
    LogFatal,
    LogError,
    LogWarn,
    LogDebug,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::LogFatal => "FATAL",
            LogLevel::LogError => "ERROR",
            LogLevel::LogWarn => "WARN",
            LogLevel::LogDebug => "DEBUG",
        };
        write!(f, "{}", s)
    }
}

thread_local! {
    /// Verbosity gate. `Session::new` raises this when `VERBOSE` is set in
    /// the options bitset; there is one tracer thread per spec §5, so a
    /// thread-local is equivalent to (and simpler than) a field threaded
    /// through every call site.
    static VERBOSE: Cell<bool> = Cell::new(false);
}

pub fn set_verbose(verbose: bool) {
    VERBOSE.with(|v| v.set(verbose));
}

pub fn is_verbose() -> bool {
    VERBOSE.with(|v| v.get())
}

/// Returns whether a message at `level` should be printed given the current
/// verbosity gate. Fatal and error messages always print.
pub fn should_log(level: LogLevel) -> bool {
    match level {
        LogLevel::LogFatal | LogLevel::LogError => true,
        LogLevel::LogWarn => true,
        LogLevel::LogDebug => is_verbose(),
    }
}

#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        if $crate::log::should_log($level) {
            eprintln!("[tracey:{}] {}", $level, format!($($arg)*));
        }
    };
}
