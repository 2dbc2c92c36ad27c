//! Test fixture for `tests/integration.rs`'s deny/modify scenarios: opens
//! the path given as `argv[1]`, writes `b"hello"` to it, and exits with the
//! raw `write(2)` return value so the test can observe denial/modification
//! through the exit code without needing to capture the tracee's stdout.

use std::env;
use std::ffi::CString;

fn main() {
    let path = env::args().nth(1).expect("usage: tracey-write-probe <path>");
    let cpath = CString::new(path).expect("path contains a NUL byte");

    let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC, 0o644) };
    assert!(fd >= 0, "open failed");

    let msg = b"hello";
    let n = unsafe { libc::write(fd, msg.as_ptr() as *const libc::c_void, msg.len()) };
    unsafe { libc::close(fd) };

    std::process::exit(n as i32);
}
