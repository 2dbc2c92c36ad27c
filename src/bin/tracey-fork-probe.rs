//! Test fixture for `tests/integration.rs`'s safe-fork scenario: forks once
//! and waits for the child, guaranteeing a real fork-family syscall happens
//! regardless of whether the libc backs `fork()` with `SYS_fork` or
//! `SYS_clone`.

fn main() {
    match unsafe { libc::fork() } {
        -1 => std::process::exit(1),
        0 => std::process::exit(0),
        _ => {
            let mut status: libc::c_int = 0;
            unsafe { libc::wait(&mut status) };
            std::process::exit(0);
        }
    }
}
