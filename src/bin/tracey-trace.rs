//! `tracey-trace`: a minimal strace-alike demonstrating the hello-trace
//! scenario over the public `tracey` API. Grounded on `stalker`'s
//! `main.rs` (fork/execve/wait/PTRACE_SYSCALL loop) and on the teacher's
//! `commands/trace_info_command.rs` for the `structopt`-driven shape.

use std::ffi::CString;
use std::process::exit;

use structopt::StructOpt;

use tracey::{Event, EventKind, Options, Session};

#[derive(StructOpt)]
#[structopt(name = "tracey-trace", about = "trace a child process's syscalls")]
struct Args {
    /// Follow children created with fork/vfork/clone.
    #[structopt(short = "f", long = "follow-forks")]
    follow_forks: bool,

    /// Print tracey's own diagnostics to stderr.
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,

    /// Command to run and trace.
    #[structopt(required = true)]
    command: Vec<String>,
}

fn main() {
    let args = Args::from_args();

    let mut raw_options = 0u32;
    if args.follow_forks {
        raw_options |= Options::TRACE_CHILDREN.bits();
    }
    if args.verbose {
        raw_options |= Options::VERBOSE.bits();
    }

    let mut session = match Session::init(raw_options) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("tracey-trace: {}", e);
            exit(1);
        }
    };

    let path = CString::new(args.command[0].as_str()).expect("command contains a NUL byte");
    let argv: Vec<CString> = args
        .command
        .iter()
        .map(|a| CString::new(a.as_str()).expect("argument contains a NUL byte"))
        .collect();

    if let Err(e) = session.spawn(&path, &argv) {
        eprintln!("tracey-trace: failed to spawn {}: {}", args.command[0], e);
        exit(1);
    }

    loop {
        match session.wait_event() {
            Ok(Some(event)) => print_event(&event),
            Ok(None) => break,
            Err(e) => {
                eprintln!("tracey-trace: {}", e);
                break;
            }
        }
    }
}

fn print_event(event: &Event) {
    match event.kind {
        EventKind::Syscall => {
            let resolved = event
                .syscall_num
                .and_then(tracey_syscall_name)
                .unwrap_or("unknown");
            println!(
                "[{}] {}({:#x}, {:#x}, {:#x}) = {:#x}",
                event.pid, resolved, event.args.a0, event.args.a1, event.args.a2, event.args.return_code
            );
        }
        EventKind::Signal => {
            let name = event.signal_num.and_then(Session::signal_name).unwrap_or("?");
            println!("[{}] --- {} ---", event.pid, name);
        }
        EventKind::Quit => {
            println!("[{}] exited, status {}", event.pid, event.args.return_code);
        }
        EventKind::Internal | EventKind::None => {}
    }
}

fn tracey_syscall_name(nr: i64) -> Option<&'static str> {
    tracey::syscalls::number_to_name(nr)
}
