//! `MemoryIO`, spec §4.2.
//!
//! Word operations go through the ptrace trace primitive (grounded on
//! proot-rs's `sysarg.rs`, which reads tracee strings word-by-word via
//! `PTRACE_PEEKDATA`). Bulk operations go through `/proc/<pid>/mem`, opened
//! lazily and cached on the `Child` as `mem_fd`, following spec §4.2's
//! contract that the cache is invalidated on `execve`.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};

use nix::errno::Errno;
use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::child::Child;
use crate::error::{Result, TraceyError};

/// Runs `body` with a `File` borrowed from `fd` without taking ownership —
/// `fd` continues to be the fd of record on `Child::mem_fd` and is closed
/// exactly once, by `Child::drop`.
fn with_borrowed_file<T>(fd: RawFd, body: impl FnOnce(&File) -> std::io::Result<T>) -> std::io::Result<T> {
    let file = unsafe { File::from_raw_fd(fd) };
    let result = body(&file);
    // Give the fd back instead of letting `file`'s Drop close it.
    let _ = file.into_raw_fd();
    result
}

impl Child {
    fn open_mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// Opens `/proc/<pid>/mem` for read (and, if `writable`, write) access,
    /// caching the fd. Returns the cached fd if one is already open and the
    /// requested mode is a subset of what's cached — in practice we always
    /// open read-write up front so this never needs to reopen.
    fn ensure_mem_fd(&mut self, writable: bool) -> Result<RawFd> {
        if let Some(fd) = self.mem_fd {
            return Ok(fd);
        }
        let opened = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(self.open_mem_path());
        let file = match opened {
            Ok(f) => f,
            Err(_) if writable => {
                // Fall back to read-only; callers that need to write will
                // notice via `write_mem`'s own fallback to poke_word.
                OpenOptions::new()
                    .read(true)
                    .open(self.open_mem_path())
                    .map_err(|_| TraceyError::ChildGone(self.pid))?
            }
            Err(_) => return Err(TraceyError::ChildGone(self.pid)),
        };
        let fd = file.into_raw_fd();
        self.mem_fd = Some(fd);
        Ok(fd)
    }

    /// Invalidates the cached mem fd. Call this after an `execve` is
    /// observed for this child — the tracee's memory map changes identity.
    pub fn invalidate_mem_fd(&mut self) {
        if let Some(fd) = self.mem_fd.take() {
            unsafe {
                libc::close(fd);
            }
        }
    }

    /// One word via the trace primitive.
    pub fn peek_word(&self, addr: u64) -> Result<i64> {
        let ptr = addr as *mut std::ffi::c_void;
        ptrace::read(self.pid, ptr).map_err(TraceyError::KernelRefused)
    }

    /// One word via the trace primitive.
    pub fn poke_word(&self, addr: u64, word: i64) -> Result<()> {
        let ptr = addr as *mut std::ffi::c_void;
        unsafe { ptrace::write(self.pid, ptr, word) }.map_err(TraceyError::KernelRefused)
    }

    /// Bulk read. May short-read at page boundaries (the second page
    /// unmapped) or on `ESRCH` (tracee died mid-operation); both surface as
    /// `Ok(n)` with `n < dst.len()` plus the underlying `Errno` for the
    /// caller to inspect via a subsequent call, matching `pread`'s own
    /// short-read semantics rather than treating a short read as an error.
    pub fn read_mem(&mut self, dst: &mut [u8], src_addr: u64) -> Result<usize> {
        if dst.is_empty() {
            return Err(TraceyError::BadArgument("read_mem: zero length".into()));
        }
        let fd = self.ensure_mem_fd(false)?;
        match with_borrowed_file(fd, |f| f.read_at(dst, src_addr)) {
            Ok(n) => Ok(n),
            Err(e) if e.raw_os_error() == Some(Errno::ESRCH as i32) => {
                Err(TraceyError::ChildGone(self.pid))
            }
            Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => {
                // Short read at an unmapped boundary: fall back to reading
                // what we can word-by-word so callers still get partial
                // data rather than nothing.
                self.read_mem_ptrace_fallback(dst, src_addr)
            }
            Err(e) => Err(TraceyError::KernelRefused(
                Errno::from_raw(e.raw_os_error().unwrap_or(libc::EIO)),
            )),
        }
    }

    fn read_mem_ptrace_fallback(&self, dst: &mut [u8], src_addr: u64) -> Result<usize> {
        let word_size = std::mem::size_of::<i64>();
        let mut read = 0;
        while read < dst.len() {
            let word = match self.peek_word(src_addr + read as u64) {
                Ok(w) => w,
                Err(_) => break,
            };
            let bytes = word.to_ne_bytes();
            let n = std::cmp::min(word_size, dst.len() - read);
            dst[read..read + n].copy_from_slice(&bytes[..n]);
            read += n;
        }
        Ok(read)
    }

    /// Bulk write; falls back to repeated word-pokes if the memory window
    /// cannot be opened writable.
    pub fn write_mem(&mut self, dst_addr: u64, src: &[u8]) -> Result<usize> {
        if src.is_empty() {
            return Err(TraceyError::BadArgument("write_mem: zero length".into()));
        }
        let fd = self.ensure_mem_fd(true)?;
        match with_borrowed_file(fd, |f| f.write_at(src, dst_addr)) {
            Ok(n) => Ok(n),
            Err(e) if e.raw_os_error() == Some(Errno::ESRCH as i32) => {
                Err(TraceyError::ChildGone(self.pid))
            }
            Err(_) => self.write_mem_ptrace_fallback(dst_addr, src),
        }
    }

    fn write_mem_ptrace_fallback(&self, dst_addr: u64, src: &[u8]) -> Result<usize> {
        let word_size = std::mem::size_of::<i64>();
        let mut written = 0;
        while written < src.len() {
            let addr = dst_addr + written as u64;
            let remaining = src.len() - written;
            if remaining >= word_size {
                let word = i64::from_ne_bytes(src[written..written + word_size].try_into().unwrap());
                self.poke_word(addr, word)?;
                written += word_size;
            } else {
                // Partial trailing word: read-modify-write so we don't
                // clobber bytes beyond the requested range.
                let existing = self.peek_word(addr)?;
                let mut bytes = existing.to_ne_bytes();
                bytes[..remaining].copy_from_slice(&src[written..]);
                self.poke_word(addr, i64::from_ne_bytes(bytes))?;
                written += remaining;
            }
        }
        Ok(written)
    }
}

/// Addresses must be aligned to word width for the pure word operations;
/// this is exposed so callers (and tests) can check before calling
/// `peek_word`/`poke_word` directly.
pub fn is_word_aligned(addr: u64) -> bool {
    addr % std::mem::size_of::<i64>() as u64 == 0
}

pub fn procfs_mem_path(pid: Pid) -> String {
    format!("/proc/{}/mem", pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_check() {
        assert!(is_word_aligned(0));
        assert!(is_word_aligned(8));
        assert!(!is_word_aligned(3));
    }

    #[test]
    fn mem_path_format() {
        assert_eq!(procfs_mem_path(Pid::from_raw(42)), "/proc/42/mem");
    }
}
