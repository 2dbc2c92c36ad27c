use super::ArchAbi;

/// Wraps the kernel's `user_regs_struct` for x86_64, as returned by
/// `PTRACE_GETREGS` / consumed by `PTRACE_SETREGS`.
///
/// Argument-slot mapping follows the Linux x86_64 syscall ABI: rdi, rsi,
/// rdx, r10, r8, r9 (note r10 takes rcx's userspace role, since the
/// `syscall` instruction clobbers rcx).
#[repr(transparent)]
#[derive(Copy, Clone, Debug)]
pub struct Registers(pub libc::user_regs_struct);

impl Default for Registers {
    fn default() -> Self {
        // `user_regs_struct` is a plain-old-data struct of machine words;
        // zero is a valid (if meaningless) register file.
        Registers(unsafe { std::mem::zeroed() })
    }
}

impl From<libc::user_regs_struct> for Registers {
    fn from(regs: libc::user_regs_struct) -> Self {
        Registers(regs)
    }
}

impl From<Registers> for libc::user_regs_struct {
    fn from(regs: Registers) -> Self {
        regs.0
    }
}

impl ArchAbi for Registers {
    const WORD_SIZE: usize = 8;
    // `syscall` is a two-byte instruction (0F 05); injection rewinds/
    // fast-forwards rip by this amount.
    const SYSCALL_INSN_SIZE: usize = 2;

    fn get_arg(&self, n: u8) -> u64 {
        match n {
            0 => self.0.rdi,
            1 => self.0.rsi,
            2 => self.0.rdx,
            3 => self.0.r10,
            4 => self.0.r8,
            5 => self.0.r9,
            _ => panic!("syscall argument slot {} out of range", n),
        }
    }

    fn set_arg(&mut self, n: u8, value: u64) {
        match n {
            0 => self.0.rdi = value,
            1 => self.0.rsi = value,
            2 => self.0.rdx = value,
            3 => self.0.r10 = value,
            4 => self.0.r8 = value,
            5 => self.0.r9 = value,
            _ => panic!("syscall argument slot {} out of range", n),
        }
    }

    fn get_syscall(&self) -> i64 {
        self.0.orig_rax as i64
    }

    fn set_syscall(&mut self, nr: i64) {
        self.0.orig_rax = nr as u64;
        // The kernel re-reads the syscall number out of rax at entry too;
        // keeping both in sync avoids surprises if a hook inspects rax
        // before the next resume.
        self.0.rax = nr as u64;
    }

    fn get_return(&self) -> i64 {
        self.0.rax as i64
    }

    fn set_return(&mut self, value: i64) {
        self.0.rax = value as u64;
    }

    fn get_ip(&self) -> u64 {
        self.0.rip
    }

    fn set_ip(&mut self, value: u64) {
        self.0.rip = value;
    }

    fn get_sp(&self) -> u64 {
        self.0.rsp
    }

    fn set_sp(&mut self, value: u64) {
        self.0.rsp = value;
    }
}
