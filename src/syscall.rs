//! Classification of syscall-entry register snapshots (x86_64).

use libc::user_regs_struct;

/// A syscall entry the supervisor cares about, with its arguments pulled
/// from the register snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallEntry {
    /// `open(path, ...)`: path pointer in the first argument register.
    Open { path_addr: u64 },
    /// `openat(dirfd, path, ...)`: path interpreted relative to `dirfd`.
    OpenAt { dirfd: i32, path_addr: u64 },
    /// `execve(path, ...)`: a lookup only, never recorded as a file open.
    Exec { path_addr: u64 },
    /// fork/vfork/clone: the new tracee arrives via a ptrace event stop.
    Spawn { flavor: SpawnFlavor },
    /// `exit`/`exit_group` with the status argument.
    Exit { status: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnFlavor {
    Fork,
    Vfork,
    /// The thread-group-sharing decision is captured here, at syscall
    /// entry, while the flags register is still authoritative.
    Clone { shares_thread_group: bool },
}

impl SpawnFlavor {
    /// Whether this spawn creates a full process rather than a thread.
    pub fn creates_process(self) -> bool {
        match self {
            SpawnFlavor::Fork | SpawnFlavor::Vfork => true,
            SpawnFlavor::Clone {
                shares_thread_group,
            } => !shares_thread_group,
        }
    }
}

/// Classify a stopped tracee's registers at syscall entry. Returns `None`
/// for syscalls the tracer does not observe.
pub fn classify(regs: &user_regs_struct) -> Option<SyscallEntry> {
    match regs.orig_rax as i64 {
        libc::SYS_open => Some(SyscallEntry::Open {
            path_addr: regs.rdi,
        }),
        libc::SYS_openat => Some(SyscallEntry::OpenAt {
            dirfd: regs.rdi as i32,
            path_addr: regs.rsi,
        }),
        libc::SYS_execve => Some(SyscallEntry::Exec {
            path_addr: regs.rdi,
        }),
        libc::SYS_fork => Some(SyscallEntry::Spawn {
            flavor: SpawnFlavor::Fork,
        }),
        libc::SYS_vfork => Some(SyscallEntry::Spawn {
            flavor: SpawnFlavor::Vfork,
        }),
        libc::SYS_clone => Some(SyscallEntry::Spawn {
            flavor: SpawnFlavor::Clone {
                shares_thread_group: regs.rdi & libc::CLONE_THREAD as u64 != 0,
            },
        }),
        libc::SYS_exit | libc::SYS_exit_group => Some(SyscallEntry::Exit {
            status: regs.rdi as i32,
        }),
        _ => None,
    }
}
