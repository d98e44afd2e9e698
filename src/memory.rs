use libc::{c_long, c_void};
use nix::sys::ptrace;
use nix::unistd::Pid;
use std::fs;
use std::path::PathBuf;

/// Upper bound on path strings read out of a tracee.
const MAX_STRING_BYTES: usize = 4096;

/// Read a NUL-terminated string from a stopped tracee's address space,
/// word by word. Stops at the first unreadable word and returns whatever
/// was collected so far; an immediately unreadable address yields an empty
/// string. Never fails across the supervisor boundary.
pub fn read_cstring(tid: Pid, addr: u64) -> String {
    let mut bytes: Vec<u8> = Vec::new();

    while bytes.len() < MAX_STRING_BYTES {
        let offset = bytes.len() as u64;
        let word: c_long = match ptrace::read(tid, (addr + offset) as *mut c_void) {
            Ok(word) => word,
            Err(_) => break,
        };
        for byte in word.to_ne_bytes() {
            if byte == 0 {
                return String::from_utf8_lossy(&bytes).into_owned();
            }
            bytes.push(byte);
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

/// Resolve a directory file descriptor of a tracee to a path via the
/// kernel-exported symlink. The "current directory" descriptor maps to `.`;
/// a vanished tracee or closed descriptor yields an empty path.
pub fn resolve_fd(tid: Pid, fd: i32) -> PathBuf {
    if fd == libc::AT_FDCWD {
        return PathBuf::from(".");
    }
    fs::read_link(format!("/proc/{tid}/fd/{fd}")).unwrap_or_default()
}

/// Kernel-assigned name of a tracee, from `/proc/<tid>/comm`.
pub fn thread_name(tid: Pid) -> Option<String> {
    fs::read_to_string(format!("/proc/{tid}/comm"))
        .ok()
        .map(|name| name.trim_end().to_string())
}
