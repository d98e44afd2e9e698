//! The tracer supervisor: spawns the target under ptrace, follows every
//! fork/vfork/clone across the descendant tree, drives each tracee through
//! syscall stops, and accumulates the ordered file-open event log.
//!
//! Single-threaded by design. Tracees run and stop concurrently, but the
//! supervisor handles one wait status at a time, which is what makes the
//! event-log ordering stable.

use crate::config::TraceConfig;
use crate::events::EventLog;
use crate::memory;
use crate::paths;
use crate::registry::{KernelTraceeOps, TraceeKind, TraceeRegistry};
use crate::syscall::{self, SpawnFlavor, SyscallEntry};
use anyhow::{bail, Context, Result};
use log::{debug, error, info, trace, warn};
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

const GETREGS_ATTEMPTS: u32 = 5;
const RESUME_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(1);
/// Pause between registry probes when wait reports no children but some
/// tracees are still listed active.
const ECHILD_SETTLE_DELAY: Duration = Duration::from_millis(10);

/// What a trace leaves behind once the last tracee is gone.
pub struct TraceOutcome {
    pub events: EventLog,
    pub registry: TraceeRegistry<KernelTraceeOps>,
}

pub struct Supervisor {
    config: TraceConfig,
    registry: TraceeRegistry<KernelTraceeOps>,
    events: EventLog,
    root: Pid,
    /// Per-tracee syscall-stop flip-flop: present while between the entry
    /// and exit halves of a syscall.
    in_syscall: HashSet<Pid>,
    /// CLONE_THREAD decision captured at clone syscall entry, consumed by
    /// the matching ptrace clone event.
    pending_clone_thread: HashMap<Pid, bool>,
}

impl Supervisor {
    /// Spawn the configured command under tracing and run the wait loop to
    /// completion.
    pub fn run(config: TraceConfig) -> Result<TraceOutcome> {
        let root = spawn_traced(&config.command)?;
        info!("tracing {} (pid {root})", config.command.join(" "));

        let mut supervisor = Supervisor {
            config,
            registry: TraceeRegistry::new(KernelTraceeOps),
            events: EventLog::new(),
            root,
            in_syscall: HashSet::new(),
            pending_clone_thread: HashMap::new(),
        };
        supervisor
            .registry
            .on_create(None, root, TraceeKind::Process);
        supervisor.event_loop()?;

        Ok(TraceOutcome {
            events: supervisor.events,
            registry: supervisor.registry,
        })
    }

    fn event_loop(&mut self) -> Result<()> {
        loop {
            let status = match waitpid(None, Some(WaitPidFlag::__WALL)) {
                Ok(status) => status,
                Err(Errno::ECHILD) => {
                    if self.sweep_lost_tracees() {
                        continue;
                    }
                    info!("all tracees have terminated");
                    break;
                }
                Err(err) => {
                    error!("waiting for tracee status failed: {err}");
                    self.teardown_all();
                    bail!("waiting for tracee status failed: {err}");
                }
            };

            trace!("wait status: {status:?}");
            match status {
                WaitStatus::Exited(tid, code) => self.handle_exit(tid, code),
                WaitStatus::Signaled(tid, signal, _) => {
                    debug!("tracee {tid} killed by {signal}");
                    self.handle_exit(tid, -1);
                }
                WaitStatus::PtraceEvent(tid, _, event) => self.handle_ptrace_event(tid, event),
                WaitStatus::PtraceSyscall(tid) => self.handle_syscall_stop(tid),
                WaitStatus::Stopped(tid, signal) => {
                    // plain signal-delivery stop: hand the signal back
                    self.resume(tid, Some(signal));
                }
                WaitStatus::Continued(tid) => trace!("tracee {tid} continued"),
                WaitStatus::StillAlive => {}
            }
        }
        Ok(())
    }

    /// ECHILD recovery: probe every active tracee with a null signal and
    /// reap the ones the kernel no longer knows. Returns whether any
    /// tracee is still alive.
    fn sweep_lost_tracees(&mut self) -> bool {
        let active = self.registry.active_tids();
        warn!("wait reported no children; probing {} active tracees", active.len());

        let mut any_alive = false;
        for tid in active {
            match signal::kill(tid, None) {
                Ok(()) => any_alive = true,
                Err(Errno::ESRCH) => {
                    debug!("tracee {tid} vanished, reaping");
                    self.registry.on_exit(tid, -1);
                }
                Err(err) => warn!("probing tracee {tid} failed: {err}"),
            }
        }

        if any_alive {
            thread::sleep(ECHILD_SETTLE_DELAY);
        }
        any_alive
    }

    fn handle_exit(&mut self, tid: Pid, status: i32) {
        debug!("tracee {tid} reported exit status {status}");
        self.registry.on_exit(tid, status);
        self.in_syscall.remove(&tid);
        self.pending_clone_thread.remove(&tid);

        if tid == self.root {
            // root is gone: the remaining descendants are torn down and
            // detached so the loop can drain
            for straggler in self.registry.active_tids() {
                self.registry.on_exit(straggler, -1);
            }
        }
    }

    fn handle_ptrace_event(&mut self, tid: Pid, event: i32) {
        use ptrace::Event;

        if event == Event::PTRACE_EVENT_FORK as i32
            || event == Event::PTRACE_EVENT_VFORK as i32
            || event == Event::PTRACE_EVENT_CLONE as i32
        {
            self.handle_spawn_event(tid, event);
            return;
        }

        if event == Event::PTRACE_EVENT_EXEC as i32 {
            // a successful execve reports this event instead of its
            // syscall-exit stop, so the flip-flop must be cleared here
            self.in_syscall.remove(&tid);
        }
        trace!("tracee {tid} ptrace event {event}");
        self.resume(tid, None);
    }

    fn handle_spawn_event(&mut self, parent: Pid, event: i32) {
        let new_tid = match ptrace::getevent(parent) {
            Ok(message) => Pid::from_raw(message as i32),
            Err(err) => {
                error!("reading new tracee id from {parent} failed: {err}");
                self.resume(parent, None);
                return;
            }
        };

        let kind = if event == ptrace::Event::PTRACE_EVENT_CLONE as i32 {
            match self.pending_clone_thread.remove(&parent) {
                Some(true) => TraceeKind::Thread,
                Some(false) => TraceeKind::Process,
                None => {
                    debug!("clone event for {parent} without a captured flag snapshot");
                    TraceeKind::Thread
                }
            }
        } else {
            TraceeKind::Process
        };

        self.registry.on_create(Some(parent), new_tid, kind);
        self.adopt_new_tracee(new_tid);
        self.resume(parent, None);
    }

    /// Wait for a newly announced tracee's initial stop, mirror the trace
    /// options onto it, and send it on its way.
    fn adopt_new_tracee(&mut self, tid: Pid) {
        match waitpid(tid, Some(WaitPidFlag::__WALL)) {
            Ok(WaitStatus::Stopped(..)) | Ok(WaitStatus::PtraceEvent(..)) => {
                if let Err(err) = ptrace::setoptions(tid, trace_options()) {
                    warn!("setting trace options on new tracee {tid} failed: {err}");
                }
                self.resume(tid, None);
            }
            Ok(other) => warn!("new tracee {tid} did not stop as expected: {other:?}"),
            Err(err) => error!("waiting for new tracee {tid} failed: {err}"),
        }
    }

    fn handle_syscall_stop(&mut self, tid: Pid) {
        if !self.registry.contains(tid) {
            // stop from a tracee we have not seen announced yet
            self.registry
                .on_create(Some(self.root), tid, TraceeKind::Thread);
        }
        if !self.registry.is_active(tid) {
            // already torn down; make sure the kernel lets it go
            let _ = ptrace::detach(tid, None);
            return;
        }

        if self.in_syscall.remove(&tid) {
            // exit half of the flip-flop
            self.resume_or_reap(tid);
            return;
        }
        self.in_syscall.insert(tid);

        match self.read_registers(tid) {
            ControlOutcome::Done(regs) => {
                if let Some(entry) = syscall::classify(&regs) {
                    self.on_syscall_entry(tid, entry);
                }
            }
            ControlOutcome::Gone => {
                self.in_syscall.remove(&tid);
                self.registry.on_exit(tid, -1);
                return;
            }
            ControlOutcome::Failed => {
                error!("giving up on tracee {tid} after failed register reads");
                self.in_syscall.remove(&tid);
                self.registry.on_exit(tid, -1);
                return;
            }
        }

        if self.registry.is_active(tid) {
            self.resume_or_reap(tid);
        }
    }

    fn on_syscall_entry(&mut self, tid: Pid, entry: SyscallEntry) {
        match entry {
            SyscallEntry::Open { path_addr } => {
                let path = memory::read_cstring(tid, path_addr);
                self.record_open(tid, PathBuf::from(path));
            }
            SyscallEntry::OpenAt { dirfd, path_addr } => {
                let raw = memory::read_cstring(tid, path_addr);
                if raw.is_empty() {
                    debug!("tracee {tid}: unreadable openat path, dropping");
                    return;
                }
                let path = if raw.starts_with('/') {
                    PathBuf::from(raw)
                } else {
                    let dir = memory::resolve_fd(tid, dirfd);
                    if dir.as_os_str().is_empty() {
                        debug!("tracee {tid}: unresolvable dirfd {dirfd}, dropping {raw}");
                        return;
                    }
                    dir.join(raw)
                };
                self.record_open(tid, path);
            }
            SyscallEntry::Exec { path_addr } => {
                let path = memory::read_cstring(tid, path_addr);
                debug!("tracee {tid} exec lookup: {path}");
            }
            SyscallEntry::Spawn { flavor } => {
                if let SpawnFlavor::Clone {
                    shares_thread_group,
                } = flavor
                {
                    self.pending_clone_thread.insert(tid, shares_thread_group);
                }
            }
            SyscallEntry::Exit { status } => {
                debug!("tracee {tid} entering exit with status {status}");
                self.registry.on_exit(tid, status);
                // the detach frees this TID for kernel reuse; drop any
                // per-tracee state so a successor starts clean
                self.in_syscall.remove(&tid);
                self.pending_clone_thread.remove(&tid);
            }
        }
    }

    fn record_open(&mut self, tid: Pid, path: PathBuf) {
        if path.as_os_str().is_empty() {
            debug!("tracee {tid}: unreadable open path, dropping");
            return;
        }
        let Some(normalized) = admissible_open(
            &path,
            &self.config.base_dir,
            self.config.show_all_paths,
        ) else {
            debug!("tracee {tid}: dropping {}", path.display());
            return;
        };

        let thread_name = self.registry.display_name(tid);
        let sequence = self
            .events
            .record(tid.as_raw(), normalized.clone(), thread_name);
        debug!("file open {} [{sequence}] by tracee {tid}", normalized.display());
    }

    fn read_registers(&mut self, tid: Pid) -> ControlOutcome<libc::user_regs_struct> {
        with_retries("register read", tid, GETREGS_ATTEMPTS, || {
            ptrace::getregs(tid)
        })
    }

    /// Syscall-resume with retries; a tracee that cannot be resumed is
    /// terminated locally so its siblings keep tracing.
    fn resume_or_reap(&mut self, tid: Pid) {
        match with_retries("syscall resume", tid, RESUME_ATTEMPTS, || {
            ptrace::syscall(tid, None)
        }) {
            ControlOutcome::Done(()) => {}
            ControlOutcome::Gone => self.registry.on_exit(tid, -1),
            ControlOutcome::Failed => {
                error!("giving up on tracee {tid} after failed resumes");
                self.registry.on_exit(tid, -1);
            }
        }
    }

    fn resume(&mut self, tid: Pid, signal: Option<Signal>) {
        match with_retries("resume", tid, RESUME_ATTEMPTS, || {
            ptrace::syscall(tid, signal)
        }) {
            ControlOutcome::Done(()) => {}
            ControlOutcome::Gone => self.registry.on_exit(tid, -1),
            ControlOutcome::Failed => {
                error!("giving up on tracee {tid} after failed resumes");
                self.registry.on_exit(tid, -1);
            }
        }
    }

    fn teardown_all(&mut self) {
        for tid in self.registry.active_tids() {
            self.registry.on_exit(tid, -1);
        }
    }
}

/// Decide whether a classified open becomes an event: normalize the path,
/// apply the base-directory filter, and require an existing regular file.
pub fn admissible_open(path: &Path, base_dir: &Path, show_all: bool) -> Option<PathBuf> {
    let normalized = paths::normalize(path);
    if !paths::is_within(&normalized, base_dir, show_all) {
        return None;
    }
    match fs::metadata(&normalized) {
        Ok(metadata) if metadata.is_file() => Some(normalized),
        _ => None,
    }
}

enum ControlOutcome<T> {
    Done(T),
    /// The tracee disappeared (no such process); reclassified as an exit.
    Gone,
    Failed,
}

/// Retry a ptrace control operation across transient EINVAL/EIO failures
/// with exponential backoff. ESRCH short-circuits to [`ControlOutcome::Gone`].
fn with_retries<T>(
    what: &str,
    tid: Pid,
    attempts: u32,
    mut operation: impl FnMut() -> nix::Result<T>,
) -> ControlOutcome<T> {
    for attempt in 0..attempts {
        match operation() {
            Ok(value) => return ControlOutcome::Done(value),
            Err(Errno::ESRCH) => {
                debug!("tracee {tid} vanished during {what}");
                return ControlOutcome::Gone;
            }
            Err(Errno::EINVAL) | Err(Errno::EIO) => {
                warn!(
                    "{what} for tracee {tid} failed transiently (attempt {}/{attempts})",
                    attempt + 1
                );
                thread::sleep(RETRY_BASE_DELAY * (1u32 << attempt));
            }
            Err(err) => {
                error!("{what} for tracee {tid} failed: {err}");
                return ControlOutcome::Failed;
            }
        }
    }
    error!("{what} for tracee {tid} still failing after {attempts} attempts");
    ControlOutcome::Failed
}

fn trace_options() -> ptrace::Options {
    ptrace::Options::PTRACE_O_TRACEFORK
        | ptrace::Options::PTRACE_O_TRACEVFORK
        | ptrace::Options::PTRACE_O_TRACECLONE
        | ptrace::Options::PTRACE_O_TRACEEXEC
        | ptrace::Options::PTRACE_O_TRACEEXIT
        | ptrace::Options::PTRACE_O_TRACESYSGOOD
}

/// Spawn the target command. The child requests tracing and stops itself
/// before exec; the parent waits for that stop, arms the trace options so
/// descendants inherit tracing without a race, and resumes into the first
/// syscall stop.
fn spawn_traced(command: &[String]) -> Result<Pid> {
    let (program, args) = command
        .split_first()
        .context("no command to trace")?;

    let mut cmd = Command::new(program);
    cmd.args(args);
    unsafe {
        cmd.pre_exec(|| {
            ptrace::traceme()?;
            signal::raise(Signal::SIGSTOP)?;
            Ok(())
        });
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;
    let root = Pid::from_raw(child.id() as i32);
    // the supervisor reaps through waitpid from here on
    std::mem::forget(child);

    match waitpid(root, Some(WaitPidFlag::__WALL))
        .context("waiting for the spawned tracee to stop")?
    {
        WaitStatus::Stopped(_, _) => {}
        other => bail!("spawned tracee did not stop as expected: {other:?}"),
    }

    ptrace::setoptions(root, trace_options())
        .context("setting trace options on the root tracee")?;
    ptrace::syscall(root, None).context("resuming the root tracee")?;

    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admissible_open_requires_an_existing_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let file = base.join("present.txt");
        fs::write(&file, "x").unwrap();

        assert_eq!(admissible_open(&file, &base, false), Some(file.clone()));
        assert_eq!(admissible_open(&base.join("missing.txt"), &base, false), None);
        // directories never become events
        assert_eq!(admissible_open(&base, &base, false), None);
    }

    #[test]
    fn admissible_open_applies_the_base_filter() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();
        let outside = outside_dir.path().join("o.txt");
        fs::write(&outside, "x").unwrap();

        assert_eq!(admissible_open(&outside, &base, false), None);
        assert!(admissible_open(&outside, &base, true).is_some());
    }
}
