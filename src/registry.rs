use crate::memory;
use log::debug;
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::time::SystemTime;

/// Whether a tracee is a full process (fork/vfork, or clone without
/// thread-group sharing) or a sibling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceeKind {
    Process,
    Thread,
}

/// Everything the registry knows about one observed TID.
#[derive(Debug, Clone)]
pub struct TraceeRecord {
    pub id: Pid,
    pub kind: TraceeKind,
    pub parent: Option<Pid>,
    /// Kernel-assigned name, snapshotted at creation time.
    pub name: String,
    pub active: bool,
    pub created_at: SystemTime,
    pub exit_status: Option<i32>,
    pub child_processes: Vec<Pid>,
    pub child_threads: Vec<Pid>,
}

impl TraceeRecord {
    fn children_of_kind_mut(&mut self, kind: TraceeKind) -> &mut Vec<Pid> {
        match kind {
            TraceeKind::Process => &mut self.child_processes,
            TraceeKind::Thread => &mut self.child_threads,
        }
    }
}

/// Kernel side effects the registry performs during bookkeeping. The real
/// implementation talks to ptrace and /proc; tests substitute a stub so
/// registry scenarios run without live tracees.
pub trait TraceeOps {
    /// Name snapshot from `/proc/<tid>/comm`.
    fn thread_name(&self, tid: Pid) -> Option<String>;
    /// Best-effort termination signal sent to child processes torn down
    /// with their parent.
    fn terminate(&self, tid: Pid);
    /// Best-effort debugger detach; "no such process" is ignored.
    fn detach(&self, tid: Pid);
}

pub struct KernelTraceeOps;

impl TraceeOps for KernelTraceeOps {
    fn thread_name(&self, tid: Pid) -> Option<String> {
        memory::thread_name(tid)
    }

    fn terminate(&self, tid: Pid) {
        let _ = signal::kill(tid, Signal::SIGTERM);
    }

    fn detach(&self, tid: Pid) {
        let _ = ptrace::detach(tid, None);
    }
}

const UNKNOWN_NAME: &str = "unknown";

/// Live map of every tracee the supervisor has observed. Owned and mutated
/// exclusively by the supervisor; records reference each other by TID only.
pub struct TraceeRegistry<O: TraceeOps> {
    ops: O,
    records: HashMap<Pid, TraceeRecord>,
}

impl<O: TraceeOps> TraceeRegistry<O> {
    pub fn new(ops: O) -> Self {
        Self {
            ops,
            records: HashMap::new(),
        }
    }

    pub fn get(&self, tid: Pid) -> Option<&TraceeRecord> {
        self.records.get(&tid)
    }

    pub fn contains(&self, tid: Pid) -> bool {
        self.records.contains_key(&tid)
    }

    pub fn is_active(&self, tid: Pid) -> bool {
        self.records.get(&tid).is_some_and(|record| record.active)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn active_tids(&self) -> Vec<Pid> {
        let mut tids: Vec<Pid> = self
            .records
            .values()
            .filter(|record| record.active)
            .map(|record| record.id)
            .collect();
        tids.sort();
        tids
    }

    /// Display name for event records; `unknown` for unregistered TIDs.
    pub fn display_name(&self, tid: Pid) -> String {
        self.records
            .get(&tid)
            .map(|record| record.name.clone())
            .unwrap_or_else(|| UNKNOWN_NAME.to_string())
    }

    /// Register a newly observed tracee.
    ///
    /// A previously exited record for the same TID (the kernel reuses them)
    /// is reactivated and reparented if needed. Out-of-order events are
    /// tolerated: a missing parent gets a stub record first.
    pub fn on_create(&mut self, parent: Option<Pid>, tid: Pid, kind: TraceeKind) {
        if let Some(existing) = self.records.get(&tid) {
            if existing.active {
                return;
            }
            self.reactivate(tid, parent, kind);
            return;
        }

        if let Some(parent_tid) = parent {
            if !self.records.contains_key(&parent_tid) {
                let parent_name = self
                    .ops
                    .thread_name(parent_tid)
                    .unwrap_or_else(|| UNKNOWN_NAME.to_string());
                self.records.insert(
                    parent_tid,
                    TraceeRecord {
                        id: parent_tid,
                        kind: TraceeKind::Process,
                        parent: None,
                        name: parent_name,
                        active: true,
                        created_at: SystemTime::now(),
                        exit_status: None,
                        child_processes: Vec::new(),
                        child_threads: Vec::new(),
                    },
                );
            }
            if let Some(parent_record) = self.records.get_mut(&parent_tid) {
                let children = parent_record.children_of_kind_mut(kind);
                if !children.contains(&tid) {
                    children.push(tid);
                }
            }
        }

        let name = self
            .ops
            .thread_name(tid)
            .unwrap_or_else(|| UNKNOWN_NAME.to_string());
        self.records.insert(
            tid,
            TraceeRecord {
                id: tid,
                kind,
                parent,
                name,
                active: true,
                created_at: SystemTime::now(),
                exit_status: None,
                child_processes: Vec::new(),
                child_threads: Vec::new(),
            },
        );
        debug!("registered {kind:?} {tid} (parent {parent:?})");
    }

    fn reactivate(&mut self, tid: Pid, parent: Option<Pid>, kind: TraceeKind) {
        let old_parent = match self.records.get(&tid) {
            Some(record) => record.parent,
            None => return,
        };

        if old_parent != parent {
            if let Some(old_parent_tid) = old_parent {
                if let Some(old_parent_record) = self.records.get_mut(&old_parent_tid) {
                    old_parent_record
                        .children_of_kind_mut(kind)
                        .retain(|child| *child != tid);
                }
            }
            if let Some(new_parent_tid) = parent {
                if let Some(new_parent_record) = self.records.get_mut(&new_parent_tid) {
                    let children = new_parent_record.children_of_kind_mut(kind);
                    if !children.contains(&tid) {
                        children.push(tid);
                    }
                }
            }
        }

        if let Some(record) = self.records.get_mut(&tid) {
            record.active = true;
            record.exit_status = None;
            record.created_at = SystemTime::now();
            record.parent = parent;
            record.kind = kind;
        }
        debug!("reactivated {kind:?} {tid} (parent {parent:?})");
    }

    /// Mark a tracee exited and tear down its still-active subtree: child
    /// processes are signalled and recursed into first, then child threads.
    /// Finishes with a best-effort debugger detach of the TID itself.
    pub fn on_exit(&mut self, tid: Pid, status: i32) {
        let (child_processes, child_threads) = match self.records.get_mut(&tid) {
            Some(record) if record.active => {
                record.active = false;
                record.exit_status = Some(status);
                (record.child_processes.clone(), record.child_threads.clone())
            }
            _ => return,
        };

        for child in child_processes {
            if self.is_active(child) {
                self.ops.terminate(child);
                self.on_exit(child, -1);
            }
        }
        for child in child_threads {
            if self.is_active(child) {
                self.on_exit(child, -1);
            }
        }

        self.ops.detach(tid);
        debug!("tracee {tid} exited with status {status}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records side effects instead of touching the kernel.
    #[derive(Default)]
    struct StubOps {
        terminated: RefCell<Vec<Pid>>,
        detached: RefCell<Vec<Pid>>,
    }

    impl TraceeOps for StubOps {
        fn thread_name(&self, tid: Pid) -> Option<String> {
            Some(format!("task-{tid}"))
        }

        fn terminate(&self, tid: Pid) {
            self.terminated.borrow_mut().push(tid);
        }

        fn detach(&self, tid: Pid) {
            self.detached.borrow_mut().push(tid);
        }
    }

    fn registry() -> TraceeRegistry<StubOps> {
        TraceeRegistry::new(StubOps::default())
    }

    fn pid(raw: i32) -> Pid {
        Pid::from_raw(raw)
    }

    #[test]
    fn fork_accounting_tears_down_the_subtree() {
        let mut reg = registry();
        reg.on_create(None, pid(1), TraceeKind::Process);
        reg.on_create(Some(pid(1)), pid(2), TraceeKind::Thread);
        reg.on_create(Some(pid(1)), pid(3), TraceeKind::Process);

        reg.on_exit(pid(1), 0);

        for raw in [1, 2, 3] {
            assert!(!reg.is_active(pid(raw)), "tracee {raw} should be inactive");
            assert!(reg.get(pid(raw)).unwrap().exit_status.is_some());
        }
        let root = reg.get(pid(1)).unwrap();
        assert_eq!(root.child_threads, vec![pid(2)]);
        assert_eq!(root.child_processes, vec![pid(3)]);
        assert_eq!(root.exit_status, Some(0));
        assert_eq!(reg.get(pid(3)).unwrap().exit_status, Some(-1));

        // child processes get a termination signal, threads do not
        assert_eq!(*reg.ops.terminated.borrow(), vec![pid(3)]);
        // every torn-down tracee is detached
        let mut detached = reg.ops.detached.borrow().clone();
        detached.sort();
        assert_eq!(detached, vec![pid(1), pid(2), pid(3)]);
    }

    #[test]
    fn tid_reuse_reactivates_without_duplicating_child_links() {
        let mut reg = registry();
        reg.on_create(None, pid(10), TraceeKind::Process);
        reg.on_create(Some(pid(10)), pid(11), TraceeKind::Process);
        reg.on_exit(pid(11), 0);
        let first_created = reg.get(pid(11)).unwrap().created_at;

        reg.on_create(Some(pid(10)), pid(11), TraceeKind::Process);

        let record = reg.get(pid(11)).unwrap();
        assert!(record.active);
        assert_eq!(record.exit_status, None);
        assert!(record.created_at >= first_created);
        assert_eq!(reg.get(pid(10)).unwrap().child_processes, vec![pid(11)]);
    }

    #[test]
    fn reactivation_can_reparent() {
        let mut reg = registry();
        reg.on_create(None, pid(1), TraceeKind::Process);
        reg.on_create(None, pid(2), TraceeKind::Process);
        reg.on_create(Some(pid(1)), pid(5), TraceeKind::Process);
        reg.on_exit(pid(5), 0);

        reg.on_create(Some(pid(2)), pid(5), TraceeKind::Process);

        assert!(reg.get(pid(1)).unwrap().child_processes.is_empty());
        assert_eq!(reg.get(pid(2)).unwrap().child_processes, vec![pid(5)]);
        assert_eq!(reg.get(pid(5)).unwrap().parent, Some(pid(2)));
    }

    #[test]
    fn out_of_order_creation_builds_a_stub_parent() {
        let mut reg = registry();
        reg.on_create(Some(pid(7)), pid(8), TraceeKind::Thread);

        let parent = reg.get(pid(7)).unwrap();
        assert!(parent.active);
        assert_eq!(parent.kind, TraceeKind::Process);
        assert_eq!(parent.parent, None);
        assert_eq!(parent.child_threads, vec![pid(8)]);
    }

    #[test]
    fn duplicate_creation_is_ignored_while_active() {
        let mut reg = registry();
        reg.on_create(None, pid(1), TraceeKind::Process);
        reg.on_create(Some(pid(1)), pid(2), TraceeKind::Thread);
        reg.on_create(Some(pid(1)), pid(2), TraceeKind::Thread);

        assert_eq!(reg.get(pid(1)).unwrap().child_threads, vec![pid(2)]);
    }

    #[test]
    fn exit_of_unknown_or_inactive_tracee_is_a_noop() {
        let mut reg = registry();
        reg.on_exit(pid(99), 0);
        assert!(reg.is_empty());

        reg.on_create(None, pid(1), TraceeKind::Process);
        reg.on_exit(pid(1), 3);
        reg.on_exit(pid(1), 7);
        assert_eq!(reg.get(pid(1)).unwrap().exit_status, Some(3));
        // only the first transition detaches
        assert_eq!(*reg.ops.detached.borrow(), vec![pid(1)]);
    }

    #[test]
    fn child_parent_links_are_consistent() {
        let mut reg = registry();
        reg.on_create(None, pid(1), TraceeKind::Process);
        reg.on_create(Some(pid(1)), pid(2), TraceeKind::Process);
        reg.on_create(Some(pid(2)), pid(3), TraceeKind::Thread);

        for (child, parent) in [(pid(2), pid(1)), (pid(3), pid(2))] {
            let record = reg.get(child).unwrap();
            assert_eq!(record.parent, Some(parent));
            let parent_record = reg.get(parent).unwrap();
            let listed = match record.kind {
                TraceeKind::Process => &parent_record.child_processes,
                TraceeKind::Thread => &parent_record.child_threads,
            };
            assert_eq!(listed.iter().filter(|tid| **tid == child).count(), 1);
        }
    }
}
