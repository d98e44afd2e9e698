//! End-to-end scenarios over the event log, directory tree, and plain-text
//! renderer, plus the admission filter that guards the event log.

use filetrace::events::EventLog;
use filetrace::reporter::render_text;
use filetrace::supervisor::admissible_open;
use filetrace::tree::DirectoryTree;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

fn tree_of(log: &EventLog) -> DirectoryTree {
    let mut tree = DirectoryTree::new();
    for event in log.iter() {
        tree.insert_file(&event.path, event.sequence, event.tid, &event.thread_name);
    }
    tree
}

#[test]
fn single_open_renders_one_leaf() {
    let mut log = EventLog::new();
    log.record(100, PathBuf::from("/tmp/a.txt"), "main".into());

    let rendered = render_text(&tree_of(&log));
    assert_eq!(rendered, "/\n  tmp\n    a.txt [1 100 main]\n");
}

#[test]
fn sibling_files_render_alphabetically_not_by_sequence() {
    let mut log = EventLog::new();
    log.record(100, PathBuf::from("/tmp/b.txt"), "p".into());
    log.record(100, PathBuf::from("/tmp/a.txt"), "p".into());

    let rendered = render_text(&tree_of(&log));
    let a_pos = rendered.find("a.txt [2 100 p]").expect("a.txt leaf missing");
    let b_pos = rendered.find("b.txt [1 100 p]").expect("b.txt leaf missing");
    assert!(a_pos < b_pos, "alphabetical order violated:\n{rendered}");
}

#[test]
fn directories_render_before_files_at_the_same_level() {
    let mut log = EventLog::new();
    log.record(50, PathBuf::from("/root/z.log"), "t".into());
    log.record(50, PathBuf::from("/root/a/b.log"), "t".into());

    let rendered = render_text(&tree_of(&log));
    let dir_pos = rendered.find("\n    a\n").expect("directory a missing");
    let file_pos = rendered.find("z.log [1 50 t]").expect("z.log leaf missing");
    assert!(dir_pos < file_pos, "directory should precede file:\n{rendered}");
    assert!(rendered.contains("b.log [2 50 t]"));
}

#[test]
fn nonexistent_files_never_reach_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().canonicalize().unwrap();

    let mut log = EventLog::new();
    if let Some(path) = admissible_open(&base.join("does_not_exist"), &base, false) {
        log.record(1, path, "main".into());
    }

    assert!(log.is_empty());
    let rendered = render_text(&tree_of(&log));
    assert_eq!(rendered, "/\n");
}

#[test]
fn rendering_twice_is_identical() {
    let mut log = EventLog::new();
    log.record(1, PathBuf::from("/a/b/c.txt"), "x".into());
    log.record(2, PathBuf::from("/a/d.txt"), "y".into());
    let tree = tree_of(&log);

    assert_eq!(render_text(&tree), render_text(&tree));
}

#[test]
fn tree_leaves_round_trip_the_logged_paths() {
    let mut log = EventLog::new();
    log.record(1, PathBuf::from("/a/one.txt"), "t1".into());
    log.record(2, PathBuf::from("/a/b/two.txt"), "t2".into());
    log.record(3, PathBuf::from("/c/three.txt"), "t3".into());
    // duplicate path: structure unchanged, metadata takes the last write
    log.record(4, PathBuf::from("/a/one.txt"), "t4".into());

    struct Leaves(Vec<(PathBuf, u64, String)>);
    impl filetrace::TreeVisitor for Leaves {
        fn enter_directory(&mut self, _: &filetrace::tree::DirectoryNode, _: usize) {}
        fn visit_file(&mut self, node: &filetrace::tree::DirectoryNode, _: usize) {
            let touch = node.touch().expect("file leaf without touch metadata");
            self.0.push((
                node.full_path().to_path_buf(),
                touch.sequence,
                touch.thread_name.clone(),
            ));
        }
        fn leave_directory(&mut self, _: &filetrace::tree::DirectoryNode, _: usize) {}
    }

    let mut leaves = Leaves(Vec::new());
    tree_of(&log).visit(&mut leaves);

    let leaf_paths: BTreeSet<PathBuf> = leaves.0.iter().map(|(path, ..)| path.clone()).collect();
    let logged_paths: BTreeSet<PathBuf> = log.iter().map(|event| event.path.clone()).collect();
    assert_eq!(leaf_paths, logged_paths);

    let one = leaves
        .0
        .iter()
        .find(|(path, ..)| path == Path::new("/a/one.txt"))
        .unwrap();
    assert_eq!((one.1, one.2.as_str()), (4, "t4"));
}

#[test]
fn sequences_stay_contiguous_across_mixed_tracees() {
    let mut log = EventLog::new();
    for (tid, path) in [(10, "/x/a"), (20, "/x/b"), (10, "/x/c"), (30, "/y/d")] {
        log.record(tid, PathBuf::from(path), format!("task-{tid}"));
    }
    let sequences: Vec<u64> = log.iter().map(|event| event.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
}
