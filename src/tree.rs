use libc::pid_t;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// The (sequence, thread id, thread name) triple recorded on a file leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Touch {
    pub sequence: u64,
    pub tid: pid_t,
    pub thread_name: String,
}

/// One path segment in the aggregated tree. Interior nodes are directories;
/// leaves marked `is_file` carry the touch metadata of the open that
/// produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryNode {
    name: String,
    full_path: PathBuf,
    is_file: bool,
    touch: Option<Touch>,
    children: BTreeMap<String, DirectoryNode>,
}

impl DirectoryNode {
    fn new(name: impl Into<String>, full_path: PathBuf, is_file: bool) -> Self {
        Self {
            name: name.into(),
            full_path,
            is_file,
            touch: None,
            children: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    pub fn is_file(&self) -> bool {
        self.is_file
    }

    pub fn touch(&self) -> Option<&Touch> {
        self.touch.as_ref()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Children in canonical render order: directories before files, each
    /// group ascending by segment name.
    pub fn ordered_children(&self) -> impl Iterator<Item = &DirectoryNode> {
        let directories = self.children.values().filter(|child| !child.is_file);
        let files = self.children.values().filter(|child| child.is_file);
        directories.chain(files)
    }
}

/// Traversal sink. [`DirectoryTree::visit`] drives implementations through a
/// deterministic depth-first walk, so renderers stay decoupled from the tree.
pub trait TreeVisitor {
    fn enter_directory(&mut self, node: &DirectoryNode, depth: usize);
    fn visit_file(&mut self, node: &DirectoryNode, depth: usize);
    fn leave_directory(&mut self, node: &DirectoryNode, depth: usize);
}

/// Per-path aggregation of the event log, rooted at `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTree {
    root: DirectoryNode,
}

impl Default for DirectoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryTree {
    pub fn new() -> Self {
        Self {
            root: DirectoryNode::new("/", PathBuf::from("/"), false),
        }
    }

    pub fn root(&self) -> &DirectoryNode {
        &self.root
    }

    /// Insert a file path, creating missing interior directories. The final
    /// component becomes a file leaf; re-inserting an identical path leaves
    /// the structure untouched and overwrites the touch metadata.
    pub fn insert_file(&mut self, path: &Path, sequence: u64, tid: pid_t, thread_name: &str) {
        let segments: Vec<&std::ffi::OsStr> = path
            .components()
            .filter_map(|component| match component {
                Component::Normal(segment) => Some(segment),
                _ => None,
            })
            .collect();

        let mut current = &mut self.root;
        let mut current_path = PathBuf::from("/");
        let last = segments.len().saturating_sub(1);
        for (index, segment) in segments.iter().enumerate() {
            let name = segment.to_string_lossy().into_owned();
            current_path.push(segment);
            let is_last = index == last;
            let child_path = current_path.clone();
            current = current
                .children
                .entry(name.clone())
                .or_insert_with(|| DirectoryNode::new(name, child_path, is_last));

            if is_last {
                current.is_file = true;
                current.touch = Some(Touch {
                    sequence,
                    tid,
                    thread_name: thread_name.to_string(),
                });
            }
        }
    }

    /// Depth-first traversal in the canonical order: at each level
    /// directories before files, names ascending within each group.
    pub fn visit(&self, visitor: &mut dyn TreeVisitor) {
        Self::walk(&self.root, visitor, 0);
    }

    fn walk(node: &DirectoryNode, visitor: &mut dyn TreeVisitor, depth: usize) {
        if node.is_file {
            visitor.visit_file(node, depth);
            return;
        }
        visitor.enter_directory(node, depth);
        for child in node.ordered_children() {
            Self::walk(child, visitor, depth + 1);
        }
        visitor.leave_directory(node, depth);
    }
}
