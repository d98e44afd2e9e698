//! Renderers over the directory tree's canonical traversal.
//!
//! The HTML reporter produces the end-of-run artifact; the plain-text
//! renderer backs tests and terminal inspection with one line per node.

mod html;

pub use html::HtmlReporter;

use crate::tree::{DirectoryNode, DirectoryTree, TreeVisitor};
use std::fmt::Write;

const INDENT_WIDTH: usize = 2;

/// Render the tree as indented plain text, one node per line. File leaves
/// carry their touch metadata as `name [seq tid thread_name]`.
pub fn render_text(tree: &DirectoryTree) -> String {
    let mut renderer = TextRenderer::default();
    tree.visit(&mut renderer);
    renderer.out
}

#[derive(Default)]
struct TextRenderer {
    out: String,
}

impl TreeVisitor for TextRenderer {
    fn enter_directory(&mut self, node: &DirectoryNode, depth: usize) {
        let _ = writeln!(self.out, "{:indent$}{}", "", node.name(), indent = depth * INDENT_WIDTH);
    }

    fn visit_file(&mut self, node: &DirectoryNode, depth: usize) {
        let _ = write!(self.out, "{:indent$}{}", "", node.name(), indent = depth * INDENT_WIDTH);
        if let Some(touch) = node.touch() {
            let _ = write!(self.out, " [{} {} {}]", touch.sequence, touch.tid, touch.thread_name);
        }
        self.out.push('\n');
    }

    fn leave_directory(&mut self, _node: &DirectoryNode, _depth: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::DirectoryTree;
    use std::path::Path;

    #[test]
    fn renders_leaves_with_touch_metadata() {
        let mut tree = DirectoryTree::new();
        tree.insert_file(Path::new("/tmp/a.txt"), 1, 100, "main");

        assert_eq!(render_text(&tree), "/\n  tmp\n    a.txt [1 100 main]\n");
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut tree = DirectoryTree::new();
        tree.insert_file(Path::new("/x/b"), 1, 1, "a");
        tree.insert_file(Path::new("/x/a"), 2, 1, "a");
        tree.insert_file(Path::new("/x/c/d"), 3, 2, "b");

        assert_eq!(render_text(&tree), render_text(&tree));
    }
}
