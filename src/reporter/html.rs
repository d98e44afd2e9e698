use crate::tree::{DirectoryNode, DirectoryTree, TreeVisitor};
use anyhow::{Context, Result};
use log::debug;
use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

const FOLDER_SVG: &str = "<svg class='svg-icon' viewBox='0 0 20 20'><path d='M2 4c0-1.1.9-2 2-2h4l2 2h6c1.1 0 2 .9 2 2v10c0 1.1-.9 2-2 2H4c-1.1 0-2-.9-2-2V4z'/></svg>";
const FILE_SVG: &str = "<svg class='svg-icon' viewBox='0 0 20 20'><path d='M13 2H6C4.9 2 4 2.9 4 4v12c0 1.1.9 2 2 2h8c1.1 0 2-.9 2-2V7l-3-5zM13 8V3.5L17.5 8H13z'/></svg>";

const HTML_HEAD: &str = r#"<!DOCTYPE html>
<html>
<head>
<title>File Access Visualization</title>
<style>
:root { --spacing-unit: 0.5rem; --primary-color: #0066cc; --border-color: #ddd; --text-color: #333; --bg-color: #fff; }
@media (prefers-color-scheme: dark) {
  :root { --primary-color: #4d94ff; --border-color: #444; --text-color: #eee; --bg-color: #222; }
}
* { box-sizing: border-box; margin: 0; padding: 0; }
body { font-family: system-ui, -apple-system, sans-serif; background: var(--bg-color); color: var(--text-color); line-height: 1.5; }
.svg-icon { width: 16px; height: 16px; fill: currentColor; vertical-align: middle; }
.container { display: grid; grid-template-columns: minmax(250px, 1fr) 3fr; gap: var(--spacing-unit); padding: var(--spacing-unit); max-width: 1600px; margin: 0 auto; }
@media (max-width: 768px) { .container { grid-template-columns: 1fr; } }
h1 { color: var(--text-color); font-size: 1.5rem; margin-bottom: var(--spacing-unit); grid-column: 1 / -1; }
.search-container { position: sticky; top: 0; background: var(--bg-color); padding: var(--spacing-unit); z-index: 100; grid-column: 1 / -1; }
#search-box { width: 100%; padding: calc(var(--spacing-unit) * 0.75); font-size: 1rem; border: 2px solid var(--border-color); border-radius: 4px; background: var(--bg-color); color: var(--text-color); }
#search-box:focus { outline: none; border-color: var(--primary-color); box-shadow: 0 0 0 2px rgba(0,102,204,0.2); }
.directory-tree { font-family: 'SF Mono', Consolas, monospace; font-size: 0.9rem; }
.tree-node { display: flex; flex-direction: column; margin: calc(var(--spacing-unit) * 0.25) 0; transform-origin: top; transition: transform 0.3s cubic-bezier(0.4, 0, 0.2, 1), opacity 0.3s cubic-bezier(0.4, 0, 0.2, 1); }
.node-content { display: flex; align-items: center; padding: calc(var(--spacing-unit) * 0.5); border-radius: 4px; transition: background-color 0.2s; }
.node-content:hover { background-color: rgba(0,102,204,0.1); }
.file { color: var(--text-color); }
.file .name { font-weight: normal; }
.directory { color: var(--primary-color); cursor: pointer; }
.directory .name { font-weight: 600; }
.sequence { color: var(--primary-color); margin-left: var(--spacing-unit); font-weight: 600; opacity: 0.8; }
.thread-info { color: var(--text-color); margin-left: var(--spacing-unit); opacity: 0.7; }
.debug-info { color: var(--text-color); margin-left: var(--spacing-unit); opacity: 0.7; transition: all 0.3s ease; }
.debug-info.collapsed { max-height: 0; overflow: hidden; opacity: 0; }
.debug-info-header { cursor: pointer; display: flex; align-items: center; }
.debug-info-header:hover { color: var(--primary-color); }
.debug-info-content { max-height: 500px; overflow: auto; transition: max-height 0.3s ease; }
.folder-icon { margin-right: calc(var(--spacing-unit) * 0.5); transition: transform 0.2s; display: inline-flex; align-items: center; }
.file-icon { margin-right: calc(var(--spacing-unit) * 0.5); display: inline-flex; align-items: center; }
.children { margin-left: calc(var(--spacing-unit) * 2); border-left: 1px solid var(--border-color); padding-left: var(--spacing-unit); transition: all 0.3s cubic-bezier(0.4, 0, 0.2, 1); transform-origin: top; }
.collapsed .children { display: none; }
.collapsed .folder-icon { transform: rotate(-90deg); }
.hidden { display: none; }
.tree-node.hidden { transform: scaleY(0); opacity: 0; }
.search-match { background-color: rgba(255, 215, 0, 0.3); box-shadow: 0 0 0 2px rgba(255, 215, 0, 0.5); border-radius: 2px; transition: all 0.3s cubic-bezier(0.4, 0, 0.2, 1); }
.search-match-enter { animation: highlight-fade-in 0.3s cubic-bezier(0.4, 0, 0.2, 1); }
@keyframes highlight-fade-in { from { background-color: transparent; } to { background-color: rgba(255, 215, 0, 0.3); } }
</style>
<script>
function toggleDirectory(element) {
    const node = element.closest('.tree-node');
    node.classList.toggle('collapsed');
}

function filterFiles() {
    const searchText = document.getElementById('search-box').value.toLowerCase();
    const nodes = document.querySelectorAll('.tree-node');

    document.querySelectorAll('.search-match').forEach(el => {
        el.classList.remove('search-match', 'search-match-enter');
    });

    nodes.forEach(node => {
        node.classList.add('hidden');
    });

    nodes.forEach(node => {
        const nameElement = node.querySelector('.name');
        const name = nameElement.textContent.toLowerCase();
        const isDirectory = node.classList.contains('directory');

        if (name.includes(searchText) && searchText !== '') {
            node.classList.remove('hidden');
            nameElement.classList.add('search-match', 'search-match-enter');

            let parent = node.parentElement;
            while (parent) {
                if (parent.classList.contains('children')) {
                    const parentNode = parent.closest('.tree-node');
                    if (parentNode) {
                        parentNode.classList.remove('hidden');
                        parentNode.classList.remove('collapsed');
                    }
                }
                parent = parent.parentElement;
            }

            if (isDirectory) {
                node.querySelectorAll('.tree-node').forEach(child => {
                    child.classList.remove('hidden');
                });
                node.classList.remove('collapsed');
            }
        }
    });

    if (searchText === '') {
        nodes.forEach(node => {
            node.classList.remove('hidden');
        });
    }
}
</script>
</head>
<body>
<div class='container'>
<h1>File Access Visualization</h1>
<div class='search-container'>
<input type='text' id='search-box' placeholder='Search files and processes...' onkeyup='filterFiles()'>
</div>
"#;

/// Writes the self-contained interactive report: embedded styling and
/// search script, the canonical tree traversal as nested markup, and a
/// collapsible debug footer.
pub struct HtmlReporter {
    output_path: PathBuf,
}

impl HtmlReporter {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }

    pub fn write(&self, tree: &DirectoryTree) -> Result<()> {
        let mut file = File::create(&self.output_path).with_context(|| {
            format!("failed to open output file: {}", self.output_path.display())
        })?;
        file.write_all(self.render(tree).as_bytes()).with_context(|| {
            format!("failed to write report to {}", self.output_path.display())
        })?;
        debug!("wrote HTML report to {}", self.output_path.display());
        Ok(())
    }

    fn render(&self, tree: &DirectoryTree) -> String {
        let mut out = String::from(HTML_HEAD);
        out.push_str("<div class='directory-tree'>\n");
        let mut writer = HtmlTreeWriter { out: &mut out };
        tree.visit(&mut writer);
        out.push_str("</div>\n");

        let _ = write!(
            out,
            "<div class='debug-info' style='grid-column: 1 / -1; margin-top: var(--spacing-unit); padding: var(--spacing-unit); background: var(--bg-color); border: 1px solid var(--border-color); border-radius: 4px;'>\n\
             <div class='debug-info-header' onclick='this.parentElement.classList.toggle(\"collapsed\")'>\n\
             <h2 style='font-size: 1.2rem; margin-bottom: var(--spacing-unit);'>Debug Information</h2>\n\
             </div>\n\
             <div class='debug-info-content'>\n\
             <pre id='debug-info' style='font-family: \"SF Mono\", Consolas, monospace; font-size: 0.9rem; overflow-x: auto;'>\nOutput file: {}\n</pre>\n\
             </div>\n\
             </div>\n",
            escape_html(&self.output_path.display().to_string())
        );
        out.push_str("</div>\n</body>\n</html>\n");
        out
    }
}

struct HtmlTreeWriter<'a> {
    out: &'a mut String,
}

impl TreeVisitor for HtmlTreeWriter<'_> {
    fn enter_directory(&mut self, node: &DirectoryNode, _depth: usize) {
        self.out.push_str("<div class='tree-node directory'>\n");
        let _ = write!(
            self.out,
            "<div class='node-content'>\
             <span class='folder-icon' onclick='toggleDirectory(this)'>{FOLDER_SVG}</span>\
             <span class='name'>{}</span>\
             </div>\n",
            escape_html(node.name())
        );
        if node.has_children() {
            self.out.push_str("<div class='children'>\n");
        }
    }

    fn visit_file(&mut self, node: &DirectoryNode, _depth: usize) {
        self.out.push_str("<div class='tree-node file'>\n");
        let _ = write!(
            self.out,
            "<div class='node-content'>\
             <span class='file-icon'>{FILE_SVG}</span>\
             <span class='name'>{}</span>",
            escape_html(node.name())
        );
        if let Some(touch) = node.touch() {
            let _ = write!(
                self.out,
                "<span class='sequence'>[{}]</span>\
                 <span class='thread-info'>(Thread: {} - {})</span>",
                touch.sequence,
                touch.tid,
                escape_html(&touch.thread_name)
            );
        }
        self.out.push_str("</div>\n</div>\n");
    }

    fn leave_directory(&mut self, node: &DirectoryNode, _depth: usize) {
        if node.has_children() {
            self.out.push_str("</div>\n");
        }
        self.out.push_str("</div>\n");
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn report_contains_tree_and_metadata() {
        let mut tree = DirectoryTree::new();
        tree.insert_file(Path::new("/tmp/a.txt"), 1, 100, "main");

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("report.html");
        let reporter = HtmlReporter::new(&output);
        reporter.write(&tree).unwrap();

        let html = std::fs::read_to_string(&output).unwrap();
        assert!(html.contains("a.txt"));
        assert!(html.contains("<span class='sequence'>[1]</span>"));
        assert!(html.contains("Thread: 100 - main"));
        assert!(html.contains("</html>"));
    }

    #[test]
    fn node_names_are_escaped() {
        let mut tree = DirectoryTree::new();
        tree.insert_file(Path::new("/tmp/<script>.txt"), 1, 1, "a&b");

        let reporter = HtmlReporter::new("unused.html");
        let html = reporter.render(&tree);
        assert!(html.contains("&lt;script&gt;.txt"));
        assert!(html.contains("a&amp;b"));
        assert!(!html.contains("<span class='name'><script>"));
    }
}
