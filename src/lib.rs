//! Syscall-level file-access tracer: runs a command under ptrace, follows
//! its whole process/thread tree, and aggregates every observed file open
//! into a renderable directory tree.

pub mod config;
pub mod events;
pub mod local_logger;
pub mod memory;
pub mod paths;
pub mod registry;
pub mod reporter;
pub mod supervisor;
pub mod syscall;
pub mod tree;

pub use config::{Cli, TraceConfig};
pub use events::{EventLog, FileOpenEvent};
pub use registry::{TraceeKind, TraceeRegistry};
pub use supervisor::{Supervisor, TraceOutcome};
pub use tree::{DirectoryTree, TreeVisitor};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
