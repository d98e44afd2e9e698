use clap::Parser;
use filetrace::config::{Cli, TraceConfig};
use filetrace::local_logger::init_local_logger;
use filetrace::reporter::HtmlReporter;
use filetrace::supervisor::Supervisor;
use filetrace::tree::DirectoryTree;
use log::info;

fn main() {
    let res = run();
    if let Err(err) = res {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    init_local_logger()?;
    let cli = Cli::parse();
    let config = TraceConfig::try_from(cli)?;

    info!("Starting file trace:");
    info!("  output file: {}", config.output_path.display());
    info!("  base directory: {}", config.base_dir.display());
    info!(
        "  directory filtering: {}",
        if config.show_all_paths { "disabled" } else { "enabled" }
    );
    info!("  command: {}", config.command.join(" "));

    let output_path = config.output_path.clone();
    let outcome = Supervisor::run(config)?;
    info!(
        "Recorded {} file-open events across {} tracees",
        outcome.events.len(),
        outcome.registry.len()
    );

    let mut tree = DirectoryTree::new();
    for event in outcome.events.iter() {
        tree.insert_file(&event.path, event.sequence, event.tid, &event.thread_name);
    }

    HtmlReporter::new(&output_path).write(&tree)?;
    info!("Created visualization at {}", output_path.display());

    Ok(())
}
