use anyhow::Result;
use chrono::Local;
use console::Style;
use log::{Level, LevelFilter, Log, Metadata, Record};
use simplelog::{CombinedLogger, SharedLogger};
use std::env;
use std::io::Write;

/// Console logger for the tracer: level comes from `FILETRACE_LOG`, every
/// record carries an ISO-8601 millisecond timestamp and a level tag, and
/// warnings/errors go to stderr while the rest goes to stdout.
pub struct LocalLogger {
    log_level: LevelFilter,
}

impl LocalLogger {
    pub fn new() -> Self {
        let log_level = env::var("FILETRACE_LOG")
            .ok()
            .and_then(|log_level| log_level.parse::<LevelFilter>().ok())
            .unwrap_or(LevelFilter::Info);

        LocalLogger { log_level }
    }
}

impl Default for LocalLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for LocalLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.log_level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            print_record(record);
        }
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}

/// Print a log record to the console with the appropriate style and stream
fn print_record(record: &Record) {
    let error_style = Style::new().red();
    let warn_style = Style::new().yellow();
    let info_style = Style::new().white();
    let debug_style = Style::new().blue().dim();
    let trace_style = Style::new().black().dim();

    let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f");
    let line = format!("[{timestamp}] [{}] {}", record.level(), record.args());

    match record.level() {
        Level::Error => eprintln!("{}", error_style.apply_to(line)),
        Level::Warn => eprintln!("{}", warn_style.apply_to(line)),
        Level::Info => println!("{}", info_style.apply_to(line)),
        Level::Debug => println!("{}", debug_style.apply_to(line)),
        Level::Trace => println!("{}", trace_style.apply_to(line)),
    }
}

impl SharedLogger for LocalLogger {
    fn level(&self) -> LevelFilter {
        self.log_level
    }

    fn config(&self) -> Option<&simplelog::Config> {
        None
    }

    fn as_log(self: Box<Self>) -> Box<dyn Log> {
        Box::new(*self)
    }
}

pub fn get_local_logger() -> Box<dyn SharedLogger> {
    Box::new(LocalLogger::new())
}

pub fn init_local_logger() -> Result<()> {
    CombinedLogger::init(vec![get_local_logger()])?;
    Ok(())
}
