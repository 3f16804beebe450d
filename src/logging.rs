use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use log::{Level, LevelFilter};

/// Where the pipelines report what they are doing.  Components get one of
/// these handed in instead of reaching for the `log` macros, so a test can
/// look at exactly what was reported.
pub trait EventLog: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message)
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message)
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warn, message)
    }

    fn error(&self, message: &str) {
        self.log(Level::Error, message)
    }
}

/// Forward events to the `log` facade under a fixed target.
pub struct FacadeLog {
    target: &'static str,
}

impl FacadeLog {
    pub fn new(target: &'static str) -> Self {
        FacadeLog { target }
    }
}

impl EventLog for FacadeLog {
    fn log(&self, level: Level, message: &str) {
        log::log!(target: self.target, level, "{}", message);
    }
}

/// Keep events in memory.
#[derive(Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(Level, String)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// All messages logged at exactly this level, oldest first.
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }
}

impl EventLog for MemoryLog {
    fn log(&self, level: Level, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_string()));
        }
    }
}

/// Copy every formatted log line to the console stream and to a file.
struct Tee<W> {
    console: W,
    file: File,
}

impl Tee<io::Stderr> {
    /// env_logger writes to stderr by default, keep doing so.
    fn stderr(file: File) -> Self {
        Tee {
            console: io::stderr(),
            file,
        }
    }
}

impl<W: Write> Write for Tee<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.console.write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.console.flush()?;
        self.file.flush()
    }
}

/// Set up `env_logger` at level Info (`RUST_LOG` overrides it).  If a log file
/// is given, lines are appended to it as well as printed.
pub fn init_logging(log_file: Option<&Path>) -> io::Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Info).parse_default_env();
    if let Some(path) = log_file {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee::stderr(file))));
    }
    builder.try_init().map_err(io::Error::other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_log_keeps_order_and_levels() {
        let log = MemoryLog::new();
        log.info("starting");
        log.warn("2025-03-15 is a weekend");
        log.error("download failed");
        log.info("done");
        assert_eq!(log.entries().len(), 4);
        assert_eq!(log.messages(Level::Info), vec!["starting", "done"]);
        assert_eq!(log.messages(Level::Error), vec!["download failed"]);
        assert!(log.messages(Level::Debug).is_empty());
    }

    #[test]
    fn tee_writes_both_sides() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sgx.log");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut tee = Tee {
            console: Vec::new(),
            file,
        };
        writeln!(tee, "[INFO] staged 1 file(s)")?;
        tee.flush()?;
        assert_eq!(tee.console, b"[INFO] staged 1 file(s)\n");
        assert_eq!(fs::read_to_string(&path)?, "[INFO] staged 1 file(s)\n");
        Ok(())
    }

    #[test]
    fn facade_log_does_not_need_a_logger() {
        // no logger installed, events are silently dropped
        let log = FacadeLog::new("sgx_ticks::test");
        log.info("hello");
        log.debug("world");
    }
}
