use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use jiff::civil::Date;

/// One line of the missed files log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissedFile {
    pub date: Date,
    pub reason: String,
}

/// Append-only record of the days that could not be fetched, kept across
/// runs so they can be retried by hand.  Lines look like
/// `2025-03-14 - <url> - <reason>`.
#[derive(Debug, Clone)]
pub struct MissedFileLog {
    path: PathBuf,
}

impl MissedFileLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        MissedFileLog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, date: Date, url: &str, reason: &str) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let reason = reason.replace(['\r', '\n'], " ");
        writeln!(file, "{} - {} - {}", date, url, reason)
    }

    /// All records so far, lines that don't start with a date are skipped.
    pub fn records(&self) -> io::Result<Vec<MissedFile>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e),
        };
        Ok(content
            .lines()
            .filter_map(|line| {
                let (date, reason) = line.split_once(" - ")?;
                Some(MissedFile {
                    date: date.trim().parse().ok()?,
                    reason: reason.to_string(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use jiff::civil::date;

    use super::*;

    #[test]
    fn append_accumulates() -> Result<(), Box<dyn Error>> {
        let scratch = tempfile::tempdir()?;
        let log = MissedFileLog::new(scratch.path().join("logs/missed_files.txt"));
        assert!(log.records()?.is_empty());

        log.append(date(2025, 3, 17), "https://x/5899/WEBPXTICK_DT.zip", "HTTP 404")?;
        log.append(date(2025, 3, 18), "https://x/5900/WEBPXTICK_DT.zip", "bad\nzip")?;

        let content = fs::read_to_string(log.path())?;
        assert_eq!(content.lines().count(), 2);
        let records = log.records()?;
        assert_eq!(records[0].date, date(2025, 3, 17));
        assert_eq!(records[0].reason, "https://x/5899/WEBPXTICK_DT.zip - HTTP 404");
        assert_eq!(records[1].reason, "https://x/5900/WEBPXTICK_DT.zip - bad zip");

        // a second instance keeps appending to the same file
        MissedFileLog::new(log.path()).append(date(2025, 3, 19), "u", "timeout")?;
        assert_eq!(log.records()?.len(), 3);
        Ok(())
    }
}
