//! The write-ahead log: an append-only text file of mutating commands.
//!
//! Records are appended *before* the in-memory mutation they describe and
//! flushed line by line, so the log is durable up to the last complete
//! record. Replaying it over the latest snapshot reconstructs the table.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::command::Command;
use crate::error::Result;

#[derive(Debug)]
pub(crate) struct Wal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Wal {
    /// opens the log at `path` for appending, creating it if needed
    pub fn open(path: impl Into<PathBuf>) -> Result<Wal> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Wal {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// appends one record and flushes it out to the file
    pub fn append(&mut self, command: &Command) -> Result<()> {
        writeln!(self.writer, "{}", command)?;
        self.writer.flush()?;
        Ok(())
    }

    /// empties the log once a snapshot has durably captured its effects:
    /// the file is reopened truncating, closed, then reopened for appending
    pub fn truncate(&mut self) -> Result<()> {
        self.writer.flush()?;
        OpenOptions::new().write(true).truncate(true).open(&self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        // the old append handle closes when the writer is replaced
        self.writer = BufWriter::new(file);
        Ok(())
    }

    /// reads every well-formed record from the log at `path`, oldest first.
    /// a missing file is an empty log; malformed or partially written lines
    /// are skipped. replay never writes to the log.
    pub fn replay(path: &Path) -> Result<Vec<Command>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut commands = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    // usually a torn write at the tail; nothing after it can
                    // be trusted
                    warn!("stopping log replay on unreadable line: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match Command::parse(&line) {
                Some(command) => commands.push(command),
                None => warn!(record = %line, "skipping malformed log record"),
            }
        }
        Ok(commands)
    }
}
