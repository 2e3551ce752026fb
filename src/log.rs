//! JSON-lines event log.
//!
//! Records are handed to a writer thread over an unbounded channel so the
//! tracer never waits on disk while a tracee is stopped.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use tracing::warn;

use crate::event::LogRecord;

/// Where the tracer sends the records it decided to log.
pub trait EventSink {
    fn record(&mut self, record: LogRecord);
}

impl EventSink for Vec<LogRecord> {
    fn record(&mut self, record: LogRecord) {
        self.push(record);
    }
}

pub struct EventLog {
    tx: Option<Sender<LogRecord>>,
    writer: Option<JoinHandle<()>>,
}

impl EventLog {
    /// Append to `path`, or write to stderr when no path is given.
    pub fn open(path: Option<&Path>) -> io::Result<Self> {
        match path {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Ok(Self::to_writer(file))
            }
            None => Ok(Self::to_writer(io::stderr())),
        }
    }

    pub fn to_writer<W: Write + Send + 'static>(out: W) -> Self {
        let (tx, rx) = mpsc::channel::<LogRecord>();
        let writer = thread::spawn(move || {
            let mut out = BufWriter::new(out);
            let mut failed = false;
            for record in rx {
                let written = serde_json::to_writer(&mut out, &record)
                    .map_err(io::Error::from)
                    .and_then(|_| out.write_all(b"\n"));
                if let Err(e) = written {
                    if !failed {
                        warn!("event log write failed, further records may be lost: {e}");
                        failed = true;
                    }
                }
            }
            if let Err(e) = out.flush() {
                warn!("event log flush failed: {e}");
            }
        });
        Self {
            tx: Some(tx),
            writer: Some(writer),
        }
    }

    /// Flush everything sent so far and stop the writer thread.
    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        drop(self.tx.take());
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                warn!("event log writer panicked");
            }
        }
    }
}

impl EventSink for EventLog {
    fn record(&mut self, record: LogRecord) {
        if let Some(tx) = &self.tx {
            // the writer only goes away after close
            let _ = tx.send(record);
        }
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        self.finish();
    }
}
