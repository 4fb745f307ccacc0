//! Data logging service.
//!
//! Drive tasks log through a [`LogHandle`], which pushes fixed-size events
//! into a bounded `crossbeam-channel` queue with `try_send` and never blocks.
//! A full queue drops the event and bumps a shared counter. The
//! [`DataLoggingService`] drains the queue on its own lower-priority thread
//! into a [`LogSink`].

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use cia402_common::log::{LogEvent, LogMsgType, LogStatus};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::interfaces::DataLogging;

/// Bounded logging queue factory.
pub struct LogQueue;

impl LogQueue {
    /// Create a queue holding at most `capacity` events.
    pub fn bounded(capacity: usize) -> (LogHandle, DataLoggingService) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        (
            LogHandle {
                tx,
                dropped: Arc::clone(&dropped),
                slave: None,
            },
            DataLoggingService { rx, dropped },
        )
    }
}

// ─── Producer ───────────────────────────────────────────────────────

/// Producer side of the logging queue.
#[derive(Debug, Clone)]
pub struct LogHandle {
    tx: Sender<LogEvent>,
    dropped: Arc<AtomicU64>,
    slave: Option<u16>,
}

impl LogHandle {
    /// Handle that tags every event with `slave`.
    pub fn for_slave(&self, slave: u16) -> Self {
        Self {
            slave: Some(slave),
            ..self.clone()
        }
    }

    /// Events dropped so far because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue one event without blocking.
    pub fn send(&self, kind: LogMsgType, msg: &str, timestamp_ns: u64) -> LogStatus {
        let event = LogEvent::new(kind, self.slave, msg, timestamp_ns);
        match self.tx.try_send(event) {
            Ok(()) => LogStatus::Queued,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                LogStatus::Dropped
            }
            Err(TrySendError::Disconnected(_)) => LogStatus::Closed,
        }
    }
}

impl DataLogging for LogHandle {
    fn log_user_command(&self, msg: &str, timestamp_ns: u64) -> LogStatus {
        self.send(LogMsgType::Command, msg, timestamp_ns)
    }

    fn log_error(&self, msg: &str, timestamp_ns: u64) -> LogStatus {
        self.send(LogMsgType::Error, msg, timestamp_ns)
    }

    fn log_data(&self, msg: &str, timestamp_ns: u64) -> LogStatus {
        self.send(LogMsgType::Data, msg, timestamp_ns)
    }
}

// ─── Sinks ──────────────────────────────────────────────────────────

/// Destination of drained log events.
pub trait LogSink: Send {
    fn write(&mut self, event: &LogEvent);

    fn flush(&mut self) {}
}

fn kind_name(kind: LogMsgType) -> &'static str {
    match kind {
        LogMsgType::Command => "COMMAND",
        LogMsgType::Error => "ERROR",
        LogMsgType::Data => "DATA",
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&mut self, event: &LogEvent) {
        let slave = event.slave_id.map(i32::from).unwrap_or(-1);
        let ts = event.timestamp_ns;
        let msg = event.message.as_str();
        match event.kind {
            LogMsgType::Command => info!(target: "drive_log", slave, ts, "COMMAND {msg}"),
            LogMsgType::Error => error!(target: "drive_log", slave, ts, "ERROR {msg}"),
            LogMsgType::Data => debug!(target: "drive_log", slave, ts, "DATA {msg}"),
        }
    }
}

/// Appends one line per event to a file.
pub struct FileSink {
    out: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::options().create(true).append(true).open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }
}

impl LogSink for FileSink {
    fn write(&mut self, event: &LogEvent) {
        let slave = event
            .slave_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        if let Err(e) = writeln!(
            self.out,
            "{} {} slave={} {}",
            event.timestamp_ns,
            kind_name(event.kind),
            slave,
            event.message
        ) {
            warn!(error = %e, "log file write failed");
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.out.flush() {
            warn!(error = %e, "log file flush failed");
        }
    }
}

/// Keeps events in memory; clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    /// Events of one kind.
    pub fn of_kind(&self, kind: LogMsgType) -> Vec<LogEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

impl LogSink for MemorySink {
    fn write(&mut self, event: &LogEvent) {
        self.events.lock().push(event.clone());
    }
}

// ─── Consumer ───────────────────────────────────────────────────────

/// Consumer side of the logging queue.
#[derive(Debug)]
pub struct DataLoggingService {
    rx: Receiver<LogEvent>,
    dropped: Arc<AtomicU64>,
}

impl DataLoggingService {
    /// Write every queued event without waiting. Returns the number written.
    pub fn drain<S: LogSink + ?Sized>(&self, sink: &mut S) -> usize {
        let mut n = 0;
        for event in self.rx.try_iter() {
            sink.write(&event);
            n += 1;
        }
        if n > 0 {
            sink.flush();
        }
        n
    }

    /// Block until every producer is dropped. Returns the number written.
    pub fn run<S: LogSink + ?Sized>(self, sink: &mut S) -> u64 {
        let mut n = 0u64;
        for event in self.rx.iter() {
            sink.write(&event);
            n += 1;
            if self.rx.is_empty() {
                sink.flush();
            }
        }
        sink.flush();

        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!(dropped, "log events dropped on full queue");
        }
        info!(written = n, "data logging service stopped");
        n
    }

    /// Run on a dedicated thread.
    pub fn spawn<S: LogSink + 'static>(self, mut sink: S) -> io::Result<JoinHandle<u64>> {
        thread::Builder::new()
            .name("drive-log".to_string())
            .spawn(move || self.run(&mut sink))
    }
}
