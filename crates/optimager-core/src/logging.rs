//! Log plumbing for acquisition runs
//!
//! Progress is reported only through `tracing` events. Two layers turn
//! those events into something the operator sees:
//!
//! - [`ChannelLayer`] forwards each event as a [`LogRecord`] over an
//!   unbounded channel that the control layer drains on every poll
//! - [`file_layer`] appends formatted lines to the current run's log file
//!   (see [`RunLogFile`])

use chrono_tz::Tz;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::{FmtContext, MakeWriter};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// One log event as shown to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Event level
    pub level: Level,
    /// Rendered message
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level, self.message)
    }
}

/// Layer sending every event down an mpsc channel
///
/// Sending never blocks; events are dropped silently once the receiver is
/// gone.
#[derive(Debug)]
pub struct ChannelLayer {
    sender: Sender<LogRecord>,
}

/// Create a [`ChannelLayer`] and the receiver for its records
pub fn channel_layer() -> (ChannelLayer, Receiver<LogRecord>) {
    let (sender, receiver) = mpsc::channel();
    (ChannelLayer { sender }, receiver)
}

impl<S: Subscriber> Layer<S> for ChannelLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let _ = self.sender.send(LogRecord {
            level: *event.metadata().level(),
            message: visitor.finish(),
        });
    }
}

/// Collects an event's `message` plus any extra fields as `key=value`
#[derive(Debug, Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.join(" ")
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

#[derive(Debug)]
struct ActiveLog {
    file: File,
    timezone: Tz,
}

/// Log file of the run in progress
///
/// Cloning shares the same slot. While no file is open every write is
/// discarded, so the layer can stay installed between runs.
#[derive(Debug, Clone, Default)]
pub struct RunLogFile {
    active: Arc<Mutex<Option<ActiveLog>>>,
}

impl RunLogFile {
    /// Create with no file open
    pub fn new() -> Self {
        Self::default()
    }

    /// Start appending to `path`, creating it if needed
    pub fn open(&self, path: &Path, timezone: Tz) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *self.lock() = Some(ActiveLog { file, timezone });
        Ok(())
    }

    /// Stop writing to the current file
    pub fn close(&self) {
        if let Some(mut active) = self.lock().take() {
            let _ = active.file.flush();
        }
    }

    /// Whether a file is open
    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    fn timezone(&self) -> Tz {
        self.lock().as_ref().map_or(Tz::UTC, |a| a.timezone)
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveLog>> {
        // A panic while holding the lock leaves the file usable
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Writer handed out by [`RunLogFile`]
#[derive(Debug)]
pub struct RunLogWriter {
    log: RunLogFile,
}

impl Write for RunLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.log.lock().as_mut() {
            Some(active) => active.file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.log.lock().as_mut() {
            Some(active) => active.file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for RunLogFile {
    type Writer = RunLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RunLogWriter { log: self.clone() }
    }
}

/// `<RFC 3339 timestamp>  <LEVEL> <message>` in the run's timezone
#[derive(Debug, Clone)]
pub struct RunLogFormat {
    log: RunLogFile,
}

impl<S, N> FormatEvent<S, N> for RunLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let stamp = crate::metadata::timestamp(&self.log.timezone());
        write!(writer, "{}  {} ", stamp, event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// fmt layer writing plain lines into `log`
pub fn file_layer<S>(log: RunLogFile) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .event_format(RunLogFormat { log: log.clone() })
        .with_writer(log)
}
