use crate::health::HealthFlag;
use crate::deliver;
use chrono::{DateTime, Utc};
use logvista_core::{EventSink, IngestionError, LogEvent, Severity, Source, SourceDescriptor, SourceKind};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Journal reader binary
pub const JOURNALCTL: &str = "journalctl";

/// Structured, follow, no-pager mode
pub const JOURNAL_BASE_ARGS: [&str; 4] = ["-o", "json", "-f", "--no-pager"];

/// Streams the system journal through a long-lived `journalctl` process
pub struct JournalIngestor {
    descriptor: SourceDescriptor,
    program: String,
    base_args: Vec<String>,
    health: HealthFlag,
    cancel: Mutex<Option<CancellationToken>>,
}

impl JournalIngestor {
    /// Create an ingestor that runs `journalctl -o json -f --no-pager`
    pub fn new(descriptor: SourceDescriptor) -> Self {
        Self {
            descriptor,
            program: JOURNALCTL.to_string(),
            base_args: JOURNAL_BASE_ARGS.iter().map(|a| a.to_string()).collect(),
            health: HealthFlag::new(),
            cancel: Mutex::new(None),
        }
    }

    /// Replace the program and its base arguments.
    ///
    /// Priority and filter arguments from the descriptor are still appended.
    pub fn with_command<I, S>(mut self, program: impl Into<String>, base_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.program = program.into();
        self.base_args = base_args.into_iter().map(Into::into).collect();
        self
    }

    /// Full argument list passed to the program
    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.base_args.clone();
        if let Some(priority) = self.descriptor.priority {
            args.push(format!("--priority={}", priority));
        }
        args.extend(self.descriptor.filters.iter().cloned());
        args
    }
}

impl Source for JournalIngestor {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn start(&self, cancel: CancellationToken, sink: EventSink) -> Result<(), IngestionError> {
        let mut slot = self.cancel.lock();
        if slot.is_some() {
            return Err(IngestionError::AlreadyStarted(self.descriptor.name.clone()));
        }

        let args = self.command_args();
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| IngestionError::Spawn(format!("{}: {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| IngestionError::Spawn(format!("{}: stdout not captured", self.program)))?;

        let token = cancel.child_token();
        *slot = Some(token.clone());
        self.health.set(true);

        info!(
            source = %self.descriptor.name,
            program = %self.program,
            args = ?args,
            pid = ?child.id(),
            "Started journal reader"
        );

        tokio::spawn(read_loop(
            stdout,
            self.descriptor.name.clone(),
            sink,
            token.clone(),
            self.health.clone(),
        ));
        tokio::spawn(wait_loop(
            child,
            self.descriptor.name.clone(),
            token,
            self.health.clone(),
        ));

        Ok(())
    }

    fn stop(&self) {
        if let Some(token) = self.cancel.lock().as_ref() {
            if !token.is_cancelled() {
                debug!(source = %self.descriptor.name, "Stopping journal reader");
            }
            token.cancel();
        }
        self.health.set(false);
    }

    fn healthy(&self) -> bool {
        self.health.get()
    }
}

/// Read journal lines until EOF, a read error or cancellation
async fn read_loop(
    stdout: ChildStdout,
    name: String,
    sink: EventSink,
    cancel: CancellationToken,
    health: HealthFlag,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut forwarded: u64 = 0;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.next_line() => next,
        };

        match next {
            Ok(Some(line)) => {
                if line.is_empty() {
                    continue;
                }
                let Some(event) = parse_journal_line(&line, &name) else {
                    trace!(source = %name, "Skipping malformed journal line");
                    continue;
                };
                if !deliver(&sink, &cancel, event).await {
                    break;
                }
                forwarded += 1;
            }
            Ok(None) => {
                debug!(source = %name, "Journal stream ended");
                break;
            }
            Err(e) => {
                warn!(source = %name, error = %e, "Error reading journal stream");
                break;
            }
        }
    }

    health.set(false);
    debug!(source = %name, forwarded, "Journal reader finished");
}

/// Wait for the process to exit, killing it on cancellation
async fn wait_loop(mut child: Child, name: String, cancel: CancellationToken, health: HealthFlag) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => info!(source = %name, %status, "Journal reader exited"),
                Err(e) => warn!(source = %name, error = %e, "Failed to wait for journal reader"),
            }
        }
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!(source = %name, error = %e, "Failed to kill journal reader");
            }
        }
    }
    health.set(false);
}

#[derive(Debug, Deserialize)]
struct JournalRecord {
    #[serde(rename = "__REALTIME_TIMESTAMP")]
    realtime_timestamp: Option<Value>,
    #[serde(rename = "PRIORITY")]
    priority: Option<Value>,
    #[serde(rename = "MESSAGE")]
    message: Option<Value>,
    #[serde(rename = "SYSLOG_IDENTIFIER")]
    syslog_identifier: Option<Value>,
    #[serde(rename = "_SYSTEMD_UNIT")]
    systemd_unit: Option<Value>,
    #[serde(rename = "_PID")]
    pid: Option<Value>,
    #[serde(rename = "_HOSTNAME")]
    hostname: Option<Value>,
    #[serde(rename = "_TRANSPORT")]
    transport: Option<Value>,
}

/// Journal fields are usually strings, but numbers appear in some exports and
/// non-UTF-8 payloads arrive as byte arrays.
fn field_string(value: &Option<Value>) -> Option<String> {
    match value.as_ref()? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let bytes: Option<Vec<u8>> = items
                .iter()
                .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect();
            bytes.map(|b| String::from_utf8_lossy(&b).into_owned())
        }
        _ => None,
    }
}

fn field_i64(value: &Option<Value>) -> Option<i64> {
    match value.as_ref()? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Convert one `journalctl -o json` line into an event.
///
/// Returns `None` when the line is not a JSON object.
pub fn parse_journal_line(line: &str, fallback_source: &str) -> Option<LogEvent> {
    let record: JournalRecord = serde_json::from_str(line).ok()?;

    let timestamp = field_i64(&record.realtime_timestamp)
        .and_then(DateTime::<Utc>::from_timestamp_micros)
        .unwrap_or_else(Utc::now);

    let severity = field_i64(&record.priority)
        .map(Severity::from_priority)
        .unwrap_or(Severity::Unknown);

    let source = field_string(&record.syslog_identifier)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback_source.to_string());

    let mut event = LogEvent::new(
        source,
        SourceKind::Journal,
        field_string(&record.message).unwrap_or_default(),
    )
    .with_timestamp(timestamp)
    .with_severity(severity)
    .with_raw(line);

    event.unit = field_string(&record.systemd_unit).filter(|s| !s.is_empty());
    event.hostname = field_string(&record.hostname).filter(|s| !s.is_empty());
    event.pid = field_i64(&record.pid).and_then(|p| u32::try_from(p).ok());
    if let Some(transport) = field_string(&record.transport) {
        event.metadata.insert("transport".to_string(), transport);
    }

    Some(event)
}
