use chrono::{DateTime, Datelike, Duration, Local, NaiveDateTime, TimeZone, Utc};
use logvista_core::{LogEvent, Severity, SourceKind};
use regex::Regex;
use std::sync::OnceLock;
use tracing::trace;

/// Fields pulled out of a traditional syslog line prefix
#[derive(Debug, Clone, PartialEq)]
pub struct SyslogPrefix {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub process: String,
    pub pid: Option<u32>,
    pub message: String,
}

static SYSLOG_REGEX: OnceLock<Regex> = OnceLock::new();
static SEVERITY_KEYWORDS: OnceLock<Vec<(Severity, Regex)>> = OnceLock::new();

fn get_syslog_regex() -> &'static Regex {
    SYSLOG_REGEX.get_or_init(|| {
        // Jan  1 00:00:00 hostname process[pid]: message
        Regex::new(
            r"^(?:<\d{1,3}>)?(?P<timestamp>[A-Za-z]{3}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+(?P<hostname>\S+)\s+(?P<process>[^\s\[:]+)(?:\[(?P<pid>\d+)\])?:\s*(?P<message>.*)$",
        )
        .expect("syslog pattern is valid")
    })
}

fn get_severity_keywords() -> &'static [(Severity, Regex)] {
    SEVERITY_KEYWORDS.get_or_init(|| {
        // Most severe first; the first group found anywhere in the line wins.
        // Substrings match, so "db_error", "E_WARNING" and "stderr" all count,
        // and "emerg", "crit", "err" and "warn" cover their longer spellings.
        [
            (Severity::Emergency, r"(?i)emerg"),
            (Severity::Alert, r"(?i)alert"),
            (Severity::Critical, r"(?i)crit"),
            (Severity::Error, r"(?i)err"),
            (Severity::Warning, r"(?i)warn"),
            (Severity::Notice, r"(?i)notice"),
            (Severity::Info, r"(?i)info"),
            (Severity::Debug, r"(?i)debug|trace"),
        ]
        .into_iter()
        .map(|(severity, pattern)| {
            (severity, Regex::new(pattern).expect("severity pattern is valid"))
        })
        .collect()
    })
}

/// Scan a line for severity keywords in descending severity order.
///
/// Returns `Severity::Unknown` when no keyword is present.
pub fn detect_severity(line: &str) -> Severity {
    get_severity_keywords()
        .iter()
        .find(|(_, regex)| regex.is_match(line))
        .map(|(severity, _)| *severity)
        .unwrap_or(Severity::Unknown)
}

/// Parse a `Mon D HH:MM:SS host process[pid]: message` prefix.
///
/// The syslog timestamp has no year, so the current one is assumed; a
/// result more than a day in the future is moved back a year, which keeps
/// December lines read in January in the right place.
pub fn parse_syslog_prefix(line: &str) -> Option<SyslogPrefix> {
    let caps = get_syslog_regex().captures(line)?;

    let timestamp = caps
        .name("timestamp")
        .and_then(|m| parse_syslog_timestamp(m.as_str(), Local::now()))
        .unwrap_or_else(Utc::now);

    Some(SyslogPrefix {
        timestamp,
        hostname: caps.name("hostname")?.as_str().to_string(),
        process: caps.name("process")?.as_str().to_string(),
        pid: caps.name("pid").and_then(|m| m.as_str().parse().ok()),
        message: caps
            .name("message")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
    })
}

fn parse_syslog_timestamp(raw: &str, now: DateTime<Local>) -> Option<DateTime<Utc>> {
    // "Jan  2 15:04:05" -> "Jan 2 15:04:05"
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let at_year = |year: i32| -> Option<DateTime<Local>> {
        let naive =
            NaiveDateTime::parse_from_str(&format!("{} {}", year, normalized), "%Y %b %d %H:%M:%S")
                .ok()?;
        Local.from_local_datetime(&naive).earliest()
    };

    let mut parsed = at_year(now.year())?;
    if parsed > now + Duration::days(1) {
        parsed = at_year(now.year() - 1)?;
    }
    Some(parsed.with_timezone(&Utc))
}

/// Turn one text line into an event.
///
/// A recognised syslog prefix supplies timestamp, host, process and pid;
/// otherwise the whole line is the message, stamped with the current time.
/// Severity always comes from the keyword scan over the full line.
pub fn parse_line(line: &str, source: &str, kind: SourceKind) -> LogEvent {
    let mut event = LogEvent::new(source, kind, line).with_raw(line);

    match parse_syslog_prefix(line) {
        Some(prefix) => {
            event.timestamp = prefix.timestamp;
            event.message = prefix.message;
            event.hostname = Some(prefix.hostname);
            event.pid = prefix.pid;
            event.metadata.insert("process".to_string(), prefix.process);
        }
        None => {
            trace!(source = %source, "No syslog prefix, using raw line as message");
        }
    }

    event.severity = detect_severity(line);
    event
}
