use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Normalized severity of a log event.
///
/// Variants are declared from least specific to most severe so the derived
/// ordering is the severity order: `Unknown < Debug < ... < Emergency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Unknown,
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Severity {
    /// Map a syslog priority (0 = emergency ... 7 = debug) to a severity.
    ///
    /// Anything outside 0..=7 is `Unknown`.
    pub fn from_priority(priority: i64) -> Self {
        match priority {
            0 => Severity::Emergency,
            1 => Severity::Alert,
            2 => Severity::Critical,
            3 => Severity::Error,
            4 => Severity::Warning,
            5 => Severity::Notice,
            6 => Severity::Info,
            7 => Severity::Debug,
            _ => Severity::Unknown,
        }
    }

    /// The syslog priority for this severity, `None` for `Unknown`.
    pub fn to_priority(self) -> Option<u8> {
        match self {
            Severity::Emergency => Some(0),
            Severity::Alert => Some(1),
            Severity::Critical => Some(2),
            Severity::Error => Some(3),
            Severity::Warning => Some(4),
            Severity::Notice => Some(5),
            Severity::Info => Some(6),
            Severity::Debug => Some(7),
            Severity::Unknown => None,
        }
    }

    /// Short uppercase label used by the text renderers
    pub fn label(self) -> &'static str {
        match self {
            Severity::Unknown => "UNKNOWN",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Notice => "NOTICE",
            Severity::Warning => "WARN",
            Severity::Error => "ERROR",
            Severity::Critical => "CRIT",
            Severity::Alert => "ALERT",
            Severity::Emergency => "EMERG",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Severity {
    type Err = std::convert::Infallible;

    /// Lenient parse: names, common abbreviations and numeric priorities are
    /// accepted, everything else becomes `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(priority) = trimmed.parse::<i64>() {
            return Ok(Severity::from_priority(priority));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "emergency" | "emerg" | "panic" => Severity::Emergency,
            "alert" => Severity::Alert,
            "critical" | "crit" => Severity::Critical,
            "error" | "err" => Severity::Error,
            "warning" | "warn" => Severity::Warning,
            "notice" => Severity::Notice,
            "info" | "informational" => Severity::Info,
            "debug" | "trace" => Severity::Debug,
            _ => Severity::Unknown,
        };
        Ok(level)
    }
}

/// Kind of source an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[serde(rename = "journald", alias = "journal")]
    Journal,
    File,
    Directory,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Journal => "journald",
            SourceKind::File => "file",
            SourceKind::Directory => "directory",
        }
    }

    /// Whether descriptors of this kind must carry a filesystem path
    pub fn requires_path(self) -> bool {
        matches!(self, SourceKind::File | SourceKind::Directory)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized log event.
///
/// Built once by an ingestor and never modified afterwards; consumers get
/// clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// When the event happened (best effort), or when it was ingested
    pub timestamp: DateTime<Utc>,

    /// Human-facing source name
    pub source: String,

    pub kind: SourceKind,

    pub severity: Severity,

    pub message: String,

    /// The untouched input line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Originating unit or service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Source-specific extra fields
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl LogEvent {
    /// Create an event stamped with the current time and unknown severity
    pub fn new(source: impl Into<String>, kind: SourceKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            kind,
            severity: Severity::Unknown,
            message: message.into(),
            raw: None,
            pid: None,
            hostname: None,
            unit: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Add metadata to the event
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        let ordered = [
            Severity::Unknown,
            Severity::Debug,
            Severity::Info,
            Severity::Notice,
            Severity::Warning,
            Severity::Error,
            Severity::Critical,
            Severity::Alert,
            Severity::Emergency,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{:?} should be below {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_priority_table() {
        let expected = [
            Severity::Emergency,
            Severity::Alert,
            Severity::Critical,
            Severity::Error,
            Severity::Warning,
            Severity::Notice,
            Severity::Info,
            Severity::Debug,
        ];
        for (priority, severity) in expected.iter().enumerate() {
            assert_eq!(Severity::from_priority(priority as i64), *severity);
            assert_eq!(severity.to_priority(), Some(priority as u8));
        }
        assert_eq!(Severity::from_priority(8), Severity::Unknown);
        assert_eq!(Severity::from_priority(-1), Severity::Unknown);
        assert_eq!(Severity::Unknown.to_priority(), None);
    }

    #[test]
    fn test_severity_from_str_is_lenient() {
        assert_eq!("WARN".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!("crit".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!("3".parse::<Severity>().unwrap(), Severity::Error);
        assert_eq!("bogus".parse::<Severity>().unwrap(), Severity::Unknown);
    }

    #[test]
    fn test_severity_display() {
        assert_eq!(Severity::Warning.to_string(), "WARN");
        assert_eq!(Severity::Emergency.to_string(), "EMERG");
        assert_eq!(Severity::Unknown.to_string(), "UNKNOWN");
    }

    #[test]
    fn test_source_kind_names() {
        assert_eq!(SourceKind::Journal.to_string(), "journald");
        assert_eq!(SourceKind::File.to_string(), "file");
        assert_eq!(SourceKind::Directory.to_string(), "directory");
        assert!(!SourceKind::Journal.requires_path());
        assert!(SourceKind::Directory.requires_path());
    }

    #[test]
    fn test_event_builder() {
        let event = LogEvent::new("sshd", SourceKind::Journal, "Accepted publickey")
            .with_severity(Severity::Info)
            .with_pid(4242)
            .with_unit("ssh.service")
            .with_metadata("transport", "syslog");

        assert_eq!(event.source, "sshd");
        assert_eq!(event.severity, Severity::Info);
        assert_eq!(event.pid, Some(4242));
        assert_eq!(event.unit.as_deref(), Some("ssh.service"));
        assert_eq!(event.metadata.get("transport").map(String::as_str), Some("syslog"));
        assert!(event.raw.is_none());
    }

    #[test]
    fn test_event_json_skips_empty_fields() {
        let event = LogEvent::new("app", SourceKind::File, "hello");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"file\""));
        assert!(json.contains("\"severity\":\"unknown\""));
        assert!(!json.contains("\"pid\""));
        assert!(!json.contains("\"metadata\""));
    }
}
