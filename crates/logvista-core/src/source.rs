use crate::error::IngestionError;
use crate::event::{Severity, SourceKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_enabled() -> bool {
    true
}

/// Declarative description of one log source.
///
/// Produced by the configuration layer and handed to the aggregator by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Unique, human-facing name; also the fan-out and filter key
    pub name: String,

    #[serde(rename = "type")]
    pub kind: SourceKind,

    /// File or directory to watch. Absent for the journal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Extra `journalctl` arguments, appended verbatim
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,

    /// File-name pattern for directory sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob: Option<String>,

    /// Minimum syslog priority to keep (0 = emergency ... 7 = debug)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

impl SourceDescriptor {
    fn with_kind(name: impl Into<String>, kind: SourceKind, path: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind,
            path,
            enabled: true,
            filters: Vec::new(),
            glob: None,
            priority: None,
        }
    }

    /// Describe the system journal
    pub fn journal(name: impl Into<String>) -> Self {
        Self::with_kind(name, SourceKind::Journal, None)
    }

    /// Describe a single tailed file
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::with_kind(name, SourceKind::File, Some(path.into()))
    }

    /// Describe a directory of tailed files
    pub fn directory(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::with_kind(name, SourceKind::Directory, Some(path.into()))
    }

    pub fn with_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters = filters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_glob(mut self, glob: impl Into<String>) -> Self {
        self.glob = Some(glob.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The configured path, or an error naming the source
    pub fn require_path(&self) -> Result<&Path, IngestionError> {
        self.path.as_deref().ok_or_else(|| IngestionError::InvalidSource {
            name: self.name.clone(),
            reason: format!("path is required for type {}", self.kind),
        })
    }

    /// Least severe level this source keeps, if a priority is configured
    pub fn min_severity(&self) -> Option<Severity> {
        self.priority.map(|p| Severity::from_priority(i64::from(p)))
    }

    /// Whether an event of the given severity passes the priority filter.
    ///
    /// Unknown severities cannot be judged and always pass.
    pub fn admits(&self, severity: Severity) -> bool {
        match self.min_severity() {
            Some(min) if severity != Severity::Unknown => severity >= min,
            _ => true,
        }
    }

    /// Check the descriptor is internally consistent
    pub fn validate(&self) -> Result<(), IngestionError> {
        let invalid = |reason: String| IngestionError::InvalidSource {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is required".to_string()));
        }
        if self.kind.requires_path() {
            match &self.path {
                Some(path) if !path.as_os_str().is_empty() => {}
                _ => return Err(invalid(format!("path is required for type {}", self.kind))),
            }
        }
        if let Some(priority) = self.priority {
            if priority > 7 {
                return Err(invalid(format!("priority {} is outside 0..=7", priority)));
            }
        }
        if self.glob.is_some() && self.kind != SourceKind::Directory {
            return Err(invalid("glob is only valid for directory sources".to_string()));
        }
        if !self.filters.is_empty() && self.kind != SourceKind::Journal {
            return Err(invalid("filters are only valid for journal sources".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let journal = SourceDescriptor::journal("System Journal");
        assert_eq!(journal.kind, SourceKind::Journal);
        assert!(journal.path.is_none());
        assert!(journal.enabled);

        let file = SourceDescriptor::file("auth", "/var/log/auth.log");
        assert_eq!(file.kind, SourceKind::File);
        assert_eq!(file.require_path().unwrap(), Path::new("/var/log/auth.log"));
    }

    #[test]
    fn test_validate() {
        assert!(SourceDescriptor::journal("j").validate().is_ok());
        assert!(SourceDescriptor::journal("").validate().is_err());
        assert!(SourceDescriptor::journal("j").with_priority(8).validate().is_err());
        assert!(SourceDescriptor::file("f", "").validate().is_err());
        assert!(SourceDescriptor::file("f", "/tmp/x").with_glob("*.log").validate().is_err());
        assert!(SourceDescriptor::directory("d", "/tmp").with_glob("*.log").validate().is_ok());

        let mut no_path = SourceDescriptor::directory("d", "/tmp");
        no_path.path = None;
        assert!(matches!(
            no_path.validate(),
            Err(IngestionError::InvalidSource { .. })
        ));
    }

    #[test]
    fn test_priority_filter() {
        let warn_and_up = SourceDescriptor::file("f", "/tmp/x").with_priority(4);
        assert_eq!(warn_and_up.min_severity(), Some(Severity::Warning));
        assert!(warn_and_up.admits(Severity::Error));
        assert!(warn_and_up.admits(Severity::Warning));
        assert!(!warn_and_up.admits(Severity::Info));
        assert!(warn_and_up.admits(Severity::Unknown));

        let everything = SourceDescriptor::file("f", "/tmp/x");
        assert!(everything.admits(Severity::Debug));
    }

    #[test]
    fn test_deserialize_defaults() {
        let descriptor: SourceDescriptor = toml::from_str(
            r#"
name = "nginx"
type = "directory"
path = "/var/log/nginx"
glob = "*.log"
"#,
        )
        .unwrap();
        assert!(descriptor.enabled);
        assert_eq!(descriptor.kind, SourceKind::Directory);
        assert_eq!(descriptor.glob.as_deref(), Some("*.log"));
        assert!(descriptor.filters.is_empty());
    }
}
