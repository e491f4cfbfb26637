use crate::error::LogVistaError;
use crate::source::SourceDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Smallest history the validator accepts
pub const MIN_BUFFER: usize = 100;

/// Directory under the user's config home holding the config file
pub const CONFIG_DIR: &str = "logvista";

/// Name of the config file inside `CONFIG_DIR`
pub const CONFIG_FILE: &str = "config.toml";

/// Main configuration for logvista
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Log sources, in declaration order
    pub sources: Vec<SourceDescriptor>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            sources: vec![SourceDescriptor::journal("System Journal")],
        }
    }
}

impl Config {
    /// Where the config lives when no path is given:
    /// `$XDG_CONFIG_HOME/logvista/config.toml`, else
    /// `$HOME/.config/logvista/config.toml`
    pub fn default_path() -> Result<PathBuf, LogVistaError> {
        resolve_default_path(std::env::var_os("XDG_CONFIG_HOME"), std::env::var_os("HOME"))
            .ok_or_else(|| {
                LogVistaError::Config(
                    "Cannot locate config: neither XDG_CONFIG_HOME nor HOME is set".to_string(),
                )
            })
    }

    /// Load from the default location, falling back to defaults when the file
    /// does not exist
    pub fn load() -> Result<Self, LogVistaError> {
        Self::load_or_default(&Self::default_path()?)
    }

    /// Write to the default location
    pub fn save(&self) -> Result<(), LogVistaError> {
        self.save_to(&Self::default_path()?)
    }

    /// Write as TOML, creating the parent directory if needed
    pub fn save_to(&self, path: &Path) -> Result<(), LogVistaError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                LogVistaError::Config(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        std::fs::write(path, self.to_toml()?)
            .map_err(|e| LogVistaError::Config(format!("Failed to write config file: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, LogVistaError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LogVistaError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, LogVistaError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, LogVistaError> {
        toml::from_str(content)
            .map_err(|e| LogVistaError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String, LogVistaError> {
        toml::to_string_pretty(self)
            .map_err(|e| LogVistaError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Check global limits and every source descriptor
    pub fn validate(&self) -> Result<(), LogVistaError> {
        if self.general.max_buffer < MIN_BUFFER {
            return Err(LogVistaError::Config(format!(
                "max_buffer must be at least {}",
                MIN_BUFFER
            )));
        }
        if self.general.intake_capacity == 0 {
            return Err(LogVistaError::Config(
                "intake_capacity must be greater than zero".to_string(),
            ));
        }
        if self.general.subscriber_capacity == 0 {
            return Err(LogVistaError::Config(
                "subscriber_capacity must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (index, source) in self.sources.iter().enumerate() {
            source
                .validate()
                .map_err(|e| LogVistaError::Config(format!("source {}: {}", index, e)))?;
            if !seen.insert(source.name.as_str()) {
                return Err(LogVistaError::Config(format!(
                    "source {}: duplicate name '{}'",
                    index, source.name
                )));
            }
        }
        Ok(())
    }

    /// Sources with `enabled = true`
    pub fn enabled_sources(&self) -> Vec<SourceDescriptor> {
        self.sources.iter().filter(|s| s.enabled).cloned().collect()
    }

    pub fn add_source(&mut self, source: SourceDescriptor) {
        self.sources.push(source);
    }

    /// Remove a source by name, returning whether one was removed
    pub fn remove_source(&mut self, name: &str) -> bool {
        match self.sources.iter().position(|s| s.name == name) {
            Some(index) => {
                self.sources.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn get_source(&self, name: &str) -> Option<&SourceDescriptor> {
        self.sources.iter().find(|s| s.name == name)
    }
}

fn resolve_default_path(config_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    let base = match config_home.filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => PathBuf::from(home.filter(|v| !v.is_empty())?).join(".config"),
    };
    Some(base.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Number of events retained in history
    pub max_buffer: usize,

    /// Capacity of the shared intake queue between ingestors and the aggregator
    pub intake_capacity: usize,

    /// Capacity of each subscriber's delivery queue
    pub subscriber_capacity: usize,

    /// Internal log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            max_buffer: 10_000,
            intake_capacity: 1_000,
            subscriber_capacity: 100,
            log_level: "warn".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SourceKind;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.max_buffer, 10_000);
        assert_eq!(config.general.intake_capacity, 1_000);
        assert_eq!(config.general.subscriber_capacity, 100);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].kind, SourceKind::Journal);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[general]
max_buffer = 500
"#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.general.max_buffer, 500);
        // Defaults should be applied
        assert_eq!(config.general.subscriber_capacity, 100);
        assert_eq!(config.sources.len(), 1);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[general]
max_buffer = 2000
log_level = "debug"

[[sources]]
name = "System Journal"
type = "journald"
filters = ["-u", "sshd"]
priority = 4

[[sources]]
name = "auth"
type = "file"
path = "/var/log/auth.log"
enabled = false

[[sources]]
name = "nginx"
type = "directory"
path = "/var/log/nginx"
glob = "*.log"
"#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.general.max_buffer, 2000);
        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.sources[0].filters, vec!["-u", "sshd"]);
        assert_eq!(config.sources[0].priority, Some(4));
        assert!(!config.sources[1].enabled);
        assert_eq!(config.sources[2].glob.as_deref(), Some("*.log"));
        assert!(config.validate().is_ok());

        let enabled = config.enabled_sources();
        assert_eq!(enabled.len(), 2);
        assert!(enabled.iter().all(|s| s.name != "auth"));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.general.max_buffer = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.general.subscriber_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.add_source(SourceDescriptor::journal("System Journal"));
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("duplicate"));

        let mut config = Config::default();
        let mut file = SourceDescriptor::file("app", "/tmp/app.log");
        file.path = None;
        config.add_source(file);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_type_rejected() {
        let toml = r#"
[[sources]]
name = "remote"
type = "tcp"
"#;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_add_remove_source() {
        let mut config = Config::default();
        config.add_source(SourceDescriptor::file("app", "/tmp/app.log"));
        assert!(config.get_source("app").is_some());
        assert!(config.remove_source("app"));
        assert!(!config.remove_source("app"));
        assert!(config.get_source("app").is_none());
    }

    #[test]
    fn test_roundtrip_through_file() {
        let mut config = Config::default();
        config.add_source(SourceDescriptor::directory("nginx", "/var/log/nginx").with_glob("*.log"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();
        file.flush().unwrap();

        let loaded = Config::from_file(file.path()).unwrap();
        assert_eq!(loaded.sources, config.sources);
        assert_eq!(loaded.general.max_buffer, config.general.max_buffer);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_save_to_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_DIR).join(CONFIG_FILE);

        let mut config = Config::default();
        config.general.max_buffer = 2500;
        config.add_source(SourceDescriptor::file("app", "/var/log/app.log").with_priority(4));
        config.save_to(&path).unwrap();

        let loaded = Config::load_or_default(&path).unwrap();
        assert_eq!(loaded.general.max_buffer, 2500);
        assert_eq!(loaded.sources, config.sources);
    }

    #[test]
    fn test_save_to_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = Config::default();
        config.save_to(&path).unwrap();
        config.remove_source("System Journal");
        config.add_source(SourceDescriptor::file("app", "/var/log/app.log"));
        config.save_to(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.sources.len(), 1);
        assert_eq!(loaded.sources[0].name, "app");
    }

    #[test]
    fn test_default_path_prefers_config_home() {
        let path = resolve_default_path(Some("/xdg".into()), Some("/home/ada".into())).unwrap();
        assert_eq!(path, PathBuf::from("/xdg/logvista/config.toml"));

        let path = resolve_default_path(None, Some("/home/ada".into())).unwrap();
        assert_eq!(path, PathBuf::from("/home/ada/.config/logvista/config.toml"));

        let path = resolve_default_path(Some("".into()), Some("/home/ada".into())).unwrap();
        assert_eq!(path, PathBuf::from("/home/ada/.config/logvista/config.toml"));

        assert!(resolve_default_path(None, None).is_none());
        assert!(resolve_default_path(None, Some("".into())).is_none());
    }

    #[test]
    fn test_default_path_and_saved_file_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = resolve_default_path(None, Some(dir.path().into())).unwrap();
        assert!(!path.exists());

        assert_eq!(Config::load_or_default(&path).unwrap().sources.len(), 1);

        Config::default().save_to(&path).unwrap();
        assert!(dir.path().join(".config").join(CONFIG_DIR).join(CONFIG_FILE).is_file());
    }
}
