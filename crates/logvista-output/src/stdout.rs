use logvista_core::{LogEvent, OutputError};
use std::str::FromStr;
use tokio::io::{AsyncWriteExt, Stdout};
use tracing::trace;

/// Output format for stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// `[timestamp] [source] [LEVEL] message`
    #[default]
    Pretty,
    /// Compact JSON, one line per event
    Json,
    /// The original line, or the message when there is none
    Raw,
}

impl FromStr for OutputFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "raw" => Ok(Self::Raw),
            _ => Err(OutputError::UnknownFormat(s.to_string())),
        }
    }
}

/// Writes log events to stdout
pub struct StdoutWriter {
    format: OutputFormat,
    stdout: Stdout,
}

impl StdoutWriter {
    pub fn new() -> Self {
        Self::with_format(OutputFormat::default())
    }

    pub fn with_format(format: OutputFormat) -> Self {
        Self {
            format,
            stdout: tokio::io::stdout(),
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Write a single event followed by a newline
    pub async fn write(&mut self, event: &LogEvent) -> Result<(), OutputError> {
        let mut output = self.render(event)?;
        output.push('\n');

        self.stdout
            .write_all(output.as_bytes())
            .await
            .map_err(|e| OutputError::Stdout(e.to_string()))?;
        self.stdout
            .flush()
            .await
            .map_err(|e| OutputError::Stdout(e.to_string()))?;

        trace!(source = %event.source, "Wrote event to stdout");
        Ok(())
    }

    /// Render an event according to the output format
    pub fn render(&self, event: &LogEvent) -> Result<String, OutputError> {
        match self.format {
            OutputFormat::Pretty => Ok(format_pretty(event)),
            OutputFormat::Json => {
                serde_json::to_string(event).map_err(|e| OutputError::Serialization(e.to_string()))
            }
            OutputFormat::Raw => Ok(event.raw.clone().unwrap_or_else(|| event.message.clone())),
        }
    }
}

impl Default for StdoutWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn format_pretty(event: &LogEvent) -> String {
    format!(
        "[{}] [{}] [{}] {}",
        event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        event.source,
        event.severity,
        event.message
    )
}
