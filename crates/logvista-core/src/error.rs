use thiserror::Error;

/// Core error types for logvista
#[derive(Debug, Error)]
pub enum LogVistaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ingestion error: {0}")]
    Ingestion(#[from] IngestionError),

    #[error("Aggregator error: {0}")]
    Aggregator(#[from] AggregatorError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by an ingestor while starting.
///
/// These are the only synchronous failures a source reports; anything that
/// goes wrong after a successful start is reflected in its health flag.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("Failed to spawn journal reader: {0}")]
    Spawn(String),

    #[error("File not accessible: {0}")]
    FileAccess(String),

    #[error("File watch error: {0}")]
    FileWatch(String),

    #[error("Invalid source '{name}': {reason}")]
    InvalidSource { name: String, reason: String },

    #[error("Source '{0}' already started")]
    AlreadyStarted(String),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Errors returned by the aggregator's management API
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("Aggregator already started")]
    AlreadyStarted,

    #[error("Aggregator has been stopped")]
    Stopped,

    #[error("Source '{0}' is already registered")]
    DuplicateSource(String),

    #[error("Source '{0}' is disabled")]
    SourceDisabled(String),

    #[error("Source failed to start: {0}")]
    Source(#[from] IngestionError),
}

/// Errors specific to output sinks
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Stdout write error: {0}")]
    Stdout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown output format '{0}', expected pretty, json or raw")]
    UnknownFormat(String),
}

/// Result type alias for logvista operations
pub type Result<T> = std::result::Result<T, LogVistaError>;
