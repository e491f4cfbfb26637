//! logvista Core
//!
//! Event model, source descriptors, the source contract, configuration and
//! error types shared by every logvista crate.

pub mod config;
pub mod error;
pub mod event;
pub mod source;
pub mod traits;

// Re-export commonly used types
pub use config::{Config, GeneralConfig};
pub use error::{AggregatorError, IngestionError, LogVistaError, OutputError, Result};
pub use event::{LogEvent, Severity, SourceKind};
pub use source::SourceDescriptor;
pub use traits::{EventSink, Source};
