//! logvista Output
//!
//! Renders aggregated log events to stdout.

pub mod stdout;

pub use stdout::{OutputFormat, StdoutWriter};
