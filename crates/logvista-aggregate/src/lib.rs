//! logvista Aggregate
//!
//! Combines every ingestor's output into one bounded history and a lossy
//! live broadcast to subscribers.

pub mod aggregator;
pub mod ring_buffer;
pub mod subscriber;

pub use aggregator::{Aggregator, AggregatorOptions};
pub use ring_buffer::RingBuffer;
pub use subscriber::Subscription;
