use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared health flag, written by an ingestor's background tasks and read by
/// anyone polling `Source::healthy`.
#[derive(Debug, Clone, Default)]
pub struct HealthFlag(Arc<AtomicBool>);

impl HealthFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, healthy: bool) {
        self.0.store(healthy, Ordering::Release);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
