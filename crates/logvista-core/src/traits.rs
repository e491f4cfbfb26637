use crate::error::IngestionError;
use crate::event::LogEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Sending half of the shared intake queue
pub type EventSink = mpsc::Sender<LogEvent>;

/// Capability every ingestion strategy exposes to the aggregator.
///
/// Implementations use interior mutability so a started source can be shared
/// behind an `Arc` and polled for health from any task.
pub trait Source: Send + Sync {
    /// Stable, human-facing identifier (the fan-out and filter key)
    fn name(&self) -> &str;

    /// Begin producing events into `sink`.
    ///
    /// Opens the underlying resource, spawns background tasks on the current
    /// Tokio runtime and returns. Failing to open or spawn the resource is the
    /// only error reported here. Cancelling `cancel` stops the source.
    fn start(&self, cancel: CancellationToken, sink: EventSink) -> Result<(), IngestionError>;

    /// Request shutdown. Idempotent, never blocks, safe before `start`.
    fn stop(&self);

    /// Whether the source is currently producing without transport failure
    fn healthy(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SourceKind;
    use fixture::StaticSource;

    mod fixture {
        use super::*;
        use std::sync::atomic::{AtomicBool, Ordering};

        pub struct StaticSource {
            pub running: AtomicBool,
        }

        impl Source for StaticSource {
            fn name(&self) -> &str {
                "static"
            }

            fn start(&self, cancel: CancellationToken, sink: EventSink) -> Result<(), IngestionError> {
                if self.running.swap(true, Ordering::SeqCst) {
                    return Err(IngestionError::AlreadyStarted(self.name().to_string()));
                }
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = sink.send(LogEvent::new("static", SourceKind::File, "hello")) => {}
                    }
                });
                Ok(())
            }

            fn stop(&self) {
                self.running.store(false, Ordering::SeqCst);
            }

            fn healthy(&self) -> bool {
                self.running.load(Ordering::SeqCst)
            }
        }
    }

    #[tokio::test]
    async fn test_source_trait_object() {
        let source: std::sync::Arc<dyn Source> = std::sync::Arc::new(StaticSource {
            running: Default::default(),
        });
        let (sender, mut receiver) = mpsc::channel(4);

        assert!(!source.healthy());
        source.start(CancellationToken::new(), sender.clone()).unwrap();
        assert!(source.healthy());
        assert!(matches!(
            source.start(CancellationToken::new(), sender),
            Err(IngestionError::AlreadyStarted(_))
        ));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.message, "hello");

        source.stop();
        source.stop();
        assert!(!source.healthy());
    }
}
