//! logvista Ingestion
//!
//! Input sources for the logvista engine: the system journal, single tailed
//! files and directories of tailed files.

pub mod directory;
pub mod factory;
pub mod file;
pub mod health;
pub mod journal;
pub mod syslog;

pub use directory::DirectoryIngestor;
pub use factory::build_source;
pub use file::FileIngestor;
pub use health::HealthFlag;
pub use journal::JournalIngestor;

use logvista_core::{EventSink, LogEvent};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Default capacity of the shared intake queue
pub const DEFAULT_CHANNEL_SIZE: usize = 1_000;

/// Create a new channel for log events
pub fn create_event_channel(buffer_size: usize) -> (EventSink, mpsc::Receiver<LogEvent>) {
    mpsc::channel(buffer_size.max(1))
}

/// Outcome of a non-blocking send into the intake queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Sent,
    Dropped,
    Closed,
}

/// Try to enqueue without waiting; a full queue drops the event
pub(crate) fn offer(sink: &EventSink, event: LogEvent) -> Offer {
    match sink.try_send(event) {
        Ok(()) => Offer::Sent,
        Err(TrySendError::Full(_)) => Offer::Dropped,
        Err(TrySendError::Closed(_)) => Offer::Closed,
    }
}

/// Wait for queue space, giving up on cancellation.
///
/// Returns `false` when the caller should stop producing.
pub(crate) async fn deliver(sink: &EventSink, cancel: &CancellationToken, event: LogEvent) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = sink.send(event) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logvista_core::SourceKind;

    fn event(message: &str) -> LogEvent {
        LogEvent::new("test", SourceKind::File, message)
    }

    #[test]
    fn test_offer_outcomes() {
        let (sender, receiver) = create_event_channel(1);
        assert_eq!(offer(&sender, event("a")), Offer::Sent);
        assert_eq!(offer(&sender, event("b")), Offer::Dropped);
        drop(receiver);
        assert_eq!(offer(&sender, event("c")), Offer::Closed);
    }

    #[tokio::test]
    async fn test_deliver_respects_cancellation_on_full_queue() {
        let (sender, mut receiver) = create_event_channel(1);
        let cancel = CancellationToken::new();

        assert!(deliver(&sender, &cancel, event("fills the queue")).await);

        let blocked = {
            let sender = sender.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { deliver(&sender, &cancel, event("waits")).await })
        };
        cancel.cancel();
        assert!(!blocked.await.unwrap());

        assert_eq!(receiver.recv().await.unwrap().message, "fills the queue");
        assert!(!deliver(&sender, &cancel, event("after cancel")).await);
    }
}
