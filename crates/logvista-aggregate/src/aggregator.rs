use crate::ring_buffer::RingBuffer;
use crate::subscriber::{SubscriberRegistry, Subscription};
use logvista_core::{
    AggregatorError, EventSink, GeneralConfig, LogEvent, Source, SourceDescriptor,
};
use logvista_ingestion::{build_source, create_event_channel, DEFAULT_CHANNEL_SIZE};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub type Result<T> = std::result::Result<T, AggregatorError>;

/// Sizes for the aggregator's buffers and queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorOptions {
    pub history_capacity: usize,
    pub intake_capacity: usize,
    pub subscriber_capacity: usize,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            history_capacity: crate::ring_buffer::DEFAULT_CAPACITY,
            intake_capacity: DEFAULT_CHANNEL_SIZE,
            subscriber_capacity: crate::subscriber::DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

impl From<&GeneralConfig> for AggregatorOptions {
    fn from(config: &GeneralConfig) -> Self {
        Self {
            history_capacity: config.max_buffer,
            intake_capacity: config.intake_capacity,
            subscriber_capacity: config.subscriber_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Constructed,
    Running,
    Stopped,
}

/// Merges every source into one history and fans each event out to
/// subscribers.
///
/// Sources write into a single bounded intake queue drained by one task,
/// which records each event in the ring buffer and then offers it to every
/// subscriber without waiting. A full subscriber queue loses that event; the
/// history and other subscribers are unaffected.
pub struct Aggregator {
    history: Arc<RingBuffer<LogEvent>>,
    subscribers: Arc<SubscriberRegistry>,
    sources: RwLock<HashMap<String, Arc<dyn Source>>>,
    intake: EventSink,
    receiver: Mutex<Option<mpsc::Receiver<LogEvent>>>,
    cancel: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Aggregator {
    /// Aggregator with the given history capacity and default queue sizes
    pub fn new(history_capacity: usize) -> Self {
        Self::with_options(AggregatorOptions {
            history_capacity,
            ..AggregatorOptions::default()
        })
    }

    pub fn with_options(options: AggregatorOptions) -> Self {
        let (intake, receiver) = create_event_channel(options.intake_capacity);

        Self {
            history: Arc::new(RingBuffer::new(options.history_capacity)),
            subscribers: Arc::new(SubscriberRegistry::new(options.subscriber_capacity)),
            sources: RwLock::new(HashMap::new()),
            intake,
            receiver: Mutex::new(Some(receiver)),
            cancel: CancellationToken::new(),
            lifecycle: Mutex::new(Lifecycle::Constructed),
            task: Mutex::new(None),
        }
    }

    /// Launch the aggregation task. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Constructed => {}
            Lifecycle::Running => return Err(AggregatorError::AlreadyStarted),
            Lifecycle::Stopped => return Err(AggregatorError::Stopped),
        }

        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or(AggregatorError::AlreadyStarted)?;

        let handle = tokio::spawn(aggregate(
            receiver,
            self.history.clone(),
            self.subscribers.clone(),
            self.cancel.clone(),
        ));
        *self.task.lock() = Some(handle);
        *lifecycle = Lifecycle::Running;

        info!(capacity = self.history.capacity(), "Aggregator started");
        Ok(())
    }

    /// Cancel everything, stop every source and close every subscriber.
    /// Calling it again is a no-op.
    pub fn stop(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == Lifecycle::Stopped {
                return;
            }
            *lifecycle = Lifecycle::Stopped;
        }

        self.cancel.cancel();

        let sources: Vec<Arc<dyn Source>> = self.sources.write().drain().map(|(_, s)| s).collect();
        for source in &sources {
            debug!(source = source.name(), "Stopping source");
            source.stop();
        }

        self.subscribers.close_all();
        self.receiver.lock().take();

        info!(
            sources = sources.len(),
            entries = self.history.count(),
            "Aggregator stopped"
        );
    }

    /// Wait for the aggregation task to finish after `stop`
    pub async fn join(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Aggregation task failed");
            }
        }
    }

    /// Build the ingestor for a descriptor, start it and register it
    pub fn add_source(&self, descriptor: SourceDescriptor) -> Result<()> {
        self.ensure_open()?;
        if !descriptor.enabled {
            return Err(AggregatorError::SourceDisabled(descriptor.name));
        }
        if self.sources.read().contains_key(&descriptor.name) {
            return Err(AggregatorError::DuplicateSource(descriptor.name));
        }

        let source = build_source(descriptor)?;
        self.register_source(source)
    }

    /// Start an already-built source and register it under its name.
    ///
    /// The source is started without holding the registry lock and only
    /// registered if starting succeeds.
    pub fn register_source(&self, source: Arc<dyn Source>) -> Result<()> {
        self.ensure_open()?;
        let name = source.name().to_string();
        if self.sources.read().contains_key(&name) {
            return Err(AggregatorError::DuplicateSource(name));
        }

        if let Err(e) = source.start(self.cancel.child_token(), self.intake.clone()) {
            warn!(source = %name, error = %e, "Source failed to start");
            return Err(e.into());
        }

        {
            let mut sources = self.sources.write();
            if !sources.contains_key(&name) && !self.cancel.is_cancelled() {
                sources.insert(name.clone(), source);
                drop(sources);
                info!(source = %name, "Source added");
                return Ok(());
            }
        }

        // Lost a race with another registration of the same name, or with stop
        source.stop();
        if self.cancel.is_cancelled() {
            Err(AggregatorError::Stopped)
        } else {
            Err(AggregatorError::DuplicateSource(name))
        }
    }

    /// Stop and forget a source; returns whether it was registered
    pub fn remove_source(&self, name: &str) -> bool {
        let removed = self.sources.write().remove(name);
        match removed {
            Some(source) => {
                source.stop();
                info!(source = %name, "Source removed");
                true
            }
            None => {
                debug!(source = %name, "No such source to remove");
                false
            }
        }
    }

    /// Registered source names in lexicographic order
    pub fn sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Health of every registered source, keyed by name
    pub fn source_health(&self) -> BTreeMap<String, bool> {
        self.sources
            .read()
            .iter()
            .map(|(name, source)| (name.clone(), source.healthy()))
            .collect()
    }

    /// Register a subscriber with the configured queue capacity
    pub fn subscribe(&self, id: &str) -> Result<Subscription> {
        self.ensure_open()?;
        Ok(self.subscribers.subscribe(id))
    }

    pub fn subscribe_with_capacity(&self, id: &str, capacity: usize) -> Result<Subscription> {
        self.ensure_open()?;
        Ok(self.subscribers.subscribe_with_capacity(id, capacity))
    }

    /// Close a subscriber's queue and forget it; returns whether it existed
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.subscribers.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Number of events currently held in history
    pub fn entry_count(&self) -> usize {
        self.history.count()
    }

    /// Read access to the history ring buffer
    pub fn history(&self) -> &RingBuffer<LogEvent> {
        &self.history
    }

    pub fn is_running(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Running
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.lifecycle.lock() == Lifecycle::Stopped {
            return Err(AggregatorError::Stopped);
        }
        Ok(())
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Drain the intake queue into history and subscribers until cancelled
async fn aggregate(
    mut receiver: mpsc::Receiver<LogEvent>,
    history: Arc<RingBuffer<LogEvent>>,
    subscribers: Arc<SubscriberRegistry>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = receiver.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        history.push(event.clone());
        let dropped = subscribers.broadcast(&event);
        if dropped > 0 {
            trace!(source = %event.source, dropped, "Event dropped for slow subscribers");
        }
    }

    debug!("Aggregation task finished");
}
