use crate::health::HealthFlag;
use crate::syslog::parse_line;
use crate::{offer, Offer};
use logvista_core::{EventSink, IngestionError, Source, SourceDescriptor, SourceKind};
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File as TokioFile;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Pause between noticing a rotation and the first reopen attempt
pub const ROTATION_SETTLE: Duration = Duration::from_millis(100);

/// Pause between reopen attempts
pub const REOPEN_BACKOFF: Duration = Duration::from_millis(100);

/// Reopen attempts before a rotated file is given up on
pub const REOPEN_ATTEMPTS: u32 = 10;

/// How a rotated file is reopened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReopenPolicy {
    pub settle: Duration,
    pub backoff: Duration,
    pub attempts: u32,
}

impl Default for ReopenPolicy {
    fn default() -> Self {
        Self {
            settle: ROTATION_SETTLE,
            backoff: REOPEN_BACKOFF,
            attempts: REOPEN_ATTEMPTS,
        }
    }
}

/// Tails a single file with `tail -F` behaviour: follows appends, restarts on
/// truncation and reopens the path after rotation.
pub struct FileIngestor {
    descriptor: SourceDescriptor,
    reopen: ReopenPolicy,
    health: HealthFlag,
    cancel: Mutex<Option<CancellationToken>>,
}

impl FileIngestor {
    pub fn new(descriptor: SourceDescriptor) -> Self {
        Self {
            descriptor,
            reopen: ReopenPolicy::default(),
            health: HealthFlag::new(),
            cancel: Mutex::new(None),
        }
    }

    pub fn with_reopen_policy(mut self, policy: ReopenPolicy) -> Self {
        self.reopen = policy;
        self
    }
}

impl Source for FileIngestor {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn start(&self, cancel: CancellationToken, sink: EventSink) -> Result<(), IngestionError> {
        let mut slot = self.cancel.lock();
        if slot.is_some() {
            return Err(IngestionError::AlreadyStarted(self.descriptor.name.clone()));
        }

        let path = self.descriptor.require_path()?;
        let target = resolve_target(path)?;
        let tail = Tail::open_at_end(&target).map_err(|e| {
            IngestionError::FileAccess(format!("{}: {}", path.display(), e))
        })?;

        let dir = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let (watcher, events) = watch_directory(&dir)?;

        let token = cancel.child_token();
        *slot = Some(token.clone());
        self.health.set(true);

        info!(
            source = %self.descriptor.name,
            path = %target.display(),
            position = tail.offset,
            "Watching file"
        );

        let task = FileTask {
            descriptor: self.descriptor.clone(),
            target,
            tail,
            reopen: self.reopen,
            sink,
            cancel: token,
            health: self.health.clone(),
        };
        tokio::spawn(task.run(watcher, events));

        Ok(())
    }

    fn stop(&self) {
        if let Some(token) = self.cancel.lock().as_ref() {
            token.cancel();
        }
        self.health.set(false);
    }

    fn healthy(&self) -> bool {
        self.health.get()
    }
}

/// Canonical absolute path of the file, so it compares equal to the paths
/// notify reports for the watched directory
fn resolve_target(path: &Path) -> Result<PathBuf, IngestionError> {
    path.canonicalize()
        .map_err(|e| IngestionError::FileAccess(format!("{}: {}", path.display(), e)))
}

/// Watch a directory non-recursively, bridging notify's callback thread into
/// a tokio channel
pub(crate) fn watch_directory(
    dir: &Path,
) -> Result<(RecommendedWatcher, mpsc::Receiver<notify::Result<Event>>), IngestionError> {
    let (async_tx, async_rx) = mpsc::channel::<notify::Result<Event>>(256);

    let mut watcher = RecommendedWatcher::new(
        move |res| {
            // Runs on notify's own thread, outside the runtime
            let _ = async_tx.blocking_send(res);
        },
        Config::default(),
    )
    .map_err(|e| IngestionError::FileWatch(format!("Failed to create file watcher: {}", e)))?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| {
            IngestionError::FileWatch(format!("Failed to watch {}: {}", dir.display(), e))
        })?;

    Ok((watcher, async_rx))
}

/// What a filesystem event means for a tailed path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Change {
    Written,
    Created,
    Rotated,
    Ignored,
}

pub(crate) fn classify(kind: &EventKind) -> Change {
    match kind {
        EventKind::Remove(_) => Change::Rotated,
        EventKind::Modify(ModifyKind::Name(_)) => Change::Rotated,
        EventKind::Modify(_) => Change::Written,
        EventKind::Create(_) => Change::Created,
        _ => Change::Ignored,
    }
}

/// Device and inode of an open file, used to tell a rotated path apart
/// from the file already being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    #[cfg(unix)]
    pub(crate) fn of(metadata: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    pub(crate) fn of(_metadata: &std::fs::Metadata) -> Option<Self> {
        None
    }
}

/// Read position within one file
pub(crate) struct Tail {
    path: PathBuf,
    file: Option<TokioFile>,
    id: Option<FileId>,
    pub(crate) offset: u64,
}

impl Tail {
    /// Open and position at the current end; existing content is not replayed
    pub(crate) fn open_at_end(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let metadata = file.metadata()?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(TokioFile::from_std(file)),
            id: FileId::of(&metadata),
            offset: metadata.len(),
        })
    }

    /// Open and position at the start
    pub(crate) async fn open_at_start(path: &Path) -> std::io::Result<Self> {
        let file = TokioFile::open(path).await?;
        let id = FileId::of(&file.metadata().await?);
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            id,
            offset: 0,
        })
    }

    pub(crate) fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub(crate) fn close(&mut self) {
        self.file = None;
        self.id = None;
    }

    /// Reopen the same path from offset zero
    pub(crate) async fn reopen(&mut self) -> std::io::Result<()> {
        let file = TokioFile::open(&self.path).await?;
        self.id = FileId::of(&file.metadata().await?);
        self.file = Some(file);
        self.offset = 0;
        Ok(())
    }

    /// Whether the path still names the file held open.
    ///
    /// False once the path is gone or points at a different file. Without
    /// file identities only the path's existence can be checked.
    pub(crate) async fn is_current(&self) -> bool {
        if self.file.is_none() {
            return false;
        }
        let Ok(metadata) = tokio::fs::metadata(&self.path).await else {
            return false;
        };
        match (self.id, FileId::of(&metadata)) {
            (Some(open), Some(on_disk)) => open == on_disk,
            _ => true,
        }
    }

    /// Read every complete line appended since the last call.
    ///
    /// A file shorter than the recorded offset was truncated and is read from
    /// the start. A trailing line without its newline stays unread.
    pub(crate) async fn read_lines(&mut self) -> std::io::Result<Vec<String>> {
        let Some(file) = self.file.as_mut() else {
            return Ok(Vec::new());
        };

        let len = file.metadata().await?.len();
        if len < self.offset {
            info!(path = %self.path.display(), "File truncated, reading from start");
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut buf).await?;

        let mut lines = Vec::new();
        let mut consumed = 0usize;
        for chunk in buf.split_inclusive(|b| *b == b'\n') {
            if chunk.last() != Some(&b'\n') {
                break;
            }
            consumed += chunk.len();

            let text = String::from_utf8_lossy(chunk);
            let line = text.trim_end_matches(['\n', '\r']);
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        self.offset += consumed as u64;

        Ok(lines)
    }
}

/// Parse lines and offer them to the intake queue.
///
/// Lines below the descriptor's priority are dropped, as are lines that find
/// the queue full. Returns `false` once the queue is closed or the source is
/// cancelled.
pub(crate) fn forward_lines(
    lines: Vec<String>,
    descriptor: &SourceDescriptor,
    kind: SourceKind,
    file_name: Option<&str>,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> bool {
    let mut dropped = 0usize;

    for line in lines {
        if cancel.is_cancelled() {
            return false;
        }

        let mut event = parse_line(&line, &descriptor.name, kind);
        if !descriptor.admits(event.severity) {
            trace!(source = %descriptor.name, severity = %event.severity, "Below priority filter");
            continue;
        }
        if let Some(name) = file_name {
            event.metadata.insert("file".to_string(), name.to_string());
        }

        match offer(sink, event) {
            Offer::Sent => {}
            Offer::Dropped => dropped += 1,
            Offer::Closed => {
                warn!(source = %descriptor.name, "Channel closed, stopping file reader");
                return false;
            }
        }
    }

    if dropped > 0 {
        debug!(source = %descriptor.name, dropped, "Intake queue full, dropped lines");
    }
    true
}

/// State owned by a file ingestor's watch loop
struct FileTask {
    descriptor: SourceDescriptor,
    target: PathBuf,
    tail: Tail,
    reopen: ReopenPolicy,
    sink: EventSink,
    cancel: CancellationToken,
    health: HealthFlag,
}

impl FileTask {
    async fn run(
        mut self,
        watcher: RecommendedWatcher,
        mut events: mpsc::Receiver<notify::Result<Event>>,
    ) {
        // Keep the watcher alive for as long as the loop runs
        let _watcher = watcher;

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Some(Ok(event)) => {
                    if !event.paths.iter().any(|p| p == &self.target) {
                        continue;
                    }
                    if !self.handle_event(event).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!(source = %self.descriptor.name, error = %e, "File watch error");
                }
                None => break,
            }
        }

        self.health.set(false);
        debug!(source = %self.descriptor.name, "File watcher stopped");
    }

    /// Returns `false` when the loop should exit
    async fn handle_event(&mut self, event: Event) -> bool {
        debug!(source = %self.descriptor.name, kind = ?event.kind, "Received file event");

        let change = classify(&event.kind);
        match change {
            Change::Rotated => {
                if self.tail.is_current().await {
                    // Rename that left the path on the open file, e.g. the
                    // second notification of a rename already handled
                    return self.read_and_forward().await;
                }
                self.rotate().await
            }
            Change::Written | Change::Created => {
                if change == Change::Created && self.tail.is_open() && !self.tail.is_current().await {
                    // Replaced without a remove or rename being seen first
                    return self.rotate().await;
                }
                if !self.tail.is_open() {
                    // Idle after a failed rotation: each new event is another chance
                    match self.tail.reopen().await {
                        Ok(()) => {
                            info!(source = %self.descriptor.name, "File reopened");
                            self.health.set(true);
                        }
                        Err(e) => {
                            debug!(source = %self.descriptor.name, error = %e, "File still unavailable");
                            return true;
                        }
                    }
                }
                self.read_and_forward().await
            }
            Change::Ignored => true,
        }
    }

    /// Finish the old file, then switch to whatever now lives at the path
    async fn rotate(&mut self) -> bool {
        info!(source = %self.descriptor.name, path = %self.target.display(), "File rotated, reopening");
        if self.tail.is_open() && !self.read_and_forward().await {
            return false;
        }
        self.tail.close();

        if !self.reopen_with_retries().await {
            return !self.cancel.is_cancelled();
        }
        self.read_and_forward().await
    }

    async fn reopen_with_retries(&mut self) -> bool {
        if !self.pause(self.reopen.settle).await {
            return false;
        }

        for attempt in 1..=self.reopen.attempts {
            match self.tail.reopen().await {
                Ok(()) => {
                    info!(source = %self.descriptor.name, attempt, "File reopened after rotation");
                    self.health.set(true);
                    return true;
                }
                Err(e) => {
                    trace!(source = %self.descriptor.name, attempt, error = %e, "Reopen failed");
                    if attempt < self.reopen.attempts && !self.pause(self.reopen.backoff).await {
                        return false;
                    }
                }
            }
        }

        warn!(
            source = %self.descriptor.name,
            path = %self.target.display(),
            attempts = self.reopen.attempts,
            "Giving up on rotated file until it changes again"
        );
        self.health.set(false);
        false
    }

    /// Sleep unless cancelled first
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn read_and_forward(&mut self) -> bool {
        match self.tail.read_lines().await {
            Ok(lines) => {
                self.health.set(true);
                forward_lines(
                    lines,
                    &self.descriptor,
                    SourceKind::File,
                    None,
                    &self.sink,
                    &self.cancel,
                )
            }
            Err(e) => {
                error!(source = %self.descriptor.name, error = %e, "Error reading file");
                self.health.set(false);
                true
            }
        }
    }
}
