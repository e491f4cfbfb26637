use crate::file::{classify, forward_lines, watch_directory, Change, Tail};
use crate::health::HealthFlag;
use glob::Pattern;
use logvista_core::{EventSink, IngestionError, Source, SourceDescriptor, SourceKind};
use notify::{Event, RecommendedWatcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pattern used when a directory source names none
pub const DEFAULT_GLOB: &str = "*";

/// Tails every file in one directory whose name matches a glob.
///
/// Files present at start are followed from their end; files created later
/// are read from the beginning. Removed or renamed files stop being tracked,
/// and a new file appearing under a tracked name replaces the old one.
pub struct DirectoryIngestor {
    descriptor: SourceDescriptor,
    health: HealthFlag,
    cancel: Mutex<Option<CancellationToken>>,
}

impl DirectoryIngestor {
    pub fn new(descriptor: SourceDescriptor) -> Self {
        Self {
            descriptor,
            health: HealthFlag::new(),
            cancel: Mutex::new(None),
        }
    }

    fn pattern(&self) -> Result<Pattern, IngestionError> {
        let glob = self.descriptor.glob.as_deref().unwrap_or(DEFAULT_GLOB);
        Pattern::new(glob).map_err(|e| IngestionError::InvalidSource {
            name: self.descriptor.name.clone(),
            reason: format!("invalid glob '{}': {}", glob, e),
        })
    }
}

impl Source for DirectoryIngestor {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn start(&self, cancel: CancellationToken, sink: EventSink) -> Result<(), IngestionError> {
        let mut slot = self.cancel.lock();
        if slot.is_some() {
            return Err(IngestionError::AlreadyStarted(self.descriptor.name.clone()));
        }

        let path = self.descriptor.require_path()?;
        let dir = path
            .canonicalize()
            .map_err(|e| IngestionError::FileAccess(format!("{}: {}", path.display(), e)))?;
        if !dir.is_dir() {
            return Err(IngestionError::FileAccess(format!(
                "{}: not a directory",
                path.display()
            )));
        }
        let pattern = self.pattern()?;

        let (watcher, events) = watch_directory(&dir)?;
        let tails = open_existing(&dir, &pattern)?;

        let token = cancel.child_token();
        *slot = Some(token.clone());
        self.health.set(true);

        info!(
            source = %self.descriptor.name,
            path = %dir.display(),
            pattern = %pattern,
            files = tails.len(),
            "Watching directory"
        );

        let task = DirectoryTask {
            descriptor: self.descriptor.clone(),
            pattern,
            tails,
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

/// Open every matching regular file, positioned at its end
fn open_existing(dir: &Path, pattern: &Pattern) -> Result<HashMap<PathBuf, Tail>, IngestionError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| IngestionError::FileAccess(format!("{}: {}", dir.display(), e)))?;

    let mut tails = HashMap::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || !matches_name(pattern, &path) {
            continue;
        }
        match Tail::open_at_end(&path) {
            Ok(tail) => {
                debug!(path = %path.display(), position = tail.offset, "Tracking file");
                tails.insert(path, tail);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable file"),
        }
    }
    Ok(tails)
}

fn matches_name(pattern: &Pattern, path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| pattern.matches(name))
        .unwrap_or(false)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// State owned by a directory ingestor's watch loop
struct DirectoryTask {
    descriptor: SourceDescriptor,
    pattern: Pattern,
    tails: HashMap<PathBuf, Tail>,
    sink: EventSink,
    cancel: CancellationToken,
    health: HealthFlag,
}

impl DirectoryTask {
    async fn run(
        mut self,
        watcher: RecommendedWatcher,
        mut events: mpsc::Receiver<notify::Result<Event>>,
    ) {
        let _watcher = watcher;

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Some(Ok(event)) => {
                    if !self.handle_event(event).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!(source = %self.descriptor.name, error = %e, "Directory watch error");
                }
                None => break,
            }
        }

        self.health.set(false);
        debug!(source = %self.descriptor.name, "Directory watcher stopped");
    }

    /// Returns `false` when the loop should exit
    async fn handle_event(&mut self, event: Event) -> bool {
        let change = classify(&event.kind);
        if change == Change::Ignored {
            return true;
        }

        for path in event.paths {
            if !matches_name(&self.pattern, &path) {
                continue;
            }

            let keep_going = match change {
                Change::Written if self.tails.contains_key(&path) => self.read_and_forward(&path).await,
                Change::Rotated | Change::Created | Change::Written => self.refresh(path).await,
                Change::Ignored => true,
            };

            if !keep_going {
                return false;
            }
        }
        true
    }

    /// Bring the tail for a path in line with what is on disk.
    ///
    /// A tail whose file is still at the path just reads on. One whose file
    /// was removed, renamed away or replaced is drained and dropped, and a
    /// file now at the path is tracked from its start.
    async fn refresh(&mut self, path: PathBuf) -> bool {
        let current = match self.tails.get(&path) {
            Some(tail) => Some(tail.is_current().await),
            None => None,
        };
        if current == Some(true) {
            return self.read_and_forward(&path).await;
        }
        if current == Some(false) {
            // Lines written to the old file before it went away
            if !self.read_and_forward(&path).await {
                return false;
            }
            if self.tails.remove(&path).is_some() {
                info!(source = %self.descriptor.name, path = %path.display(), "Stopped tracking file");
            }
        }

        if !path.is_file() {
            return true;
        }
        match Tail::open_at_start(&path).await {
            Ok(tail) => {
                info!(source = %self.descriptor.name, path = %path.display(), "Tracking new file");
                self.tails.insert(path.clone(), tail);
                self.read_and_forward(&path).await
            }
            Err(e) => {
                debug!(source = %self.descriptor.name, path = %path.display(), error = %e, "Could not open new file");
                true
            }
        }
    }

    async fn read_and_forward(&mut self, path: &Path) -> bool {
        let Some(tail) = self.tails.get_mut(path) else {
            return true;
        };

        match tail.read_lines().await {
            Ok(lines) => forward_lines(
                lines,
                &self.descriptor,
                SourceKind::Directory,
                Some(&file_name(path)),
                &self.sink,
                &self.cancel,
            ),
            Err(e) => {
                warn!(source = %self.descriptor.name, path = %path.display(), error = %e, "Error reading file, dropping it");
                self.tails.remove(path);
                true
            }
        }
    }
}
