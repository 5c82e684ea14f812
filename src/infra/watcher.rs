//! Filesystem watcher that batches change events and hands them to the
//! dispatcher registered for the changed file or its directory.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::cache::{rw_read, rw_write};

const SOURCE: &str = "infra::watcher";

/// Receives the changed paths of one batch.
pub type Dispatcher = Arc<dyn Fn(&[PathBuf]) + Send + Sync>;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to start watching")]
    Notify(#[from] notify::Error),
    #[error("`{}` is already watched", .path.display())]
    AlreadyWatched { path: PathBuf },
    #[error("`{}` does not name a file", .path.display())]
    NotAFile { path: PathBuf },
    #[error("cannot watch `{}`", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Default)]
struct Registry {
    files: HashMap<PathBuf, Dispatcher>,
    dirs: HashMap<PathBuf, Dispatcher>,
    /// Directories handed to notify. Files are watched through their parent.
    watched: HashSet<PathBuf>,
}

impl Registry {
    /// Group the relevant paths of `events` by the dispatcher responsible
    /// for them: an exact file registration wins over its directory.
    fn route(&self, events: Vec<Event>) -> Vec<(Dispatcher, Vec<PathBuf>)> {
        let mut batches: HashMap<PathBuf, (Dispatcher, Vec<PathBuf>)> = HashMap::new();
        for event in events {
            if is_noise(&event.kind) {
                continue;
            }
            for path in event.paths {
                let registered = self
                    .files
                    .get_key_value(&path)
                    .or_else(|| path.parent().and_then(|dir| self.dirs.get_key_value(dir)));
                let Some((key, dispatcher)) = registered else {
                    debug!(op = "watcher::route", path = %path.display(), "Change for unregistered path");
                    continue;
                };
                let batch = batches
                    .entry(key.clone())
                    .or_insert_with(|| (Arc::clone(dispatcher), Vec::new()));
                if !batch.1.contains(&path) {
                    batch.1.push(path);
                }
            }
        }
        batches.into_values().collect()
    }
}

fn is_noise(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_))
    )
}

pub struct FileWatcher {
    watcher: Mutex<RecommendedWatcher>,
    registry: Arc<RwLock<Registry>>,
    task: JoinHandle<()>,
}

impl FileWatcher {
    /// Start watching. Events arriving within `debounce` of the first one of
    /// a batch are delivered together. Must be called inside a tokio runtime.
    pub fn start(debounce: Duration) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            // The receiver only goes away on shutdown.
            let _ = tx.send(result);
        })?;
        let registry = Arc::new(RwLock::new(Registry::default()));
        let task = tokio::spawn(run(rx, Arc::clone(&registry), debounce));
        Ok(Self {
            watcher: Mutex::new(watcher),
            registry,
            task,
        })
    }

    /// Dispatch changes of files directly inside `dir`.
    pub fn watch_dir(&self, dir: &Path, dispatcher: Dispatcher) -> Result<(), WatchError> {
        // Events carry absolute paths, so registrations must too.
        let dir = canonical(dir)?;
        let mut registry = rw_write(&self.registry, SOURCE, "watch_dir");
        if registry.dirs.contains_key(&dir) {
            return Err(WatchError::AlreadyWatched { path: dir });
        }
        self.ensure_watched(&mut registry, &dir)?;
        debug!(op = "watcher::watch_dir", path = %dir.display(), "Watching");
        registry.dirs.insert(dir, dispatcher);
        Ok(())
    }

    /// Dispatch changes of `file`. The parent directory is watched so the
    /// registration survives the file being replaced by a rename.
    pub fn watch_file(&self, file: &Path, dispatcher: Dispatcher) -> Result<(), WatchError> {
        let name = file.file_name().ok_or_else(|| WatchError::NotAFile {
            path: file.to_path_buf(),
        })?;
        let parent = match file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let dir = canonical(parent)?;
        let path = dir.join(name);

        let mut registry = rw_write(&self.registry, SOURCE, "watch_file");
        if registry.files.contains_key(&path) {
            return Err(WatchError::AlreadyWatched { path });
        }
        self.ensure_watched(&mut registry, &dir)?;
        debug!(op = "watcher::watch_file", path = %path.display(), "Watching");
        registry.files.insert(path, dispatcher);
        Ok(())
    }

    fn ensure_watched(&self, registry: &mut Registry, dir: &Path) -> Result<(), WatchError> {
        if registry.watched.contains(dir) {
            return Ok(());
        }
        let mut watcher = match self.watcher.lock() {
            Ok(watcher) => watcher,
            Err(poisoned) => poisoned.into_inner(),
        };
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        registry.watched.insert(dir.to_path_buf());
        Ok(())
    }
}

fn canonical(path: &Path) -> Result<PathBuf, WatchError> {
    path.canonicalize().map_err(|source| WatchError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    registry: Arc<RwLock<Registry>>,
    debounce: Duration,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        let deadline = tokio::time::sleep(debounce);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                next = rx.recv() => match next {
                    Some(result) => batch.push(result),
                    None => break,
                },
            }
        }

        let mut events = Vec::with_capacity(batch.len());
        for result in batch {
            match result {
                Ok(event) => events.push(event),
                Err(err) => warn!(op = "watcher::run", error = %err, "Error while watching"),
            }
        }

        let routed = rw_read(&registry, SOURCE, "route").route(events);
        for (dispatcher, paths) in routed {
            // Dispatchers reload files and take blocking locks.
            let outcome = tokio::task::spawn_blocking(move || dispatcher(&paths)).await;
            if let Err(err) = outcome {
                error!(op = "watcher::dispatch", error = %err, "Dispatcher panicked");
            }
        }
    }
}
