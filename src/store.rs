#![forbid(unsafe_code)]

//! Deferred cleanup of downloaded video files.
//!
//! Files dropped into the videos directory are served for a fixed lifetime
//! and then deleted by a one-shot background task. Deletion is strictly
//! best-effort: whoever requested the file is long gone by the time the
//! timer fires, so failures are logged and swallowed. A deletion racing an
//! in-flight ranged read is accepted; the reader sees a short body, not a
//! crash.

use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Tracks pending cleanups for files under a single videos root.
///
/// Cheap to clone; all clones share the pending-cleanup map.
#[derive(Clone)]
pub struct ExpiringStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    root: PathBuf,
    lifetime: Duration,
    // Generation numbers disambiguate a cleanup firing at the same instant
    // a name is re-registered: a finished task only removes its own entry.
    generation: AtomicU64,
    pending: Mutex<HashMap<String, (u64, CancellationToken)>>,
}

impl ExpiringStore {
    /// Creates the store, making sure the videos directory exists.
    pub fn new(root: impl Into<PathBuf>, lifetime: Duration) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("creating videos directory {}", root.display()))?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                root,
                lifetime,
                generation: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn lifetime(&self) -> Duration {
        self.inner.lifetime
    }

    /// Resolves a stored filename to its on-disk path, or `None` when the
    /// name is not a plain file name (path traversal, absolute paths, ...).
    /// Existence is not checked here; streaming reports missing files.
    pub fn path_for(&self, filename: &str) -> Option<PathBuf> {
        if !is_safe_file_name(filename) {
            return None;
        }
        Some(self.inner.root.join(filename))
    }

    /// Registers a filename and schedules its deletion `lifetime` from now.
    ///
    /// Returns the path the caller should write the file to. Registering the
    /// same name again restarts the clock: the earlier cleanup is cancelled
    /// and replaced.
    pub fn register(&self, filename: &str) -> Result<PathBuf> {
        let Some(path) = self.path_for(filename) else {
            bail!("refusing to track unsafe file name {filename:?}");
        };

        let token = CancellationToken::new();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = self
            .inner
            .pending
            .lock()
            .insert(filename.to_string(), (generation, token.clone()))
        {
            previous.cancel();
        }

        let inner = self.inner.clone();
        let name = filename.to_string();
        let task_path = path.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(inner.lifetime) => {}
            }
            delete_expired(&task_path);
            let mut pending = inner.pending.lock();
            if pending.get(&name).is_some_and(|(owner, _)| *owner == generation) {
                pending.remove(&name);
            }
        });

        Ok(path)
    }

    /// Cancels a pending cleanup, leaving the file on disk indefinitely.
    /// Returns false when no cleanup was pending for that name. This is the
    /// hook a future extend-lifetime-on-access feature would build on
    /// (cancel, then re-register).
    pub fn cancel_cleanup(&self, filename: &str) -> bool {
        match self.inner.pending.lock().remove(filename) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Removes an expired file. Already-absent files are success (the deletion
/// contract is idempotent); any other failure is logged and dropped because
/// no caller is waiting on this.
fn delete_expired(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "deleted expired video"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "failed to delete expired video");
        }
    }
}

/// A stored name must be a single normal path segment so it can never
/// escape the videos root.
fn is_safe_file_name(value: &str) -> bool {
    !value.is_empty()
        && Path::new(value)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        && Path::new(value).components().count() == 1
}
