//! Component K: file watcher glue. Wraps a cross-platform recursive watcher
//! rooted at the project's `watchRoot`, coalesces events with a short
//! debounce, and suppresses events for paths the scheduler just wrote itself.
//!
//! Grounded on the `notify` + `notify-debouncer-mini` + background-thread
//! pattern in
//! `examples/other_examples/9d27743f_oldnordic-magellan__src-watcher-mod.rs.rs`,
//! rewritten in this crate's terser, `tracing`-instrumented voice: no
//! pub/sub feature gate, no legacy single-path compatibility shim, a
//! `tokio::sync::mpsc` channel instead of `std::sync::mpsc` since every
//! downstream consumer here is async.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use thiserror::Error;
use tokio::sync::mpsc;

const DEBOUNCE: Duration = Duration::from_millis(10);
/// How long a path stays suppressed after the scheduler reports writing it
/// (§4.K: "writes produced by the tool itself... are suppressed for a grace
/// window to avoid self-triggered rebuilds").
const SELF_WRITE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("failed to start watching {path}: {source}")]
    Start {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// A coalesced, deduplicated, lexicographically sorted batch of changed paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    pub paths: Vec<PathBuf>,
}

#[derive(Default)]
struct SelfWrites {
    recent: Mutex<Vec<(PathBuf, Instant)>>,
}

impl SelfWrites {
    fn record(&self, path: PathBuf) {
        let mut recent = self.recent.lock().expect("self-write lock poisoned");
        recent.push((path, Instant::now()));
    }

    /// Consumes and returns whether `path` was written by the tool within the
    /// grace window; also sweeps expired entries.
    fn suppress(&self, path: &Path) -> bool {
        let mut recent = self.recent.lock().expect("self-write lock poisoned");
        let now = Instant::now();
        recent.retain(|(_, at)| now.duration_since(*at) < SELF_WRITE_GRACE);
        if let Some(pos) = recent.iter().position(|(p, _)| p == path) {
            recent.remove(pos);
            true
        } else {
            false
        }
    }
}

/// A running watcher. Dropping this stops the underlying thread (the
/// debouncer and its OS watch handles are torn down with it).
pub struct Watcher {
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    self_writes: Arc<SelfWrites>,
}

impl Watcher {
    /// Starts watching `root` recursively, returning the watcher (keep it
    /// alive for as long as events should keep flowing) and a channel of
    /// [`ChangeBatch`]es with self-writes already filtered out.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn start(root: &Path) -> Result<(Self, mpsc::UnboundedReceiver<ChangeBatch>), WatcherError> {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let self_writes = Arc::new(SelfWrites::default());
        let self_writes_for_thread = Arc::clone(&self_writes);

        let mut debouncer = new_debouncer(DEBOUNCE, move |result: notify_debouncer_mini::DebounceEventResult| {
            let Ok(events) = result else { return };
            let mut paths: BTreeSet<PathBuf> = BTreeSet::new();
            for event in events {
                if event.kind == DebouncedEventKind::AnyContinuous {
                    continue;
                }
                if self_writes_for_thread.suppress(&event.path) {
                    trace!(path = %event.path.display(), "suppressing self-triggered event");
                    continue;
                }
                paths.insert(event.path);
            }
            if !paths.is_empty() {
                let _ = batch_tx.send(ChangeBatch { paths: paths.into_iter().collect() });
            }
        })
        .map_err(|source| WatcherError::Start { path: root.to_path_buf(), source })?;

        debouncer
            .watcher()
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatcherError::Start { path: root.to_path_buf(), source })?;

        Ok((Self { _debouncer: debouncer, self_writes }, batch_rx))
    }

    /// Marks `path` as a tool-initiated write, so the next filesystem event
    /// for it within the grace window is dropped rather than re-triggering a
    /// compile.
    pub fn record_self_write(&self, path: PathBuf) {
        self.self_writes.record(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_write_is_suppressed_once_within_the_grace_window() {
        let writes = SelfWrites::default();
        let path = PathBuf::from("/proj/build/main.js");
        writes.record(path.clone());
        assert!(writes.suppress(&path));
        assert!(!writes.suppress(&path));
    }

    #[test]
    fn unrecorded_path_is_not_suppressed() {
        let writes = SelfWrites::default();
        assert!(!writes.suppress(&PathBuf::from("/proj/build/other.js")));
    }
}
